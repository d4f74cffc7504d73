//! # sonde-protocol
//!
//! Everything the checker and the checked program have to agree on.
//!
//! - [`message`]: the versioned control-channel schema
//! - [`channel`]: a packet socket that keeps message boundaries
//! - [`heap`]: memory layout of the heap-tracking table
//! - [`app`]: the checked-program side (channel client and tracking allocator)
//!
//! ## Why unsafe code is needed
//!
//! The channel is a raw `socketpair(2)` and the tracking allocator implements
//! `GlobalAlloc` over a static arena. Both sit directly on libc and raw memory.

#![allow(unsafe_code)] // socketpair/poll/recv and the GlobalAlloc shim

pub mod app;
pub mod channel;
pub mod error;
pub mod heap;
pub mod message;

pub use channel::Channel;
pub use error::ChannelError;
pub use message::{AppMessage, CheckerMessage, DecisionPoint, ENV_CHANNEL_FD, PROTOCOL_VERSION};
