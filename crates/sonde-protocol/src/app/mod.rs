//! Checked-program side of the protocol.
//!
//! A program under test links this module, installs [`TrackingAllocator`] as its
//! global allocator and talks to the checker through [`Client`]:
//!
//! ```rust,no_run
//! use sonde_protocol::app::{Client, TrackingAllocator};
//! use sonde_protocol::{CheckerMessage, DecisionPoint};
//!
//! #[global_allocator]
//! static ALLOCATOR: TrackingAllocator = TrackingAllocator;
//!
//! let client = Client::from_env()?;
//! if client.ready()? == CheckerMessage::Terminate {
//!     return Ok(());
//! }
//! let data = vec![1u8; 64];
//! client.decision(DecisionPoint::new(1, "after first allocation"))?;
//! drop(data);
//! client.finished()?;
//! # Ok::<(), sonde_protocol::ChannelError>(())
//! ```

mod allocator;
mod client;

pub use allocator::{table_address, tracked_blocks, untracked_blocks, TrackingAllocator, ARENA_SIZE, TABLE_CAPACITY};
pub use client::Client;
