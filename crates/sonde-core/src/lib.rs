//! # sonde-core
//!
//! Remote process introspection and snapshots for a model checker.
//!
//! The checker explores a checked program by stopping it at scheduling points,
//! snapshotting its memory, and restoring earlier states. This crate provides:
//!
//! - [`address_space`]: one read contract over live processes and snapshots
//! - [`remote`]: typed addresses and values that live in another process
//! - [`debuginfo`]: ELF symbols, DWARF types, scopes, variables and CFI
//! - [`location`]: the DWARF location expression evaluator
//! - [`platform`]: the Linux `ptrace` backend
//! - [`heap`]: decoding of the in-process heap-tracking table
//! - [`snapshot`]: capture, restore, compare and visited-state bookkeeping
//! - [`session`]: the checker side of the control channel
//! - [`unwind`]: stack walking for counterexample reports
//! - [`future`]: one-shot futures for single-threaded cooperative code
//!
//! ## Platform Support
//!
//! - **Linux** (x86_64, aarch64): live processes through `ptrace`
//! - Anything else: debug info, snapshots and futures only
//!
//! ## Why unsafe code is needed
//!
//! The live backend calls `fork`, `ptrace`, `waitpid` and
//! `process_vm_readv` directly. Those calls are wrapped in safe functions in
//! `platform::linux`; nothing else in the crate uses `unsafe`.

#![allow(unsafe_code)] // ptrace, waitpid, process_vm_readv/writev

pub mod address_space;
pub mod debuginfo;
pub mod error;
pub mod future;
pub mod heap;
pub mod inferior;
pub mod location;
pub mod platform;
pub mod prelude;
pub mod remote;
#[cfg(target_os = "linux")]
pub mod session;
pub mod snapshot;
pub mod types;
pub mod unwind;

pub use address_space::{AddressSpace, AddressSpaceExt};
pub use error::{ExitCause, SondeError, SondeResult};
pub use inferior::Inferior;
#[cfg(target_os = "linux")]
pub use platform::linux::LinuxProcess;
pub use types::{Address, ProcessId, Registers};
