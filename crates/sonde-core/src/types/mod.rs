//! # Types
//!
//! Platform-agnostic types shared by every backend.
//!
//! These types describe addresses, processes and register contexts without
//! saying whether the memory behind them belongs to a live process or to a
//! frozen snapshot.

pub mod address;
pub mod process;
pub mod registers;

// Re-export all public types
pub use address::Address;
pub use process::{Architecture, Endianness, MemoryRegion, Permissions, ProcessId, ProcessStatus};
pub use registers::{Arm64Register, RegisterId, Registers, X86_64Register};
