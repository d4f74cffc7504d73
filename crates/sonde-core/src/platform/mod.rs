//! # Platform-Specific Implementations
//!
//! Live backends implementing [`Inferior`](crate::inferior::Inferior) with
//! each OS's process-control primitives.
//!
//! - **Linux**: `ptrace(2)`, `process_vm_readv(2)` and the dynamic linker's
//!   `r_debug` list
//!   - See: [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//!
//! Everything above this module (snapshots, the session, the stack walker)
//! only sees the `Inferior` and `AddressSpace` traits.

#[cfg(target_os = "linux")]
pub mod linux;
