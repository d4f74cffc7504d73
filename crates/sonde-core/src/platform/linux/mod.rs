//! # Linux Live Backend
//!
//! Controls one checked process through `ptrace(2)`.
//!
//! ## Pieces
//!
//! - `ptrace`: thin, errno-returning wrappers over the raw requests and `waitpid(2)`
//! - `memory`: `process_vm_readv`/`process_vm_writev` with a `PEEKDATA`/`POKEDATA` fallback
//! - `registers`: the stopped thread's `user_regs_struct` as an ordered word vector
//! - `layout`: loaded images from auxv, `PT_DYNAMIC`, `DT_DEBUG` and the `link_map` chain
//! - [`LinuxProcess`]: ties them together behind [`Inferior`](crate::inferior::Inferior)
//!
//! ## Process lifetime
//!
//! Tracees are put under `PTRACE_O_EXITKILL`, so a checked process never
//! outlives the checker. A process launched by [`LinuxProcess::launch`] is
//! killed on drop; an attached one is detached.
//!
//! ## References
//!
//! - [ptrace(2)](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - [process_vm_readv(2)](https://man7.org/linux/man-pages/man2/process_vm_readv.2.html)
//! - [proc(5)](https://man7.org/linux/man-pages/man5/proc.5.html), `auxv` and `maps`
//! - `<link.h>` for `r_debug` and `link_map`

mod layout;
mod memory;
mod process;
mod ptrace;
mod registers;

pub use process::{KillHandle, LinuxProcess};
