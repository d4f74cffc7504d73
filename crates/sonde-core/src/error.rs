//! # Error Types
//!
//! Every fallible operation in the core returns [`SondeError`].
//!
//! ## Error Categories
//!
//! 1. **Memory access**: `NotMapped`
//! 2. **Lookup**: `NotFound`
//! 3. **Process liveness**: `ProcessGone` (carries the exit cause), `NotStopped`
//! 4. **Binary input**: `MalformedImage`, `UnsupportedDebugFormat`
//! 5. **Location evaluation**: `UnsupportedOperation`, `NoApplicableLocation`
//! 6. **Snapshots**: `LayoutMismatch`
//! 7. **Attachment**: `AttachFailed`, `PermissionDenied`
//! 8. **Plumbing**: `Channel`, `Io`, `InvalidArgument`, `Deadlock`
//!
//! Parsing and location errors are local: callers degrade to partial symbolic
//! information. `ProcessGone` is an exploration result, a crash is exactly what
//! the checker is looking for.

use std::fmt;

use sonde_protocol::ChannelError;
use thiserror::Error;

use crate::types::Address;

/// Why a checked process stopped existing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitCause
{
    /// Normal `exit(code)`.
    Exited(i32),
    /// Terminated by a signal it did not handle.
    Signaled
    {
        /// Signal number, e.g. `SIGSEGV`
        signal: i32,
        /// Whether the kernel wrote a core dump
        core_dumped: bool,
    },
    /// Forced termination issued by the checker.
    Killed,
}

impl ExitCause
{
    /// A crash is an abnormal termination the checked program did not ask for.
    pub const fn is_crash(self) -> bool
    {
        matches!(self, ExitCause::Signaled { .. })
    }
}

impl fmt::Display for ExitCause
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            ExitCause::Exited(code) => write!(f, "exited with status {code}"),
            ExitCause::Signaled { signal, core_dumped } => {
                write!(f, "crashed with signal {signal}")?;
                if *core_dumped {
                    write!(f, " (core dumped)")?;
                }
                Ok(())
            }
            ExitCause::Killed => write!(f, "killed by the checker"),
        }
    }
}

/// Main error type for sonde operations
#[derive(Error, Debug)]
pub enum SondeError
{
    /// Part of `[address, address + len)` lies outside every known region.
    ///
    /// Recoverable: the caller decides whether absence is meaningful.
    #[error("address range {address} (+{len} bytes) is not mapped")]
    NotMapped
    {
        /// First byte requested
        address: Address,
        /// Number of bytes requested
        len: u64,
    },

    /// A named symbol, type, frame or image does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The attached process exited or was killed.
    #[error("process is gone: {0}")]
    ProcessGone(ExitCause),

    /// The object file could not be parsed at all.
    #[error("malformed image {object}: {reason}")]
    MalformedImage
    {
        /// Path or name of the object
        object: String,
        /// What the parser rejected
        reason: String,
    },

    /// The debug encoding uses a version or form this reader does not handle.
    #[error("unsupported debug format in {object}: {reason}")]
    UnsupportedDebugFormat
    {
        /// Path or name of the object
        object: String,
        /// What was unsupported
        reason: String,
    },

    /// A location expression used an operation that is not modeled.
    ///
    /// Only the one variable being resolved is affected.
    #[error("unsupported location operation: {0}")]
    UnsupportedOperation(String),

    /// No entry of a location list covers the program counter.
    #[error("no location list entry covers pc {pc}")]
    NoApplicableLocation
    {
        /// Program counter that was looked up
        pc: Address,
    },

    /// Restore was attempted against a process with a different image layout.
    #[error("snapshot layout does not match process: {0}")]
    LayoutMismatch(String),

    /// Operation requires the process to be stopped
    #[error("process must be stopped for this operation")]
    NotStopped,

    /// Insufficient permissions to trace the target process
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Failed to attach to or launch a process
    #[error("failed to attach to process: {0}")]
    AttachFailed(String),

    /// Invalid argument passed to a sonde function
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking wait on a value that can never be produced.
    #[error("deadlock detected: {0}")]
    Deadlock(String),

    /// Control channel failure
    #[error("control channel error: {0}")]
    Channel(#[from] ChannelError),

    /// I/O error (for file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SondeError
{
    /// `true` for errors caused by the checked process going away.
    pub fn is_process_gone(&self) -> bool
    {
        matches!(self, SondeError::ProcessGone(_))
    }
}

/// Convenience type alias for `Result<T, SondeError>`
///
/// ```rust
/// use sonde_core::error::SondeResult;
/// fn foo() -> SondeResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type SondeResult<T> = std::result::Result<T, SondeError>;
