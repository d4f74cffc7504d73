//! Control channel errors.

use std::io;

use bincode::error::{DecodeError, EncodeError};
use thiserror::Error;

/// Ways a control-channel operation can fail.
#[derive(Error, Debug)]
pub enum ChannelError
{
    /// The peer closed its end, usually because the process exited or crashed.
    #[error("control channel closed by peer")]
    Closed,

    /// A packet larger than the receive buffer arrived and was cut short.
    #[error("message of {len} bytes exceeds the {limit} byte limit")]
    Truncated
    {
        /// Real packet length reported by the kernel
        len: usize,
        /// Maximum accepted packet length
        limit: usize,
    },

    /// The peer speaks a different protocol revision.
    #[error("protocol version mismatch: expected {expected}, got {found}")]
    VersionMismatch
    {
        /// Revision compiled into this side
        expected: u16,
        /// Revision found in the packet
        found: u16,
    },

    /// `SONDE_CHANNEL_FD` is missing or does not name an open descriptor.
    #[error("no control channel in environment: {0}")]
    MissingEndpoint(String),

    /// Serialization of an outgoing message failed.
    #[error("failed to encode message: {0}")]
    Encode(#[from] EncodeError),

    /// An incoming packet could not be decoded.
    #[error("failed to decode message: {0}")]
    Decode(#[from] DecodeError),

    /// Any other socket error.
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ChannelError
{
    /// `true` when the error means the other side is gone.
    pub fn is_closed(&self) -> bool
    {
        matches!(self, ChannelError::Closed)
    }
}
