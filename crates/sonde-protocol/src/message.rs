//! # Control Channel Messages
//!
//! The checker and the checked program exchange small, versioned packets.
//! Every packet is a `u16` protocol version followed by one message, both
//! encoded with `bincode` using fixed-width little-endian integers.
//!
//! ## Exchange
//!
//! ```text
//! checked                         checker
//!   | -- Ready { pid, heap_table } -->  |   handshake
//!   | <------------ Continue --------  |
//!   |   ... runs one transition ...    |
//!   | -- Waiting { point } ---------->  |   checker snapshots here
//!   | <------------ Continue --------  |
//!   | -- Finished ------------------->  |   then exits
//! ```
//!
//! At most one command is ever in flight. `Terminate` may replace any
//! `Continue`.

use bincode::config::{self, Config};
use bincode::{decode_from_slice, encode_to_vec, Decode, Encode};

use crate::error::ChannelError;

/// Revision of the wire schema below. Bump on any incompatible change.
pub const PROTOCOL_VERSION: u16 = 1;

/// Environment variable naming the checked program's end of the channel.
pub const ENV_CHANNEL_FD: &str = "SONDE_CHANNEL_FD";

/// Largest packet either side accepts.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// A point where the checked program needs a scheduling decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub struct DecisionPoint
{
    /// Program-defined identifier, stable across runs
    pub id: u64,
    /// Human readable description for reports
    pub label: String,
}

impl DecisionPoint
{
    pub fn new(id: u64, label: impl Into<String>) -> Self
    {
        Self { id, label: label.into() }
    }
}

/// Notifications sent by the checked program.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum AppMessage
{
    /// First message after start-up.
    Ready
    {
        /// OS process id of the sender
        pid: u32,
        /// Remote address of the heap-tracking table (0 when not linked in)
        heap_table: u64,
    },
    /// The program is blocked until the next command.
    Waiting
    {
        /// Where it is blocked
        point: DecisionPoint,
    },
    /// The program ran to completion and is about to exit.
    Finished,
}

/// Commands sent by the checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum CheckerMessage
{
    /// Run until the next decision point.
    Continue,
    /// Exit immediately.
    Terminate,
}

fn wire_config() -> impl Config
{
    config::standard().with_little_endian().with_fixed_int_encoding()
}

/// Encode `message` into one packet, version prefix included.
pub fn encode_packet<M: Encode>(message: &M) -> Result<Vec<u8>, ChannelError>
{
    let mut packet = encode_to_vec(PROTOCOL_VERSION, wire_config())?;
    packet.extend(encode_to_vec(message, wire_config())?);
    Ok(packet)
}

/// Decode one packet produced by [`encode_packet`].
pub fn decode_packet<M: Decode<()>>(packet: &[u8]) -> Result<M, ChannelError>
{
    let (found, used): (u16, usize) = decode_from_slice(packet, wire_config())?;
    if found != PROTOCOL_VERSION {
        return Err(ChannelError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            found,
        });
    }
    let (message, _) = decode_from_slice(&packet[used..], wire_config())?;
    Ok(message)
}
