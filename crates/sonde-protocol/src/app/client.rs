//! Checked-program end of the control channel.

use tracing::debug;

use super::allocator::table_address;
use crate::channel::Channel;
use crate::error::ChannelError;
use crate::message::{AppMessage, CheckerMessage, DecisionPoint};

/// Blocking client used by the checked program.
#[derive(Debug)]
pub struct Client
{
    channel: Channel,
}

impl Client
{
    /// Connect through the descriptor named in `SONDE_CHANNEL_FD`.
    pub fn from_env() -> Result<Self, ChannelError>
    {
        Ok(Self::new(Channel::from_env()?))
    }

    pub fn new(channel: Channel) -> Self
    {
        Self { channel }
    }

    /// Announce start-up and wait for the first command.
    pub fn ready(&self) -> Result<CheckerMessage, ChannelError>
    {
        self.channel.send(&AppMessage::Ready {
            pid: std::process::id(),
            heap_table: table_address(),
        })?;
        self.channel.receive()
    }

    /// Block at `point` until the checker sends the next command.
    pub fn decision(&self, point: DecisionPoint) -> Result<CheckerMessage, ChannelError>
    {
        debug!(id = point.id, label = %point.label, "waiting for scheduling decision");
        self.channel.send(&AppMessage::Waiting { point })?;
        self.channel.receive()
    }

    /// Report normal completion. The program should exit right after.
    pub fn finished(&self) -> Result<(), ChannelError>
    {
        self.channel.send(&AppMessage::Finished)
    }
}
