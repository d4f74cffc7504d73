//! # Checker Session
//!
//! A [`Session`] pairs one [`LinuxProcess`] with its control [`Channel`] and
//! drives the request/acknowledge exchange:
//!
//! ```text
//! launch ─> handshake ─> step ─> step ─> ... ─> Terminated(cause)
//!                          │
//!                          └─ Decision(point): the process is blocked, snapshot it here
//! ```
//!
//! ## Correlating death
//!
//! A dying checked process shows up twice: its end of the channel closes and
//! `waitpid` reports the exit. While waiting for a message the session polls
//! the socket with a short tick and checks the process without blocking in
//! between. Whichever comes first, the cause is taken from `waitpid`, returned
//! once as [`StepOutcome::Terminated`], and every later call fails with
//! [`SondeError::ProcessGone`].

use std::path::Path;
use std::time::Duration;

use sonde_protocol::{AppMessage, Channel, ChannelError, CheckerMessage, DecisionPoint};
use tracing::{debug, info, trace, warn};

use crate::error::{ExitCause, SondeError, SondeResult};
use crate::inferior::Inferior;
use crate::platform::linux::{KillHandle, LinuxProcess};
use crate::types::{Address, ProcessStatus};

/// Default liveness tick while waiting for a message.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// What the checked program reported in its first message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake
{
    pub pid: u32,
    pub heap_table: Option<Address>,
}

/// Result of running the checked program for one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome
{
    /// Blocked at a scheduling point, waiting for the next command
    Decision(DecisionPoint),
    /// The process is gone; reported exactly once
    Terminated(ExitCause),
}

enum Incoming
{
    Message(AppMessage),
    Gone(ExitCause),
}

/// Checker side of one checked process.
#[derive(Debug)]
pub struct Session
{
    process: LinuxProcess,
    channel: Channel,
    poll_interval: Duration,
    handshake: Option<Handshake>,
    /// Set once the termination has been handed to the caller
    reported: Option<ExitCause>,
}

impl Session
{
    /// Launch `program` with a fresh channel. The process starts stopped.
    pub fn launch(program: impl AsRef<Path>, args: &[String], poll_interval: Duration) -> SondeResult<Self>
    {
        let (checker, checked) = Channel::pair()?;
        let process = LinuxProcess::launch(program, args, Some(checked.raw_fd()))?;
        // Only the child may keep its end open, or closure would never be seen.
        drop(checked);
        Ok(Self::new(process, checker, poll_interval))
    }

    /// Wrap an already launched process and the checker's end of its channel.
    pub fn new(process: LinuxProcess, channel: Channel, poll_interval: Duration) -> Self
    {
        Self {
            process,
            channel,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            handshake: None,
            reported: None,
        }
    }

    pub fn process(&self) -> &LinuxProcess
    {
        &self.process
    }

    /// The process, for snapshots and restores. Only meaningful while it is
    /// blocked at a decision point.
    pub fn process_mut(&mut self) -> &mut LinuxProcess
    {
        &mut self.process
    }

    pub fn kill_handle(&self) -> KillHandle
    {
        self.process.kill_handle()
    }

    pub fn handshake_info(&self) -> Option<Handshake>
    {
        self.handshake
    }

    /// Run the program until it announces itself with `Ready`.
    pub fn handshake(&mut self) -> SondeResult<Handshake>
    {
        if let Some(handshake) = self.handshake {
            return Ok(handshake);
        }
        self.check_reported()?;
        self.process.resume()?;
        match self.wait_message()? {
            Incoming::Message(AppMessage::Ready { pid, heap_table }) => {
                let heap_table = (heap_table != 0).then(|| Address::from(heap_table));
                self.process.set_heap_table_address(heap_table);
                let handshake = Handshake { pid, heap_table };
                info!(pid, heap_table = ?heap_table, "checked process ready");
                self.handshake = Some(handshake);
                Ok(handshake)
            }
            Incoming::Message(other) => Err(unexpected(&other)),
            Incoming::Gone(cause) => Err(SondeError::ProcessGone(self.report(cause))),
        }
    }

    /// Let the program run one transition.
    pub fn step(&mut self) -> SondeResult<StepOutcome>
    {
        self.check_reported()?;
        if self.handshake.is_none() {
            self.handshake()?;
        }
        self.process.resume()?;
        if let Some(cause) = self.send_or_gone(CheckerMessage::Continue)? {
            return Ok(StepOutcome::Terminated(self.report(cause)));
        }

        match self.wait_message()? {
            Incoming::Message(AppMessage::Waiting { point }) => {
                trace!(id = point.id, label = %point.label, "decision point");
                Ok(StepOutcome::Decision(point))
            }
            Incoming::Message(AppMessage::Finished) => {
                debug!("checked process finished");
                let cause = self.process.wait_for_exit()?;
                Ok(StepOutcome::Terminated(self.report(cause)))
            }
            Incoming::Message(other) => Err(unexpected(&other)),
            Incoming::Gone(cause) => Ok(StepOutcome::Terminated(self.report(cause))),
        }
    }

    /// Ask the program to exit and wait for it.
    pub fn terminate(&mut self) -> SondeResult<ExitCause>
    {
        if let Some(cause) = self.reported.or(self.process.status().exit_cause()) {
            return Ok(self.report(cause));
        }
        self.process.resume()?;
        if let Some(cause) = self.send_or_gone(CheckerMessage::Terminate)? {
            return Ok(self.report(cause));
        }
        let cause = self.process.wait_for_exit()?;
        Ok(self.report(cause))
    }

    /// Kill the program. Always leaves the process gone.
    pub fn kill(&mut self) -> SondeResult<ExitCause>
    {
        let cause = self.process.kill()?;
        Ok(self.report(cause))
    }

    fn check_reported(&self) -> SondeResult<()>
    {
        match self.reported {
            Some(cause) => Err(SondeError::ProcessGone(cause)),
            None => Ok(()),
        }
    }

    fn report(&mut self, cause: ExitCause) -> ExitCause
    {
        if self.reported.is_none() {
            if cause.is_crash() {
                warn!(pid = %self.process.pid(), %cause, "checked process crashed");
            } else {
                info!(pid = %self.process.pid(), %cause, "checked process terminated");
            }
        }
        *self.reported.get_or_insert(cause)
    }

    /// Send a command; a closed channel means the process is dying, so wait
    /// for its cause instead of failing.
    fn send_or_gone(&mut self, message: CheckerMessage) -> SondeResult<Option<ExitCause>>
    {
        match self.channel.send(&message) {
            Ok(()) => Ok(None),
            Err(ChannelError::Closed) => Ok(Some(self.process.wait_for_exit()?)),
            Err(error) => Err(error.into()),
        }
    }

    fn wait_message(&mut self) -> SondeResult<Incoming>
    {
        loop {
            if self.channel.wait_readable(Some(self.poll_interval))? {
                match self.channel.receive::<AppMessage>() {
                    Ok(message) => return Ok(Incoming::Message(message)),
                    Err(ChannelError::Closed) => {
                        debug!("control channel closed");
                        return Ok(Incoming::Gone(self.process.wait_for_exit()?));
                    }
                    Err(error) => return Err(error.into()),
                }
            }
            match self.process.poll_status()? {
                ProcessStatus::Gone(cause) => return Ok(Incoming::Gone(cause)),
                // Stopped from outside; it cannot answer until resumed.
                ProcessStatus::Stopped => self.process.resume()?,
                ProcessStatus::Running => {}
            }
        }
    }
}

fn unexpected(message: &AppMessage) -> SondeError
{
    SondeError::InvalidArgument(format!("unexpected message from checked process: {message:?}"))
}
