//! # Packet Channel
//!
//! A connected `AF_UNIX`/`SOCK_SEQPACKET` socket pair. Sequenced packets keep
//! message boundaries, so neither side needs stream reassembly, and a zero-length
//! read reliably means the peer is gone.
//!
//! ## Lifetime
//!
//! The checker creates the pair with [`Channel::pair`], keeps one end and lets the
//! checked program inherit the other through `SONDE_CHANNEL_FD`. Closing either
//! end (including by process death) makes the next receive on the other end fail
//! with [`ChannelError::Closed`].

use std::env;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use bincode::{Decode, Encode};
use tracing::trace;

use crate::error::ChannelError;
use crate::message::{decode_packet, encode_packet, ENV_CHANNEL_FD, MAX_MESSAGE_SIZE};

/// One end of the control channel.
#[derive(Debug)]
pub struct Channel
{
    fd: OwnedFd,
}

impl Channel
{
    /// Create a connected pair. Both descriptors are close-on-exec; the launcher
    /// clears the flag on the end it hands to the child.
    pub fn pair() -> Result<(Channel, Channel), ChannelError>
    {
        let mut fds: [libc::c_int; 2] = [-1, -1];
        // SAFETY: `fds` has room for the two descriptors socketpair writes.
        let rc = unsafe {
            libc::socketpair(
                libc::AF_UNIX,
                libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC,
                0,
                fds.as_mut_ptr(),
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error().into());
        }

        // SAFETY: socketpair succeeded, both descriptors are fresh and owned by us.
        let (left, right) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        trace!(left = fds[0], right = fds[1], "created control channel pair");
        Ok((Channel { fd: left }, Channel { fd: right }))
    }

    /// Adopt the descriptor named by `SONDE_CHANNEL_FD`.
    pub fn from_env() -> Result<Self, ChannelError>
    {
        let value = env::var(ENV_CHANNEL_FD).map_err(|err| ChannelError::MissingEndpoint(format!("{ENV_CHANNEL_FD}: {err}")))?;
        let fd: RawFd = value
            .trim()
            .parse()
            .map_err(|_| ChannelError::MissingEndpoint(format!("{ENV_CHANNEL_FD}={value} is not a descriptor")))?;
        Self::from_raw(fd)
    }

    /// Adopt an inherited descriptor, checking that it is open.
    pub fn from_raw(fd: RawFd) -> Result<Self, ChannelError>
    {
        // SAFETY: F_GETFD only queries flags; an invalid descriptor yields EBADF.
        if fd < 0 || unsafe { libc::fcntl(fd, libc::F_GETFD) } < 0 {
            return Err(ChannelError::MissingEndpoint(format!("descriptor {fd} is not open")));
        }
        // Children of the checked program must not keep the channel alive.
        // SAFETY: `fd` was just checked to be open.
        unsafe {
            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
        }
        // SAFETY: the descriptor is open and handed over to us exclusively.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Send one encoded message.
    pub fn send<M: Encode>(&self, message: &M) -> Result<(), ChannelError>
    {
        let packet = encode_packet(message)?;
        self.send_packet(&packet)
    }

    /// Block until one message arrives and decode it.
    pub fn receive<M: Decode<()>>(&self) -> Result<M, ChannelError>
    {
        let packet = self.receive_packet()?;
        decode_packet(&packet)
    }

    /// Send raw packet bytes.
    pub fn send_packet(&self, packet: &[u8]) -> Result<(), ChannelError>
    {
        loop {
            // SAFETY: the pointer and length describe `packet`, which outlives the call.
            let sent = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    packet.as_ptr().cast(),
                    packet.len(),
                    libc::MSG_NOSIGNAL,
                )
            };
            if sent >= 0 {
                trace!(len = packet.len(), "sent packet");
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EPIPE | libc::ECONNRESET | libc::ENOTCONN) => return Err(ChannelError::Closed),
                _ => return Err(err.into()),
            }
        }
    }

    /// Receive raw packet bytes.
    pub fn receive_packet(&self) -> Result<Vec<u8>, ChannelError>
    {
        let mut buffer = vec![0u8; MAX_MESSAGE_SIZE];
        loop {
            // MSG_TRUNC makes the kernel report the real packet length.
            // SAFETY: the kernel writes at most `buffer.len()` bytes into `buffer`.
            let received = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buffer.as_mut_ptr().cast(),
                    buffer.len(),
                    libc::MSG_TRUNC,
                )
            };
            if received == 0 {
                return Err(ChannelError::Closed);
            }
            if received > 0 {
                let len = received.unsigned_abs();
                if len > MAX_MESSAGE_SIZE {
                    return Err(ChannelError::Truncated {
                        len,
                        limit: MAX_MESSAGE_SIZE,
                    });
                }
                buffer.truncate(len);
                trace!(len, "received packet");
                return Ok(buffer);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ECONNRESET | libc::ENOTCONN) => return Err(ChannelError::Closed),
                _ => return Err(err.into()),
            }
        }
    }

    /// Wait until a receive would not block: a packet is queued or the peer hung
    /// up. `None` waits forever. Returns `false` on timeout.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool, ChannelError>
    {
        let timeout_ms = timeout.map_or(-1, |t| libc::c_int::try_from(t.as_millis()).unwrap_or(libc::c_int::MAX));
        let mut pollfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            // SAFETY: `pollfd` is one valid, exclusively borrowed entry.
            let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
            if rc >= 0 {
                return Ok(rc > 0 && pollfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0);
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err.into());
            }
        }
    }

    /// Raw descriptor, for handing this end to a child process.
    pub fn raw_fd(&self) -> RawFd
    {
        self.fd.as_raw_fd()
    }
}

impl AsRawFd for Channel
{
    fn as_raw_fd(&self) -> RawFd
    {
        self.fd.as_raw_fd()
    }
}
