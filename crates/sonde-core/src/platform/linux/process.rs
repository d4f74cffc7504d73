//! # Linux Process Control
//!
//! [`LinuxProcess`] owns the ptrace attachment to one checked process and
//! tracks its status.
//!
//! ## States
//!
//! ```text
//!            resume()                    waitpid: exit / fatal signal
//! Stopped ───────────> Running ─────────────────────────────> Gone(cause)
//!    ^                    │
//!    └── ensure_stopped() ┘  (SIGSTOP, other signals forwarded)
//! ```
//!
//! Memory and register access requires `Stopped`. Signal stops other than our
//! own `SIGSTOP` are forwarded to the process, so a `SIGSEGV` raised by the
//! checked program ends it for real and is observed as
//! `Gone(Signaled { signal: SIGSEGV, .. })` rather than being swallowed.

use std::cell::Cell;
use std::ffi::{CString, OsStr};
use std::fs;
use std::io;
use std::os::fd::RawFd;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sonde_protocol::heap::HEAP_TABLE_SYMBOL;
use sonde_protocol::ENV_CHANNEL_FD;
use tracing::{debug, info, trace, warn};

use super::memory::{self, Transfer};
use super::ptrace::{self, WaitEvent};
use super::{layout, registers};
use crate::address_space::AddressSpace;
use crate::debuginfo::ImageCache;
use crate::error::{ExitCause, SondeError, SondeResult};
use crate::inferior::{Inferior, ProcessLayout};
use crate::remote::{Opaque, RemoteAddress};
use crate::types::{Address, Architecture, MemoryRegion, ProcessId, ProcessStatus, Registers};

/// Exit code of the forked child when `PTRACE_TRACEME` is refused.
const TRACEME_FAILED: i32 = 126;
/// Exit code of the forked child when `execve` fails.
const EXEC_FAILED: i32 = 127;

/// Forces termination of a traced process from any thread.
///
/// The owning [`LinuxProcess`] observes the death on its next wait and
/// reports it as [`ExitCause::Killed`].
#[derive(Debug, Clone)]
pub struct KillHandle
{
    pid: ProcessId,
    killed: Arc<AtomicBool>,
    reaped: Arc<AtomicBool>,
}

impl KillHandle
{
    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    /// Send `SIGKILL`. A no-op once the process has been reaped, so a
    /// recycled pid is never hit.
    pub fn kill(&self) -> SondeResult<()>
    {
        if self.reaped.load(Ordering::Acquire) {
            return Ok(());
        }
        self.killed.store(true, Ordering::Release);
        match ptrace::signal(self.pid.as_raw(), libc::SIGKILL) {
            Err(error) if error.raw_os_error() != Some(libc::ESRCH) => Err(error.into()),
            _ => {
                info!(pid = %self.pid, "kill requested");
                Ok(())
            }
        }
    }
}

/// A checked process under `ptrace` control.
///
/// ```rust,no_run
/// use sonde_core::inferior::Inferior;
/// use sonde_core::platform::linux::LinuxProcess;
///
/// let mut process = LinuxProcess::launch("/usr/bin/true", &[], None)?;
/// let layout = process.layout()?;
/// println!("{} images", layout.images().len());
/// let cause = process.wait_for_exit()?;
/// println!("{cause}");
/// # Ok::<(), sonde_core::error::SondeError>(())
/// ```
pub struct LinuxProcess
{
    pid: ProcessId,
    status: Cell<ProcessStatus>,
    /// Signal to deliver on the next resume (0 for none)
    pending_signal: Cell<i32>,
    killed: Arc<AtomicBool>,
    reaped: Arc<AtomicBool>,
    /// Killed on drop rather than detached
    owned: bool,
    /// Cleared once `process_vm_readv` is refused
    vectored_reads: Cell<bool>,
    images: ImageCache,
    heap_table: Option<Address>,
}

impl std::fmt::Debug for LinuxProcess
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("LinuxProcess")
            .field("pid", &self.pid)
            .field("status", &self.status.get())
            .field("owned", &self.owned)
            .field("heap_table", &self.heap_table)
            .finish()
    }
}

impl LinuxProcess
{
    fn new(pid: ProcessId, owned: bool) -> Self
    {
        Self {
            pid,
            status: Cell::new(ProcessStatus::Stopped),
            pending_signal: Cell::new(0),
            killed: Arc::new(AtomicBool::new(false)),
            reaped: Arc::new(AtomicBool::new(false)),
            owned,
            vectored_reads: Cell::new(true),
            images: ImageCache::new(),
            heap_table: None,
        }
    }

    /// Fork and exec `program` under `PTRACE_TRACEME`.
    ///
    /// `channel_fd` is left open across `execve` and named in
    /// `SONDE_CHANNEL_FD`. The process is returned stopped at its first
    /// instruction after exec, before the dynamic linker has run.
    pub fn launch(program: impl AsRef<Path>, args: &[String], channel_fd: Option<RawFd>) -> SondeResult<Self>
    {
        let program = program.as_ref();
        if program.as_os_str().is_empty() {
            return Err(SondeError::InvalidArgument("program path cannot be empty".to_string()));
        }
        info!(program = %program.display(), ?args, "launching process");

        let invalid = |what: &str| SondeError::InvalidArgument(format!("{what} contains a NUL byte"));
        let path = CString::new(program.as_os_str().as_bytes()).map_err(|_| invalid("program path"))?;
        let mut arguments = vec![path.clone()];
        for arg in args {
            arguments.push(CString::new(arg.as_bytes()).map_err(|_| invalid("argument"))?);
        }

        let mut environment = Vec::new();
        for (key, value) in std::env::vars_os() {
            if key == OsStr::new(ENV_CHANNEL_FD) {
                continue;
            }
            let mut entry = key.into_vec();
            entry.push(b'=');
            entry.extend(value.into_vec());
            environment.push(CString::new(entry).map_err(|_| invalid("environment"))?);
        }
        if let Some(fd) = channel_fd {
            environment.push(CString::new(format!("{ENV_CHANNEL_FD}={fd}")).map_err(|_| invalid("environment"))?);
        }

        let mut argv: Vec<*const libc::c_char> = arguments.iter().map(|arg| arg.as_ptr()).collect();
        argv.push(ptr::null());
        let mut envp: Vec<*const libc::c_char> = environment.iter().map(|entry| entry.as_ptr()).collect();
        envp.push(ptr::null());

        // SAFETY: the child only calls async-signal-safe functions on data
        // prepared before the fork.
        let pid = unsafe { libc::fork() };
        if pid == -1 {
            let error = io::Error::last_os_error();
            return Err(SondeError::AttachFailed(format!("fork failed: {error}")));
        }
        if pid == 0 {
            // SAFETY: see above; `_exit` skips the parent's atexit handlers.
            unsafe {
                if ptrace::trace_me().is_err() {
                    libc::_exit(TRACEME_FAILED);
                }
                if let Some(fd) = channel_fd {
                    let flags = libc::fcntl(fd, libc::F_GETFD);
                    if flags != -1 {
                        libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
                    }
                }
                libc::execve(path.as_ptr(), argv.as_ptr(), envp.as_ptr());
                libc::_exit(EXEC_FAILED);
            }
        }

        let mut process = Self::new(ProcessId(pid as u32), true);
        match ptrace::wait(pid, true)? {
            WaitEvent::Stopped(_) => {}
            WaitEvent::Exited(ExitCause::Exited(TRACEME_FAILED)) => {
                process.mark_gone(ExitCause::Exited(TRACEME_FAILED));
                return Err(SondeError::PermissionDenied("PTRACE_TRACEME refused".to_string()));
            }
            WaitEvent::Exited(cause) => {
                process.mark_gone(cause);
                return Err(SondeError::AttachFailed(format!("{} did not start: {cause}", program.display())));
            }
            WaitEvent::None => return Err(SondeError::AttachFailed("waitpid reported no change".to_string())),
        }
        process.finish_attach()?;
        info!(pid = %process.pid, "process launched");
        Ok(process)
    }

    /// Attach to a running process with `PTRACE_ATTACH`.
    pub fn attach(pid: ProcessId) -> SondeResult<Self>
    {
        info!(%pid, "attaching to process");
        ptrace::attach(pid.as_raw()).map_err(|error| match error.raw_os_error() {
            Some(libc::EPERM) => {
                SondeError::PermissionDenied(format!("ptrace attach to {pid} refused (check ptrace_scope)"))
            }
            Some(libc::ESRCH) => SondeError::NotFound(format!("process {pid}")),
            _ => SondeError::AttachFailed(format!("ptrace attach to {pid}: {error}")),
        })?;
        let mut process = Self::new(pid, false);
        process.wait_for_stop()?;
        process.finish_attach()?;
        Ok(process)
    }

    /// Take over a child that called `PTRACE_TRACEME` itself and is about to
    /// stop (or already has). The child is killed on drop.
    pub fn from_traced_child(pid: ProcessId) -> SondeResult<Self>
    {
        let mut process = Self::new(pid, true);
        process.status.set(ProcessStatus::Running);
        process.wait_for_stop()?;
        process.finish_attach()?;
        debug!(%pid, "adopted traced child");
        Ok(process)
    }

    fn finish_attach(&mut self) -> SondeResult<()>
    {
        // The exec SIGTRAP or attach SIGSTOP is ours, not the program's.
        self.pending_signal.set(0);
        ptrace::set_exit_kill(self.pid.as_raw()).map_err(|error| self.os_error(error))
    }

    pub fn kill_handle(&self) -> KillHandle
    {
        KillHandle {
            pid: self.pid,
            killed: self.killed.clone(),
            reaped: self.reaped.clone(),
        }
    }

    /// Record where the heap-tracking table lives, e.g. from the channel handshake.
    pub fn set_heap_table_address(&mut self, address: Option<Address>)
    {
        self.heap_table = address.filter(|address| !address.is_null());
    }

    /// Find the heap-tracking table through its exported symbol.
    pub fn locate_heap_table(&mut self) -> SondeResult<Option<Address>>
    {
        match self.resolve_symbol(HEAP_TABLE_SYMBOL) {
            Ok(address) => {
                self.heap_table = Some(address.address());
                Ok(self.heap_table)
            }
            Err(SondeError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Let the process run, delivering any signal it stopped with.
    pub fn resume(&mut self) -> SondeResult<()>
    {
        match self.status.get() {
            ProcessStatus::Gone(cause) => Err(SondeError::ProcessGone(cause)),
            ProcessStatus::Running => Ok(()),
            ProcessStatus::Stopped => {
                let signal = self.pending_signal.replace(0);
                trace!(pid = %self.pid, signal, "resuming");
                ptrace::cont(self.pid.as_raw(), signal).map_err(|error| self.os_error(error))?;
                self.status.set(ProcessStatus::Running);
                Ok(())
            }
        }
    }

    /// Non-blocking status check.
    ///
    /// A running process that stopped on a signal of its own gets the signal
    /// forwarded and keeps running; only an exit or a `SIGSTOP` changes the
    /// reported status.
    pub fn poll_status(&mut self) -> SondeResult<ProcessStatus>
    {
        while self.status.get() == ProcessStatus::Running {
            match ptrace::wait(self.pid.as_raw(), false)? {
                WaitEvent::None => break,
                WaitEvent::Stopped(libc::SIGSTOP) => self.status.set(ProcessStatus::Stopped),
                WaitEvent::Stopped(signal) => self.forward(signal)?,
                WaitEvent::Exited(cause) => {
                    self.mark_gone(cause);
                }
            }
        }
        Ok(self.status.get())
    }

    /// Run until the process is gone and report why.
    pub fn wait_for_exit(&mut self) -> SondeResult<ExitCause>
    {
        if let ProcessStatus::Gone(cause) = self.status.get() {
            return Ok(cause);
        }
        // A killed tracee may already be past the point where it can be resumed.
        if !self.killed.load(Ordering::Acquire) {
            match self.resume() {
                Ok(()) => {}
                Err(SondeError::ProcessGone(cause)) => return Ok(cause),
                Err(error) => return Err(error),
            }
        }
        loop {
            match ptrace::wait(self.pid.as_raw(), true)? {
                WaitEvent::Exited(cause) => return Ok(self.mark_gone(cause)),
                WaitEvent::Stopped(libc::SIGSTOP) => {
                    ptrace::cont(self.pid.as_raw(), 0).map_err(|error| self.os_error(error))?
                }
                WaitEvent::Stopped(signal) => self.forward(signal)?,
                WaitEvent::None => {}
            }
        }
    }

    /// Kill the process and reap it. Always ends in `Gone`.
    pub fn kill(&mut self) -> SondeResult<ExitCause>
    {
        if let ProcessStatus::Gone(cause) = self.status.get() {
            return Ok(cause);
        }
        self.kill_handle().kill()?;
        loop {
            match ptrace::wait(self.pid.as_raw(), true) {
                Ok(WaitEvent::Exited(cause)) => return Ok(self.mark_gone(cause)),
                Ok(_) => continue,
                // Someone else reaped it; the kill is all we know.
                Err(error) if error.raw_os_error() == Some(libc::ECHILD) => {
                    return Ok(self.mark_gone(ExitCause::Killed));
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Current mappings from `/proc/<pid>/maps`.
    pub fn memory_regions(&self) -> SondeResult<Vec<MemoryRegion>>
    {
        self.check_alive()?;
        let maps = fs::read_to_string(format!("/proc/{}/maps", self.pid))?;
        Ok(maps.lines().filter_map(MemoryRegion::parse_maps_line).collect())
    }

    fn forward(&mut self, signal: i32) -> SondeResult<()>
    {
        warn!(pid = %self.pid, signal, "forwarding signal to checked process");
        ptrace::cont(self.pid.as_raw(), signal).map_err(|error| self.os_error(error))
    }

    fn wait_for_stop(&mut self) -> SondeResult<()>
    {
        loop {
            match ptrace::wait(self.pid.as_raw(), true)? {
                WaitEvent::Stopped(libc::SIGSTOP) | WaitEvent::Stopped(libc::SIGTRAP) => {
                    self.status.set(ProcessStatus::Stopped);
                    return Ok(());
                }
                WaitEvent::Stopped(signal) => self.forward(signal)?,
                WaitEvent::Exited(cause) => return Err(SondeError::ProcessGone(self.mark_gone(cause))),
                WaitEvent::None => {}
            }
        }
    }

    fn mark_gone(&self, cause: ExitCause) -> ExitCause
    {
        let cause = match cause {
            ExitCause::Signaled {
                signal: libc::SIGKILL, ..
            } if self.killed.load(Ordering::Acquire) => ExitCause::Killed,
            other => other,
        };
        if self.status.get().exit_cause().is_none() {
            info!(pid = %self.pid, %cause, "process gone");
        }
        self.status.set(ProcessStatus::Gone(cause));
        self.reaped.store(true, Ordering::Release);
        cause
    }

    fn check_alive(&self) -> SondeResult<()>
    {
        match self.status.get() {
            ProcessStatus::Gone(cause) => Err(SondeError::ProcessGone(cause)),
            _ => Ok(()),
        }
    }

    fn check_stopped(&self) -> SondeResult<()>
    {
        match self.status.get() {
            ProcessStatus::Stopped => Ok(()),
            ProcessStatus::Running => Err(SondeError::NotStopped),
            ProcessStatus::Gone(cause) => Err(SondeError::ProcessGone(cause)),
        }
    }

    /// `ESRCH` from a tracee we believe stopped means it died under us.
    fn os_error(&self, error: io::Error) -> SondeError
    {
        if error.raw_os_error() != Some(libc::ESRCH) {
            return error.into();
        }
        match ptrace::wait(self.pid.as_raw(), false) {
            Ok(WaitEvent::Exited(cause)) => SondeError::ProcessGone(self.mark_gone(cause)),
            Err(wait_error) if wait_error.raw_os_error() == Some(libc::ECHILD) => {
                SondeError::ProcessGone(self.mark_gone(ExitCause::Killed))
            }
            _ => SondeError::NotStopped,
        }
    }

    fn memory_error(&self, error: io::Error, address: Address, len: u64) -> SondeError
    {
        match error.raw_os_error() {
            Some(libc::EFAULT) | Some(libc::EIO) => SondeError::NotMapped { address, len },
            _ => self.os_error(error),
        }
    }

    fn current_layout(&self) -> SondeResult<ProcessLayout>
    {
        self.check_stopped()?;
        layout::read_layout(self.pid.as_raw(), self, &self.images)
    }
}

impl AddressSpace for LinuxProcess
{
    fn read_into(&self, address: Address, buffer: &mut [u8]) -> SondeResult<()>
    {
        self.check_stopped()?;
        let len = buffer.len() as u64;
        if len == 0 {
            return Ok(());
        }
        if address.checked_add(len).is_none() {
            return Err(SondeError::NotMapped { address, len });
        }

        let pid = self.pid.as_raw();
        let result = if self.vectored_reads.get() {
            match memory::read_vectored(pid, address.value(), buffer) {
                Ok(Transfer::Done) => Ok(()),
                Ok(Transfer::Unsupported) => {
                    debug!(%pid, "process_vm_readv unavailable, using PEEKDATA");
                    self.vectored_reads.set(false);
                    memory::read_words(pid, address.value(), buffer)
                }
                Err(error) => Err(error),
            }
        } else {
            memory::read_words(pid, address.value(), buffer)
        };
        result.map_err(|error| self.memory_error(error, address, len))
    }

    fn resolve_symbol(&self, name: &str) -> SondeResult<RemoteAddress<Opaque>>
    {
        self.current_layout()?.resolve_symbol(name).map(RemoteAddress::new)
    }

    fn architecture(&self) -> Architecture
    {
        Architecture::current()
    }
}

impl Inferior for LinuxProcess
{
    fn pid(&self) -> ProcessId
    {
        self.pid
    }

    fn status(&self) -> ProcessStatus
    {
        self.status.get()
    }

    fn ensure_stopped(&mut self) -> SondeResult<()>
    {
        match self.status.get() {
            ProcessStatus::Stopped => return Ok(()),
            ProcessStatus::Gone(cause) => return Err(SondeError::ProcessGone(cause)),
            ProcessStatus::Running => {}
        }
        trace!(pid = %self.pid, "stopping");
        ptrace::signal(self.pid.as_raw(), libc::SIGSTOP).map_err(|error| self.os_error(error))?;
        self.wait_for_stop()
    }

    fn write_bytes(&mut self, address: Address, bytes: &[u8]) -> SondeResult<()>
    {
        self.check_stopped()?;
        let len = bytes.len() as u64;
        if len == 0 {
            return Ok(());
        }
        if address.checked_add(len).is_none() {
            return Err(SondeError::NotMapped { address, len });
        }

        let pid = self.pid.as_raw();
        let result = match memory::write_vectored(pid, address.value(), bytes) {
            Ok(Transfer::Done) => Ok(()),
            Ok(Transfer::Unsupported) => memory::write_words(pid, address.value(), bytes),
            Err(error) => Err(error),
        };
        result.map_err(|error| self.memory_error(error, address, len))
    }

    fn registers(&self) -> SondeResult<Registers>
    {
        self.check_stopped()?;
        registers::read(self.pid.as_raw()).map_err(|error| self.os_error(error))
    }

    fn set_registers(&mut self, registers: &Registers) -> SondeResult<()>
    {
        self.check_stopped()?;
        registers::write(self.pid.as_raw(), registers).map_err(|error| match error.kind() {
            io::ErrorKind::InvalidInput => SondeError::InvalidArgument(error.to_string()),
            _ => self.os_error(error),
        })
    }

    fn layout(&mut self) -> SondeResult<ProcessLayout>
    {
        self.current_layout()
    }

    fn heap_table_address(&self) -> Option<Address>
    {
        self.heap_table
    }

    fn stack_region(&self) -> SondeResult<Option<MemoryRegion>>
    {
        let sp = self.registers()?.sp();
        Ok(self.memory_regions()?.into_iter().find(|region| region.contains(sp)))
    }
}

impl Drop for LinuxProcess
{
    fn drop(&mut self)
    {
        if self.status.get().exit_cause().is_some() {
            return;
        }
        if self.owned {
            if let Err(error) = self.kill() {
                warn!(pid = %self.pid, %error, "failed to kill checked process");
            }
            return;
        }
        let detached = self.ensure_stopped().and_then(|()| {
            ptrace::detach(self.pid.as_raw()).map_err(SondeError::from)
        });
        if let Err(error) = detached {
            warn!(pid = %self.pid, %error, "failed to detach");
        }
    }
}
