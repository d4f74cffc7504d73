//! Raw `ptrace(2)` and `waitpid(2)` calls.
//!
//! Each wrapper returns the OS error untouched; [`LinuxProcess`](super::LinuxProcess)
//! decides what it means for the process.

use std::io;
use std::ptr;

use libc::{c_void, pid_t};

use crate::error::ExitCause;

/// One event reported by `waitpid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum WaitEvent
{
    /// Nothing changed (only with `WNOHANG`)
    None,
    /// Stopped with this signal pending
    Stopped(i32),
    /// Terminated; `Signaled` still has to be told apart from a checker kill
    Exited(ExitCause),
}

fn check(result: libc::c_long) -> io::Result<libc::c_long>
{
    if result == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}

fn request(request: libc::c_uint, pid: pid_t, address: usize, data: usize) -> io::Result<libc::c_long>
{
    // SAFETY: every request issued here passes either plain integers or
    // pointers to buffers that outlive the call.
    check(unsafe { libc::ptrace(request, pid, address as *mut c_void, data as *mut c_void) })
}

/// Called in the forked child before `execve`.
pub(super) fn trace_me() -> io::Result<()>
{
    request(libc::PTRACE_TRACEME, 0, 0, 0).map(drop)
}

pub(super) fn attach(pid: pid_t) -> io::Result<()>
{
    request(libc::PTRACE_ATTACH, pid, 0, 0).map(drop)
}

pub(super) fn detach(pid: pid_t) -> io::Result<()>
{
    request(libc::PTRACE_DETACH, pid, 0, 0).map(drop)
}

/// `PTRACE_O_EXITKILL`: the tracee gets `SIGKILL` when the tracer exits.
pub(super) fn set_exit_kill(pid: pid_t) -> io::Result<()>
{
    request(libc::PTRACE_SETOPTIONS, pid, 0, libc::PTRACE_O_EXITKILL as usize).map(drop)
}

/// Resume, delivering `signal` (0 for none).
pub(super) fn cont(pid: pid_t, signal: i32) -> io::Result<()>
{
    request(libc::PTRACE_CONT, pid, 0, signal as usize).map(drop)
}

/// Read one word. `-1` is a valid word, so errno is cleared first.
pub(super) fn peek(pid: pid_t, address: u64) -> io::Result<u64>
{
    // SAFETY: errno is thread local; PEEKDATA takes no buffer.
    unsafe {
        *libc::__errno_location() = 0;
        let word = libc::ptrace(libc::PTRACE_PEEKDATA, pid, address as *mut c_void, ptr::null_mut::<c_void>());
        if word == -1 && *libc::__errno_location() != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(word as u64)
    }
}

pub(super) fn poke(pid: pid_t, address: u64, word: u64) -> io::Result<()>
{
    request(libc::PTRACE_POKEDATA, pid, address as usize, word as usize).map(drop)
}

/// Fill `words` with the general purpose register set.
#[cfg(target_arch = "x86_64")]
pub(super) fn get_registers(pid: pid_t, words: &mut [u64]) -> io::Result<()>
{
    debug_assert!(words.len() * 8 >= std::mem::size_of::<libc::user_regs_struct>());
    request(libc::PTRACE_GETREGS, pid, 0, words.as_mut_ptr() as usize).map(drop)
}

#[cfg(target_arch = "x86_64")]
pub(super) fn set_registers(pid: pid_t, words: &[u64]) -> io::Result<()>
{
    request(libc::PTRACE_SETREGS, pid, 0, words.as_ptr() as usize).map(drop)
}

#[cfg(not(target_arch = "x86_64"))]
pub(super) fn get_registers(pid: pid_t, words: &mut [u64]) -> io::Result<()>
{
    let mut iov = libc::iovec {
        iov_base: words.as_mut_ptr().cast(),
        iov_len: words.len() * 8,
    };
    request(libc::PTRACE_GETREGSET, pid, libc::NT_PRSTATUS as usize, &mut iov as *mut libc::iovec as usize)?;
    if iov.iov_len != words.len() * 8 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "short NT_PRSTATUS register set"));
    }
    Ok(())
}

#[cfg(not(target_arch = "x86_64"))]
pub(super) fn set_registers(pid: pid_t, words: &[u64]) -> io::Result<()>
{
    let mut iov = libc::iovec {
        iov_base: words.as_ptr() as *mut c_void,
        iov_len: words.len() * 8,
    };
    request(libc::PTRACE_SETREGSET, pid, libc::NT_PRSTATUS as usize, &mut iov as *mut libc::iovec as usize).map(drop)
}

/// `waitpid` for one tracee, retrying on `EINTR`.
pub(super) fn wait(pid: pid_t, blocking: bool) -> io::Result<WaitEvent>
{
    let flags = if blocking { libc::__WALL } else { libc::__WALL | libc::WNOHANG };
    let mut status = 0;
    loop {
        // SAFETY: `status` is a valid out pointer.
        let result = unsafe { libc::waitpid(pid, &mut status, flags) };
        match result {
            0 => return Ok(WaitEvent::None),
            -1 => {
                let error = io::Error::last_os_error();
                if error.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(error);
            }
            _ => return Ok(decode_status(status)),
        }
    }
}

pub(super) fn decode_status(status: i32) -> WaitEvent
{
    if libc::WIFEXITED(status) {
        WaitEvent::Exited(ExitCause::Exited(libc::WEXITSTATUS(status)))
    } else if libc::WIFSIGNALED(status) {
        WaitEvent::Exited(ExitCause::Signaled {
            signal: libc::WTERMSIG(status),
            core_dumped: libc::WCOREDUMP(status),
        })
    } else if libc::WIFSTOPPED(status) {
        WaitEvent::Stopped(libc::WSTOPSIG(status))
    } else {
        WaitEvent::None
    }
}

/// Send `signal` to the whole thread group.
pub(super) fn signal(pid: pid_t, signal: i32) -> io::Result<()>
{
    // SAFETY: kill(2) has no memory arguments.
    if unsafe { libc::kill(pid, signal) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_decode_exit_status()
    {
        assert_eq!(decode_status(3 << 8), WaitEvent::Exited(ExitCause::Exited(3)));
        assert_eq!(
            decode_status(libc::SIGSEGV),
            WaitEvent::Exited(ExitCause::Signaled {
                signal: libc::SIGSEGV,
                core_dumped: false
            })
        );
        assert_eq!(decode_status((libc::SIGSTOP << 8) | 0x7f), WaitEvent::Stopped(libc::SIGSTOP));
    }
}
