//! Remote memory access.
//!
//! `process_vm_readv`/`process_vm_writev` move whole ranges in one call. When
//! the kernel refuses them (`EPERM` under some Yama/seccomp setups, `ENOSYS` on
//! old kernels) the word-sized `PTRACE_PEEKDATA`/`PTRACE_POKEDATA` path is used
//! instead. A short transfer means part of the range is unmapped and is
//! reported as such, never as partial data.

use std::io;

use libc::{c_void, pid_t};
use tracing::trace;

use super::ptrace;

const WORD: u64 = 8;

/// Outcome of a vectored transfer.
pub(super) enum Transfer
{
    Done,
    /// Syscall unavailable or refused; use the ptrace path
    Unsupported,
}

fn vectored_error(error: io::Error) -> io::Result<Transfer>
{
    match error.raw_os_error() {
        Some(libc::EPERM) | Some(libc::ENOSYS) => Ok(Transfer::Unsupported),
        _ => Err(error),
    }
}

fn short_transfer() -> io::Error
{
    io::Error::from_raw_os_error(libc::EFAULT)
}

pub(super) fn read_vectored(pid: pid_t, address: u64, buffer: &mut [u8]) -> io::Result<Transfer>
{
    let local = libc::iovec {
        iov_base: buffer.as_mut_ptr().cast::<c_void>(),
        iov_len: buffer.len(),
    };
    let remote = libc::iovec {
        iov_base: address as *mut c_void,
        iov_len: buffer.len(),
    };
    // SAFETY: `local` covers exactly `buffer`; the remote side is checked by the kernel.
    let count = unsafe { libc::process_vm_readv(pid, &local, 1, &remote, 1, 0) };
    if count < 0 {
        return vectored_error(io::Error::last_os_error());
    }
    if count as usize != buffer.len() {
        return Err(short_transfer());
    }
    Ok(Transfer::Done)
}

pub(super) fn write_vectored(pid: pid_t, address: u64, bytes: &[u8]) -> io::Result<Transfer>
{
    let local = libc::iovec {
        iov_base: bytes.as_ptr() as *mut c_void,
        iov_len: bytes.len(),
    };
    let remote = libc::iovec {
        iov_base: address as *mut c_void,
        iov_len: bytes.len(),
    };
    // SAFETY: the kernel only reads from `local`, which covers exactly `bytes`.
    let count = unsafe { libc::process_vm_writev(pid, &local, 1, &remote, 1, 0) };
    if count < 0 {
        let error = io::Error::last_os_error();
        // Pages without write permission still accept POKEDATA.
        if error.raw_os_error() == Some(libc::EFAULT) {
            return Ok(Transfer::Unsupported);
        }
        return vectored_error(error);
    }
    if count as usize != bytes.len() {
        return Err(short_transfer());
    }
    Ok(Transfer::Done)
}

/// Word-by-word read through `PTRACE_PEEKDATA`.
pub(super) fn read_words(pid: pid_t, address: u64, buffer: &mut [u8]) -> io::Result<()>
{
    trace!(pid, address, len = buffer.len(), "reading with PEEKDATA");
    let mut done = 0usize;
    while done < buffer.len() {
        let cursor = address + done as u64;
        let aligned = cursor & !(WORD - 1);
        let skip = (cursor - aligned) as usize;
        let word = ptrace::peek(pid, aligned)?.to_ne_bytes();
        let take = (word.len() - skip).min(buffer.len() - done);
        buffer[done..done + take].copy_from_slice(&word[skip..skip + take]);
        done += take;
    }
    Ok(())
}

/// Word-by-word write through `PTRACE_POKEDATA`; partial words are merged with
/// the bytes already there.
pub(super) fn write_words(pid: pid_t, address: u64, bytes: &[u8]) -> io::Result<()>
{
    trace!(pid, address, len = bytes.len(), "writing with POKEDATA");
    let mut done = 0usize;
    while done < bytes.len() {
        let cursor = address + done as u64;
        let aligned = cursor & !(WORD - 1);
        let skip = (cursor - aligned) as usize;
        let take = (WORD as usize - skip).min(bytes.len() - done);
        let mut word = if skip == 0 && take == WORD as usize {
            [0u8; WORD as usize]
        } else {
            ptrace::peek(pid, aligned)?.to_ne_bytes()
        };
        word[skip..skip + take].copy_from_slice(&bytes[done..done + take]);
        ptrace::poke(pid, aligned, u64::from_ne_bytes(word))?;
        done += take;
    }
    Ok(())
}
