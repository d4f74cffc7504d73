//! Register block transfer for the stopped thread.

use std::io;

use libc::pid_t;

use super::ptrace;
use crate::types::{Architecture, Registers};

pub(super) fn read(pid: pid_t) -> io::Result<Registers>
{
    let architecture = Architecture::current();
    let mut words = Registers::zeroed(architecture).words().to_vec();
    ptrace::get_registers(pid, &mut words)?;
    Ok(Registers::from_words(architecture, words))
}

pub(super) fn write(pid: pid_t, registers: &Registers) -> io::Result<()>
{
    let expected = Registers::zeroed(Architecture::current()).words().len();
    if registers.architecture() != Architecture::current() || registers.words().len() != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "register block for {:?} ({} words) does not match this host",
                registers.architecture(),
                registers.words().len()
            ),
        ));
    }
    ptrace::set_registers(pid, registers.words())
}
