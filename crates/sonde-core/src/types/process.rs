//! Process, architecture and memory region types.

use std::fmt;

use super::Address;
use crate::error::ExitCause;

/// Process identifier (PID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl ProcessId
{
    /// The PID as libc expects it
    pub fn as_raw(self) -> i32
    {
        i32::try_from(self.0).unwrap_or(i32::MAX)
    }
}

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Liveness of a checked process as seen by its backend
///
/// ## State Transitions
///
/// - `Stopped` → `Running`: the checker resumed the process
/// - `Running` → `Stopped`: the checker stopped it (SIGSTOP) at a decision point
/// - any → `Gone`: exit, crash or forced kill; `Gone` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus
{
    /// Executing; memory may change under the reader
    Running,
    /// Fully stopped; reads and writes are stable
    Stopped,
    /// No longer exists
    Gone(ExitCause),
}

impl ProcessStatus
{
    pub const fn is_stopped(self) -> bool
    {
        matches!(self, ProcessStatus::Stopped)
    }

    /// Exit cause if the process is gone
    pub const fn exit_cause(self) -> Option<ExitCause>
    {
        match self {
            ProcessStatus::Gone(cause) => Some(cause),
            _ => None,
        }
    }
}

/// Byte order of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness
{
    Little,
    Big,
}

impl Endianness
{
    /// Byte order of the machine running sonde
    pub const fn native() -> Self
    {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }

    /// Decode an unsigned integer of `bytes.len()` (at most 8) bytes.
    pub fn read_uint(self, bytes: &[u8]) -> Option<u64>
    {
        if bytes.is_empty() || bytes.len() > 8 {
            return None;
        }
        let mut value = 0u64;
        match self {
            Endianness::Little => {
                for byte in bytes.iter().rev() {
                    value = (value << 8) | u64::from(*byte);
                }
            }
            Endianness::Big => {
                for byte in bytes {
                    value = (value << 8) | u64::from(*byte);
                }
            }
        }
        Some(value)
    }

    /// Encode the low `size` bytes of `value`.
    pub fn write_uint(self, value: u64, size: usize) -> Vec<u8>
    {
        let size = size.min(8);
        match self {
            Endianness::Little => value.to_le_bytes()[..size].to_vec(),
            Endianness::Big => value.to_be_bytes()[8 - size..].to_vec(),
        }
    }
}

/// CPU architecture of a target
///
/// ## Supported Architectures
///
/// - **Arm64**: 64-bit ARM (Linux aarch64)
/// - **X86_64**: 64-bit x86 (Intel/AMD)
/// - **Unknown**: anything else; only frozen snapshots and debug info work there
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 64-bit ARM
    ///
    /// See: [ARM64 Architecture Reference Manual](https://developer.arm.com/documentation/ddi0487/latest)
    Arm64,
    /// 64-bit x86 (Intel/AMD)
    X86_64,
    /// Any other architecture (or unknown)
    Unknown(&'static str),
}

impl Architecture
{
    /// Architecture sonde itself was compiled for
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }

        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }

        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
        {
            Architecture::Unknown(std::env::consts::ARCH)
        }
    }

    /// Map the architecture recorded in an object file.
    pub fn from_object(arch: object::Architecture) -> Self
    {
        match arch {
            object::Architecture::Aarch64 => Architecture::Arm64,
            object::Architecture::X86_64 => Architecture::X86_64,
            _ => Architecture::Unknown("unknown"),
        }
    }

    /// Size of a pointer in bytes for this architecture.
    #[must_use]
    pub const fn pointer_size_bytes(self) -> u8
    {
        match self {
            Architecture::Arm64 | Architecture::X86_64 => 8,
            Architecture::Unknown(_) => 8,
        }
    }

    /// DWARF register number holding the stack pointer.
    pub const fn dwarf_stack_pointer(self) -> u16
    {
        match self {
            Architecture::Arm64 => 31,
            Architecture::X86_64 | Architecture::Unknown(_) => 7,
        }
    }

    /// DWARF column of the return address in CFI tables.
    pub const fn dwarf_return_address(self) -> u16
    {
        match self {
            Architecture::Arm64 => 30,
            Architecture::X86_64 | Architecture::Unknown(_) => 16,
        }
    }

    /// DWARF register number of the frame pointer.
    pub const fn dwarf_frame_pointer(self) -> u16
    {
        match self {
            Architecture::Arm64 => 29,
            Architecture::X86_64 | Architecture::Unknown(_) => 6,
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Unknown(name) => write!(f, "{name}"),
        }
    }
}

/// Access permissions of a mapping or segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Permissions
{
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Permissions
{
    /// Parse the first three characters of a `/proc/<pid>/maps` mode (`rw-p`).
    pub fn from_maps(mode: &str) -> Self
    {
        let bytes = mode.as_bytes();
        Self {
            read: bytes.first() == Some(&b'r'),
            write: bytes.get(1) == Some(&b'w'),
            execute: bytes.get(2) == Some(&b'x'),
        }
    }

    /// Decode ELF `p_flags`.
    pub fn from_elf_flags(flags: u32) -> Self
    {
        Self {
            read: flags & object::elf::PF_R != 0,
            write: flags & object::elf::PF_W != 0,
            execute: flags & object::elf::PF_X != 0,
        }
    }
}

impl fmt::Display for Permissions
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(self.read, 'r'),
            flag(self.write, 'w'),
            flag(self.execute, 'x')
        )
    }
}

/// Contiguous mapping in a target address space
///
/// ```rust
/// use sonde_core::types::{Address, MemoryRegion, Permissions};
///
/// let stack = MemoryRegion::new(
///     Address::from(0x7ff0_0000),
///     Address::from(0x7ff2_0000),
///     Permissions::from_maps("rw-p"),
///     Some("[stack]".to_string()),
/// );
/// assert!(stack.contains(Address::from(0x7ff1_0000)));
/// assert_eq!(stack.size(), 0x2_0000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion
{
    /// First byte (inclusive)
    pub start: Address,
    /// One past the last byte (exclusive)
    pub end: Address,
    pub permissions: Permissions,
    /// Backing file or pseudo name such as `[stack]`
    pub name: Option<String>,
}

impl MemoryRegion
{
    pub fn new(start: Address, end: Address, permissions: Permissions, name: Option<String>) -> Self
    {
        Self {
            start,
            end,
            permissions,
            name,
        }
    }

    /// Size in bytes (0 if `end <= start`)
    pub fn size(&self) -> u64
    {
        self.end.value().saturating_sub(self.start.value())
    }

    /// `start <= address < end`
    pub fn contains(&self, address: Address) -> bool
    {
        address >= self.start && address < self.end
    }

    /// Parse one line of `/proc/<pid>/maps`.
    ///
    /// ```text
    /// 7ffd1c3e5000-7ffd1c406000 rw-p 00000000 00:00 0          [stack]
    /// ```
    pub fn parse_maps_line(line: &str) -> Option<Self>
    {
        let mut fields = line.split_whitespace();
        let range = fields.next()?;
        let mode = fields.next()?;
        let (start, end) = range.split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;
        // offset, device, inode
        let name = fields.nth(3).map(str::to_string);
        Some(Self::new(
            Address::from(start),
            Address::from(end),
            Permissions::from_maps(mode),
            name,
        ))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_maps_line_with_name()
    {
        let line = "7ffd1c3e5000-7ffd1c406000 rw-p 00000000 00:00 0                          [stack]";
        let region = MemoryRegion::parse_maps_line(line).unwrap();
        assert_eq!(region.start, Address::from(0x7ffd_1c3e_5000));
        assert_eq!(region.end, Address::from(0x7ffd_1c40_6000));
        assert!(region.permissions.read && region.permissions.write && !region.permissions.execute);
        assert_eq!(region.name.as_deref(), Some("[stack]"));
    }

    #[test]
    fn test_parse_maps_line_anonymous()
    {
        let region = MemoryRegion::parse_maps_line("55d0c0a00000-55d0c0a21000 rw-p 00000000 00:00 0").unwrap();
        assert_eq!(region.name, None);
        assert_eq!(region.size(), 0x21000);
    }

    #[test]
    fn test_endianness_round_trip()
    {
        let bytes = Endianness::Big.write_uint(0x0102_0304, 4);
        assert_eq!(bytes, vec![1, 2, 3, 4]);
        assert_eq!(Endianness::Big.read_uint(&bytes), Some(0x0102_0304));
        assert_eq!(Endianness::Little.read_uint(&[0x34, 0x12]), Some(0x1234));
        assert_eq!(Endianness::Little.read_uint(&[]), None);
    }

    #[test]
    fn test_permissions_display()
    {
        assert_eq!(Permissions::from_elf_flags(object::elf::PF_R | object::elf::PF_W).to_string(), "rw-");
    }
}
