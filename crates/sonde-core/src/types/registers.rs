//! CPU register context.
//!
//! A [`Registers`] value holds the *whole* kernel register block of the stopped
//! thread (`user_regs_struct` on x86_64, `user_pt_regs` on aarch64) as an
//! ordered word vector. Writing it back restores exactly what was captured,
//! including fields such as `orig_rax` that decide whether an interrupted
//! system call is restarted on resume.
//!
//! ## Word layout
//!
//! - **x86_64** (27 words): r15 r14 r13 r12 rbp rbx r11 r10 r9 r8 rax rcx rdx
//!   rsi rdi orig_rax rip cs eflags rsp ss fs_base gs_base ds es fs gs
//! - **aarch64** (34 words): x0..x30 sp pc pstate

use super::{Address, Architecture};

/// Number of words in the x86_64 `user_regs_struct`.
pub const X86_64_WORDS: usize = 27;

/// Number of words in the aarch64 `user_pt_regs`.
pub const ARM64_WORDS: usize = 34;

const X86_64_RIP: usize = 16;
const X86_64_RSP: usize = 19;
const X86_64_RBP: usize = 4;
const X86_64_EFLAGS: usize = 18;

const ARM64_FP: usize = 29;
const ARM64_SP: usize = 31;
const ARM64_PC: usize = 32;
const ARM64_PSTATE: usize = 33;

/// Identifier for a specific CPU register
///
/// ```rust
/// use sonde_core::types::{Arm64Register, RegisterId, X86_64Register};
///
/// let pc = RegisterId::Pc;
/// let x0 = RegisterId::Arm64(Arm64Register::X(0));
/// let rax = RegisterId::X86_64(X86_64Register::Rax);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterId
{
    /// Program counter (RIP / PC)
    Pc,
    /// Stack pointer (RSP / SP)
    Sp,
    /// Frame pointer (RBP / X29)
    Fp,
    /// Flags (EFLAGS / PSTATE)
    Status,
    /// ARM64-specific register identifier
    Arm64(Arm64Register),
    /// x86-64-specific register identifier
    X86_64(X86_64Register),
}

/// ARM64 general-purpose register X0-X30
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arm64Register
{
    X(u8),
}

/// x86-64 general-purpose registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum X86_64Register
{
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    /// Syscall number of an interrupted system call, -1 otherwise
    OrigRax,
}

impl X86_64Register
{
    /// Position in `user_regs_struct`
    const fn word_index(self) -> usize
    {
        match self {
            X86_64Register::R15 => 0,
            X86_64Register::R14 => 1,
            X86_64Register::R13 => 2,
            X86_64Register::R12 => 3,
            X86_64Register::Rbx => 5,
            X86_64Register::R11 => 6,
            X86_64Register::R10 => 7,
            X86_64Register::R9 => 8,
            X86_64Register::R8 => 9,
            X86_64Register::Rax => 10,
            X86_64Register::Rcx => 11,
            X86_64Register::Rdx => 12,
            X86_64Register::Rsi => 13,
            X86_64Register::Rdi => 14,
            X86_64Register::OrigRax => 15,
        }
    }
}

/// DWARF register number → `user_regs_struct` index on x86_64 (0..=16).
const X86_64_DWARF_TO_WORD: [usize; 17] = [10, 12, 11, 5, 13, 14, 4, 19, 9, 8, 7, 6, 3, 2, 1, 0, 16];

/// Full register context of one stopped thread
///
/// ```rust
/// use sonde_core::types::{Address, Architecture, RegisterId, Registers};
///
/// let mut regs = Registers::zeroed(Architecture::X86_64);
/// regs.set(RegisterId::Pc, 0x401000);
/// assert_eq!(regs.pc(), Address::from(0x401000));
/// assert_eq!(regs.dwarf(16), Some(0x401000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers
{
    architecture: Architecture,
    words: Vec<u64>,
}

impl Registers
{
    /// All-zero context with the right word count for `architecture`.
    pub fn zeroed(architecture: Architecture) -> Self
    {
        let len = match architecture {
            Architecture::X86_64 => X86_64_WORDS,
            Architecture::Arm64 => ARM64_WORDS,
            Architecture::Unknown(_) => 0,
        };
        Self {
            architecture,
            words: vec![0; len],
        }
    }

    /// Wrap a raw register block read from the kernel.
    pub fn from_words(architecture: Architecture, words: Vec<u64>) -> Self
    {
        Self { architecture, words }
    }

    pub fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    /// Raw register block, in kernel order.
    pub fn words(&self) -> &[u64]
    {
        &self.words
    }

    pub fn pc(&self) -> Address
    {
        Address::from(self.get(RegisterId::Pc).unwrap_or(0))
    }

    pub fn sp(&self) -> Address
    {
        Address::from(self.get(RegisterId::Sp).unwrap_or(0))
    }

    pub fn fp(&self) -> Address
    {
        Address::from(self.get(RegisterId::Fp).unwrap_or(0))
    }

    fn word_index(&self, id: RegisterId) -> Option<usize>
    {
        match (self.architecture, id) {
            (Architecture::X86_64, RegisterId::Pc) => Some(X86_64_RIP),
            (Architecture::X86_64, RegisterId::Sp) => Some(X86_64_RSP),
            (Architecture::X86_64, RegisterId::Fp) => Some(X86_64_RBP),
            (Architecture::X86_64, RegisterId::Status) => Some(X86_64_EFLAGS),
            (Architecture::X86_64, RegisterId::X86_64(reg)) => Some(reg.word_index()),
            (Architecture::Arm64, RegisterId::Pc) => Some(ARM64_PC),
            (Architecture::Arm64, RegisterId::Sp) => Some(ARM64_SP),
            (Architecture::Arm64, RegisterId::Fp) => Some(ARM64_FP),
            (Architecture::Arm64, RegisterId::Status) => Some(ARM64_PSTATE),
            (Architecture::Arm64, RegisterId::Arm64(Arm64Register::X(n))) if n <= 30 => Some(usize::from(n)),
            _ => None,
        }
    }

    /// Value of a register, `None` if it does not exist on this architecture.
    pub fn get(&self, id: RegisterId) -> Option<u64>
    {
        self.words.get(self.word_index(id)?).copied()
    }

    /// Overwrite a register, `None` if it does not exist on this architecture.
    pub fn set(&mut self, id: RegisterId, value: u64) -> Option<()>
    {
        let index = self.word_index(id)?;
        *self.words.get_mut(index)? = value;
        Some(())
    }

    /// Read a register by its DWARF number.
    ///
    /// x86_64: 0-15 general purpose, 16 return address (RIP).
    /// aarch64: 0-30 X registers, 31 SP.
    pub fn dwarf(&self, register: u16) -> Option<u64>
    {
        let index = match self.architecture {
            Architecture::X86_64 => *X86_64_DWARF_TO_WORD.get(usize::from(register))?,
            Architecture::Arm64 if register <= 31 => usize::from(register),
            _ => return None,
        };
        self.words.get(index).copied()
    }

    /// Write a register by its DWARF number.
    pub fn set_dwarf(&mut self, register: u16, value: u64) -> Option<()>
    {
        let index = match self.architecture {
            Architecture::X86_64 => *X86_64_DWARF_TO_WORD.get(usize::from(register))?,
            Architecture::Arm64 if register <= 31 => usize::from(register),
            _ => return None,
        };
        *self.words.get_mut(index)? = value;
        Some(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_x86_64_dwarf_mapping()
    {
        let words: Vec<u64> = (0..X86_64_WORDS as u64).collect();
        let regs = Registers::from_words(Architecture::X86_64, words);
        // rax lives at word 10, rsp at 19, rip at 16
        assert_eq!(regs.dwarf(0), Some(10));
        assert_eq!(regs.dwarf(7), Some(19));
        assert_eq!(regs.dwarf(16), Some(16));
        assert_eq!(regs.dwarf(17), None);
        assert_eq!(regs.get(RegisterId::X86_64(X86_64Register::OrigRax)), Some(15));
    }

    #[test]
    fn test_arm64_registers()
    {
        let mut regs = Registers::zeroed(Architecture::Arm64);
        regs.set(RegisterId::Arm64(Arm64Register::X(29)), 0x7000).unwrap();
        regs.set(RegisterId::Sp, 0x6ff0).unwrap();
        assert_eq!(regs.fp(), Address::from(0x7000));
        assert_eq!(regs.dwarf(31), Some(0x6ff0));
        assert!(regs.set(RegisterId::Arm64(Arm64Register::X(31)), 1).is_none());
        assert!(regs.get(RegisterId::X86_64(X86_64Register::Rax)).is_none());
    }
}
