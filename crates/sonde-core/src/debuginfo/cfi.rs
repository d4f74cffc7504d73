//! Call frame information (`.eh_frame` / `.debug_frame`).
//!
//! FDEs are searched linearly with the file-relative PC. Register rules are
//! applied to the callee-saved registers, the stack pointer and the return
//! address; that is enough to walk a stack and to evaluate
//! `DW_OP_call_frame_cfa`.

use gimli::{BaseAddresses, CfaRule, DebugFrame, EhFrame, Register, RegisterRule, RunTimeEndian, UnwindContext, UnwindSection};

use super::demangle::map_dwarf_error;
use super::image::SectionBlob;
use crate::address_space::{AddressSpace, AddressSpaceExt};
use crate::error::{SondeError, SondeResult};
use crate::types::{Address, Architecture, Registers};

/// Result of applying one CFI row.
#[derive(Debug, Clone)]
pub struct CallFrame
{
    /// Canonical frame address of the current frame
    pub cfa: u64,
    /// Registers of the caller, `None` at the outermost frame
    pub caller: Option<Registers>,
}

pub(crate) struct Cfi<'a>
{
    pub(crate) object: &'a str,
    pub(crate) architecture: Architecture,
    pub(crate) endian: RunTimeEndian,
    pub(crate) eh_frame: Option<&'a SectionBlob>,
    pub(crate) debug_frame: Option<&'a SectionBlob>,
}

fn callee_saved(architecture: Architecture) -> &'static [u16]
{
    match architecture {
        // rbx, rbp, r12-r15
        Architecture::X86_64 => &[3, 6, 12, 13, 14, 15],
        // x19-x29
        Architecture::Arm64 => &[19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29],
        Architecture::Unknown(_) => &[],
    }
}

impl Cfi<'_>
{
    /// Apply the row covering `file_pc` to `regs`.
    ///
    /// `space` is needed to recover registers saved on the stack; without it
    /// only the CFA is computed.
    pub(crate) fn call_frame(
        &self,
        file_pc: u64,
        regs: &Registers,
        space: Option<&dyn AddressSpace>,
    ) -> SondeResult<Option<CallFrame>>
    {
        if let Some(blob) = self.eh_frame {
            let bases = BaseAddresses::default().set_eh_frame(blob.address);
            let mut section = EhFrame::new(&blob.data[..], self.endian);
            section.set_address_size(self.architecture.pointer_size_bytes());
            if let Some(frame) = self.unwind_with_cfi(&section, &bases, file_pc, regs, space)? {
                return Ok(Some(frame));
            }
        }
        if let Some(blob) = self.debug_frame {
            let bases = BaseAddresses::default();
            let mut section = DebugFrame::new(&blob.data[..], self.endian);
            section.set_address_size(self.architecture.pointer_size_bytes());
            if let Some(frame) = self.unwind_with_cfi(&section, &bases, file_pc, regs, space)? {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn unwind_with_cfi<R, Section>(
        &self,
        section: &Section,
        bases: &BaseAddresses,
        file_pc: u64,
        regs: &Registers,
        space: Option<&dyn AddressSpace>,
    ) -> SondeResult<Option<CallFrame>>
    where
        R: gimli::Reader<Offset = usize>,
        Section: UnwindSection<R>,
    {
        let mut entries = section.entries(bases);
        let mut ctx = UnwindContext::<usize>::new();
        while let Some(entry) = entries
            .next()
            .map_err(|err| map_dwarf_error(self.object, "reading unwind entry", err))?
        {
            let gimli::CieOrFde::Fde(partial) = entry else {
                continue;
            };
            let fde = partial
                .parse(|unwind_section, base_addresses, cie_offset| {
                    unwind_section.cie_from_offset(base_addresses, cie_offset)
                })
                .map_err(|err| map_dwarf_error(self.object, "parsing frame description entry", err))?;
            if !fde.contains(file_pc) {
                continue;
            }

            return match fde.unwind_info_for_address(section, bases, &mut ctx, file_pc) {
                Ok(row) => self.apply_row(row, regs, space),
                Err(gimli::Error::NoUnwindInfoForAddress) => Ok(None),
                Err(err) => Err(map_dwarf_error(self.object, "evaluating unwind row", err)),
            };
        }
        Ok(None)
    }

    fn apply_row(
        &self,
        row: &gimli::UnwindTableRow<usize>,
        regs: &Registers,
        space: Option<&dyn AddressSpace>,
    ) -> SondeResult<Option<CallFrame>>
    {
        let cfa = match row.cfa() {
            CfaRule::RegisterAndOffset { register, offset } => {
                let base = regs
                    .dwarf(register.0)
                    .ok_or_else(|| SondeError::NotFound(format!("DWARF register {} for CFA", register.0)))?;
                base.wrapping_add_signed(*offset)
            }
            _ => return Ok(None),
        };

        let Some(space) = space else {
            return Ok(Some(CallFrame { cfa, caller: None }));
        };

        let return_column = self.architecture.dwarf_return_address();
        let return_address = match self.evaluate_rule(&row.register(Register(return_column)), regs, cfa, space)? {
            Some(value) if value != 0 => value,
            _ => return Ok(Some(CallFrame { cfa, caller: None })),
        };

        let mut caller = regs.clone();
        for register in callee_saved(self.architecture) {
            if let Some(value) = self.evaluate_rule(&row.register(Register(*register)), regs, cfa, space)? {
                caller.set_dwarf(*register, value);
            }
        }
        caller.set_dwarf(self.architecture.dwarf_stack_pointer(), cfa);
        caller.set(crate::types::RegisterId::Pc, return_address);

        Ok(Some(CallFrame {
            cfa,
            caller: Some(caller),
        }))
    }

    /// `None` for rules that leave the register unchanged or unknown.
    fn evaluate_rule(
        &self,
        rule: &RegisterRule<usize>,
        regs: &Registers,
        cfa: u64,
        space: &dyn AddressSpace,
    ) -> SondeResult<Option<u64>>
    {
        match rule {
            RegisterRule::Offset(offset) => space.read_u64(Address::from(cfa.wrapping_add_signed(*offset))).map(Some),
            RegisterRule::ValOffset(offset) => Ok(Some(cfa.wrapping_add_signed(*offset))),
            RegisterRule::Register(register) => Ok(regs.dwarf(register.0)),
            _ => Ok(None),
        }
    }
}
