//! # Stack Walking
//!
//! Call stacks of a stopped process or a snapshot, for counterexample reports.
//!
//! Each step first applies the call frame information of the image owning the
//! PC (`.eh_frame`, then `.debug_frame`). Without CFI it falls back to the
//! frame-pointer chain, which both supported architectures lay out as
//! `[fp] = caller fp`, `[fp + 8] = return address`.
//!
//! ```rust,no_run
//! use sonde_core::inferior::Inferior;
//! use sonde_core::unwind::StackWalker;
//!
//! fn backtrace<P: Inferior>(process: &mut P) -> sonde_core::error::SondeResult<()>
//! {
//!     process.ensure_stopped()?;
//!     let layout = process.layout()?;
//!     let registers = process.registers()?;
//!     for frame in StackWalker::new(&layout, &*process).walk(&registers, 64)? {
//!         println!("{frame}");
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;

use tracing::trace;

use crate::address_space::{AddressSpace, AddressSpaceExt};
use crate::debuginfo::{FrameKind, SourceLocation};
use crate::error::SondeResult;
use crate::inferior::ProcessLayout;
use crate::types::{Address, RegisterId, Registers};

/// How the caller of a frame was recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus
{
    /// Innermost frame, registers as captured
    Top,
    /// Recovered from call frame information
    Cfi,
    /// Recovered by following saved frame pointers
    FramePointer,
}

/// One frame of a walked stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame
{
    pub index: usize,
    pub pc: Address,
    pub sp: Address,
    pub status: FrameStatus,
    /// Image containing `pc`
    pub image: Option<String>,
    /// Innermost function at `pc`, inlined ones included
    pub function: Option<String>,
    pub location: Option<SourceLocation>,
    /// Innermost debug-info scope, if it is a named function or inlined call
    pub scope: Option<String>,
}

impl fmt::Display for StackFrame
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{:<3} {}", self.index, self.pc)?;
        write!(f, " in {}", self.function.as_deref().unwrap_or("??"))?;
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        if let Some(image) = &self.image {
            write!(f, " ({image})")?;
        }
        Ok(())
    }
}

/// Walks stacks over any address space using a process layout's CFI.
pub struct StackWalker<'a>
{
    layout: &'a ProcessLayout,
    memory: &'a dyn AddressSpace,
}

impl<'a> StackWalker<'a>
{
    pub fn new(layout: &'a ProcessLayout, memory: &'a dyn AddressSpace) -> Self
    {
        Self { layout, memory }
    }

    /// Up to `max_frames` frames, innermost first.
    ///
    /// The walk stops at a null PC, when no method recovers a caller, or when
    /// the stack pointer stops growing. Memory errors during recovery end the
    /// walk instead of failing it.
    pub fn walk(&self, registers: &Registers, max_frames: usize) -> SondeResult<Vec<StackFrame>>
    {
        let mut frames = Vec::new();
        let mut cursor = registers.clone();
        let mut status = FrameStatus::Top;

        while frames.len() < max_frames && !cursor.pc().is_null() {
            frames.push(self.describe(frames.len(), &cursor, status));

            let Some((caller, how)) = self.step(&cursor, status == FrameStatus::Top)? else {
                break;
            };
            if caller.sp() <= cursor.sp() && how == FrameStatus::FramePointer {
                trace!(sp = %caller.sp(), "frame pointer chain stopped growing");
                break;
            }
            if caller.pc() == cursor.pc() && caller.sp() == cursor.sp() {
                break;
            }
            cursor = caller;
            status = how;
        }
        Ok(frames)
    }

    /// Address used for lookups: a return address points after the call, so
    /// callers are looked up one byte back to stay inside the call's range.
    fn lookup_pc(pc: Address, top: bool) -> Address
    {
        if top { pc } else { pc - 1 }
    }

    fn step(&self, cursor: &Registers, top: bool) -> SondeResult<Option<(Registers, FrameStatus)>>
    {
        let pc = Self::lookup_pc(cursor.pc(), top);
        if let Some(image) = self.layout.image_for(pc) {
            let mut lookup = cursor.clone();
            lookup.set(RegisterId::Pc, pc.value());
            match image.info.call_frame(&lookup, image.base.value(), Some(self.memory)) {
                Ok(Some(frame)) => {
                    return Ok(frame.caller.map(|mut caller| {
                        // Restore the real return address, not the lookup PC.
                        if caller.pc() == pc {
                            caller.set(RegisterId::Pc, cursor.pc().value());
                        }
                        (caller, FrameStatus::Cfi)
                    }));
                }
                Ok(None) => {}
                Err(error) if error.is_process_gone() => return Err(error),
                Err(error) => trace!(pc = %pc, %error, "call frame information unusable"),
            }
        }
        Ok(self.frame_pointer_step(cursor))
    }

    fn frame_pointer_step(&self, cursor: &Registers) -> Option<(Registers, FrameStatus)>
    {
        let fp = cursor.fp();
        if fp.is_null() {
            return None;
        }
        let saved_fp = self.memory.read_u64(fp).ok()?;
        let return_address = self.memory.read_u64(fp + 8).ok()?;

        let mut caller = cursor.clone();
        caller.set(RegisterId::Fp, saved_fp)?;
        caller.set(RegisterId::Sp, fp.value() + 16)?;
        caller.set(RegisterId::Pc, return_address)?;
        Some((caller, FrameStatus::FramePointer))
    }

    fn describe(&self, index: usize, registers: &Registers, status: FrameStatus) -> StackFrame
    {
        let pc = registers.pc();
        let mut frame = StackFrame {
            index,
            pc,
            sp: registers.sp(),
            status,
            image: None,
            function: None,
            location: None,
            scope: None,
        };
        let lookup = Self::lookup_pc(pc, status == FrameStatus::Top);
        let Some(image) = self.layout.image_for(lookup) else {
            return frame;
        };
        frame.image = Some(image.name.clone());

        let file_pc = image.file_address(lookup);
        if let Some(innermost) = image.info.symbolicate(file_pc).and_then(|s| s.frames.into_iter().next()) {
            frame.function = innermost.function;
            frame.location = innermost.location;
        }
        if let Ok(scopes) = image.info.find_frame(file_pc) {
            frame.scope = scopes
                .iter()
                .rev()
                .find(|scope| scope.kind != FrameKind::LexicalBlock)
                .and_then(|scope| scope.name.clone());
        }
        frame
    }
}
