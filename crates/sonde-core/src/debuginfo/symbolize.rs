//! Address to function and source line, for counterexample reports.

use std::sync::{Mutex, PoisonError};

use addr2line::Context;

use super::demangle::demangle;
use super::OwnedReader;

/// Source position of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation
{
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl std::fmt::Display for SourceLocation
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "{}:{line}:{column}", self.file),
            (Some(line), None) => write!(f, "{}:{line}", self.file),
            _ => write!(f, "{}", self.file),
        }
    }
}

/// One (possibly inlined) function at an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolFrame
{
    pub function: Option<String>,
    pub location: Option<SourceLocation>,
}

/// Functions at an address, innermost inlined frame first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Symbolication
{
    pub frames: Vec<SymbolFrame>,
}

/// Lazily built line-table context. `addr2line::Context` is not `Sync`.
pub(crate) struct Symbolizer
{
    context: Mutex<Context<OwnedReader>>,
}

impl Symbolizer
{
    pub(crate) fn new(context: Context<OwnedReader>) -> Self
    {
        Self {
            context: Mutex::new(context),
        }
    }

    pub(crate) fn symbolicate(&self, file_address: u64) -> Option<Symbolication>
    {
        let context = self.context.lock().unwrap_or_else(PoisonError::into_inner);
        let mut frames = Vec::new();

        let lookup = context.find_frames(file_address);
        let mut frame_iter = lookup.skip_all_loads().ok()?;
        while let Ok(Some(frame)) = frame_iter.next() {
            let function = frame
                .function
                .as_ref()
                .and_then(|func| func.raw_name().ok())
                .map(|raw| demangle(&raw).unwrap_or_else(|| raw.to_string()));
            let location = frame.location.and_then(|loc| {
                loc.file.map(|file| SourceLocation {
                    file: file.to_string(),
                    line: loc.line,
                    column: loc.column,
                })
            });
            frames.push(SymbolFrame { function, location });
        }

        if frames.is_empty() {
            return None;
        }
        Some(Symbolication { frames })
    }
}
