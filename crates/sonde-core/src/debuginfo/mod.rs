//! # Debug Information
//!
//! Per-object metadata: segments, symbols, types, frames and variables.
//!
//! [`ObjectInformation`] is built from one ELF executable or shared object.
//! Headers, segments and the symbol table are read eagerly. DWARF tables
//! (types, frames, global variables) are parsed on first use and cached.
//!
//! ## Failure modes
//!
//! - The object cannot be parsed as ELF: [`SondeError::MalformedImage`]
//! - A unit uses a DWARF version other than 2 to 5:
//!   [`SondeError::UnsupportedDebugFormat`]
//! - No `.debug_info`: loading succeeds; type, frame and variable lists are empty
//!
//! [`ObjectInformation::load`] and [`ObjectInformation::from_bytes`] report
//! debug-format errors. The `_best_effort` variants, used for every image of a
//! live process, only fail on the ELF headers: unusable DWARF is recorded in
//! [`ObjectInformation::debug_error`] and the object keeps its segments and
//! symbols with empty DWARF tables. A malformed unit or variable inside
//! otherwise readable DWARF is skipped on its own.
//!
//! Addresses handled here are *file* addresses. Callers holding a runtime
//! address subtract the image's load bias first.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sonde_core::debuginfo::ObjectInformation;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>>
//! {
//!     let info = ObjectInformation::load("/usr/bin/true")?;
//!     println!("{} symbols, {} types", info.symbols().len(), info.types()?.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
mod cfi;
mod demangle;
pub mod frames;
pub mod image;
mod parse;
pub mod symbolize;
pub mod types;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use gimli::{Dwarf, EndianArcSlice, RunTimeEndian, SectionId};
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

pub use cache::ImageCache;
pub use cfi::CallFrame;
pub use frames::{Frame, FrameKind, PcRange, Variable};
pub use image::{Segment, Symbol, SymbolKind, SymbolTable};
pub use symbolize::{SourceLocation, SymbolFrame, Symbolication};
pub use types::{Enumerator, Member, Qualifier, TypeGraph, TypeId, TypeKind, TypeNode};

use self::cfi::Cfi;
use self::demangle::map_dwarf_error;
use self::image::ElfMetadata;
use self::parse::{DebugTables, DieWalker};
use self::symbolize::Symbolizer;
use crate::address_space::AddressSpace;
use crate::error::{SondeError, SondeResult};
use crate::types::{Address, Architecture, Endianness, Registers};

pub(crate) type OwnedReader = EndianArcSlice<RunTimeEndian>;
pub(crate) type OwnedDwarf = Dwarf<OwnedReader>;

/// Protection granularity assumed for `PT_GNU_RELRO`.
const PAGE_SIZE: u64 = 4096;

/// Parsed metadata of one executable or shared object.
pub struct ObjectInformation
{
    name: String,
    elf: ElfMetadata,
    unit_versions: Vec<u16>,
    debug_error: Option<SondeError>,
    tables: OnceCell<DebugTables>,
    symbolizer: OnceCell<Option<Symbolizer>>,
}

impl std::fmt::Debug for ObjectInformation
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("ObjectInformation")
            .field("name", &self.name)
            .field("architecture", &self.elf.architecture)
            .field("segments", &self.elf.segments.len())
            .field("symbols", &self.elf.symbols.len())
            .field("dwarf_versions", &self.unit_versions)
            .field("debug_error", &self.debug_error)
            .finish_non_exhaustive()
    }
}

impl ObjectInformation
{
    /// Read and parse the object at `path`.
    pub fn load(path: impl AsRef<Path>) -> SondeResult<Self>
    {
        let path = path.as_ref();
        let data = fs::read(path)?;
        Self::from_bytes(path.display().to_string(), &data)
    }

    /// Like [`load`](Self::load), but unusable DWARF only drops the DWARF.
    pub fn load_best_effort(path: impl AsRef<Path>) -> SondeResult<Self>
    {
        let path = path.as_ref();
        let data = fs::read(path)?;
        Self::from_bytes_best_effort(path.display().to_string(), &data)
    }

    /// Parse an in-memory object image; `name` is used in errors and reports.
    pub fn from_bytes(name: impl Into<String>, data: &[u8]) -> SondeResult<Self>
    {
        let mut info = Self::from_bytes_best_effort(name, data)?;
        match info.debug_error.take() {
            Some(error) => Err(error),
            None => Ok(info),
        }
    }

    /// Parse an in-memory object image, keeping segments and symbols when the
    /// DWARF cannot be used.
    pub fn from_bytes_best_effort(name: impl Into<String>, data: &[u8]) -> SondeResult<Self>
    {
        let name = name.into();
        let elf = ElfMetadata::parse(&name, data)?;
        let mut info = Self {
            name,
            elf,
            unit_versions: Vec::new(),
            debug_error: None,
            tables: OnceCell::new(),
            symbolizer: OnceCell::new(),
        };
        match info.check_unit_versions() {
            Ok(versions) => info.unit_versions = versions,
            Err(error) => info.debug_error = Some(error),
        }
        debug!(
            object = %info.name,
            segments = info.elf.segments.len(),
            symbols = info.elf.symbols.len(),
            units = info.unit_versions.len(),
            usable_dwarf = info.debug_error.is_none(),
            "loaded object"
        );
        Ok(info)
    }

    fn dwarf(&self) -> SondeResult<OwnedDwarf>
    {
        let endian = self.runtime_endian();
        Dwarf::load(|section: SectionId| {
            let data = self
                .elf
                .debug_sections
                .get(section.name())
                .cloned()
                .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
            Ok::<_, gimli::Error>(EndianArcSlice::new(data, endian))
        })
        .map_err(|err| map_dwarf_error(&self.name, "loading DWARF sections", err))
    }

    fn runtime_endian(&self) -> RunTimeEndian
    {
        match self.elf.endianness {
            Endianness::Little => RunTimeEndian::Little,
            Endianness::Big => RunTimeEndian::Big,
        }
    }

    fn check_unit_versions(&self) -> SondeResult<Vec<u16>>
    {
        if !self.has_debug_info() {
            return Ok(Vec::new());
        }
        let dwarf = self.dwarf()?;
        let mut versions = Vec::new();
        let mut headers = dwarf.units();
        while let Some(header) = headers
            .next()
            .map_err(|err| map_dwarf_error(&self.name, "reading .debug_info unit header", err))?
        {
            let version = header.version();
            if !(2..=5).contains(&version) {
                return Err(SondeError::UnsupportedDebugFormat {
                    object: self.name.clone(),
                    reason: format!("DWARF version {version}"),
                });
            }
            versions.push(version);
        }
        Ok(versions)
    }

    fn tables(&self) -> SondeResult<&DebugTables>
    {
        self.tables.get_or_try_init(|| {
            let address_size = self.elf.architecture.pointer_size_bytes();
            if !self.has_usable_debug_info() {
                return Ok(DebugTables {
                    types: TypeGraph::new(address_size),
                    ..DebugTables::default()
                });
            }
            let dwarf = self.dwarf()?;
            let tables = DieWalker::new(&self.name, &dwarf, self.elf.endianness, address_size).walk();
            debug!(
                object = %self.name,
                types = tables.types.len(),
                frames = tables.frames.len(),
                globals = tables.globals.len(),
                skipped_units = tables.skipped_units,
                skipped_variables = tables.skipped_variables,
                "parsed debug tables"
            );
            Ok(tables)
        })
    }

    pub fn name(&self) -> &str
    {
        &self.name
    }

    pub fn architecture(&self) -> Architecture
    {
        self.elf.architecture
    }

    pub fn endianness(&self) -> Endianness
    {
        self.elf.endianness
    }

    /// Entry point (file address)
    pub fn entry(&self) -> Address
    {
        self.elf.entry
    }

    /// `PT_LOAD` segments in file order
    pub fn segments(&self) -> &[Segment]
    {
        &self.elf.segments
    }

    /// File address of the `_DYNAMIC` array, if the object has one.
    pub fn dynamic_address(&self) -> Option<Address>
    {
        self.elf.dynamic
    }

    /// Lowest and one-past-highest file address of any `PT_LOAD` segment.
    pub fn address_range(&self) -> Option<(Address, Address)>
    {
        let start = self.elf.segments.iter().map(|segment| segment.start).min()?;
        let end = self.elf.segments.iter().map(|segment| segment.end).max()?;
        Some((start, end))
    }

    /// Ranges that stay writable after relocation: writable `PT_LOAD`
    /// segments minus `PT_GNU_RELRO`.
    ///
    /// The dynamic linker protects RELRO rounded down to pages at both ends,
    /// so the subtraction uses the same rounding.
    pub fn writable_ranges(&self) -> Vec<(Address, Address)>
    {
        let mut ranges: Vec<(u64, u64)> = self
            .elf
            .segments
            .iter()
            .filter(|segment| segment.permissions.write)
            .map(|segment| (segment.start.value(), segment.end.value()))
            .collect();

        for (relro_start, relro_end) in &self.elf.relro {
            let cut_start = relro_start.value() & !(PAGE_SIZE - 1);
            let cut_end = relro_end.value() & !(PAGE_SIZE - 1);
            if cut_start >= cut_end {
                continue;
            }
            ranges = ranges
                .into_iter()
                .flat_map(|(start, end)| {
                    let mut pieces = Vec::with_capacity(2);
                    if start < cut_start.min(end) {
                        pieces.push((start, cut_start.min(end)));
                    }
                    if cut_end.max(start) < end {
                        pieces.push((cut_end.max(start), end));
                    }
                    pieces
                })
                .collect();
        }

        ranges
            .into_iter()
            .filter(|(start, end)| start < end)
            .map(|(start, end)| (Address::from(start), Address::from(end)))
            .collect()
    }

    pub fn symbols(&self) -> &SymbolTable
    {
        &self.elf.symbols
    }

    /// Symbol by raw, demangled or hash-less demangled name.
    pub fn symbol(&self, name: &str) -> Option<&Symbol>
    {
        self.elf.symbols.get(name)
    }

    pub fn has_debug_info(&self) -> bool
    {
        self.elf
            .debug_sections
            .get(".debug_info")
            .is_some_and(|section| !section.is_empty())
    }

    /// Why the DWARF of a best-effort load is not used, if it is not.
    pub fn debug_error(&self) -> Option<&SondeError>
    {
        self.debug_error.as_ref()
    }

    fn has_usable_debug_info(&self) -> bool
    {
        self.has_debug_info() && self.debug_error.is_none()
    }

    /// DWARF version of every compilation unit, in section order.
    pub fn dwarf_versions(&self) -> &[u16]
    {
        &self.unit_versions
    }

    /// Compilation units and variables dropped because they could not be parsed.
    pub fn skipped_debug_entries(&self) -> SondeResult<(usize, usize)>
    {
        let tables = self.tables()?;
        Ok((tables.skipped_units, tables.skipped_variables))
    }

    pub fn types(&self) -> SondeResult<&TypeGraph>
    {
        Ok(&self.tables()?.types)
    }

    /// Top-level subprograms with their nested scopes.
    pub fn frames(&self) -> SondeResult<&[Frame]>
    {
        Ok(&self.tables()?.frames)
    }

    /// Variables with static storage.
    pub fn globals(&self) -> SondeResult<&[Variable]>
    {
        Ok(&self.tables()?.globals)
    }

    pub fn global(&self, name: &str) -> SondeResult<Option<&Variable>>
    {
        let tables = self.tables()?;
        Ok(tables.global_index.get(name).and_then(|index| tables.globals.get(*index)))
    }

    /// Scopes containing the file address `pc`, outermost first.
    pub fn find_frame(&self, pc: Address) -> SondeResult<Vec<&Frame>>
    {
        Ok(frames::scope_chain(self.frames()?, pc))
    }

    /// Subprogram by (demangled) name.
    pub fn function(&self, name: &str) -> SondeResult<Option<&Frame>>
    {
        Ok(self
            .frames()?
            .iter()
            .find(|frame| frame.kind == FrameKind::Subprogram && frame.name.as_deref() == Some(name)))
    }

    /// Apply call frame information at runtime PC `regs.pc()`.
    ///
    /// Returns `None` if no FDE covers the PC.
    pub fn call_frame(
        &self,
        regs: &Registers,
        load_bias: u64,
        space: Option<&dyn AddressSpace>,
    ) -> SondeResult<Option<CallFrame>>
    {
        let cfi = Cfi {
            object: &self.name,
            architecture: self.elf.architecture,
            endian: self.runtime_endian(),
            eh_frame: self.elf.eh_frame.as_ref(),
            debug_frame: self.elf.debug_frame.as_ref(),
        };
        cfi.call_frame(regs.pc().value().wrapping_sub(load_bias), regs, space)
    }

    /// Function names and source lines at the file address `pc`.
    pub fn symbolicate(&self, pc: Address) -> Option<Symbolication>
    {
        let symbolizer = self.symbolizer.get_or_init(|| {
            if !self.has_usable_debug_info() {
                return None;
            }
            let dwarf = self.dwarf().ok()?;
            match addr2line::Context::from_dwarf(dwarf) {
                Ok(context) => Some(Symbolizer::new(context)),
                Err(err) => {
                    warn!(object = %self.name, error = %err, "failed to build line tables");
                    None
                }
            }
        });

        if let Some(symbolication) = symbolizer.as_ref().and_then(|symbolizer| symbolizer.symbolicate(pc.value())) {
            return Some(symbolication);
        }
        let symbol = self.elf.symbols.containing(pc)?;
        Some(Symbolication {
            frames: vec![SymbolFrame {
                function: Some(symbol.display_name().to_string()),
                location: None,
            }],
        })
    }
}
