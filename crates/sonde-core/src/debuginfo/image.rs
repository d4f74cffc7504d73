//! ELF headers, segments, sections and symbols.
//!
//! Everything here is parsed eagerly when an object is loaded: it is cheap and
//! the live backend needs segments and symbols for every capture.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use object::elf;
use object::read::elf::{ElfFile64, FileHeader, ProgramHeader};
use object::{Object, ObjectSection, ObjectSymbol, SymbolKind as ObjectSymbolKind};

use super::demangle::demangle;
use crate::error::{SondeError, SondeResult};
use crate::types::{Address, Architecture, Endianness, Permissions};

/// A `PT_LOAD` segment, in file (unrelocated) addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment
{
    pub start: Address,
    /// One past the last byte of the in-memory image (`p_vaddr + p_memsz`)
    pub end: Address,
    pub permissions: Permissions,
}

impl Segment
{
    pub fn size(&self) -> u64
    {
        self.end.value().saturating_sub(self.start.value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind
{
    Function,
    Data,
    Other,
}

/// Entry of the ELF symbol table.
#[derive(Debug, Clone)]
pub struct Symbol
{
    /// Raw (possibly mangled) name
    pub name: String,
    /// Demangled name when the raw one is a Rust or C++ symbol
    pub demangled: Option<String>,
    /// File address
    pub address: Address,
    pub size: u64,
    pub kind: SymbolKind,
}

impl Symbol
{
    /// Name to show to humans.
    pub fn display_name(&self) -> &str
    {
        self.demangled.as_deref().unwrap_or(&self.name)
    }
}

/// Symbols of one object, indexed by raw and demangled name.
#[derive(Debug, Default)]
pub struct SymbolTable
{
    symbols: Vec<Symbol>,
    by_name: HashMap<String, usize>,
}

impl SymbolTable
{
    fn push(&mut self, symbol: Symbol)
    {
        let index = self.symbols.len();
        self.by_name.entry(symbol.name.clone()).or_insert(index);
        if let Some(demangled) = &symbol.demangled {
            self.by_name.entry(demangled.clone()).or_insert(index);
            // Rust hashes suffix `::h0123456789abcdef`; allow lookups without it.
            if let Some((stem, hash)) = demangled.rsplit_once("::h") {
                if hash.len() == 16 && hash.bytes().all(|b| b.is_ascii_hexdigit()) {
                    self.by_name.entry(stem.to_string()).or_insert(index);
                }
            }
        }
        self.symbols.push(symbol);
    }

    pub fn get(&self, name: &str) -> Option<&Symbol>
    {
        self.by_name.get(name).and_then(|index| self.symbols.get(*index))
    }

    /// Innermost sized symbol containing the file address.
    pub fn containing(&self, address: Address) -> Option<&Symbol>
    {
        self.symbols
            .iter()
            .filter(|symbol| {
                symbol.size > 0 && address >= symbol.address && address.value() < symbol.address.value() + symbol.size
            })
            .min_by_key(|symbol| symbol.size)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol>
    {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize
    {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.symbols.is_empty()
    }
}

#[derive(Clone)]
pub(crate) struct SectionBlob
{
    pub(crate) data: Arc<[u8]>,
    pub(crate) address: u64,
}

pub(crate) const DWARF_SECTIONS: &[&str] = &[
    ".debug_abbrev",
    ".debug_addr",
    ".debug_info",
    ".debug_line",
    ".debug_line_str",
    ".debug_ranges",
    ".debug_rnglists",
    ".debug_str",
    ".debug_str_offsets",
    ".debug_types",
    ".debug_loc",
    ".debug_loclists",
];

/// Header-level facts about one ELF object.
pub(crate) struct ElfMetadata
{
    pub(crate) architecture: Architecture,
    pub(crate) endianness: Endianness,
    pub(crate) entry: Address,
    pub(crate) segments: Vec<Segment>,
    /// `PT_GNU_RELRO` ranges: writable at load time, read-only afterwards
    pub(crate) relro: Vec<(Address, Address)>,
    pub(crate) dynamic: Option<Address>,
    pub(crate) symbols: SymbolTable,
    pub(crate) debug_sections: HashMap<&'static str, Arc<[u8]>>,
    pub(crate) eh_frame: Option<SectionBlob>,
    pub(crate) debug_frame: Option<SectionBlob>,
}

fn malformed(object: &str, reason: impl std::fmt::Display) -> SondeError
{
    SondeError::MalformedImage {
        object: object.to_string(),
        reason: reason.to_string(),
    }
}

fn section_blob(file: &ElfFile64<'_, object::Endianness>, object: &str, name: &str) -> SondeResult<Option<SectionBlob>>
{
    let Some(section) = file.section_by_name(name) else {
        return Ok(None);
    };
    let data = section
        .uncompressed_data()
        .map_err(|err| malformed(object, format_args!("failed to read {name}: {err}")))?;
    let data = match data {
        Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes.to_vec()),
        Cow::Owned(vec) => vec.into(),
    };
    Ok(Some(SectionBlob {
        data,
        address: section.address(),
    }))
}

impl ElfMetadata
{
    pub(crate) fn parse(object: &str, data: &[u8]) -> SondeResult<Self>
    {
        let file = ElfFile64::<object::Endianness>::parse(data).map_err(|err| malformed(object, err))?;
        let endian = file.endian();
        let header = file.elf_header();

        let endianness = if file.is_little_endian() {
            Endianness::Little
        } else {
            Endianness::Big
        };

        let mut segments = Vec::new();
        let mut relro = Vec::new();
        let mut dynamic = None;
        for phdr in file.elf_program_headers() {
            let start = Address::from(phdr.p_vaddr(endian));
            let end = start.saturating_add(phdr.p_memsz(endian));
            match phdr.p_type(endian) {
                elf::PT_LOAD => segments.push(Segment {
                    start,
                    end,
                    permissions: Permissions::from_elf_flags(phdr.p_flags(endian)),
                }),
                elf::PT_GNU_RELRO => relro.push((start, end)),
                elf::PT_DYNAMIC => dynamic = Some(start),
                _ => {}
            }
        }

        let mut symbols = SymbolTable::default();
        let mut seen = std::collections::HashSet::new();
        for symbol in file.symbols().chain(file.dynamic_symbols()) {
            if !symbol.is_definition() {
                continue;
            }
            let Ok(name) = symbol.name() else {
                continue;
            };
            if name.is_empty() || !seen.insert((name.to_string(), symbol.address())) {
                continue;
            }
            let kind = match symbol.kind() {
                ObjectSymbolKind::Text => SymbolKind::Function,
                ObjectSymbolKind::Data | ObjectSymbolKind::Tls => SymbolKind::Data,
                _ => SymbolKind::Other,
            };
            symbols.push(Symbol {
                name: name.to_string(),
                demangled: demangle(name),
                address: Address::from(symbol.address()),
                size: symbol.size(),
                kind,
            });
        }

        let mut debug_sections = HashMap::new();
        for name in DWARF_SECTIONS {
            if let Some(blob) = section_blob(&file, object, name)? {
                debug_sections.insert(*name, blob.data);
            }
        }

        Ok(Self {
            architecture: Architecture::from_object(file.architecture()),
            endianness,
            entry: Address::from(header.e_entry(endian)),
            segments,
            relro,
            dynamic,
            symbols,
            debug_sections,
            eh_frame: section_blob(&file, object, ".eh_frame")?,
            debug_frame: section_blob(&file, object, ".debug_frame")?,
        })
    }
}
