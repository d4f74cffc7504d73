//! Loaded-image discovery.
//!
//! The dynamic linker keeps a list of every object it mapped. We reach it
//! without touching the filesystem's view of the mappings:
//!
//! ```text
//! auxv AT_PHDR/AT_PHNUM ──> program headers (in target memory)
//!                             ├─ PT_PHDR    -> load bias of the executable
//!                             └─ PT_DYNAMIC -> dynamic section
//!                                               └─ DT_DEBUG -> struct r_debug
//!                                                               └─ r_map -> link_map -> link_map -> ...
//! ```
//!
//! A statically linked executable has no `PT_DYNAMIC`; a process stopped
//! right after `execve` has `DT_DEBUG == 0` because the dynamic linker has
//! not run yet. Both yield the main image only.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::address_space::{AddressSpace, AddressSpaceExt};
use crate::debuginfo::ImageCache;
use crate::error::SondeResult;
use crate::inferior::{LoadedImage, ProcessLayout};
use crate::types::Address;

const AT_NULL: u64 = 0;
const AT_PHDR: u64 = 3;
const AT_PHENT: u64 = 4;
const AT_PHNUM: u64 = 5;
const AT_ENTRY: u64 = 9;

const PT_DYNAMIC: u32 = 2;
const PT_PHDR: u32 = 6;

const DT_NULL: u64 = 0;
const DT_DEBUG: u64 = 21;

const PHDR_SIZE: u64 = 56;
const DYN_SIZE: u64 = 16;
const MAX_DYNAMIC_ENTRIES: u64 = 4096;
const MAX_LINK_MAP_ENTRIES: usize = 1024;
const MAX_PATH: usize = 4096;

// struct r_debug { int r_version; struct link_map *r_map; ... }
const R_DEBUG_MAP: u64 = 8;
// struct link_map { ElfW(Addr) l_addr; char *l_name; ElfW(Dyn) *l_ld; struct link_map *l_next, *l_prev; }
const LINK_MAP_ADDR: u64 = 0;
const LINK_MAP_NAME: u64 = 8;
const LINK_MAP_NEXT: u64 = 24;

/// Values of interest from the auxiliary vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct Auxv
{
    pub phdr: u64,
    pub phent: u64,
    pub phnum: u64,
    pub entry: u64,
}

impl Auxv
{
    pub(super) fn parse(bytes: &[u8]) -> Self
    {
        let mut auxv = Auxv::default();
        for pair in bytes.chunks_exact(16) {
            let mut key = [0u8; 8];
            let mut value = [0u8; 8];
            key.copy_from_slice(&pair[..8]);
            value.copy_from_slice(&pair[8..]);
            let value = u64::from_ne_bytes(value);
            match u64::from_ne_bytes(key) {
                AT_NULL => break,
                AT_PHDR => auxv.phdr = value,
                AT_PHENT => auxv.phent = value,
                AT_PHNUM => auxv.phnum = value,
                AT_ENTRY => auxv.entry = value,
                _ => {}
            }
        }
        auxv
    }
}

#[derive(Debug, Clone, Copy)]
struct ProgramHeader
{
    kind: u32,
    vaddr: u64,
    memsz: u64,
}

fn read_program_headers<S: AddressSpace + ?Sized>(space: &S, auxv: &Auxv) -> SondeResult<Vec<ProgramHeader>>
{
    let stride = if auxv.phent == 0 { PHDR_SIZE } else { auxv.phent };
    let mut headers = Vec::with_capacity(auxv.phnum as usize);
    for index in 0..auxv.phnum {
        let base = Address::from(auxv.phdr) + index * stride;
        let bytes = space.read_bytes(base, PHDR_SIZE)?;
        let word = |offset: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[offset..offset + 8]);
            u64::from_ne_bytes(raw)
        };
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&bytes[..4]);
        headers.push(ProgramHeader {
            kind: u32::from_ne_bytes(kind),
            vaddr: word(16),
            memsz: word(40),
        });
    }
    Ok(headers)
}

/// Runtime address of `struct r_debug`, if the dynamic linker has published it.
fn find_r_debug<S: AddressSpace + ?Sized>(space: &S, dynamic: Address, size: u64) -> SondeResult<Option<Address>>
{
    let entries = (size / DYN_SIZE).min(MAX_DYNAMIC_ENTRIES);
    for index in 0..entries {
        let entry = dynamic + index * DYN_SIZE;
        match space.read_u64(entry)? {
            DT_NULL => break,
            DT_DEBUG => {
                let value = space.read_u64(entry + 8)?;
                return Ok((value != 0).then(|| Address::from(value)));
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Read the current image list of process `pid`.
pub(super) fn read_layout<S: AddressSpace + ?Sized>(pid: i32, space: &S, cache: &ImageCache) -> SondeResult<ProcessLayout>
{
    let proc_dir = PathBuf::from(format!("/proc/{pid}"));
    let auxv = Auxv::parse(&fs::read(proc_dir.join("auxv"))?);
    let executable = fs::read_link(proc_dir.join("exe"))?;
    let main = cache.load(&executable)?;

    let headers = read_program_headers(space, &auxv)?;
    let bias = headers
        .iter()
        .find(|header| header.kind == PT_PHDR)
        .map(|header| auxv.phdr.wrapping_sub(header.vaddr))
        .unwrap_or_else(|| auxv.entry.wrapping_sub(main.entry().value()));
    trace!(pid, bias = %Address::from(bias), executable = %executable.display(), "main image");

    let mut images = vec![LoadedImage::new(executable.display().to_string(), Address::from(bias), main)];

    let Some(dynamic) = headers.iter().find(|header| header.kind == PT_DYNAMIC) else {
        debug!(pid, "statically linked executable");
        return Ok(ProcessLayout::new(images));
    };
    let Some(r_debug) = find_r_debug(space, Address::from(dynamic.vaddr.wrapping_add(bias)), dynamic.memsz)? else {
        debug!(pid, "dynamic linker has not published r_debug yet");
        return Ok(ProcessLayout::new(images));
    };

    let mut link = space.read_pointer(r_debug + R_DEBUG_MAP)?;
    let mut visited = 0;
    while !link.is_null() && visited < MAX_LINK_MAP_ENTRIES {
        visited += 1;
        let base = space.read_u64(link + LINK_MAP_ADDR)?;
        let name_address = space.read_pointer(link + LINK_MAP_NAME)?;
        let name = if name_address.is_null() {
            String::new()
        } else {
            space.read_c_string(name_address, MAX_PATH)?
        };
        link = space.read_pointer(link + LINK_MAP_NEXT)?;

        // The executable has an empty name; the vDSO has no backing file.
        if !Path::new(&name).is_absolute() {
            continue;
        }
        match cache.load(&name) {
            Ok(info) => images.push(LoadedImage::new(name, Address::from(base), info)),
            Err(error) => warn!(pid, image = %name, %error, "unreadable image, its writable segments are not captured"),
        }
    }

    debug!(pid, images = images.len(), "read process layout");
    Ok(ProcessLayout::new(images))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_auxv_parse_stops_at_null()
    {
        let mut bytes = Vec::new();
        for (key, value) in [(AT_PHDR, 0x40_0040u64), (AT_PHNUM, 11), (AT_ENTRY, 0x40_1000), (AT_NULL, 0), (AT_PHENT, 99)] {
            bytes.extend_from_slice(&key.to_ne_bytes());
            bytes.extend_from_slice(&value.to_ne_bytes());
        }
        let auxv = Auxv::parse(&bytes);
        assert_eq!(auxv.phdr, 0x40_0040);
        assert_eq!(auxv.phnum, 11);
        assert_eq!(auxv.entry, 0x40_1000);
        assert_eq!(auxv.phent, 0);
    }
}
