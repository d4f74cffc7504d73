//! # Snapshots
//!
//! Immutable captures of a stopped process, used as frozen address spaces,
//! as visited-state keys and as restore points.
//!
//! ## What is captured
//!
//! | Region kind | Source | Fingerprinted |
//! |-------------|--------|---------------|
//! | `Segment`   | writable data of every loaded image, minus RELRO, the heap arena and the heap table | yes |
//! | `Heap`      | one region per live block of the heap-tracking table | yes |
//! | `Stack`     | stack mapping from SP minus a red zone up to its end | yes |
//! | `HeapTable` | the table image itself | no, only the block list is |
//!
//! Text and read-only data never change and are not copied. Registers are
//! saved for restore but are not part of the fingerprint.
//!
//! A snapshot owns its bytes. It stays valid after the process it came from
//! is restored to another state, killed or dropped.

mod compare;
mod fingerprint;
mod manager;
mod store;

use std::fmt;

pub use compare::{compare, ByteDiff, CompareMode, Comparison};
pub use fingerprint::Fingerprint;
pub use manager::{CaptureOptions, SnapshotManager};
pub use store::{StateStore, Visit};

use crate::address_space::AddressSpace;
use crate::error::{SondeError, SondeResult};
use crate::heap::HeapTable;
use crate::inferior::ProcessLayout;
use crate::remote::{Opaque, RemoteAddress};
use crate::types::{Address, Architecture, Endianness, ProcessId, Registers};

/// Identifier of a snapshot, unique per [`SnapshotManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind
{
    Segment,
    Stack,
    Heap,
    HeapTable,
}

/// A contiguous captured byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region
{
    pub kind: RegionKind,
    pub start: Address,
    pub bytes: Vec<u8>,
}

impl Region
{
    pub fn new(kind: RegionKind, start: Address, bytes: Vec<u8>) -> Self
    {
        Self { kind, start, bytes }
    }

    pub fn len(&self) -> u64
    {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool
    {
        self.bytes.is_empty()
    }

    pub fn end(&self) -> Address
    {
        self.start + self.len()
    }

    pub fn contains(&self, address: Address) -> bool
    {
        address >= self.start && address < self.end()
    }
}

/// A frozen process state.
#[derive(Debug, Clone)]
pub struct Snapshot
{
    pub(crate) id: SnapshotId,
    pub(crate) pid: ProcessId,
    /// Sorted by start address, non-overlapping
    pub(crate) regions: Vec<Region>,
    pub(crate) heap: Option<HeapTable>,
    pub(crate) registers: Registers,
    pub(crate) layout: ProcessLayout,
    pub(crate) endianness: Endianness,
    pub(crate) fingerprint: Fingerprint,
}

impl Snapshot
{
    /// Assemble a snapshot from parts; regions are sorted and the fingerprint
    /// computed here.
    pub fn from_parts(
        id: SnapshotId,
        pid: ProcessId,
        mut regions: Vec<Region>,
        heap: Option<HeapTable>,
        registers: Registers,
        layout: ProcessLayout,
    ) -> Self
    {
        regions.sort_by_key(|region| region.start);
        let shape = heap.as_ref().map(HeapTable::shape).unwrap_or_default();
        let fingerprint = Fingerprint::compute(&regions, &shape);
        Self {
            id,
            pid,
            regions,
            heap,
            registers,
            layout,
            endianness: Endianness::native(),
            fingerprint,
        }
    }

    pub fn id(&self) -> SnapshotId
    {
        self.id
    }

    /// Process the snapshot was captured from
    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    pub fn fingerprint(&self) -> Fingerprint
    {
        self.fingerprint
    }

    pub fn regions(&self) -> &[Region]
    {
        &self.regions
    }

    /// Heap-tracking table at capture time.
    pub fn heap(&self) -> Option<&HeapTable>
    {
        self.heap.as_ref()
    }

    /// Register context saved alongside the memory image.
    pub fn registers(&self) -> &Registers
    {
        &self.registers
    }

    pub fn layout(&self) -> &ProcessLayout
    {
        &self.layout
    }

    /// Total captured bytes.
    pub fn byte_size(&self) -> u64
    {
        self.regions.iter().map(Region::len).sum()
    }

    fn region_at(&self, address: Address) -> Option<&Region>
    {
        let index = self.regions.partition_point(|region| region.start <= address);
        index
            .checked_sub(1)
            .and_then(|index| self.regions.get(index))
            .filter(|region| region.contains(address))
    }

    /// Whether captured regions hold every byte of `[address, address + len)`.
    pub fn covers(&self, address: Address, len: u64) -> bool
    {
        let Some(end) = address.checked_add(len) else {
            return false;
        };
        let mut cursor = address;
        while cursor < end {
            match self.region_at(cursor) {
                Some(region) => cursor = region.end(),
                None => return false,
            }
        }
        true
    }
}

impl AddressSpace for Snapshot
{
    fn read_bytes(&self, address: Address, len: u64) -> SondeResult<Vec<u8>>
    {
        if !self.covers(address, len) {
            return Err(SondeError::NotMapped { address, len });
        }
        let mut buffer = vec![0u8; len as usize];
        self.read_into(address, &mut buffer)?;
        Ok(buffer)
    }

    fn read_into(&self, address: Address, buffer: &mut [u8]) -> SondeResult<()>
    {
        let len = buffer.len() as u64;
        let not_mapped = || SondeError::NotMapped { address, len };
        if address.checked_add(len).is_none() {
            return Err(not_mapped());
        }

        // A read may span adjacent regions, e.g. a segment split around the heap table.
        let mut done = 0usize;
        while done < buffer.len() {
            let cursor = address + done as u64;
            let region = self.region_at(cursor).ok_or_else(not_mapped)?;
            let offset = (cursor.value() - region.start.value()) as usize;
            let take = (region.bytes.len() - offset).min(buffer.len() - done);
            buffer[done..done + take].copy_from_slice(&region.bytes[offset..offset + take]);
            done += take;
        }
        Ok(())
    }

    fn resolve_symbol(&self, name: &str) -> SondeResult<RemoteAddress<Opaque>>
    {
        self.layout.resolve_symbol(name).map(RemoteAddress::new)
    }

    fn architecture(&self) -> Architecture
    {
        self.registers.architecture()
    }

    fn endianness(&self) -> Endianness
    {
        self.endianness
    }
}
