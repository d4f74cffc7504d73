//! # Heap-Tracking Table Layout
//!
//! The allocator shim inside the checked program keeps one record per live
//! allocation in a table at a fixed, exported address. The checker reads the
//! table remotely and never parses the program's own allocator state.
//!
//! ## Memory layout (native endian, `#[repr(C)]`)
//!
//! ```text
//! offset  size  field
//! 0       8     magic            "SONDEHT\0"
//! 8       4     version
//! 12      4     capacity         number of record slots
//! 16      8     count            live records, stored first, sorted by address
//! 24      8     next_generation
//! 32      8     arena_start      first byte served by the shim
//! 40      8     arena_size
//! 48      8     untracked        live allocations served outside the arena
//! 56      24*N  records          { address, size, generation }
//! ```
//!
//! Blocks counted in `untracked` are invisible to the checker. A non-zero count
//! means captures miss part of the heap.

use std::mem::size_of;

/// Exported symbol of the table inside the checked program.
pub const HEAP_TABLE_SYMBOL: &str = "__sonde_heap_table";

/// `"SONDEHT\0"` read as a little-endian `u64`.
pub const HEAP_TABLE_MAGIC: u64 = u64::from_le_bytes(*b"SONDEHT\0");

/// Layout revision.
pub const HEAP_TABLE_VERSION: u32 = 2;

/// Byte size of [`TableHeader`].
pub const HEADER_SIZE: usize = size_of::<TableHeader>();

/// Byte size of one [`HeapRecord`].
pub const RECORD_SIZE: usize = size_of::<HeapRecord>();

/// Fixed table header.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableHeader
{
    pub magic: u64,
    pub version: u32,
    pub capacity: u32,
    pub count: u64,
    pub next_generation: u64,
    pub arena_start: u64,
    pub arena_size: u64,
    pub untracked: u64,
}

/// One live allocation.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapRecord
{
    /// First byte of the block
    pub address: u64,
    /// Requested size in bytes
    pub size: u64,
    /// Allocation sequence number, strictly increasing per table
    pub generation: u64,
}

impl TableHeader
{
    /// An empty header for a table with `capacity` slots.
    pub const fn empty(capacity: u32) -> Self
    {
        Self {
            magic: HEAP_TABLE_MAGIC,
            version: HEAP_TABLE_VERSION,
            capacity,
            count: 0,
            next_generation: 1,
            arena_start: 0,
            arena_size: 0,
            untracked: 0,
        }
    }

    /// Whether the header carries the expected magic and revision.
    pub fn is_valid(&self) -> bool
    {
        self.magic == HEAP_TABLE_MAGIC && self.version == HEAP_TABLE_VERSION && self.count <= u64::from(self.capacity)
    }

    /// Total byte size of a table with this header's capacity.
    pub fn table_size(&self) -> usize
    {
        table_size(self.capacity)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self>
    {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: read_u64(bytes, 0),
            version: read_u32(bytes, 8),
            capacity: read_u32(bytes, 12),
            count: read_u64(bytes, 16),
            next_generation: read_u64(bytes, 24),
            arena_start: read_u64(bytes, 32),
            arena_size: read_u64(bytes, 40),
            untracked: read_u64(bytes, 48),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE]
    {
        let mut out = [0u8; HEADER_SIZE];
        out[0..8].copy_from_slice(&self.magic.to_ne_bytes());
        out[8..12].copy_from_slice(&self.version.to_ne_bytes());
        out[12..16].copy_from_slice(&self.capacity.to_ne_bytes());
        out[16..24].copy_from_slice(&self.count.to_ne_bytes());
        out[24..32].copy_from_slice(&self.next_generation.to_ne_bytes());
        out[32..40].copy_from_slice(&self.arena_start.to_ne_bytes());
        out[40..48].copy_from_slice(&self.arena_size.to_ne_bytes());
        out[48..56].copy_from_slice(&self.untracked.to_ne_bytes());
        out
    }
}

impl HeapRecord
{
    /// One past the last byte of the block.
    pub fn end(&self) -> u64
    {
        self.address.saturating_add(self.size)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self>
    {
        if bytes.len() < RECORD_SIZE {
            return None;
        }
        Some(Self {
            address: read_u64(bytes, 0),
            size: read_u64(bytes, 8),
            generation: read_u64(bytes, 16),
        })
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE]
    {
        let mut out = [0u8; RECORD_SIZE];
        out[0..8].copy_from_slice(&self.address.to_ne_bytes());
        out[8..16].copy_from_slice(&self.size.to_ne_bytes());
        out[16..24].copy_from_slice(&self.generation.to_ne_bytes());
        out
    }
}

/// Byte size of a table with `capacity` record slots.
pub const fn table_size(capacity: u32) -> usize
{
    HEADER_SIZE + capacity as usize * RECORD_SIZE
}

/// Byte offset of record slot `index`.
pub const fn record_offset(index: usize) -> usize
{
    HEADER_SIZE + index * RECORD_SIZE
}

fn read_u64(bytes: &[u8], at: usize) -> u64
{
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_ne_bytes(raw)
}

fn read_u32(bytes: &[u8], at: usize) -> u32
{
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_ne_bytes(raw)
}
