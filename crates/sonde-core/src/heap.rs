//! # Heap-Tracking Table
//!
//! Checker-side decoding of the table maintained by the tracking allocator in
//! the checked process (see `sonde_protocol::app`).
//!
//! The table is read through [`AddressSpace`] like any other memory, so it
//! decodes the same way from a live process and from a snapshot.

use sonde_protocol::heap::{record_offset, table_size, HeapRecord, TableHeader, HEADER_SIZE, HEAP_TABLE_SYMBOL, RECORD_SIZE};

use crate::address_space::AddressSpace;
use crate::error::{SondeError, SondeResult};
use crate::types::Address;

/// One live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapBlock
{
    pub address: Address,
    pub size: u64,
    /// Allocation sequence number; differs between equal states
    pub generation: u64,
}

impl HeapBlock
{
    pub fn end(&self) -> Address
    {
        self.address.saturating_add(self.size)
    }

    pub fn contains(&self, address: Address) -> bool
    {
        address >= self.address && address < self.end()
    }
}

impl From<HeapRecord> for HeapBlock
{
    fn from(record: HeapRecord) -> Self
    {
        Self {
            address: Address::from(record.address),
            size: record.size,
            generation: record.generation,
        }
    }
}

/// Decoded contents of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapTable
{
    /// Where the table lives in the target
    pub address: Address,
    pub header: TableHeader,
    /// Live blocks, sorted by address
    pub blocks: Vec<HeapBlock>,
}

impl HeapTable
{
    /// Read and validate the table at `address`.
    ///
    /// The table lives in memory the checked program can scribble over, so
    /// nothing in it is trusted: the whole table must be mapped, and every
    /// record must lie inside the arena, sorted and disjoint.
    pub fn read<S: AddressSpace + ?Sized>(space: &S, address: Address) -> SondeResult<Self>
    {
        let header_bytes = space.read_bytes(address, HEADER_SIZE as u64)?;
        let header = TableHeader::from_bytes(&header_bytes)
            .filter(TableHeader::is_valid)
            .ok_or_else(|| corrupt(address, "bad magic, version or count"))?;

        let last = address
            .checked_add(header.table_size() as u64 - 1)
            .ok_or_else(|| corrupt(address, "capacity overflows the address space"))?;
        space
            .read_bytes(last, 1)
            .map_err(|_| corrupt(address, &format!("{} slots run past mapped memory", header.capacity)))?;

        let count = header.count as usize;
        let records = space.read_bytes(address + record_offset(0) as u64, (count * RECORD_SIZE) as u64)?;
        let blocks: Vec<HeapBlock> = records
            .chunks_exact(RECORD_SIZE)
            .filter_map(HeapRecord::from_bytes)
            .map(HeapBlock::from)
            .collect();

        let arena_start = header.arena_start;
        let arena_end = arena_start
            .checked_add(header.arena_size)
            .ok_or_else(|| corrupt(address, "arena overflows the address space"))?;
        let mut floor = arena_start;
        for (index, block) in blocks.iter().enumerate() {
            let start = block.address.value();
            let in_arena = start >= floor && start.checked_add(block.size).is_some_and(|end| end <= arena_end);
            if !in_arena {
                let reason = format!(
                    "record {index} ({} bytes at {}) is outside the arena or out of order",
                    block.size, block.address
                );
                return Err(corrupt(address, &reason));
            }
            floor = start + block.size;
        }

        Ok(Self { address, header, blocks })
    }

    /// Locate the table through its exported symbol and read it.
    pub fn locate<S: AddressSpace + ?Sized>(space: &S) -> SondeResult<Self>
    {
        let address = space.resolve_symbol(HEAP_TABLE_SYMBOL)?.address();
        Self::read(space, address)
    }

    /// Bytes the table occupies in the target, header and every slot.
    pub fn byte_size(&self) -> u64
    {
        table_size(self.header.capacity) as u64
    }

    /// `[start, end)` of the table itself.
    pub fn range(&self) -> (Address, Address)
    {
        (self.address, self.address + self.byte_size())
    }

    /// `[start, end)` of the allocator arena, once initialised.
    pub fn arena(&self) -> Option<(Address, Address)>
    {
        if self.header.arena_start == 0 {
            return None;
        }
        let start = Address::from(self.header.arena_start);
        Some((start, start + self.header.arena_size))
    }

    /// Live block containing `address`.
    pub fn block_at(&self, address: Address) -> Option<&HeapBlock>
    {
        let index = self.blocks.partition_point(|block| block.address <= address);
        index
            .checked_sub(1)
            .and_then(|index| self.blocks.get(index))
            .filter(|block| block.contains(address))
    }

    /// `(address, size)` of every live block, the part of the table that
    /// identifies a state.
    pub fn shape(&self) -> Vec<(Address, u64)>
    {
        self.blocks.iter().map(|block| (block.address, block.size)).collect()
    }

    pub fn total_bytes(&self) -> u64
    {
        self.blocks.iter().map(|block| block.size).sum()
    }

    /// Live allocations the shim had to hand to the system allocator.
    pub fn untracked(&self) -> u64
    {
        self.header.untracked
    }
}

fn corrupt(address: Address, reason: &str) -> SondeError
{
    SondeError::InvalidArgument(format!("corrupt heap table at {address}: {reason}"))
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn table(blocks: &[(u64, u64)]) -> HeapTable
    {
        HeapTable {
            address: Address::from(0x5000),
            header: TableHeader::empty(8),
            blocks: blocks
                .iter()
                .enumerate()
                .map(|(index, (address, size))| HeapBlock {
                    address: Address::from(*address),
                    size: *size,
                    generation: index as u64 + 1,
                })
                .collect(),
        }
    }

    #[test]
    fn test_block_at()
    {
        let table = table(&[(0x1000, 64), (0x1040, 16)]);
        assert_eq!(table.block_at(Address::from(0x1000)).map(|b| b.size), Some(64));
        assert_eq!(table.block_at(Address::from(0x103f)).map(|b| b.size), Some(64));
        assert_eq!(table.block_at(Address::from(0x1048)).map(|b| b.size), Some(16));
        assert!(table.block_at(Address::from(0x1050)).is_none());
        assert!(table.block_at(Address::from(0xfff)).is_none());
    }

    #[test]
    fn test_range_covers_every_slot()
    {
        let table = table(&[]);
        assert_eq!(table.range().1 - table.range().0.value(), Address::from(table_size(8) as u64));
        assert!(table.arena().is_none());
    }
}
