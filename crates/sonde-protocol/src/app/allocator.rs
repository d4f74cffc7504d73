//! First-fit allocator whose only metadata is the heap-tracking table.
//!
//! Blocks are carved out of a static arena. The table records every live block,
//! sorted by address, so the table plus the block contents fully describe the
//! allocator. Writing both back (as a snapshot restore does) rolls the allocator
//! back too.
//!
//! Requests that do not fit in the arena, or arrive when the table is full, go to
//! the system allocator. Their contents are not tracked, but the header's
//! `untracked` field counts them while they are live so the checker can tell
//! that its captures are incomplete.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::heap::{HeapRecord, TableHeader};

/// Number of record slots in the exported table.
pub const TABLE_CAPACITY: u32 = 4096;

/// Bytes of heap served from the tracked arena.
pub const ARENA_SIZE: usize = 8 << 20;

const EMPTY_RECORD: HeapRecord = HeapRecord {
    address: 0,
    size: 0,
    generation: 0,
};

#[repr(C)]
pub struct HeapTable
{
    header: TableHeader,
    records: [HeapRecord; TABLE_CAPACITY as usize],
}

#[repr(transparent)]
pub struct TableCell(UnsafeCell<HeapTable>);

// SAFETY: every access goes through `TableLock`.
unsafe impl Sync for TableCell {}

#[repr(C, align(4096))]
struct Arena(UnsafeCell<[u8; ARENA_SIZE]>);

// SAFETY: the arena is only handed out in disjoint blocks recorded in the table.
unsafe impl Sync for Arena {}

/// The table the checker reads. Its address is also sent in the handshake.
#[no_mangle]
#[used]
#[allow(non_upper_case_globals)]
pub static __sonde_heap_table: TableCell = TableCell(UnsafeCell::new(HeapTable {
    header: TableHeader::empty(TABLE_CAPACITY),
    records: [EMPTY_RECORD; TABLE_CAPACITY as usize],
}));

static ARENA: Arena = Arena(UnsafeCell::new([0; ARENA_SIZE]));

static LOCKED: AtomicBool = AtomicBool::new(false);

struct TableLock;

impl TableLock
{
    fn acquire() -> Self
    {
        while LOCKED
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        TableLock
    }

    /// Exclusive view of the table for the lifetime of the lock.
    #[allow(clippy::mut_from_ref)]
    fn table(&self) -> &mut HeapTable
    {
        // SAFETY: holding the lock makes this the only live reference.
        let table = unsafe { &mut *__sonde_heap_table.0.get() };
        if table.header.arena_start == 0 {
            table.header.arena_start = ARENA.0.get() as u64;
            table.header.arena_size = ARENA_SIZE as u64;
        }
        table
    }
}

impl Drop for TableLock
{
    fn drop(&mut self)
    {
        LOCKED.store(false, Ordering::Release);
    }
}

impl HeapTable
{
    fn live(&self) -> &[HeapRecord]
    {
        &self.records[..self.header.count as usize]
    }

    fn contains(&self, address: u64) -> bool
    {
        let start = self.header.arena_start;
        address >= start && address < start + self.header.arena_size
    }

    /// First-fit placement. Returns the block address, or `None` when the
    /// request must go to the system allocator.
    fn insert(&mut self, layout: Layout) -> Option<u64>
    {
        let count = self.header.count as usize;
        if count >= self.records.len() {
            return None;
        }

        let size = layout.size().max(1) as u64;
        let align = layout.align() as u64;
        let arena_end = self.header.arena_start + self.header.arena_size;

        let mut cursor = self.header.arena_start;
        let mut placement = None;
        for slot in 0..=count {
            let limit = if slot < count { self.records[slot].address } else { arena_end };
            let candidate = cursor.checked_add(align - 1)? & !(align - 1);
            if candidate.checked_add(size)? <= limit {
                placement = Some((slot, candidate));
                break;
            }
            if slot < count {
                cursor = self.records[slot].end();
            }
        }

        let (slot, address) = placement?;
        self.records.copy_within(slot..count, slot + 1);
        self.records[slot] = HeapRecord {
            address,
            size,
            generation: self.header.next_generation,
        };
        self.header.count += 1;
        self.header.next_generation += 1;
        Some(address)
    }

    fn remove(&mut self, address: u64) -> bool
    {
        let count = self.header.count as usize;
        let Ok(slot) = self.live().binary_search_by_key(&address, |record| record.address) else {
            return false;
        };
        self.records.copy_within(slot + 1..count, slot);
        // Dead slots stay zeroed so equal heaps produce equal table bytes.
        self.records[count - 1] = EMPTY_RECORD;
        self.header.count -= 1;
        true
    }
}

/// Global allocator that keeps `__sonde_heap_table` up to date.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackingAllocator;

unsafe impl GlobalAlloc for TrackingAllocator
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8
    {
        let lock = TableLock::acquire();
        let table = lock.table();
        if let Some(address) = table.insert(layout) {
            return address as *mut u8;
        }
        // SAFETY: `layout` comes from the caller, who upholds `GlobalAlloc::alloc`'s contract.
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            table.header.untracked += 1;
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout)
    {
        let lock = TableLock::acquire();
        let table = lock.table();
        if table.contains(ptr as u64) {
            table.remove(ptr as u64);
            return;
        }
        table.header.untracked = table.header.untracked.saturating_sub(1);
        drop(lock);
        // SAFETY: pointers outside the arena came from `System.alloc` with this layout.
        unsafe { System.dealloc(ptr, layout) }
    }
}

/// Remote-visible address of the table, as reported in the handshake.
pub fn table_address() -> u64
{
    let lock = TableLock::acquire();
    let table: *const HeapTable = lock.table();
    table as u64
}

/// Number of blocks currently tracked.
pub fn tracked_blocks() -> u64
{
    let lock = TableLock::acquire();
    lock.table().header.count
}

/// Number of live blocks served by the system allocator instead.
pub fn untracked_blocks() -> u64
{
    let lock = TableLock::acquire();
    lock.table().header.untracked
}
