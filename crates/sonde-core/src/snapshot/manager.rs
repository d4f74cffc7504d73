//! Capture and restore.

use tracing::{debug, info, trace, warn};

use super::{Region, RegionKind, Snapshot, SnapshotId};
use crate::error::SondeResult;
use crate::heap::HeapTable;
use crate::inferior::Inferior;
use crate::types::Address;

/// What to capture besides writable segments and the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions
{
    /// Capture the stack mapping from SP downwards
    pub capture_stack: bool,
    /// Bytes below SP that belong to the current frame (the x86_64 ABI red zone)
    pub stack_red_zone: u64,
}

impl Default for CaptureOptions
{
    fn default() -> Self
    {
        Self {
            capture_stack: true,
            stack_red_zone: 128,
        }
    }
}

/// Captures snapshots and restores processes to them.
///
/// ```rust,no_run
/// use sonde_core::inferior::Inferior;
/// use sonde_core::snapshot::{compare, CompareMode, Comparison, SnapshotManager};
///
/// fn explore(process: &mut dyn Inferior) -> sonde_core::error::SondeResult<()>
/// {
///     let mut manager = SnapshotManager::default();
///     let before = manager.capture(process)?;
///     // ... let the process run one transition ...
///     let after = manager.capture(process)?;
///     if let Comparison::Different(diffs) = compare(&before, &after, CompareMode::Fast) {
///         println!("{} ranges changed", diffs.len());
///     }
///     manager.restore(process, &before)
/// }
/// ```
#[derive(Debug, Default)]
pub struct SnapshotManager
{
    options: CaptureOptions,
    next_id: u64,
}

impl SnapshotManager
{
    pub fn new(options: CaptureOptions) -> Self
    {
        Self { options, next_id: 0 }
    }

    pub fn options(&self) -> CaptureOptions
    {
        self.options
    }

    /// Stop the process if needed and copy every relevant region.
    pub fn capture<I: Inferior + ?Sized>(&mut self, process: &mut I) -> SondeResult<Snapshot>
    {
        process.ensure_stopped()?;
        let layout = process.layout()?;
        let registers = process.registers()?;

        let mut regions = Vec::new();
        let mut excluded = Vec::new();

        let heap = match process.heap_table_address() {
            Some(address) => {
                let table = HeapTable::read(&*process, address)?;
                if table.untracked() > 0 {
                    warn!(
                        untracked = table.untracked(),
                        "heap blocks outside the tracked arena are not captured"
                    );
                }
                let (start, end) = table.range();
                regions.push(Region::new(
                    RegionKind::HeapTable,
                    start,
                    process.read_bytes(start, end.value() - start.value())?,
                ));
                excluded.push((start, end));
                if let Some(arena) = table.arena() {
                    excluded.push(arena);
                }
                for block in &table.blocks {
                    regions.push(Region::new(RegionKind::Heap, block.address, process.read_bytes(block.address, block.size)?));
                }
                Some(table)
            }
            None => None,
        };

        for segment in layout.writable_segments() {
            for (start, end) in subtract((segment.start, segment.end), &excluded) {
                trace!(start = %start, end = %end, image = ?segment.name, "capturing segment");
                regions.push(Region::new(RegionKind::Segment, start, process.read_bytes(start, end.value() - start.value())?));
            }
        }

        if self.options.capture_stack {
            if let Some(stack) = process.stack_region()? {
                let sp = registers.sp();
                let start = sp.checked_sub(self.options.stack_red_zone).unwrap_or(stack.start).max(stack.start);
                if start < stack.end {
                    regions.push(Region::new(
                        RegionKind::Stack,
                        start,
                        process.read_bytes(start, stack.end.value() - start.value())?,
                    ));
                }
            }
        }

        let id = SnapshotId(self.next_id);
        self.next_id += 1;
        let snapshot = Snapshot::from_parts(id, process.pid(), regions, heap, registers, layout);
        debug!(
            snapshot = %snapshot.id(),
            pid = %snapshot.pid(),
            regions = snapshot.regions().len(),
            bytes = snapshot.byte_size(),
            fingerprint = ?snapshot.fingerprint(),
            "captured snapshot"
        );
        Ok(snapshot)
    }

    /// Write `snapshot` back into `process`, which stays stopped.
    ///
    /// Fails with `LayoutMismatch` before writing anything if the process does
    /// not map the same images at the same addresses.
    pub fn restore<I: Inferior + ?Sized>(&mut self, process: &mut I, snapshot: &Snapshot) -> SondeResult<()>
    {
        process.ensure_stopped()?;
        let current = process.layout()?;
        snapshot.layout().ensure_compatible(&current)?;

        // Table before blocks: the allocator metadata must describe the
        // blocks being written back.
        let order = [RegionKind::Segment, RegionKind::HeapTable, RegionKind::Heap, RegionKind::Stack];
        for kind in order {
            for region in snapshot.regions().iter().filter(|region| region.kind == kind) {
                process.write_bytes(region.start, &region.bytes)?;
            }
        }
        process.set_registers(snapshot.registers())?;

        info!(snapshot = %snapshot.id(), pid = %process.pid(), "restored snapshot");
        Ok(())
    }
}

/// `range` minus every range in `holes`.
fn subtract(range: (Address, Address), holes: &[(Address, Address)]) -> Vec<(Address, Address)>
{
    let mut pieces = vec![range];
    for (hole_start, hole_end) in holes {
        pieces = pieces
            .into_iter()
            .flat_map(|(start, end)| {
                let mut out = Vec::with_capacity(2);
                if start < (*hole_start).min(end) {
                    out.push((start, (*hole_start).min(end)));
                }
                if (*hole_end).max(start) < end {
                    out.push(((*hole_end).max(start), end));
                }
                out
            })
            .collect();
    }
    pieces
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn range(start: u64, end: u64) -> (Address, Address)
    {
        (Address::from(start), Address::from(end))
    }

    #[test]
    fn test_subtract_splits_around_holes()
    {
        let pieces = subtract(range(0x1000, 0x5000), &[range(0x2000, 0x3000), range(0x4000, 0x6000)]);
        assert_eq!(pieces, vec![range(0x1000, 0x2000), range(0x3000, 0x4000)]);
    }

    #[test]
    fn test_subtract_disjoint_hole_keeps_range()
    {
        assert_eq!(subtract(range(0x1000, 0x2000), &[range(0x3000, 0x4000)]), vec![range(0x1000, 0x2000)]);
        assert!(subtract(range(0x1000, 0x2000), &[range(0x0, 0x9000)]).is_empty());
    }
}
