//! Snapshot comparison.
//!
//! Fingerprints are compared first. In [`CompareMode::Fast`] equal
//! fingerprints settle the question; [`CompareMode::Exhaustive`] always walks
//! the bytes and reports a fingerprint collision when they disagree.

use tracing::warn;

use super::{Region, RegionKind, Snapshot};
use crate::types::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareMode
{
    /// Trust equal fingerprints
    #[default]
    Fast,
    /// Compare bytes even when fingerprints match
    Exhaustive,
}

/// A maximal run of differing bytes, addressed in the first snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteDiff
{
    pub start: Address,
    pub len: u64,
    pub kind: RegionKind,
}

impl ByteDiff
{
    pub fn end(&self) -> Address
    {
        self.start + self.len
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison
{
    Equal,
    Different(Vec<ByteDiff>),
}

impl Comparison
{
    pub fn is_equal(&self) -> bool
    {
        matches!(self, Comparison::Equal)
    }
}

/// Compare two snapshots.
///
/// Regions are matched by kind, start and length. A region present on only
/// one side is reported whole. The heap table image is skipped: its
/// generation counters differ between states with identical heaps, and the
/// block list it describes is covered by the heap regions.
pub fn compare(a: &Snapshot, b: &Snapshot, mode: CompareMode) -> Comparison
{
    let same_fingerprint = a.fingerprint() == b.fingerprint();
    if same_fingerprint && mode == CompareMode::Fast {
        return Comparison::Equal;
    }

    let diffs = diff_regions(a.regions(), b.regions());
    if diffs.is_empty() {
        return Comparison::Equal;
    }
    if same_fingerprint {
        warn!(
            fingerprint = %a.fingerprint(),
            first = %a.id(),
            second = %b.id(),
            ranges = diffs.len(),
            "fingerprint collision: equal digests over different bytes"
        );
    }
    Comparison::Different(diffs)
}

fn diff_regions(a: &[Region], b: &[Region]) -> Vec<ByteDiff>
{
    let key = |region: &Region| (region.start, region.len(), region.kind);
    let compared = |region: &&Region| region.kind.is_fingerprinted();

    let mut diffs = Vec::new();
    for ours in a.iter().filter(compared) {
        match b.iter().find(|theirs| key(theirs) == key(ours)) {
            Some(theirs) => diff_bytes(ours, theirs, &mut diffs),
            None => diffs.push(whole(ours)),
        }
    }
    for theirs in b.iter().filter(compared) {
        if !a.iter().any(|ours| key(ours) == key(theirs)) {
            diffs.push(whole(theirs));
        }
    }
    diffs.sort_by_key(|diff| diff.start);
    diffs
}

fn whole(region: &Region) -> ByteDiff
{
    ByteDiff {
        start: region.start,
        len: region.len(),
        kind: region.kind,
    }
}

fn diff_bytes(ours: &Region, theirs: &Region, diffs: &mut Vec<ByteDiff>)
{
    let mut run: Option<usize> = None;
    for (index, (left, right)) in ours.bytes.iter().zip(&theirs.bytes).enumerate() {
        match (left == right, run) {
            (false, None) => run = Some(index),
            (true, Some(start)) => {
                diffs.push(ByteDiff {
                    start: ours.start + start as u64,
                    len: (index - start) as u64,
                    kind: ours.kind,
                });
                run = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run {
        diffs.push(ByteDiff {
            start: ours.start + start as u64,
            len: (ours.bytes.len() - start) as u64,
            kind: ours.kind,
        });
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn region(start: u64, bytes: &[u8]) -> Region
    {
        Region::new(RegionKind::Segment, Address::from(start), bytes.to_vec())
    }

    #[test]
    fn test_runs_are_coalesced()
    {
        let diffs = diff_regions(&[region(0x100, &[0, 1, 2, 3, 4, 5])], &[region(0x100, &[0, 9, 9, 3, 4, 9])]);
        assert_eq!(diffs.len(), 2);
        assert_eq!((diffs[0].start, diffs[0].len), (Address::from(0x101), 2));
        assert_eq!((diffs[1].start, diffs[1].len), (Address::from(0x105), 1));
    }

    #[test]
    fn test_unmatched_regions_reported_whole()
    {
        let diffs = diff_regions(&[region(0x100, &[1, 2])], &[region(0x100, &[1, 2]), region(0x200, &[7; 16])]);
        assert_eq!(diffs, vec![ByteDiff {
            start: Address::from(0x200),
            len: 16,
            kind: RegionKind::Segment
        }]);
    }

    #[test]
    fn test_heap_table_region_ignored()
    {
        let a = [Region::new(RegionKind::HeapTable, Address::from(0x100), vec![1; 8])];
        let b = [Region::new(RegionKind::HeapTable, Address::from(0x100), vec![2; 8])];
        assert!(diff_regions(&a, &b).is_empty());
    }
}
