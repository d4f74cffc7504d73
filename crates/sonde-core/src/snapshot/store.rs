//! Visited-state bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{compare, CompareMode, Comparison, Fingerprint, Snapshot, SnapshotId};

/// Outcome of [`StateStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit
{
    /// First time this state is seen
    New(SnapshotId),
    /// Equivalent to an earlier snapshot
    Seen(SnapshotId),
}

impl Visit
{
    pub fn id(self) -> SnapshotId
    {
        match self {
            Visit::New(id) | Visit::Seen(id) => id,
        }
    }

    pub fn is_new(self) -> bool
    {
        matches!(self, Visit::New(_))
    }
}

/// Snapshots keyed by fingerprint.
///
/// Under [`CompareMode::Exhaustive`] a fingerprint hit is confirmed byte by
/// byte and a colliding snapshot is stored as a distinct state.
#[derive(Debug, Default)]
pub struct StateStore
{
    mode: CompareMode,
    by_fingerprint: HashMap<Fingerprint, Vec<SnapshotId>>,
    snapshots: HashMap<SnapshotId, Arc<Snapshot>>,
}

impl StateStore
{
    pub fn new(mode: CompareMode) -> Self
    {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn insert(&mut self, snapshot: Snapshot) -> Visit
    {
        let fingerprint = snapshot.fingerprint();
        if let Some(candidates) = self.by_fingerprint.get(&fingerprint) {
            for id in candidates {
                let Some(known) = self.snapshots.get(id) else { continue };
                match self.mode {
                    CompareMode::Fast => return Visit::Seen(*id),
                    CompareMode::Exhaustive => {
                        if compare(known, &snapshot, CompareMode::Exhaustive) == Comparison::Equal {
                            return Visit::Seen(*id);
                        }
                    }
                }
            }
            warn!(fingerprint = %fingerprint, snapshot = %snapshot.id(), "keeping colliding state separately");
        }

        let id = snapshot.id();
        debug!(snapshot = %id, fingerprint = ?fingerprint, states = self.snapshots.len() + 1, "new state");
        self.by_fingerprint.entry(fingerprint).or_default().push(id);
        self.snapshots.insert(id, Arc::new(snapshot));
        Visit::New(id)
    }

    pub fn get(&self, id: SnapshotId) -> Option<&Arc<Snapshot>>
    {
        self.snapshots.get(&id)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool
    {
        self.by_fingerprint.contains_key(fingerprint)
    }

    /// Number of distinct states.
    pub fn len(&self) -> usize
    {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.snapshots.is_empty()
    }
}
