//! Point-in-time, immutable copies of a pool's mapping.

use chrono::{DateTime, Utc};

use crate::pool::mapping::PhysicalVirtualBlockMapping;

/// An independent, deep copy of a [`PhysicalVirtualBlockMapping`] taken at capture
/// time. Immutable after construction; `StoragePool::delete_snapshot` only ever
/// removes it from the pool's own list, it never mutates the snapshot itself, so an
/// external holder can keep reading through it after deletion.
#[derive(Debug, Clone)]
pub struct Snapshot {
    id: u64,
    mapping: PhysicalVirtualBlockMapping,
    captured_at: DateTime<Utc>,
}

impl Snapshot {
    pub(crate) fn capture(id: u64, mapping: &PhysicalVirtualBlockMapping, captured_at: DateTime<Utc>) -> Self {
        Snapshot { id, mapping: mapping.clone(), captured_at }
    }

    /// Identity used by the owning pool to find this snapshot in its list. Two
    /// snapshots with identical content still have distinct ids.
    pub fn id(&self) -> u64 { self.id }

    pub fn mapping(&self) -> &PhysicalVirtualBlockMapping { &self.mapping }

    /// Purely cosmetic: not part of any correctness invariant, never consulted by
    /// pool logic.
    pub fn captured_at(&self) -> DateTime<Utc> { self.captured_at }
}
