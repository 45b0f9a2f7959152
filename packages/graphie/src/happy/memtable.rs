//! Live in-memory buffer of the most recent node state.
//!
//! Unsorted: ids are keyed in a HashMap for O(1) point lookup and upsert.
//! No internal locking -- the engine guards the live memtable with its
//! exclusive lock and freezes it by swapping in an empty one. A frozen
//! memtable is never mutated again.

use std::collections::HashMap;

use crate::happy::record::{Entry, NodeRecord};
use crate::types::NodeId;

#[derive(Debug, Default, Clone)]
pub struct Memtable {
    /// Upsert: writing an id that already exists replaces the entry.
    entries: HashMap<NodeId, Entry>,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Write Operations -----------------------------------------------------

    /// Insert or replace the record for `record.id`.
    pub fn upsert(&mut self, record: NodeRecord) {
        self.entries.insert(record.id, Entry::Live(record));
    }

    /// Replace whatever is stored for `id` with a tombstone.
    pub fn tombstone(&mut self, id: NodeId) {
        self.entries.insert(id, Entry::Removed(id));
    }

    // -- Read Operations ------------------------------------------------------

    /// Point lookup. O(1).
    pub fn get(&self, id: NodeId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// All ids in ascending order.
    pub fn sorted_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn max_id(&self) -> Option<NodeId> {
        self.entries.keys().copied().max()
    }

    // -- Buffer Management ----------------------------------------------------

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// -- Tests --------------------------------------------------------------------
