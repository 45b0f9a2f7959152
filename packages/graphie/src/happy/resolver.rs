//! Point lookup across the three storage tiers.
//!
//! Search order: live memtable, then pending snapshots and segments
//! together, newest first by creation timestamp. Flushes can finish out of
//! freeze order, so a registered segment may be newer than a snapshot that
//! is still pending. The first hit wins; a tombstone ends the search with
//! "not found".

use std::sync::Arc;

use crate::error::Result;
use crate::happy::flush::FlushQueue;
use crate::happy::memtable::Memtable;
use crate::happy::nodetable::Nodetable;
use crate::happy::record::NodeRecord;
use crate::types::NodeId;

/// Resolve the current state of `id` as an independent copy.
///
/// Caller holds the engine lock (shared or exclusive) so a worker cannot
/// move a snapshot from the queue into `segments` mid-lookup.
pub fn resolve(
    memtable: &Memtable,
    queue: &FlushQueue,
    segments: &[Arc<Nodetable>],
    id: NodeId,
) -> Result<Option<NodeRecord>> {
    if let Some(entry) = memtable.get(id) {
        return Ok(entry.live().cloned());
    }
    let pending = queue.find(id);
    for segment in segments {
        if let Some((created, entry)) = &pending {
            if *created > segment.created() {
                return Ok(entry.clone().into_live());
            }
        }
        if let Some(entry) = segment.get(id)? {
            return Ok(entry.into_live());
        }
    }
    Ok(pending.and_then(|(_, entry)| entry.into_live()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use crate::happy::flush::FrozenMemtable;
    use crate::happy::record::Entry;
    use crate::happy::writer::NodetableWriter;

    fn named(id: NodeId, name: &str) -> NodeRecord {
        NodeRecord::new(id, vec![], attrs! { "name" => name })
    }

    fn segment(created: u64, entries: Vec<Entry>) -> Arc<Nodetable> {
        let mut mem = Memtable::new();
        for entry in entries {
            match entry {
                Entry::Live(record) => mem.upsert(record),
                Entry::Removed(id) => mem.tombstone(id),
            }
        }
        let mut buf = Vec::new();
        NodetableWriter::new(&mem, 2048, 3)
            .created(created)
            .finish(&mut buf)
            .unwrap();
        Arc::new(Nodetable::from_bytes(format!("s{}", created), buf).unwrap())
    }

    fn name_of(record: Option<NodeRecord>) -> Option<String> {
        record.and_then(|r| r.attrs.get("name").and_then(|v| v.as_str()).map(str::to_string))
    }

    #[test]
    fn test_newest_segment_wins() {
        // Newest first, as the engine keeps them.
        let segments = vec![
            segment(20, vec![Entry::Live(named(1, "new"))]),
            segment(10, vec![Entry::Live(named(1, "old")), Entry::Live(named(2, "only"))]),
        ];
        let mem = Memtable::new();
        let queue = FlushQueue::new();

        assert_eq!(name_of(resolve(&mem, &queue, &segments, 1).unwrap()).as_deref(), Some("new"));
        assert_eq!(name_of(resolve(&mem, &queue, &segments, 2).unwrap()).as_deref(), Some("only"));
        assert!(resolve(&mem, &queue, &segments, 3).unwrap().is_none());
    }

    #[test]
    fn test_tombstone_shadows_older_tiers() {
        let segments = vec![
            segment(20, vec![Entry::Removed(1)]),
            segment(10, vec![Entry::Live(named(1, "old"))]),
        ];
        let mem = Memtable::new();
        let queue = FlushQueue::new();
        assert!(resolve(&mem, &queue, &segments, 1).unwrap().is_none());
    }

    #[test]
    fn test_memtable_then_queue_then_segments() {
        let segments = vec![segment(10, vec![Entry::Live(named(1, "disk"))])];
        let queue = FlushQueue::new();
        let mut pending = Memtable::new();
        pending.upsert(named(1, "pending"));
        queue.push(Arc::new(FrozenMemtable {
            seq: 1,
            created: 15,
            labels: vec![],
            memtable: pending,
        }));
        let mut mem = Memtable::new();

        assert_eq!(name_of(resolve(&mem, &queue, &segments, 1).unwrap()).as_deref(), Some("pending"));

        mem.upsert(named(1, "live"));
        assert_eq!(name_of(resolve(&mem, &queue, &segments, 1).unwrap()).as_deref(), Some("live"));

        mem.tombstone(1);
        assert!(resolve(&mem, &queue, &segments, 1).unwrap().is_none());
    }

    #[test]
    fn test_segment_newer_than_pending_snapshot_wins() {
        // Snapshot 1 (created 10) still pending, snapshot 2 (created 20)
        // already registered.
        let segments = vec![
            segment(20, vec![Entry::Live(named(1, "new")), Entry::Removed(2)]),
            segment(5, vec![Entry::Live(named(3, "oldest"))]),
        ];
        let queue = FlushQueue::new();
        let mut pending = Memtable::new();
        pending.upsert(named(1, "old"));
        pending.upsert(named(2, "alive"));
        pending.upsert(named(3, "middle"));
        queue.push(Arc::new(FrozenMemtable {
            seq: 1,
            created: 10,
            labels: vec![],
            memtable: pending,
        }));
        let mem = Memtable::new();

        assert_eq!(name_of(resolve(&mem, &queue, &segments, 1).unwrap()).as_deref(), Some("new"));
        assert!(resolve(&mem, &queue, &segments, 2).unwrap().is_none());
        assert_eq!(name_of(resolve(&mem, &queue, &segments, 3).unwrap()).as_deref(), Some("middle"));
    }
}
