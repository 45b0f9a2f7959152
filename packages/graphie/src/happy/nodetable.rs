//! Immutable nodetable reader (memory-mapped or from bytes).
//!
//! Point lookup never decodes more than one record: the bloom bitmap and
//! the offset index are probed in place over the mapped file.

use std::fmt;
use std::fs::File;
use std::ops::{Deref, Range};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::{trace, warn};

use crate::error::{GraphError, Result};
use crate::happy::bloom::maybe_contains_in;
use crate::happy::format::{
    read_labels, read_u64_at, NodetableHeader, NodetableTrailer, HEADER_SIZE,
    INDEX_ENTRY_SIZE, TRAILER_SIZE,
};
use crate::happy::record::{decode_entry, Entry, ENTRY_PREFIX_SIZE};
use crate::types::NodeId;

enum SegmentBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for SegmentBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            SegmentBytes::Mapped(mmap) => &mmap[..],
            SegmentBytes::Owned(bytes) => &bytes[..],
        }
    }
}

enum OffsetIndex {
    /// Sorted (id, offset) pairs inside the segment bytes.
    OnDisk { start: usize, count: usize },
    /// Rebuilt by scanning records; the trailer was missing or damaged.
    Rebuilt(Vec<(NodeId, u64)>),
}

pub struct Nodetable {
    name: String,
    path: Option<PathBuf>,
    data: SegmentBytes,
    header: NodetableHeader,
    bloom: Range<usize>,
    index: OffsetIndex,
    labels: Vec<String>,
}

impl fmt::Debug for Nodetable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nodetable")
            .field("name", &self.name)
            .field("created", &self.header.created)
            .field("record_count", &self.header.record_count)
            .field("byte_size", &self.data.len())
            .finish()
    }
}

impl Nodetable {
    /// Open a nodetable file (memory-mapped). The name is the file stem.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: finished segments are never modified or truncated while
        // the engine holds them open.
        let mmap = unsafe { Mmap::map(&file) }?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::parse(name, Some(path.to_path_buf()), SegmentBytes::Mapped(mmap))
    }

    /// Open a nodetable from owned bytes (for testing / embedding).
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        Self::parse(name.into(), None, SegmentBytes::Owned(bytes))
    }

    fn parse(name: String, path: Option<PathBuf>, data: SegmentBytes) -> Result<Self> {
        let header = NodetableHeader::from_bytes(&data)?;
        let data_start = header.data_start();
        if data.len() < data_start {
            return Err(GraphError::InvalidFormat(format!(
                "Nodetable {} truncated inside bloom filter",
                name
            )));
        }
        let bloom = HEADER_SIZE..data_start;

        let (index, labels) = match NodetableTrailer::read(&data, &header) {
            Some(trailer) => {
                let labels_end = data.len() - TRAILER_SIZE;
                let labels = read_labels(&data[trailer.labels_offset as usize..labels_end])?;
                let index = OffsetIndex::OnDisk {
                    start: trailer.index_offset as usize,
                    count: trailer.entry_count as usize,
                };
                (index, labels)
            }
            None => {
                warn!(
                    segment = %name,
                    records = header.record_count,
                    "nodetable trailer missing or inconsistent, rebuilding offset index"
                );
                let index = rebuild_index(&data, &header)?;
                (OffsetIndex::Rebuilt(index), Vec::new())
            }
        };

        Ok(Self {
            name,
            path,
            data,
            header,
            bloom,
            index,
            labels,
        })
    }

    // -- Accessors ----------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Creation timestamp (ns). Newer segments shadow older ones.
    pub fn created(&self) -> u64 {
        self.header.created
    }

    pub fn record_count(&self) -> u64 {
        self.header.record_count
    }

    pub fn max_node_id(&self) -> u64 {
        self.header.max_node_id
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    /// Label dictionary snapshot. Empty when the index had to be rebuilt.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn index_rebuilt(&self) -> bool {
        matches!(self.index, OffsetIndex::Rebuilt(_))
    }

    // -- Lookup -------------------------------------------------------------

    /// Bloom filter check.
    ///
    /// Returns `false` → id definitely not in this segment.
    /// Returns `true`  → id might be in this segment.
    pub fn maybe_contains(&self, id: NodeId) -> bool {
        maybe_contains_in(
            &self.data[self.bloom.clone()],
            self.header.bloom_bits,
            self.header.bloom_hashes,
            id,
        )
    }

    /// Byte offset of the record for `id`, by binary search.
    pub fn offset_of(&self, id: NodeId) -> Option<u64> {
        match &self.index {
            OffsetIndex::Rebuilt(entries) => entries
                .binary_search_by_key(&id, |&(k, _)| k)
                .ok()
                .map(|i| entries[i].1),
            OffsetIndex::OnDisk { start, count } => {
                let (mut lo, mut hi) = (0usize, *count);
                while lo < hi {
                    let mid = lo + (hi - lo) / 2;
                    let at = start + mid * INDEX_ENTRY_SIZE;
                    let key = read_u64_at(&self.data, at);
                    if key == id {
                        return Some(read_u64_at(&self.data, at + 8));
                    }
                    if key < id {
                        lo = mid + 1;
                    } else {
                        hi = mid;
                    }
                }
                None
            }
        }
    }

    /// Point lookup: bloom filter, then offset index.
    ///
    /// `Ok(None)` when the id is not stored here. A tombstone is returned as
    /// `Entry::Removed` so the caller can stop searching older segments.
    pub fn get(&self, id: NodeId) -> Result<Option<Entry>> {
        if !self.maybe_contains(id) {
            return Ok(None);
        }
        let Some(offset) = self.offset_of(id) else {
            trace!(segment = %self.name, id, "bloom false positive");
            return Ok(None);
        };
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Err(GraphError::InvalidFormat(format!(
                "Nodetable {} offset {} out of bounds",
                self.name, offset
            )));
        }
        let (entry, _) = decode_entry(&self.data[offset..])?;
        Ok(Some(entry))
    }

    /// Every entry in file (locality) order.
    pub fn entries(&self) -> Result<Vec<Entry>> {
        let mut pos = self.header.data_start();
        let capacity = (self.header.record_count as usize).min(self.data.len() / ENTRY_PREFIX_SIZE);
        let mut out = Vec::with_capacity(capacity);
        for _ in 0..self.header.record_count {
            if pos >= self.data.len() {
                return Err(GraphError::InvalidFormat(
                    "Nodetable records truncated".into(),
                ));
            }
            let (entry, consumed) = decode_entry(&self.data[pos..])?;
            out.push(entry);
            pos += consumed;
        }
        Ok(out)
    }
}

/// Recover the offset index by decoding `record_count` records sequentially.
fn rebuild_index(data: &[u8], header: &NodetableHeader) -> Result<Vec<(NodeId, u64)>> {
    let mut pos = header.data_start();
    // record_count comes from an unverified header.
    let capacity = (header.record_count as usize).min(data.len() / ENTRY_PREFIX_SIZE);
    let mut index = Vec::with_capacity(capacity);
    for _ in 0..header.record_count {
        if pos >= data.len() {
            return Err(GraphError::InvalidFormat(
                "Nodetable records truncated".into(),
            ));
        }
        let (entry, consumed) = decode_entry(&data[pos..])?;
        index.push((entry.id(), pos as u64));
        pos += consumed;
    }
    index.sort_unstable_by_key(|&(id, _)| id);
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use crate::happy::format::bitmap_len;
    use crate::happy::memtable::Memtable;
    use crate::happy::record::NodeRecord;
    use crate::happy::writer::NodetableWriter;

    fn sample_memtable() -> Memtable {
        let mut mem = Memtable::new();
        let mut ada = NodeRecord::new(1, vec![1], attrs! { "name" => "Ada" });
        let mut bob = NodeRecord::new(2, vec![1], attrs! { "name" => "Bob" });
        ada.push_out(2, attrs! { "since" => 1840 });
        bob.push_in(1, attrs! { "since" => 1840 });
        mem.upsert(ada);
        mem.upsert(bob);
        mem.upsert(NodeRecord::new(3, vec![], attrs! {}));
        mem.tombstone(9);
        mem
    }

    fn write(mem: &Memtable, labels: &[String]) -> Vec<u8> {
        let mut buf = Vec::new();
        NodetableWriter::new(mem, 4096, 3)
            .created(1_000)
            .labels(labels)
            .finish(&mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn test_roundtrip_point_lookup() {
        let mem = sample_memtable();
        let labels = vec!["person".to_string()];
        let table = Nodetable::from_bytes("t", write(&mem, &labels)).unwrap();

        assert_eq!(table.created(), 1_000);
        assert_eq!(table.record_count(), 4);
        assert_eq!(table.max_node_id(), 9);
        assert_eq!(table.labels(), labels.as_slice());
        assert!(!table.index_rebuilt());

        for id in [1u64, 2, 3, 9] {
            let got = table.get(id).unwrap();
            assert_eq!(got.as_ref(), mem.get(id), "mismatch for id {}", id);
        }
        assert_eq!(table.get(9).unwrap(), Some(Entry::Removed(9)));
        assert!(table.get(4).unwrap().is_none());
        assert!(table.get(1_000_000).unwrap().is_none());
    }

    #[test]
    fn test_empty_snapshot() {
        let mem = Memtable::new();
        let table = Nodetable::from_bytes("empty", write(&mem, &[])).unwrap();
        assert_eq!(table.record_count(), 0);
        assert!(table.get(1).unwrap().is_none());
        assert!(table.entries().unwrap().is_empty());
    }

    #[test]
    fn test_single_node_without_edges() {
        let mut mem = Memtable::new();
        mem.upsert(NodeRecord::new(5, vec![], attrs! { "x" => 1.5 }));
        let table = Nodetable::from_bytes("one", write(&mem, &[])).unwrap();
        assert_eq!(table.get(5).unwrap().as_ref(), mem.get(5));
    }

    #[test]
    fn test_index_covers_every_written_id() {
        let mem = sample_memtable();
        let table = Nodetable::from_bytes("t", write(&mem, &[])).unwrap();
        let entries = table.entries().unwrap();
        assert_eq!(entries.len(), 4);
        for entry in &entries {
            assert!(table.offset_of(entry.id()).is_some());
            assert!(table.maybe_contains(entry.id()));
        }
    }

    #[test]
    fn test_entries_in_locality_order() {
        let mem = sample_memtable();
        let table = Nodetable::from_bytes("t", write(&mem, &[])).unwrap();
        let ids: Vec<NodeId> = table.entries().unwrap().iter().map(Entry::id).collect();
        assert_eq!(ids, vec![1, 2, 3, 9]);
    }

    #[test]
    fn test_rebuild_index_without_trailer() {
        let mem = sample_memtable();
        let labels = vec!["person".to_string()];
        let mut bytes = write(&mem, &labels);
        // Damage the trailer magic.
        let len = bytes.len();
        bytes[len - 8] ^= 0xFF;

        let table = Nodetable::from_bytes("broken", bytes).unwrap();
        assert!(table.index_rebuilt());
        assert!(table.labels().is_empty());
        for id in [1u64, 2, 3, 9] {
            assert_eq!(table.get(id).unwrap().as_ref(), mem.get(id));
        }
    }

    #[test]
    fn test_rebuild_index_after_truncated_tail() {
        let mem = sample_memtable();
        let mut bytes = write(&mem, &[]);
        let table = Nodetable::from_bytes("t", bytes.clone()).unwrap();
        let entries = table.entries().unwrap();
        drop(table);

        // Cut off the index, dictionary and trailer but keep every record.
        let mut records_len = 0;
        for entry in &entries {
            let mut buf = Vec::new();
            crate::happy::record::encode_entry(entry, &mut buf).unwrap();
            records_len += buf.len();
        }
        bytes.truncate(HEADER_SIZE + bitmap_len(4096) + records_len);

        let table = Nodetable::from_bytes("cut", bytes).unwrap();
        assert!(table.index_rebuilt());
        assert_eq!(table.get(2).unwrap().as_ref(), mem.get(2));
    }

    #[test]
    fn test_truncated_records_rejected() {
        let mem = sample_memtable();
        let mut bytes = write(&mem, &[]);
        bytes.truncate(HEADER_SIZE + bitmap_len(4096) + 3);
        let err = Nodetable::from_bytes("cut", bytes).unwrap_err();
        assert!(err.to_string().contains("truncated"), "unexpected: {}", err);
    }

    #[test]
    fn test_huge_bloom_bits_rejected() {
        let mut bytes = write(&sample_memtable(), &[]);
        bytes[32..40].copy_from_slice(&u64::MAX.to_le_bytes());
        let err = Nodetable::from_bytes("bloom", bytes).unwrap_err();
        assert!(matches!(err, GraphError::InvalidFormat(_)), "unexpected: {}", err);
    }

    #[test]
    fn test_huge_record_count_without_trailer_rejected() {
        let mut bytes = write(&sample_memtable(), &[]);
        let len = bytes.len();
        bytes[len - 8] ^= 0xFF;
        bytes[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
        // Decoding runs past the records into the index and fails there.
        assert!(Nodetable::from_bytes("count", bytes).is_err());
    }

    #[test]
    fn test_false_positive_is_not_found() {
        // Tiny filter: nearly every probe is a positive.
        let mut mem = Memtable::new();
        for id in 1..=64u64 {
            mem.upsert(NodeRecord::new(id * 2, vec![], attrs! {}));
        }
        let mut buf = Vec::new();
        NodetableWriter::new(&mem, 8, 1).finish(&mut buf).unwrap();
        let table = Nodetable::from_bytes("tiny", buf).unwrap();

        let positives = (0..64u64)
            .map(|i| i * 2 + 1)
            .filter(|&id| table.maybe_contains(id))
            .collect::<Vec<_>>();
        assert!(!positives.is_empty());
        for id in positives {
            assert!(table.get(id).unwrap().is_none());
        }
    }

    #[test]
    fn test_open_mmap() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("abc.nt");
        std::fs::write(&path, write(&sample_memtable(), &[])).unwrap();

        let table = Nodetable::open(&path).unwrap();
        assert_eq!(table.name(), "abc");
        assert_eq!(table.path(), Some(path.as_path()));
        assert!(table.get(1).unwrap().is_some());
    }
}
