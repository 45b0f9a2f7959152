//! Nodetable writer.
//!
//! Encodes one frozen memtable into an immutable segment. Records are
//! written in locality order (graph-adjacent nodes close together on
//! disk) rather than id order; the offset index written after the
//! records restores O(log n) point lookup.

use std::collections::HashSet;
use std::io::Write;

use crate::error::Result;
use crate::happy::bloom::BloomFilter;
use crate::happy::format::{write_labels, NodetableHeader, NodetableTrailer};
use crate::happy::memtable::Memtable;
use crate::happy::record::{encode_entry, Entry};
use crate::types::NodeId;

/// Summary of a written nodetable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodetableMeta {
    pub record_count: u64,
    pub byte_size: u64,
    pub max_node_id: u64,
    /// Ids in the order their records were written.
    pub write_order: Vec<NodeId>,
}

/// Write adapter tracking the absolute offset of the next byte.
struct OffsetWriter<W> {
    inner: W,
    position: u64,
}

impl<W: Write> Write for OffsetWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Depth-first write order over the memtable's adjacency.
///
/// Start nodes are taken in ascending id order. From each node, unvisited
/// outgoing neighbours are explored (in link order) before unvisited
/// incoming neighbours. Neighbours outside the memtable are skipped. Uses
/// an explicit stack, so large components cannot overflow the call stack.
pub fn locality_order(memtable: &Memtable) -> Vec<NodeId> {
    let mut order = Vec::with_capacity(memtable.len());
    let mut visited: HashSet<NodeId> = HashSet::with_capacity(memtable.len());
    let mut stack: Vec<NodeId> = Vec::new();

    for start in memtable.sorted_ids() {
        if visited.contains(&start) {
            continue;
        }
        stack.push(start);

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            order.push(id);

            let Some(record) = memtable.get(id).and_then(Entry::live) else {
                continue;
            };
            // Reverse push so the first outgoing link is popped next.
            let pending = record
                .links_out
                .iter()
                .chain(record.links_in.iter())
                .map(|l| l.other)
                .filter(|other| !visited.contains(other) && memtable.get(*other).is_some())
                .collect::<Vec<_>>();
            stack.extend(pending.into_iter().rev());
        }
    }

    order
}

/// Writer for a single nodetable.
pub struct NodetableWriter<'a> {
    memtable: &'a Memtable,
    labels: &'a [String],
    created: u64,
    bloom_bits: u64,
    bloom_hashes: u32,
}

impl<'a> NodetableWriter<'a> {
    pub fn new(memtable: &'a Memtable, bloom_bits: u64, bloom_hashes: u32) -> Self {
        Self {
            memtable,
            labels: &[],
            created: 0,
            bloom_bits,
            bloom_hashes,
        }
    }

    /// Creation timestamp (ns) stored in the header.
    pub fn created(mut self, created: u64) -> Self {
        self.created = created;
        self
    }

    /// Label dictionary snapshot stored alongside the records.
    pub fn labels(mut self, labels: &'a [String]) -> Self {
        self.labels = labels;
        self
    }

    /// Write the nodetable. Consumes self.
    ///
    /// Steps: header, bloom pre-pass over every id, records in locality
    /// order (offset index built as each record is placed), offset index
    /// sorted by id, label dictionary, trailer.
    pub fn finish<W: Write>(self, writer: W) -> Result<NodetableMeta> {
        let mut out = OffsetWriter {
            inner: writer,
            position: 0,
        };
        let record_count = self.memtable.len() as u64;
        let max_node_id = self.memtable.max_id().unwrap_or(0);

        // Step 1: Header.
        let header = NodetableHeader::new(
            self.created,
            record_count,
            max_node_id,
            self.bloom_bits,
            self.bloom_hashes,
        );
        header.write_to(&mut out)?;

        // Step 2: Bloom filter over every id.
        let mut bloom = BloomFilter::new(self.bloom_bits, self.bloom_hashes);
        for entry in self.memtable.iter() {
            bloom.insert(entry.id());
        }
        bloom.write_to(&mut out)?;

        // Step 3: Records.
        let write_order = locality_order(self.memtable);
        let mut index: Vec<(NodeId, u64)> = Vec::with_capacity(write_order.len());
        for &id in &write_order {
            if let Some(entry) = self.memtable.get(id) {
                index.push((id, out.position));
                encode_entry(entry, &mut out)?;
            }
        }

        // Step 4: Offset index.
        let index_offset = out.position;
        index.sort_unstable_by_key(|&(id, _)| id);
        for &(id, offset) in &index {
            out.write_all(&id.to_le_bytes())?;
            out.write_all(&offset.to_le_bytes())?;
        }

        // Step 5: Label dictionary.
        let labels_offset = out.position;
        write_labels(self.labels, &mut out)?;

        // Step 6: Trailer.
        let trailer = NodetableTrailer {
            index_offset,
            labels_offset,
            entry_count: index.len() as u64,
        };
        trailer.write_to(&mut out)?;
        out.flush()?;

        Ok(NodetableMeta {
            record_count,
            byte_size: out.position,
            max_node_id,
            write_order,
        })
    }
}
