//! Node record model and its binary encoding.
//!
//! Record layout (little-endian):
//! ```text
//! [kind: u8]                 // 0 = live, 1 = removed
//! [id: u64]
//! -- live records only --
//! [label_count: u16]
//! [label_id: u16 x label_count]
//! [links_out: MessagePack array of [other, attrs]]
//! [links_in:  MessagePack array of [other, attrs]]
//! [attrs:     MessagePack map]
//! ```
//!
//! The MessagePack sections are self-describing, so a reader never needs
//! schema information to decode a record.

use std::io::{Cursor, Write};

use crate::error::{GraphError, Result};
use crate::happy::format::{read_u16_at, read_u64_at};
use crate::happy::labels::LabelId;
use crate::types::{Attrs, Link, NodeId};

const KIND_LIVE: u8 = 0;
const KIND_REMOVED: u8 = 1;

/// kind(1) + id(8)
pub(crate) const ENTRY_PREFIX_SIZE: usize = 9;

/// Stored state of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub labels: Vec<LabelId>,
    pub attrs: Attrs,
    pub links_out: Vec<Link>,
    pub links_in: Vec<Link>,
}

impl NodeRecord {
    pub fn new(id: NodeId, labels: Vec<LabelId>, attrs: Attrs) -> Self {
        Self {
            id,
            labels,
            attrs,
            links_out: Vec::new(),
            links_in: Vec::new(),
        }
    }

    pub fn push_out(&mut self, to: NodeId, attrs: Attrs) {
        self.links_out.push(Link::new(to, attrs));
    }

    pub fn push_in(&mut self, from: NodeId, attrs: Attrs) {
        self.links_in.push(Link::new(from, attrs));
    }

    /// Remove the first outgoing link to `to` carrying exactly `attrs`.
    pub fn remove_out(&mut self, to: NodeId, attrs: &Attrs) -> bool {
        remove_first(&mut self.links_out, to, attrs)
    }

    /// Remove the first incoming link from `from` carrying exactly `attrs`.
    pub fn remove_in(&mut self, from: NodeId, attrs: &Attrs) -> bool {
        remove_first(&mut self.links_in, from, attrs)
    }

    /// Drop every link (either direction) that references `other`.
    /// Returns the number of links removed.
    pub fn strip_links_to(&mut self, other: NodeId) -> usize {
        let before = self.links_out.len() + self.links_in.len();
        self.links_out.retain(|l| l.other != other);
        self.links_in.retain(|l| l.other != other);
        before - self.links_out.len() - self.links_in.len()
    }

    /// Ids of all adjacent nodes, outgoing targets first. May repeat.
    pub fn neighbours(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.links_out
            .iter()
            .chain(self.links_in.iter())
            .map(|l| l.other)
    }
}

fn remove_first(links: &mut Vec<Link>, other: NodeId, attrs: &Attrs) -> bool {
    match links.iter().position(|l| l.other == other && &l.attrs == attrs) {
        Some(pos) => {
            links.remove(pos);
            true
        }
        None => false,
    }
}

/// A memtable or segment slot: the current record, or a tombstone that
/// shadows older versions of the node.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Live(NodeRecord),
    Removed(NodeId),
}

impl Entry {
    pub fn id(&self) -> NodeId {
        match self {
            Entry::Live(record) => record.id,
            Entry::Removed(id) => *id,
        }
    }

    pub fn live(&self) -> Option<&NodeRecord> {
        match self {
            Entry::Live(record) => Some(record),
            Entry::Removed(_) => None,
        }
    }

    pub fn into_live(self) -> Option<NodeRecord> {
        match self {
            Entry::Live(record) => Some(record),
            Entry::Removed(_) => None,
        }
    }
}

/// Append one encoded entry to `writer`.
pub fn encode_entry<W: Write>(entry: &Entry, writer: &mut W) -> Result<()> {
    match entry {
        Entry::Removed(id) => {
            writer.write_all(&[KIND_REMOVED])?;
            writer.write_all(&id.to_le_bytes())?;
        }
        Entry::Live(record) => {
            writer.write_all(&[KIND_LIVE])?;
            writer.write_all(&record.id.to_le_bytes())?;
            writer.write_all(&(record.labels.len() as u16).to_le_bytes())?;
            for label in &record.labels {
                writer.write_all(&label.to_le_bytes())?;
            }
            rmp_serde::encode::write(writer, &record.links_out)?;
            rmp_serde::encode::write(writer, &record.links_in)?;
            rmp_serde::encode::write(writer, &record.attrs)?;
        }
    }
    Ok(())
}

/// Decode one entry from the start of `bytes`.
///
/// Returns the entry and the number of bytes it occupied.
pub fn decode_entry(bytes: &[u8]) -> Result<(Entry, usize)> {
    if bytes.len() < ENTRY_PREFIX_SIZE {
        return Err(GraphError::InvalidFormat("Record truncated".into()));
    }
    let kind = bytes[0];
    let id = read_u64_at(bytes, 1);

    match kind {
        KIND_REMOVED => Ok((Entry::Removed(id), ENTRY_PREFIX_SIZE)),
        KIND_LIVE => {
            let labels_start = ENTRY_PREFIX_SIZE + 2;
            if bytes.len() < labels_start {
                return Err(GraphError::InvalidFormat("Record truncated".into()));
            }
            let label_count = read_u16_at(bytes, 9) as usize;
            let labels_end = labels_start + 2 * label_count;
            if bytes.len() < labels_end {
                return Err(GraphError::InvalidFormat(
                    "Record label list truncated".into(),
                ));
            }
            let labels = bytes[labels_start..labels_end]
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();

            let mut cursor = Cursor::new(&bytes[labels_end..]);
            let links_out: Vec<Link> = rmp_serde::from_read(&mut cursor)?;
            let links_in: Vec<Link> = rmp_serde::from_read(&mut cursor)?;
            let attrs: Attrs = rmp_serde::from_read(&mut cursor)?;
            let consumed = labels_end + cursor.position() as usize;

            Ok((
                Entry::Live(NodeRecord {
                    id,
                    labels,
                    attrs,
                    links_out,
                    links_in,
                }),
                consumed,
            ))
        }
        other => Err(GraphError::InvalidFormat(format!(
            "Unknown record kind: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use crate::types::Value;

    fn sample() -> NodeRecord {
        let mut record = NodeRecord::new(
            7,
            vec![1, 3],
            attrs! { "name" => "Ada", "born" => 1815, "score" => 0.5, "ok" => true },
        );
        record.push_out(8, attrs! { "name" => "knows" });
        record.push_in(9, attrs! {});
        record
    }

    #[test]
    fn test_encode_decode_live() {
        let entry = Entry::Live(sample());
        let mut buf = Vec::new();
        encode_entry(&entry, &mut buf).unwrap();

        let (decoded, consumed) = decode_entry(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_encode_decode_nested_attrs() {
        let mut inner = Attrs::new();
        inner.insert("city".into(), Value::from("London"));
        let record = NodeRecord::new(1, vec![], attrs! { "addr" => inner, "tags" => vec![1, 2] });
        let entry = Entry::Live(record);

        let mut buf = Vec::new();
        encode_entry(&entry, &mut buf).unwrap();
        let (decoded, _) = decode_entry(&buf).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_encode_decode_removed() {
        let mut buf = Vec::new();
        encode_entry(&Entry::Removed(42), &mut buf).unwrap();
        assert_eq!(buf.len(), ENTRY_PREFIX_SIZE);
        assert_eq!(decode_entry(&buf).unwrap(), (Entry::Removed(42), ENTRY_PREFIX_SIZE));
    }

    #[test]
    fn test_consecutive_entries_are_self_delimiting() {
        let mut buf = Vec::new();
        encode_entry(&Entry::Live(sample()), &mut buf).unwrap();
        let first_len = buf.len();
        encode_entry(&Entry::Removed(3), &mut buf).unwrap();

        let (_, consumed) = decode_entry(&buf).unwrap();
        assert_eq!(consumed, first_len);
        let (second, _) = decode_entry(&buf[consumed..]).unwrap();
        assert_eq!(second, Entry::Removed(3));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let mut buf = vec![9u8];
        buf.extend_from_slice(&1u64.to_le_bytes());
        let err = decode_entry(&buf).unwrap_err();
        assert!(err.to_string().contains("Unknown record kind"), "unexpected: {}", err);
    }

    #[test]
    fn test_decode_truncated() {
        let err = decode_entry(&[0u8; 4]).unwrap_err();
        assert!(err.to_string().contains("truncated"), "unexpected: {}", err);
    }

    #[test]
    fn test_remove_matches_attrs() {
        let mut record = sample();
        assert!(!record.remove_out(8, &attrs! { "name" => "likes" }));
        assert!(record.remove_out(8, &attrs! { "name" => "knows" }));
        assert!(record.links_out.is_empty());
        assert!(record.remove_in(9, &attrs! {}));
    }

    #[test]
    fn test_strip_links_to() {
        let mut record = sample();
        record.push_out(9, attrs! {});
        assert_eq!(record.strip_links_to(9), 2);
        assert_eq!(record.neighbours().collect::<Vec<_>>(), vec![8]);
    }
}
