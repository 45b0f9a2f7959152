//! Nodetable file format: constants, header and trailer.
//!
//! ```text
//! [Header 48 bytes]
//! [bloom bitmap: ceil(bloom_bits / 8) bytes]
//! [records, locality order]
//! [offset index: (id: u64, offset: u64) x record_count, sorted by id]
//! [label dictionary: count: u32, (len: u32, utf-8) x count]
//! [Trailer 32 bytes]
//! ```

use std::io::Write;

use crate::error::{GraphError, Result};

// ── Constants ──────────────────────────────────────────────────────

/// Magic bytes at offset 0 of every nodetable.
pub const MAGIC: [u8; 4] = *b"HAPY";

/// Nodetable format version.
pub const FORMAT_VERSION: u16 = 1;

pub const HEADER_SIZE: usize = 48;

/// Trailer magic (ASCII "HIDX").
pub const TRAILER_MAGIC: u32 = 0x4849_4458;

/// index_offset(8) + labels_offset(8) + entry_count(8) + magic(4) + reserved(4)
pub const TRAILER_SIZE: usize = 32;

/// One offset index entry: id(8) + offset(8).
pub const INDEX_ENTRY_SIZE: usize = 16;

/// File extension of a finished segment.
pub const SEGMENT_EXTENSION: &str = "nt";

/// Extension of a segment still being written.
pub const TEMP_EXTENSION: &str = "tmp";

// ── Helpers ────────────────────────────────────────────────────────

#[inline]
pub(crate) fn read_u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
}

#[inline]
pub(crate) fn read_u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

#[inline]
pub(crate) fn read_u64_at(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap())
}

/// Bytes needed for a bitmap of `bits` bits. Saturates on targets where
/// the result does not fit in `usize`.
pub fn bitmap_len(bits: u64) -> usize {
    let bytes = bits / 8 + u64::from(bits % 8 != 0);
    usize::try_from(bytes).unwrap_or(usize::MAX)
}

// ── Header ─────────────────────────────────────────────────────────

/// Nodetable header, exactly 48 bytes on disk.
///
/// ```text
/// Offset  Size  Field
/// 0       4     magic: b"HAPY"
/// 4       2     version: u16 = 1
/// 6       2     reserved
/// 8       8     created: u64 (ns)
/// 16      8     record_count: u64
/// 24      8     max_node_id: u64
/// 32      8     bloom_bits: u64
/// 40      4     bloom_hashes: u32
/// 44      4     reserved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodetableHeader {
    pub version: u16,
    pub created: u64,
    pub record_count: u64,
    pub max_node_id: u64,
    pub bloom_bits: u64,
    pub bloom_hashes: u32,
}

impl NodetableHeader {
    pub fn new(
        created: u64,
        record_count: u64,
        max_node_id: u64,
        bloom_bits: u64,
        bloom_hashes: u32,
    ) -> Self {
        Self {
            version: FORMAT_VERSION,
            created,
            record_count,
            max_node_id,
            bloom_bits,
            bloom_hashes,
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&[0u8; 2])?;
        writer.write_all(&self.created.to_le_bytes())?;
        writer.write_all(&self.record_count.to_le_bytes())?;
        writer.write_all(&self.max_node_id.to_le_bytes())?;
        writer.write_all(&self.bloom_bits.to_le_bytes())?;
        writer.write_all(&self.bloom_hashes.to_le_bytes())?;
        writer.write_all(&[0u8; 4])?;
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(GraphError::InvalidFormat(
                "File too small for nodetable header".into(),
            ));
        }
        if bytes[0..4] != MAGIC {
            return Err(GraphError::InvalidFormat(format!(
                "Not a nodetable: expected HAPY, got {:?}",
                &bytes[0..4]
            )));
        }
        let version = read_u16_at(bytes, 4);
        if version != FORMAT_VERSION {
            return Err(GraphError::InvalidFormat(format!(
                "Unsupported nodetable version: {}",
                version
            )));
        }
        let header = Self {
            version,
            created: read_u64_at(bytes, 8),
            record_count: read_u64_at(bytes, 16),
            max_node_id: read_u64_at(bytes, 24),
            bloom_bits: read_u64_at(bytes, 32),
            bloom_hashes: read_u32_at(bytes, 40),
        };
        if header.bloom_bits == 0 || header.bloom_hashes == 0 {
            return Err(GraphError::InvalidFormat(
                "Nodetable bloom filter has zero bits or hashes".into(),
            ));
        }
        Ok(header)
    }

    /// Offset of the first record (end of the bloom bitmap).
    pub fn data_start(&self) -> usize {
        HEADER_SIZE.saturating_add(bitmap_len(self.bloom_bits))
    }
}

// ── Trailer ────────────────────────────────────────────────────────

/// Trailer locating the offset index and label dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodetableTrailer {
    pub index_offset: u64,
    pub labels_offset: u64,
    pub entry_count: u64,
}

impl NodetableTrailer {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.index_offset.to_le_bytes())?;
        writer.write_all(&self.labels_offset.to_le_bytes())?;
        writer.write_all(&self.entry_count.to_le_bytes())?;
        writer.write_all(&TRAILER_MAGIC.to_le_bytes())?;
        writer.write_all(&[0u8; 4])?;
        Ok(())
    }

    /// Parse the trailer at the end of `file`. Returns `None` when the
    /// trailer is absent or does not describe a consistent index.
    pub fn read(file: &[u8], header: &NodetableHeader) -> Option<Self> {
        let data_start = header.data_start();
        if file.len() < data_start + TRAILER_SIZE {
            return None;
        }
        let start = file.len() - TRAILER_SIZE;
        if read_u32_at(file, start + 24) != TRAILER_MAGIC {
            return None;
        }
        let trailer = Self {
            index_offset: read_u64_at(file, start),
            labels_offset: read_u64_at(file, start + 8),
            entry_count: read_u64_at(file, start + 16),
        };

        let index_end = (trailer.index_offset as usize)
            .checked_add((trailer.entry_count as usize).checked_mul(INDEX_ENTRY_SIZE)?)?;
        let consistent = trailer.entry_count == header.record_count
            && trailer.index_offset as usize >= data_start
            && index_end == trailer.labels_offset as usize
            && (trailer.labels_offset as usize) <= start;
        consistent.then_some(trailer)
    }
}

// ── Label dictionary ───────────────────────────────────────────────

pub fn write_labels<W: Write>(labels: &[String], writer: &mut W) -> Result<()> {
    writer.write_all(&(labels.len() as u32).to_le_bytes())?;
    for label in labels {
        writer.write_all(&(label.len() as u32).to_le_bytes())?;
        writer.write_all(label.as_bytes())?;
    }
    Ok(())
}

pub fn read_labels(bytes: &[u8]) -> Result<Vec<String>> {
    let truncated = || GraphError::InvalidFormat("Label dictionary truncated".into());
    if bytes.len() < 4 {
        return Err(truncated());
    }
    let count = read_u32_at(bytes, 0) as usize;
    let mut labels = Vec::with_capacity(count.min(u16::MAX as usize));
    let mut pos = 4;
    for _ in 0..count {
        if bytes.len() < pos + 4 {
            return Err(truncated());
        }
        let len = read_u32_at(bytes, pos) as usize;
        pos += 4;
        if bytes.len() < pos + len {
            return Err(truncated());
        }
        let label = std::str::from_utf8(&bytes[pos..pos + len]).map_err(|e| {
            GraphError::InvalidFormat(format!("Label is not valid UTF-8: {}", e))
        })?;
        labels.push(label.to_string());
        pos += len;
    }
    Ok(labels)
}
