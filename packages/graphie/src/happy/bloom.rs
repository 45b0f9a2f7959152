//! Fixed-size bloom filter over node ids with iterated hashing.
//!
//! Each id is hashed `num_hashes` times; every round feeds the previous
//! 64-bit output back in as input and sets bit `hash % num_bits`. The
//! 64-bit hash is the first 8 bytes of BLAKE3 over the little-endian
//! input.
//!
//! Binary format: the raw bitmap, `ceil(num_bits / 8)` bytes, bit `i`
//! stored in byte `i / 8` at position `i % 8`. Size and round count live
//! in the nodetable header.

use std::io::Write;

use crate::error::{GraphError, Result};
use crate::happy::format::bitmap_len;
use crate::types::NodeId;

/// Bloom filter backed by an owned byte bitmap.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
}

#[inline]
fn hash64(x: u64) -> u64 {
    let hash = blake3::hash(&x.to_le_bytes());
    u64::from_le_bytes(hash.as_bytes()[0..8].try_into().unwrap())
}

/// Bit positions probed for `id`.
fn probe_positions(id: NodeId, num_hashes: u32, num_bits: u64) -> impl Iterator<Item = u64> {
    let mut x = id;
    (0..num_hashes).map(move |_| {
        x = hash64(x);
        x % num_bits
    })
}

/// Membership test against a borrowed bitmap (e.g. a memory-mapped
/// segment region).
///
/// Returns `false` → definitely not present.
/// Returns `true`  → possibly present.
pub fn maybe_contains_in(bits: &[u8], num_bits: u64, num_hashes: u32, id: NodeId) -> bool {
    probe_positions(id, num_hashes, num_bits)
        .all(|pos| bits[(pos / 8) as usize] & (1u8 << (pos % 8)) != 0)
}

impl BloomFilter {
    /// Create an empty filter of exactly `num_bits` bits.
    pub fn new(num_bits: u64, num_hashes: u32) -> Self {
        Self {
            bits: vec![0u8; bitmap_len(num_bits)],
            num_bits,
            num_hashes,
        }
    }

    pub fn insert(&mut self, id: NodeId) {
        for pos in probe_positions(id, self.num_hashes, self.num_bits) {
            self.bits[(pos / 8) as usize] |= 1u8 << (pos % 8);
        }
    }

    pub fn maybe_contains(&self, id: NodeId) -> bool {
        maybe_contains_in(&self.bits, self.num_bits, self.num_hashes, id)
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Write the raw bitmap.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.bits)?;
        Ok(())
    }

    /// Copy a bitmap back into an owned filter.
    pub fn from_bytes(bytes: &[u8], num_bits: u64, num_hashes: u32) -> Result<Self> {
        if num_bits == 0 {
            return Err(GraphError::InvalidFormat(
                "Bloom filter has zero bits".into(),
            ));
        }
        let len = bitmap_len(num_bits);
        if bytes.len() < len {
            return Err(GraphError::InvalidFormat(
                "Bloom filter data truncated".into(),
            ));
        }
        Ok(Self {
            bits: bytes[..len].to_vec(),
            num_bits,
            num_hashes,
        })
    }

    pub fn serialized_size(&self) -> usize {
        self.bits.len()
    }
}

/// Expected false-positive rate `(1 - e^(-k n / m))^k`.
pub fn theoretical_fpr(num_bits: u64, num_hashes: u32, num_keys: u64) -> f64 {
    let k = num_hashes as f64;
    let exponent = -k * num_keys as f64 / num_bits as f64;
    (1.0 - exponent.exp()).powf(k)
}
