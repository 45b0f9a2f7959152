//! Tuning knobs for the happy engine.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Memtable size (node entries) at which a freeze is triggered.
pub const DEFAULT_PERSIST_THRESHOLD: usize = 1_000_000;

/// Number of background flush workers.
pub const DEFAULT_FLUSH_WORKERS: usize = 4;

/// Bloom bitmap size in bits (62.5 MB per segment).
pub const DEFAULT_BLOOM_BITS: u64 = 500_000_000;

/// Iterated hash rounds per bloom insert / probe.
pub const DEFAULT_BLOOM_HASHES: u32 = 3;

/// Attempts after the first failed segment write before giving up.
pub const DEFAULT_FLUSH_RETRIES: u32 = 5;

/// Initial backoff between flush attempts; doubles on every retry.
pub const DEFAULT_FLUSH_BACKOFF_MS: u64 = 50;

/// Engine configuration. Missing JSON fields fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HappyConfig {
    pub persist_threshold: usize,
    pub flush_workers: usize,
    pub bloom_bits: u64,
    pub bloom_hashes: u32,
    pub flush_retries: u32,
    pub flush_backoff_ms: u64,
}

impl Default for HappyConfig {
    fn default() -> Self {
        Self {
            persist_threshold: DEFAULT_PERSIST_THRESHOLD,
            flush_workers: DEFAULT_FLUSH_WORKERS,
            bloom_bits: DEFAULT_BLOOM_BITS,
            bloom_hashes: DEFAULT_BLOOM_HASHES,
            flush_retries: DEFAULT_FLUSH_RETRIES,
            flush_backoff_ms: DEFAULT_FLUSH_BACKOFF_MS,
        }
    }
}

impl HappyConfig {
    /// Read a JSON config file.
    pub fn read_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write config as pretty JSON.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.persist_threshold == 0 {
            return Err(GraphError::InvalidConfig(
                "persist_threshold must be at least 1".into(),
            ));
        }
        if self.flush_workers == 0 {
            return Err(GraphError::InvalidConfig(
                "flush_workers must be at least 1".into(),
            ));
        }
        if self.bloom_bits == 0 {
            return Err(GraphError::InvalidConfig("bloom_bits must be non-zero".into()));
        }
        if self.bloom_hashes == 0 {
            return Err(GraphError::InvalidConfig(
                "bloom_hashes must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
