//! happy: log-structured graph storage engine.
//!
//! Writes land in an in-memory memtable. Once it reaches the persistence
//! threshold it is frozen, kept readable in a pending queue, and written
//! by a background worker into an immutable nodetable: bloom filter,
//! locality-ordered records and an id -> offset index. Reads merge the
//! memtable, the pending queue and the nodetables, newest first.

pub mod bloom;
pub mod config;
pub mod engine;
pub mod flush;
pub mod format;
pub mod labels;
pub mod memtable;
pub mod nodetable;
pub mod record;
pub mod resolver;
pub mod storage;
pub mod writer;

pub use bloom::BloomFilter;
pub use config::HappyConfig;
pub use engine::StorageStats;
pub use labels::{LabelId, LabelInterner};
pub use memtable::Memtable;
pub use nodetable::Nodetable;
pub use record::{Entry, NodeRecord};
pub use storage::HappyStorage;
pub use writer::{NodetableMeta, NodetableWriter};
