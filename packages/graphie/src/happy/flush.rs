//! Freeze queue and background flush workers.
//!
//! A frozen memtable stays in the pending queue (and readable) until its
//! segment has been written and registered. Workers receive snapshots over
//! a rendezvous channel: a freeze blocks while every worker is busy.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::{Condvar, Mutex};
use rand::RngCore;
use tracing::{debug, error, warn};

use crate::error::{GraphError, Result};
use crate::happy::config::HappyConfig;
use crate::happy::engine::Engine;
use crate::happy::format::{SEGMENT_EXTENSION, TEMP_EXTENSION};
use crate::happy::memtable::Memtable;
use crate::happy::nodetable::Nodetable;
use crate::happy::record::Entry;
use crate::happy::writer::NodetableWriter;
use crate::types::NodeId;

/// An immutable memtable snapshot waiting to be persisted.
#[derive(Debug)]
pub struct FrozenMemtable {
    /// Freeze sequence number, unique per engine.
    pub seq: u64,
    /// Creation timestamp (ns), strictly increasing in freeze order.
    pub created: u64,
    /// Label dictionary at freeze time.
    pub labels: Vec<String>,
    pub memtable: Memtable,
}

// -- Pending Queue ------------------------------------------------------------

/// Snapshots frozen but not yet registered as segments, oldest first.
#[derive(Debug, Default)]
pub struct FlushQueue {
    pending: Mutex<VecDeque<Arc<FrozenMemtable>>>,
    changed: Condvar,
}

impl FlushQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, frozen: Arc<FrozenMemtable>) {
        self.pending.lock().push_back(frozen);
    }

    /// Drop the snapshot with sequence number `seq` and wake waiters.
    pub fn remove(&self, seq: u64) -> bool {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|f| f.seq != seq);
        let removed = pending.len() != before;
        self.changed.notify_all();
        removed
    }

    /// Newest-first lookup across pending snapshots. Returns the entry with
    /// the creation timestamp of the snapshot holding it.
    pub fn find(&self, id: NodeId) -> Option<(u64, Entry)> {
        let pending = self.pending.lock();
        pending
            .iter()
            .rev()
            .find_map(|f| f.memtable.get(id).map(|entry| (f.created, entry.clone())))
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Wake every waiter so it re-checks its exit condition.
    pub fn notify(&self) {
        let _pending = self.pending.lock();
        self.changed.notify_all();
    }

    /// Block until the queue is empty or `give_up()` returns true.
    pub fn wait_drained(&self, give_up: impl Fn() -> bool) {
        let mut pending = self.pending.lock();
        while !pending.is_empty() && !give_up() {
            self.changed.wait(&mut pending);
        }
    }
}

// -- Workers ------------------------------------------------------------------

/// Start `count` workers pulling snapshots from `receiver`.
///
/// Each worker exits once the channel is closed and drained.
pub(crate) fn spawn_workers(
    engine: &Arc<Engine>,
    receiver: &Receiver<Arc<FrozenMemtable>>,
    count: usize,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let engine = Arc::clone(engine);
        let receiver = receiver.clone();
        let handle = thread::Builder::new()
            .name(format!("happy-flush-{}", i))
            .spawn(move || run_worker(&engine, &receiver))?;
        handles.push(handle);
    }
    Ok(handles)
}

fn run_worker(engine: &Engine, receiver: &Receiver<Arc<FrozenMemtable>>) {
    while let Ok(frozen) = receiver.recv() {
        match persist_with_retry(engine.path(), &frozen, engine.config()) {
            Ok(table) => engine.register_segment(frozen.seq, table),
            Err(e) => {
                error!(
                    seq = frozen.seq,
                    entries = frozen.memtable.len(),
                    error = %e,
                    "flush failed, snapshot stays in memory"
                );
                engine.record_failure(e.to_string());
            }
        }
    }
}

/// Write a segment, retrying with exponential backoff.
pub fn persist_with_retry(
    dir: &Path,
    frozen: &FrozenMemtable,
    config: &HappyConfig,
) -> Result<Nodetable> {
    let mut delay = Duration::from_millis(config.flush_backoff_ms);
    let mut attempt = 0u32;
    loop {
        match write_segment(dir, frozen, config) {
            Ok(table) => return Ok(table),
            Err(e) if attempt < config.flush_retries => {
                attempt += 1;
                warn!(
                    seq = frozen.seq,
                    attempt,
                    retries = config.flush_retries,
                    error = %e,
                    "segment write failed, retrying"
                );
                thread::sleep(delay);
                delay = delay.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Random segment identity: BLAKE3 of 32 random bytes, 32 hex chars.
pub fn segment_name() -> String {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    let hex = blake3::hash(&seed).to_hex();
    hex[..32].to_string()
}

fn segment_paths(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    let final_path = dir.join(format!("{}.{}", name, SEGMENT_EXTENSION));
    let tmp_path = dir.join(format!("{}.{}.{}", name, SEGMENT_EXTENSION, TEMP_EXTENSION));
    (final_path, tmp_path)
}

/// Encode `frozen` into `<name>.nt.tmp`, fsync, rename to `<name>.nt`
/// and open the result. The temporary file is removed on failure.
pub fn write_segment(dir: &Path, frozen: &FrozenMemtable, config: &HappyConfig) -> Result<Nodetable> {
    let name = segment_name();
    let (final_path, tmp_path) = segment_paths(dir, &name);

    if let Err(e) = write_temp(&tmp_path, frozen, config) {
        remove_if_exists(&tmp_path);
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp_path, &final_path) {
        remove_if_exists(&tmp_path);
        return Err(GraphError::Io(e));
    }

    let table = Nodetable::open(&final_path)?;
    debug!(
        segment = %name,
        seq = frozen.seq,
        records = table.record_count(),
        bytes = table.byte_size(),
        "segment written"
    );
    Ok(table)
}

fn write_temp(path: &Path, frozen: &FrozenMemtable, config: &HappyConfig) -> Result<()> {
    let file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let mut writer = BufWriter::new(file);
    NodetableWriter::new(&frozen.memtable, config.bloom_bits, config.bloom_hashes)
        .created(frozen.created)
        .labels(&frozen.labels)
        .finish(&mut writer)?;
    let file: File = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp segment"),
    }
}

/// Delete leftover `*.tmp` files from an interrupted flush.
pub fn remove_stale_temp_files(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |ext| ext == TEMP_EXTENSION) && path.is_file() {
            fs::remove_file(&path)?;
            warn!(path = %path.display(), "removed stale temp segment");
            removed += 1;
        }
    }
    Ok(removed)
}
