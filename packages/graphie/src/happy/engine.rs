//! The happy engine: memtable, freeze queue, label interner and segment
//! list behind one reader-writer lock.
//!
//! Lock order is always `state` then the queue's own mutex. Mutations run
//! as one read-modify-write unit under the exclusive lock; a snapshot that
//! needs persisting is handed to the workers only after the lock is
//! released.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{GraphError, Result};
use crate::happy::config::HappyConfig;
use crate::happy::flush::{remove_stale_temp_files, FlushQueue, FrozenMemtable};
use crate::happy::format::SEGMENT_EXTENSION;
use crate::happy::labels::LabelInterner;
use crate::happy::memtable::Memtable;
use crate::happy::nodetable::Nodetable;
use crate::happy::record::NodeRecord;
use crate::happy::resolver::resolve;
use crate::types::{Attrs, Node, NodeId, Value};

/// Point-in-time engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageStats {
    /// Entries (tombstones included) in the live memtable.
    pub memtable_entries: usize,
    /// Frozen snapshots not yet registered as segments.
    pub pending_flushes: usize,
    pub segments: usize,
    pub segment_bytes: u64,
    pub labels: usize,
    pub next_node_id: NodeId,
}

struct EngineState {
    memtable: Memtable,
    labels: LabelInterner,
    next_node_id: NodeId,
    /// Newest first by creation timestamp.
    segments: Vec<Arc<Nodetable>>,
    last_created: u64,
    next_seq: u64,
}

impl EngineState {
    fn resolve(&self, queue: &FlushQueue, id: NodeId) -> Result<Option<NodeRecord>> {
        resolve(&self.memtable, queue, &self.segments, id)
    }

    fn must_resolve(&self, queue: &FlushQueue, id: NodeId) -> Result<NodeRecord> {
        self.resolve(queue, id)?.ok_or(GraphError::NotFound(id))
    }
}

pub struct Engine {
    path: PathBuf,
    config: HappyConfig,
    state: RwLock<EngineState>,
    queue: FlushQueue,
    /// Taken on shutdown so the channel closes once in-flight sends finish.
    dispatch: Mutex<Option<Sender<Arc<FrozenMemtable>>>>,
    /// First unrecoverable flush error. Sticky.
    failure: Mutex<Option<String>>,
}

impl Engine {
    /// Open (or create) the database directory and load its segments.
    ///
    /// Returns the engine and the receiving end of the worker channel.
    pub(crate) fn open(
        path: &Path,
        config: HappyConfig,
    ) -> Result<(Arc<Self>, Receiver<Arc<FrozenMemtable>>)> {
        config.validate()?;
        ensure_dir(path)?;
        remove_stale_temp_files(path)?;

        let segments = load_segments(path)?;
        let labels = segments
            .iter()
            .map(|s| s.labels())
            .max_by_key(|names| names.len())
            .map(|names| LabelInterner::from_names(names.to_vec()))
            .transpose()?
            .unwrap_or_default();
        for name in lost_label_dictionaries(&segments) {
            warn!(
                segment = name,
                "label dictionary lost with the trailer, newer label ids may be reassigned"
            );
        }
        let next_node_id = segments.iter().map(|s| s.max_node_id()).max().unwrap_or(0) + 1;
        let last_created = segments.first().map(|s| s.created()).unwrap_or(0);

        info!(
            path = %path.display(),
            segments = segments.len(),
            labels = labels.len(),
            next_node_id,
            "happy engine opened"
        );

        let (sender, receiver) = bounded(0);
        let engine = Self {
            path: path.to_path_buf(),
            config,
            state: RwLock::new(EngineState {
                memtable: Memtable::new(),
                labels,
                next_node_id,
                segments,
                last_created,
                next_seq: 1,
            }),
            queue: FlushQueue::new(),
            dispatch: Mutex::new(Some(sender)),
            failure: Mutex::new(None),
        };
        Ok((Arc::new(engine), receiver))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &HappyConfig {
        &self.config
    }

    // -- Mutations ------------------------------------------------------------

    pub fn add(&self, labels: &[&str], attrs: Attrs) -> Result<NodeId> {
        self.check_failure()?;
        let (id, frozen) = {
            let mut state = self.state.write();
            let mut label_ids = Vec::with_capacity(labels.len());
            for label in labels {
                let label_id = state.labels.intern(label)?;
                if !label_ids.contains(&label_id) {
                    label_ids.push(label_id);
                }
            }
            let id = state.next_node_id;
            state.next_node_id += 1;
            state.memtable.upsert(NodeRecord::new(id, label_ids, attrs));
            (id, self.maybe_freeze(&mut state))
        };
        self.dispatch(frozen)?;
        Ok(id)
    }

    pub fn link(&self, from: NodeId, to: NodeId, attrs: Attrs) -> Result<()> {
        self.check_failure()?;
        let frozen = {
            let mut state = self.state.write();
            let mut source = state.must_resolve(&self.queue, from)?;
            if from == to {
                source.push_out(to, attrs.clone());
                source.push_in(from, attrs);
            } else {
                let mut target = state.must_resolve(&self.queue, to)?;
                source.push_out(to, attrs.clone());
                target.push_in(from, attrs);
                state.memtable.upsert(target);
            }
            state.memtable.upsert(source);
            self.maybe_freeze(&mut state)
        };
        self.dispatch(frozen)
    }

    /// Remove the first edge `from -> to` whose attributes equal `attrs`.
    pub fn unlink(&self, from: NodeId, to: NodeId, attrs: &Attrs) -> Result<()> {
        self.check_failure()?;
        let frozen = {
            let mut state = self.state.write();
            let mut source = state.must_resolve(&self.queue, from)?;
            let missing = || GraphError::EdgeNotFound { from, to };
            if from == to {
                if !(source.remove_out(to, attrs) && source.remove_in(from, attrs)) {
                    return Err(missing());
                }
            } else {
                let mut target = state.must_resolve(&self.queue, to)?;
                if !(source.remove_out(to, attrs) && target.remove_in(from, attrs)) {
                    return Err(missing());
                }
                state.memtable.upsert(target);
            }
            state.memtable.upsert(source);
            self.maybe_freeze(&mut state)
        };
        self.dispatch(frozen)
    }

    /// Tombstone `id` and strip every edge referencing it from its
    /// neighbours, all in one critical section.
    pub fn remove(&self, id: NodeId) -> Result<()> {
        self.check_failure()?;
        let frozen = {
            let mut state = self.state.write();
            let record = state.must_resolve(&self.queue, id)?;
            let neighbours: BTreeSet<NodeId> =
                record.neighbours().filter(|&other| other != id).collect();

            // Nothing is written until every neighbour has resolved.
            let mut stripped = Vec::with_capacity(neighbours.len());
            for other in neighbours {
                match state.resolve(&self.queue, other)? {
                    Some(mut neighbour) => {
                        neighbour.strip_links_to(id);
                        stripped.push(neighbour);
                    }
                    None => warn!(id, neighbour = other, "dangling edge to missing node"),
                }
            }
            for neighbour in stripped {
                state.memtable.upsert(neighbour);
            }
            state.memtable.tombstone(id);
            self.maybe_freeze(&mut state)
        };
        self.dispatch(frozen)
    }

    pub fn set_attr(&self, id: NodeId, key: &str, value: Value) -> Result<()> {
        self.check_failure()?;
        let frozen = {
            let mut state = self.state.write();
            let mut record = state.must_resolve(&self.queue, id)?;
            record.attrs.insert(key.to_string(), value);
            state.memtable.upsert(record);
            self.maybe_freeze(&mut state)
        };
        self.dispatch(frozen)
    }

    // -- Reads ----------------------------------------------------------------

    /// Current state of `id` with labels resolved to strings.
    pub fn node(&self, id: NodeId) -> Result<Node> {
        let state = self.state.read();
        let record = state.must_resolve(&self.queue, id)?;
        let labels = record
            .labels
            .iter()
            .filter_map(|&label| state.labels.resolve(label).map(str::to_string))
            .collect();
        Ok(Node {
            id: record.id,
            labels,
            attrs: record.attrs,
            links_out: record.links_out,
            links_in: record.links_in,
        })
    }

    pub fn stats(&self) -> StorageStats {
        let state = self.state.read();
        StorageStats {
            memtable_entries: state.memtable.len(),
            pending_flushes: self.queue.len(),
            segments: state.segments.len(),
            segment_bytes: state.segments.iter().map(|s| s.byte_size() as u64).sum(),
            labels: state.labels.len(),
            next_node_id: state.next_node_id,
        }
    }

    // -- Freeze & Flush -------------------------------------------------------

    /// Freeze the live memtable (if non-empty) and hand it to a worker.
    pub fn freeze(&self) -> Result<()> {
        let frozen = {
            let mut state = self.state.write();
            self.freeze_locked(&mut state)
        };
        self.dispatch(frozen)
    }

    /// Block until every frozen snapshot has been registered as a segment.
    pub fn wait_for_flushes(&self) -> Result<()> {
        self.queue.wait_drained(|| self.failure.lock().is_some());
        self.check_failure()
    }

    /// Freeze what is left and close the worker channel. Workers exit once
    /// the channel is drained; the caller joins them.
    pub(crate) fn close_dispatch(&self) -> Result<()> {
        let result = self.freeze();
        let sender = self.dispatch.lock().take();
        drop(sender);
        result
    }

    fn maybe_freeze(&self, state: &mut EngineState) -> Option<Arc<FrozenMemtable>> {
        if state.memtable.len() >= self.config.persist_threshold {
            self.freeze_locked(state)
        } else {
            None
        }
    }

    fn freeze_locked(&self, state: &mut EngineState) -> Option<Arc<FrozenMemtable>> {
        if state.memtable.is_empty() {
            return None;
        }
        let created = now_nanos().max(state.last_created + 1);
        state.last_created = created;
        let seq = state.next_seq;
        state.next_seq += 1;

        let frozen = Arc::new(FrozenMemtable {
            seq,
            created,
            labels: state.labels.names().to_vec(),
            memtable: std::mem::take(&mut state.memtable),
        });
        self.queue.push(Arc::clone(&frozen));
        debug!(seq, entries = frozen.memtable.len(), "memtable frozen");
        Some(frozen)
    }

    /// Send a snapshot to the workers. Must be called without the state
    /// lock: the send blocks until a worker is free.
    fn dispatch(&self, frozen: Option<Arc<FrozenMemtable>>) -> Result<()> {
        let Some(frozen) = frozen else {
            return Ok(());
        };
        let sender = self.dispatch.lock().clone().ok_or(GraphError::NotStarted)?;
        sender.send(frozen).map_err(|_| GraphError::WorkerPanicked)
    }

    /// Called by a worker once a segment is durable.
    pub(crate) fn register_segment(&self, seq: u64, table: Nodetable) {
        let mut state = self.state.write();
        info!(
            segment = table.name(),
            seq,
            records = table.record_count(),
            "segment registered"
        );
        state.segments.push(Arc::new(table));
        state
            .segments
            .sort_by(|a, b| b.created().cmp(&a.created()));
        self.queue.remove(seq);
    }

    pub(crate) fn record_failure(&self, message: String) {
        self.failure.lock().get_or_insert(message);
        self.queue.notify();
    }

    pub(crate) fn check_failure(&self) -> Result<()> {
        match self.failure.lock().as_ref() {
            Some(message) => Err(GraphError::FlushFailed(message.clone())),
            None => Ok(()),
        }
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn ensure_dir(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(GraphError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} exists and is not a directory", path.display()),
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(path)?;
            Ok(())
        }
        Err(e) => Err(GraphError::Io(e)),
    }
}

/// Open every `*.nt` file in `dir`, newest first.
fn load_segments(dir: &Path) -> Result<Vec<Arc<Nodetable>>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |ext| ext == SEGMENT_EXTENSION) && path.is_file() {
            segments.push(Arc::new(Nodetable::open(&path)?));
        }
    }
    segments.sort_by(|a, b| b.created().cmp(&a.created()));
    Ok(segments)
}

/// Non-empty segments whose dictionary was lost and that are newer than
/// every surviving dictionary. Labels interned in between are unknown.
fn lost_label_dictionaries(segments: &[Arc<Nodetable>]) -> Vec<&str> {
    let newest_dictionary = segments
        .iter()
        .filter(|s| !s.labels().is_empty())
        .map(|s| s.created())
        .max();
    segments
        .iter()
        .filter(|s| s.index_rebuilt() && s.max_node_id() > 0)
        .filter(|s| newest_dictionary.map_or(true, |created| s.created() > created))
        .map(|s| s.name())
        .collect()
}
