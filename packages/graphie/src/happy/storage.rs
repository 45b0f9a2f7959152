//! `GraphStorage` implementation backed by the happy engine.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, error, info};

use crate::error::{GraphError, Result};
use crate::happy::config::HappyConfig;
use crate::happy::engine::{Engine, StorageStats};
use crate::happy::flush::spawn_workers;
use crate::storage::GraphStorage;
use crate::types::{Attrs, Node, NodeId, Value};

/// Log-structured graph storage driver.
///
/// Created stopped; `start` (or [`HappyStorage::open`]) loads the database
/// directory and launches the flush workers. Dropping a started driver
/// stops it, logging any error.
pub struct HappyStorage {
    config: HappyConfig,
    engine: Option<Arc<Engine>>,
    workers: Vec<JoinHandle<()>>,
}

impl HappyStorage {
    pub fn new(config: HappyConfig) -> Self {
        Self {
            config,
            engine: None,
            workers: Vec::new(),
        }
    }

    /// Start a driver directly on a database directory.
    pub fn open(path: &Path, config: HappyConfig) -> Result<Self> {
        let mut storage = Self::new(config);
        storage.start_at(path)?;
        Ok(storage)
    }

    fn start_at(&mut self, path: &Path) -> Result<()> {
        if self.engine.is_some() {
            return Err(GraphError::AlreadyStarted);
        }
        let (engine, receiver) = Engine::open(path, self.config.clone())?;
        let workers = match spawn_workers(&engine, &receiver, self.config.flush_workers) {
            Ok(workers) => workers,
            Err(e) => {
                // Close the channel so any workers already running exit.
                engine.close_dispatch()?;
                return Err(e);
            }
        };
        info!(
            path = %path.display(),
            workers = workers.len(),
            "happy storage started"
        );
        self.engine = Some(engine);
        self.workers = workers;
        Ok(())
    }

    fn engine(&self) -> Result<&Engine> {
        self.engine.as_deref().ok_or(GraphError::NotStarted)
    }

    pub fn config(&self) -> &HappyConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.engine.is_some()
    }

    /// Freeze the live memtable now instead of waiting for the threshold.
    pub fn freeze(&self) -> Result<()> {
        self.engine()?.freeze()
    }

    /// Block until every frozen memtable is on disk.
    pub fn wait_for_flushes(&self) -> Result<()> {
        self.engine()?.wait_for_flushes()
    }

    pub fn stats(&self) -> Result<StorageStats> {
        Ok(self.engine()?.stats())
    }
}

impl GraphStorage for HappyStorage {
    fn start(&mut self, location: &Path, db_name: &str) -> Result<()> {
        self.start_at(&location.join(db_name))
    }

    fn stop(&mut self) -> Result<()> {
        let Some(engine) = self.engine.take() else {
            return Ok(());
        };
        let closed = engine.close_dispatch();

        let mut panicked = false;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                panicked = true;
            }
        }
        info!(path = %engine.path().display(), "happy storage stopped");

        engine.check_failure()?;
        closed?;
        if panicked {
            return Err(GraphError::WorkerPanicked);
        }
        Ok(())
    }

    fn ensure_index_nodes(&self, labels: &[&str], attr: &str) -> Result<()> {
        self.engine()?;
        debug!(?labels, attr, "node index hint ignored, no secondary indexes");
        Ok(())
    }

    fn ensure_index_links(&self, labels: &[&str], attr: &str) -> Result<()> {
        self.engine()?;
        debug!(?labels, attr, "link index hint ignored, no secondary indexes");
        Ok(())
    }

    fn add(&self, labels: &[&str], attrs: Attrs) -> Result<NodeId> {
        self.engine()?.add(labels, attrs)
    }

    /// Always creates: finding an existing match would need a label and
    /// attribute index the engine does not keep.
    fn merge(&self, labels: &[&str], attrs: Attrs) -> Result<NodeId> {
        self.engine()?.add(labels, attrs)
    }

    fn remove(&self, id: NodeId) -> Result<()> {
        self.engine()?.remove(id)
    }

    fn node(&self, id: NodeId) -> Result<Node> {
        self.engine()?.node(id)
    }

    fn link(&self, from: NodeId, to: NodeId, attrs: Attrs) -> Result<()> {
        self.engine()?.link(from, to, attrs)
    }

    fn unlink(&self, from: NodeId, to: NodeId, attrs: &Attrs) -> Result<()> {
        self.engine()?.unlink(from, to, attrs)
    }

    fn set_attr(&self, id: NodeId, key: &str, value: Value) -> Result<()> {
        self.engine()?.set_attr(id, key, value)
    }
}

impl Drop for HappyStorage {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "happy storage failed to stop cleanly");
        }
    }
}
