//! The storage driver contract shared by every backend.

use std::path::Path;

use crate::error::Result;
use crate::types::{Attrs, Link, Node, NodeId, Value};

/// Directed attributed-graph storage driver.
///
/// Send + Sync so a started driver can be shared across writer threads.
/// Mutations take `&self`: drivers synchronize internally.
pub trait GraphStorage: Send + Sync {
    // === LIFECYCLE ===

    /// Open or create the database `db_name` under `location`.
    fn start(&mut self, location: &Path, db_name: &str) -> Result<()>;

    /// Persist everything still in memory and release the database.
    /// Idempotent.
    fn stop(&mut self) -> Result<()>;

    // === INDEX HINTS ===

    fn ensure_index_nodes(&self, labels: &[&str], attr: &str) -> Result<()>;

    fn ensure_index_links(&self, labels: &[&str], attr: &str) -> Result<()>;

    // === NODE OPERATIONS ===

    /// Create a node; returns its freshly assigned id.
    fn add(&self, labels: &[&str], attrs: Attrs) -> Result<NodeId>;

    /// Find-or-create a node with these labels and attributes.
    fn merge(&self, labels: &[&str], attrs: Attrs) -> Result<NodeId>;

    /// Delete a node together with every edge touching it.
    fn remove(&self, id: NodeId) -> Result<()>;

    /// Current state of a node, as an independent copy.
    fn node(&self, id: NodeId) -> Result<Node>;

    // === LINK OPERATIONS ===

    fn link(&self, from: NodeId, to: NodeId, attrs: Attrs) -> Result<()>;

    /// Remove one edge `from -> to` whose attributes equal `attrs`.
    fn unlink(&self, from: NodeId, to: NodeId, attrs: &Attrs) -> Result<()>;

    fn links_out(&self, id: NodeId) -> Result<Vec<Link>> {
        Ok(self.node(id)?.links_out)
    }

    fn links_in(&self, id: NodeId) -> Result<Vec<Link>> {
        Ok(self.node(id)?.links_in)
    }

    // === ATTRIBUTES ===

    fn set_attr(&self, id: NodeId, key: &str, value: Value) -> Result<()>;

    fn get_attr(&self, id: NodeId, key: &str) -> Result<Option<Value>> {
        Ok(self.node(id)?.attrs.remove(key))
    }

    fn has_attr(&self, id: NodeId, key: &str) -> Result<bool> {
        Ok(self.node(id)?.attrs.contains_key(key))
    }

    fn attrs(&self, id: NodeId) -> Result<Attrs> {
        Ok(self.node(id)?.attrs)
    }
}
