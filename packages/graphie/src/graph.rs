//! Graph handle and label groups: a thin façade over one started driver.

use std::path::Path;

use crate::error::Result;
use crate::registry::DriverRegistry;
use crate::storage::GraphStorage;
use crate::types::{Attrs, Link, Node, NodeId, Value};

/// An open graph database.
pub struct Graph {
    name: String,
    driver: String,
    storage: Box<dyn GraphStorage>,
}

impl Graph {
    /// Create the driver `driver` from `registry` and start it on
    /// `location/db_name`.
    pub fn open(
        registry: &DriverRegistry,
        driver: &str,
        location: impl AsRef<Path>,
        db_name: &str,
    ) -> Result<Self> {
        let mut storage = registry.create(driver)?;
        storage.start(location.as_ref(), db_name)?;
        Ok(Self {
            name: db_name.to_string(),
            driver: driver.to_string(),
            storage,
        })
    }

    /// Stop the driver, persisting everything still in memory.
    pub fn close(mut self) -> Result<()> {
        self.storage.stop()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn storage(&self) -> &dyn GraphStorage {
        self.storage.as_ref()
    }

    /// Group of labels applied to every node created through it.
    pub fn labels(&self, labels: &[&str]) -> LabelGroup<'_> {
        LabelGroup {
            graph: self,
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn link(&self, from: NodeId, to: NodeId, attrs: Attrs) -> Result<()> {
        self.storage.link(from, to, attrs)
    }

    pub fn unlink(&self, from: NodeId, to: NodeId, attrs: &Attrs) -> Result<()> {
        self.storage.unlink(from, to, attrs)
    }

    pub fn remove(&self, id: NodeId) -> Result<()> {
        self.storage.remove(id)
    }

    pub fn node(&self, id: NodeId) -> Result<Node> {
        self.storage.node(id)
    }

    pub fn links_out(&self, id: NodeId) -> Result<Vec<Link>> {
        self.storage.links_out(id)
    }

    pub fn links_in(&self, id: NodeId) -> Result<Vec<Link>> {
        self.storage.links_in(id)
    }

    pub fn set_attr(&self, id: NodeId, key: &str, value: impl Into<Value>) -> Result<()> {
        self.storage.set_attr(id, key, value.into())
    }

    pub fn get_attr(&self, id: NodeId, key: &str) -> Result<Option<Value>> {
        self.storage.get_attr(id, key)
    }

    pub fn has_attr(&self, id: NodeId, key: &str) -> Result<bool> {
        self.storage.has_attr(id, key)
    }

    pub fn attrs(&self, id: NodeId) -> Result<Attrs> {
        self.storage.attrs(id)
    }
}

/// A fixed label set bound to a graph.
pub struct LabelGroup<'g> {
    graph: &'g Graph,
    labels: Vec<String>,
}

impl LabelGroup<'_> {
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn label_refs(&self) -> Vec<&str> {
        self.labels.iter().map(String::as_str).collect()
    }

    pub fn add(&self, attrs: Attrs) -> Result<NodeId> {
        self.graph.storage.add(&self.label_refs(), attrs)
    }

    /// Like [`LabelGroup::add`], panicking on error.
    pub fn must_add(&self, attrs: Attrs) -> NodeId {
        match self.add(attrs) {
            Ok(id) => id,
            Err(e) => panic!("failed to add node with labels {:?}: {}", self.labels, e),
        }
    }

    pub fn merge(&self, attrs: Attrs) -> Result<NodeId> {
        self.graph.storage.merge(&self.label_refs(), attrs)
    }

    pub fn ensure_index_nodes(&self, attr: &str) -> Result<()> {
        self.graph.storage.ensure_index_nodes(&self.label_refs(), attr)
    }

    pub fn ensure_index_links(&self, attr: &str) -> Result<()> {
        self.graph.storage.ensure_index_links(&self.label_refs(), attr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use crate::error::GraphError;
    use crate::happy::HappyConfig;
    use tempfile::TempDir;

    fn registry() -> DriverRegistry {
        DriverRegistry::with_defaults(HappyConfig {
            persist_threshold: 16,
            flush_workers: 1,
            bloom_bits: 4096,
            ..HappyConfig::default()
        })
    }

    #[test]
    fn test_open_unknown_driver() {
        let dir = TempDir::new().unwrap();
        let err = Graph::open(&registry(), "memory", dir.path(), "db").err().unwrap();
        assert!(matches!(err, GraphError::DriverNotFound(_)));
    }

    #[test]
    fn test_label_group_roundtrip() {
        let dir = TempDir::new().unwrap();
        let graph = Graph::open(&registry(), "happy", dir.path(), "db").unwrap();
        assert_eq!(graph.name(), "db");
        assert_eq!(graph.driver(), "happy");
        assert!(dir.path().join("db").is_dir());

        let person = graph.labels(&["person", "human"]);
        let ada = person.must_add(attrs! { "name" => "Ada" });
        let node = graph.node(ada).unwrap();
        assert_eq!(node.labels, vec!["person".to_string(), "human".to_string()]);

        graph.set_attr(ada, "born", 1815).unwrap();
        assert_eq!(graph.get_attr(ada, "born").unwrap(), Some(Value::Int(1815)));
        person.ensure_index_nodes("name").unwrap();
        graph.close().unwrap();
    }

    #[test]
    #[should_panic(expected = "failed to add node")]
    fn test_must_add_panics_when_stopped() {
        let dir = TempDir::new().unwrap();
        let mut graph = Graph::open(&registry(), "happy", dir.path(), "db").unwrap();
        graph.storage.stop().unwrap();
        graph.labels(&["x"]).must_add(attrs! {});
    }
}
