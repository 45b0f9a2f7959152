//! Label interner: label string <-> compact u16 id.
//!
//! Ids are handed out sequentially starting at 1 and are never reused
//! or reassigned. The ordered name list doubles as the on-disk label
//! dictionary stored in every segment.

use std::collections::HashMap;

use crate::error::{GraphError, Result};

pub type LabelId = u16;

/// Maximum number of distinct labels per store.
pub const MAX_LABELS: usize = u16::MAX as usize;

#[derive(Debug, Default, Clone)]
pub struct LabelInterner {
    /// `names[i]` is the label with id `i + 1`.
    names: Vec<String>,
    index: HashMap<String, LabelId>,
}

impl LabelInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an interner from a persisted dictionary.
    pub fn from_names(names: Vec<String>) -> Result<Self> {
        if names.len() > MAX_LABELS {
            return Err(GraphError::CapacityExceeded(MAX_LABELS));
        }
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), (i + 1) as LabelId).is_some() {
                return Err(GraphError::InvalidFormat(format!(
                    "duplicate label in dictionary: {}",
                    name
                )));
            }
        }
        Ok(Self { names, index })
    }

    /// Return the id for `label`, allocating the next one if unseen.
    ///
    /// Caller must hold the engine's exclusive lock.
    pub fn intern(&mut self, label: &str) -> Result<LabelId> {
        if let Some(&id) = self.index.get(label) {
            return Ok(id);
        }
        if self.names.len() >= MAX_LABELS {
            return Err(GraphError::CapacityExceeded(MAX_LABELS));
        }
        self.names.push(label.to_string());
        let id = self.names.len() as LabelId;
        self.index.insert(label.to_string(), id);
        Ok(id)
    }

    pub fn lookup(&self, label: &str) -> Option<LabelId> {
        self.index.get(label).copied()
    }

    pub fn resolve(&self, id: LabelId) -> Option<&str> {
        if id == 0 {
            return None;
        }
        self.names.get(id as usize - 1).map(String::as_str)
    }

    /// Ordered dictionary, position `i` holding label id `i + 1`.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
