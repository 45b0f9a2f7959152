//! DriverRegistry - named storage driver constructors
//!
//! A registry is an ordinary value: build one, register the drivers the
//! application wants, and pass it to [`crate::Graph::open`].
//!
//! ```no_run
//! use graphie::{DriverRegistry, Graph, HappyConfig};
//!
//! let registry = DriverRegistry::with_defaults(HappyConfig::default());
//! let graph = Graph::open(&registry, "happy", "/data", "people").unwrap();
//! graph.close().unwrap();
//! ```

use std::collections::HashMap;

use crate::error::{GraphError, Result};
use crate::happy::{HappyConfig, HappyStorage};
use crate::storage::GraphStorage;

/// Builds a fresh, unstarted driver.
pub type DriverFactory = Box<dyn Fn() -> Box<dyn GraphStorage> + Send + Sync>;

#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `"happy"` driver using `config`.
    pub fn with_defaults(config: HappyConfig) -> Self {
        let mut registry = Self::new();
        registry.register("happy", move || {
            Box::new(HappyStorage::new(config.clone())) as Box<dyn GraphStorage>
        });
        registry
    }

    /// Register (or replace) a driver under `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn GraphStorage> + Send + Sync + 'static,
    {
        self.drivers.insert(name.to_string(), Box::new(factory));
    }

    /// Construct an unstarted driver.
    pub fn create(&self, name: &str) -> Result<Box<dyn GraphStorage>> {
        self.drivers
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| GraphError::DriverNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// Registered driver names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_register_happy() {
        let registry = DriverRegistry::with_defaults(HappyConfig::default());
        assert!(registry.contains("happy"));
        assert_eq!(registry.names(), vec!["happy"]);
        assert!(registry.create("happy").is_ok());
    }

    #[test]
    fn test_unknown_driver() {
        let registry = DriverRegistry::new();
        match registry.create("memory") {
            Err(GraphError::DriverNotFound(name)) => assert_eq!(name, "memory"),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected DriverNotFound"),
        }
    }

    #[test]
    fn test_register_custom_name() {
        let mut registry = DriverRegistry::new();
        registry.register("fast", || Box::new(HappyStorage::new(HappyConfig::default())));
        assert_eq!(registry.names(), vec!["fast"]);
    }
}
