//! Graphie: pluggable directed attributed-graph storage.
//!
//! A [`Graph`] wraps one started [`GraphStorage`] driver created from a
//! [`DriverRegistry`]. The built-in driver is [`happy`], a log-structured
//! engine built for write throughput.

pub mod error;
pub mod graph;
pub mod happy;
pub mod registry;
pub mod storage;
pub mod types;

pub use error::{GraphError, Result};
pub use graph::{Graph, LabelGroup};
pub use happy::{HappyConfig, HappyStorage, StorageStats};
pub use registry::{DriverFactory, DriverRegistry};
pub use storage::GraphStorage;
pub use types::{Attrs, Link, Node, NodeId, Value};
