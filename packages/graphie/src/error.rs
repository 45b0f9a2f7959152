//! Error types for graphie storage drivers

use thiserror::Error;

use crate::types::NodeId;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NotFound(NodeId),

    #[error("Edge not found: {from} -> {to}")]
    EdgeNotFound { from: NodeId, to: NodeId },

    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Label capacity exceeded (max {0} labels per store)")]
    CapacityExceeded(usize),

    #[error("Invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Record encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Record decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage has not been started")]
    NotStarted,

    #[error("Storage is already started")]
    AlreadyStarted,

    #[error("Flush failed, snapshot kept in memory: {0}")]
    FlushFailed(String),

    #[error("Flush worker panicked")]
    WorkerPanicked,
}
