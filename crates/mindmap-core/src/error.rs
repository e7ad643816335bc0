//! Error types for Mindmap operations.
//!
//! Capacity exhaustion, timeouts and stale cache entries are handled
//! internally and never show up here.

use thiserror::Error;

use crate::types::{EdgeId, NodeId};

/// Result type for Mindmap operations.
pub type Result<T> = std::result::Result<T, MindmapError>;

/// Errors that can occur during Mindmap operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MindmapError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("temporal error: {0}")]
    Temporal(#[from] TemporalError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Referential and bounds errors raised by the graph store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("node already exists: {0}")]
    DuplicateNode(NodeId),

    #[error("edge already exists: {0}")]
    DuplicateEdge(EdgeId),

    /// An edge names an endpoint that is not in the graph.
    #[error("edge {edge} references unknown node {node}")]
    DanglingReference { edge: EdgeId, node: NodeId },

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("edge not found: {0}")]
    EdgeNotFound(EdgeId),

    #[error("invalid weight {0} (must be finite and >= 0.0)")]
    InvalidWeight(f64),

    #[error("invalid confidence {0} (must be 0.0-1.0)")]
    InvalidConfidence(f64),
}

/// Malformed caller input, rejected before any work is done.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} out of range: {value} (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("malformed options: {0}")]
    Malformed(String),
}

impl ValidationError {
    pub fn out_of_range(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        ValidationError::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Errors from the bi-temporal layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemporalError {
    #[error("edge is not tracked: {0}")]
    NotTracked(EdgeId),

    #[error("edge already tracked: {0}")]
    AlreadyTracked(EdgeId),

    /// The requested interval would end before it starts.
    #[error("invalid interval for {edge}: end {end} precedes start {start}")]
    InvalidInterval {
        edge: EdgeId,
        start: String,
        end: String,
    },

    #[error("context window not open: {0}")]
    WindowNotOpen(String),

    #[error("context window already open: {0}")]
    WindowAlreadyOpen(String),
}

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} out of range: {value} (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn out_of_range(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Snapshot save/load errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistenceError {
    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error("snapshot corrupt: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

impl From<std::io::Error> for MindmapError {
    fn from(e: std::io::Error) -> Self {
        MindmapError::Persistence(PersistenceError::Io(e.to_string()))
    }
}

impl From<serde_json::Error> for MindmapError {
    fn from(e: serde_json::Error) -> Self {
        MindmapError::Persistence(PersistenceError::Serialization(e.to_string()))
    }
}
