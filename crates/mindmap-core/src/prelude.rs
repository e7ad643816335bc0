//! Mindmap Core Prelude: convenient imports for common usage.
//!
//! ```rust
//! use mindmap_core::prelude::*;
//! ```

pub use crate::types::{
    NodeId, EdgeId,
    Node, NodeType,
    Edge, EdgeType, EdgeUpdate,
    Neighbor, Direction,
    UpsertOutcome, Provenance,
    Metadata, Timestamp,
};

pub use crate::context::{QueryContext, TaskOutcome, OutcomeKind};

pub use crate::store::GraphStore;

pub use crate::clock::{Clock, SystemClock, ManualClock};

pub use crate::cancel::CancellationFlag;

pub use crate::error::{
    MindmapError, Result,
    GraphError, ValidationError, TemporalError, ConfigError, PersistenceError,
};
