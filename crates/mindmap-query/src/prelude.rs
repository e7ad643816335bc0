//! Mindmap Query Prelude: convenient imports for common usage.
//!
//! ```rust
//! use mindmap_query::prelude::*;
//! ```

// Engine and service
pub use crate::engine::{MindmapEngine, OutcomeReport, RestoreReport, Subsystem};
pub use crate::service::{QueryService, ServiceError};
pub use crate::config::{EngineConfig, PipelineConfig, ServiceConfig};

// Queries
pub use crate::options::{ActivationOptions, QueryOptions, StageBypass};
pub use crate::response::{EdgeHistory, QueryResponse, RankedNode, Stage, StageFailure};

// Cache and statistics
pub use crate::cache::{CacheConfig, CacheStats, QueryCache};
pub use crate::introspection::{EngineStats, GraphStats};

pub use mindmap_runtime::prelude::*;
