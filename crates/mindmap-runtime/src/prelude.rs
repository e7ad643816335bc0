//! Mindmap Runtime Prelude: convenient imports for common usage.
//!
//! ```rust
//! use mindmap_runtime::prelude::*;
//! ```

// Graph store
pub use crate::graph_store::PetGraphStore;

// Temporal layer
pub use crate::temporal::{
    TemporalLayer, TemporalConfig, TemporalEdge, ValidTime, Revision,
    ContextWindow, ChangeEvent, ChangeKind, BiTemporalStats,
};

// Context and activation
pub use crate::context_hierarchy::{ContextHierarchy, ContextLevel, ContextProfile, HierarchyConfig};
pub use crate::activation::{
    ActivationEngine, ActivationConfig, ActivationResult,
    AssociationSource, NoAssociations, SpreadRequest,
};

// Learning
pub use crate::hebbian::{HebbianLearner, HebbianConfig, HebbianConnection, HebbianStats, HebbianTable};
pub use crate::inhibitory::{
    InhibitoryLearner, InhibitoryConfig, InhibitoryPattern, InhibitoryStats,
    InhibitoryTable, FailureSignature,
};

// Attention, fusion, prediction
pub use crate::attention::{AttentionAllocator, AttentionConfig, AttentionFactors, AttentionType, AttentionStats};
pub use crate::fusion::{ConfidenceFusion, FusionConfig, FusionResult, FusionStats, Modality, MultiModalConfidence};
pub use crate::prediction::{
    PatternPredictionEngine, PredictionConfig, PatternPrediction, PatternType, PredictionStats,
};

// Ingestion and persistence
pub use crate::ingest::{
    IngestBatch, IngestConfig, IngestReport, IngestScheduler, IngestSink,
    NodeRecord, EdgeRecord,
};
pub use crate::session::{EngineSnapshot, SnapshotBackend, SnapshotStore, LearnedState};

#[cfg(feature = "sqlite")]
pub use crate::sqlite_snapshot::SqliteSnapshotStore;

pub use mindmap_core::prelude::*;
