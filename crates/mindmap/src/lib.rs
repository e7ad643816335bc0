//! # Mindmap
//!
//! Adaptive, time-aware knowledge graph of a codebase.
//!
//! Extractors describe files, functions, classes and their relations; the
//! engine stores them in a graph, remembers when each relation held, and
//! answers relevance queries with spreading activation. Reported task
//! outcomes teach it which code belongs together (Hebbian associations)
//! and which code misleads in a given situation (inhibitory patterns).
//!
//! ## Quick Start
//!
//! ```rust
//! use mindmap::prelude::*;
//!
//! let engine = MindmapEngine::new(EngineConfig::default().with_project("shop")).unwrap();
//!
//! let batch = IngestBatch::new("src/cart.rs", "rust")
//!     .with_node(NodeRecord::new("src/cart.rs", NodeType::File, "cart.rs").with_path("src/cart.rs"))
//!     .with_node(NodeRecord::new("add_item", NodeType::Function, "add_item"))
//!     .with_edge(EdgeRecord::new("src/cart.rs", "add_item", EdgeType::Contains));
//! let report = engine.ingest_batch(batch);
//! assert_eq!(report.nodes_inserted, 2);
//!
//! let context = QueryContext::new().with_task("fix cart totals");
//! let response = engine
//!     .query("cart", &QueryOptions::new().with_context(context.clone()))
//!     .unwrap();
//! assert_eq!(response.nodes[0].node.id, NodeId::from("src/cart.rs"));
//!
//! // Tell the engine how the task went
//! let outcome = TaskOutcome::success("fix cart totals")
//!     .with_file("src/cart.rs")
//!     .with_file("add_item");
//! engine.report_outcome(&outcome, Some(&context));
//! assert_eq!(engine.get_hebbian_stats().total_connections, 1);
//! ```
//!
//! ## Architecture
//!
//! - [`mindmap_core`] - Shared types, the `GraphStore` trait, errors, clock
//! - [`mindmap_runtime`] - Graph store, temporal layer, activation, learners, ingestion, snapshots
//! - [`mindmap_query`] - Cache, query pipeline, engine, async service, statistics
//!
//! ## Query Pipeline
//!
//! | Stage | What It Does |
//! |-------|--------------|
//! | CACHE_CHECK | Serve a still-valid result for a similar context |
//! | CONTEXT_RESOLVE | Merge session, task and request context layers |
//! | ACTIVATION_SPREAD | Spread relevance from matching seeds along valid edges |
//! | INHIBITION_APPLY | Suppress nodes tied to past failures in this context |
//! | ATTENTION_WEIGHT | Weight candidates by five relevance factors |
//! | FUSION | Fuse per-modality confidence into one calibrated value |
//! | RANK_LIMIT | Filter, sort and truncate |
//! | HEBBIAN_RECORD | Strengthen associations among returned nodes |
//!
//! A query that runs out of time or is cancelled skips ahead to ranking
//! and comes back flagged `partial`.
//!
//! ## Persistence
//!
//! ```rust,ignore
//! use mindmap::prelude::*;
//!
//! let store = SnapshotStore::new(".mindmap/snapshots");
//! engine.save(&store)?;
//!
//! let restored = MindmapEngine::new(EngineConfig::default().with_project("shop"))?;
//! let report = restored.load(&store)?;
//! ```

// Re-export all subcrates
pub use mindmap_core as core;
pub use mindmap_runtime as runtime;
pub use mindmap_query as query;

/// Prelude module for convenient imports.
///
/// ```rust
/// use mindmap::prelude::*;
/// ```
pub mod prelude {
    pub use mindmap_query::prelude::*;

    // Persistence details not in the query prelude
    pub use mindmap_runtime::session::SnapshotMetadata;
    pub use mindmap_runtime::ingest::IngestFailure;
}
