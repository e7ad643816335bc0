//! # Mindmap Runtime
//!
//! Stores and learners behind the query engine.
//!
//! The graph store owns nodes and edges; everything else holds ids and
//! learns from how the graph is used: the temporal layer tracks when
//! relations held, activation spreads relevance, Hebbian and inhibitory
//! learners turn outcomes into associations and suppressions, and the
//! prediction engine watches the change log for emerging patterns.

pub mod graph_store;
pub mod temporal;
pub mod context_hierarchy;
pub mod activation;
pub mod hebbian;
pub mod inhibitory;
pub mod attention;
pub mod fusion;
pub mod prediction;
pub mod ingest;
pub mod session;
pub mod sqlite_snapshot;
pub mod prelude;
