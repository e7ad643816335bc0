//! # Mindmap Query
//!
//! The query side of the Mindmap code knowledge graph.
//!
//! A [`MindmapEngine`](engine::MindmapEngine) owns the graph and every
//! learner, each behind its own lock. Queries run through a fixed
//! pipeline (cache check, context resolution, spreading activation,
//! inhibition, attention, fusion, ranking) and feed the Hebbian table on
//! the way out. Outcomes reported back teach the learners; graph mutations
//! invalidate the cache.
//!
//! ## Quick Start
//!
//! ```rust
//! use mindmap_query::prelude::*;
//!
//! let engine = MindmapEngine::new(EngineConfig::default()).unwrap();
//! engine.add_node(Node::new("src/auth.rs", NodeType::File, "auth.rs")).unwrap();
//! engine.add_node(Node::new("login", NodeType::Function, "login")).unwrap();
//! engine.add_edge(Edge::new("src/auth.rs", "login", EdgeType::Contains)).unwrap();
//!
//! let response = engine.query("auth", &QueryOptions::default()).unwrap();
//! assert_eq!(response.nodes[0].node.id, NodeId::from("src/auth.rs"));
//! ```

pub mod options;
pub mod cache;
pub mod config;
pub mod response;
pub mod pipeline;
pub mod engine;
pub mod introspection;
pub mod service;
pub mod prelude;
