//! # Mindmap Core
//!
//! Core types and traits for the Mindmap code knowledge graph.
//!
//! This crate defines the vocabulary shared by every other crate:
//!
//! - **Nodes**: files, directories, functions, classes, errors, patterns,
//!   episodic memories and call patterns
//! - **Edges**: typed, weighted relations with a confidence score
//! - **GraphStore**: the trait behind which the authoritative graph lives
//! - **QueryContext / TaskOutcome**: what callers send in besides text
//! - **Clock**: injectable time so decay and expiry stay testable
//!
//! ## Quick Start
//!
//! ```rust
//! use mindmap_core::prelude::*;
//!
//! let node = Node::new("src/lib.rs", NodeType::File, "lib.rs")
//!     .with_path("src/lib.rs")
//!     .with_confidence(0.9);
//! assert_eq!(node.id, NodeId::from("src/lib.rs"));
//! ```

pub mod types;
pub mod context;
pub mod store;
pub mod error;
pub mod clock;
pub mod cancel;
pub mod text;
pub mod prelude;
