//! CLI command implementations.

pub mod init;
pub mod ingest;
pub mod query;
pub mod outcome;
pub mod stats;
pub mod predict;
pub mod export;
