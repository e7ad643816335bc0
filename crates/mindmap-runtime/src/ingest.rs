//! Batched, provenance-tagged ingestion of extractor output.
//!
//! Extractors hand over an [`IngestBatch`] per source file. Every item is
//! an idempotent upsert, so re-sending an unchanged file is a no-op. Items
//! that fail (an edge to a node that does not exist, a weight out of
//! bounds) are reported and skipped; the rest of the batch goes through.
//!
//! [`IngestScheduler`] spreads large submissions over a few tokio workers:
//! node chunks first, then edge chunks, so edges find their endpoints.
//! Chunks whose edges still dangle are retried with a linear backoff in
//! case a concurrent submission is adding the missing nodes.

use mindmap_core::cancel::CancellationFlag;
use mindmap_core::error::{GraphError, ValidationError};
use mindmap_core::store::GraphStore;
use mindmap_core::types::{Edge, EdgeId, EdgeType, Metadata, Node, NodeId, NodeType, Provenance, Timestamp, UpsertOutcome};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const SOURCE_FILE_KEY: &str = "source_file";
pub const LANGUAGE_KEY: &str = "language";

fn default_one() -> f64 {
    1.0
}

/// A node as extractors describe it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub node_type: NodeType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default = "default_one")]
    pub confidence: f64,
}

impl NodeRecord {
    pub fn new(id: impl Into<NodeId>, node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type,
            name: name.into(),
            path: None,
            metadata: Metadata::new(),
            confidence: 1.0,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    fn into_node(self, provenance: &Provenance, now: Timestamp) -> Node {
        let mut node = Node {
            id: self.id,
            node_type: self.node_type,
            name: self.name,
            path: self.path,
            metadata: self.metadata,
            confidence: self.confidence,
            last_updated: now,
        };
        stamp(&mut node.metadata, provenance);
        node
    }
}

/// An edge as extractors describe it. The id defaults to the derived form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EdgeId>,
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,
    #[serde(default = "default_one")]
    pub weight: f64,
    #[serde(default = "default_one")]
    pub confidence: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl EdgeRecord {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>, edge_type: EdgeType) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            edge_type,
            weight: 1.0,
            confidence: 1.0,
            metadata: Metadata::new(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    fn into_edge(self, provenance: &Provenance) -> Edge {
        let mut edge = Edge::new(self.source, self.target, self.edge_type)
            .with_weight(self.weight)
            .with_confidence(self.confidence);
        if let Some(id) = self.id {
            edge.id = id;
        }
        edge.metadata = self.metadata;
        stamp(&mut edge.metadata, provenance);
        edge
    }
}

fn stamp(metadata: &mut Metadata, provenance: &Provenance) {
    if !provenance.file.is_empty() {
        metadata.insert(SOURCE_FILE_KEY.to_string(), provenance.file.clone());
    }
    if !provenance.language.is_empty() {
        metadata.insert(LANGUAGE_KEY.to_string(), provenance.language.clone());
    }
}

/// Extractor output for one source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestBatch {
    pub provenance: Provenance,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
}

impl IngestBatch {
    pub fn new(file: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            provenance: Provenance {
                file: file.into(),
                language: language.into(),
            },
            ..Self::default()
        }
    }

    pub fn with_node(mut self, node: NodeRecord) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: EdgeRecord) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse one batch, or a JSON array of batches.
    pub fn parse_many(json: &str) -> Result<Vec<IngestBatch>, ValidationError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        if value.is_array() {
            serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))
        } else {
            serde_json::from_value(value)
                .map(|b| vec![b])
                .map_err(|e| ValidationError::Malformed(e.to_string()))
        }
    }

    /// Materialise stamped nodes and edges.
    pub fn into_items(self, now: Timestamp) -> (Vec<Node>, Vec<Edge>) {
        let provenance = self.provenance;
        let nodes = self.nodes.into_iter().map(|n| n.into_node(&provenance, now)).collect();
        let edges = self.edges.into_iter().map(|e| e.into_edge(&provenance)).collect();
        (nodes, edges)
    }
}

/// One rejected item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestFailure {
    pub item: String,
    pub error: String,
    #[serde(skip)]
    pub dangling: bool,
}

impl IngestFailure {
    fn new(item: impl Into<String>, error: &GraphError) -> Self {
        Self {
            item: item.into(),
            error: error.to_string(),
            dangling: matches!(error, GraphError::DanglingReference { .. }),
        }
    }
}

/// What an ingestion run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub nodes_inserted: usize,
    pub nodes_updated: usize,
    pub nodes_unchanged: usize,
    pub edges_inserted: usize,
    pub edges_updated: usize,
    pub edges_unchanged: usize,
    pub failures: Vec<IngestFailure>,
    pub chunks: usize,
    pub retries: usize,
    /// Items never attempted because the run was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
}

impl IngestReport {
    fn count_node(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.nodes_inserted += 1,
            UpsertOutcome::Updated => self.nodes_updated += 1,
            UpsertOutcome::Unchanged => self.nodes_unchanged += 1,
        }
    }

    fn count_edge(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.edges_inserted += 1,
            UpsertOutcome::Updated => self.edges_updated += 1,
            UpsertOutcome::Unchanged => self.edges_unchanged += 1,
        }
    }

    pub fn merge(&mut self, other: IngestReport) {
        self.nodes_inserted += other.nodes_inserted;
        self.nodes_updated += other.nodes_updated;
        self.nodes_unchanged += other.nodes_unchanged;
        self.edges_inserted += other.edges_inserted;
        self.edges_updated += other.edges_updated;
        self.edges_unchanged += other.edges_unchanged;
        self.failures.extend(other.failures);
        self.chunks += other.chunks;
        self.retries += other.retries;
        self.skipped += other.skipped;
        self.cancelled |= other.cancelled;
    }

    /// Items that changed the graph.
    pub fn changed(&self) -> usize {
        self.nodes_inserted + self.nodes_updated + self.edges_inserted + self.edges_updated
    }
}

/// Where ingested items go. Implementations do their own locking.
pub trait IngestSink: Send + Sync {
    fn upsert_node(&self, node: Node) -> Result<UpsertOutcome, GraphError>;
    fn upsert_edge(&self, edge: Edge) -> Result<UpsertOutcome, GraphError>;
}

impl<G: GraphStore> IngestSink for RwLock<G> {
    fn upsert_node(&self, node: Node) -> Result<UpsertOutcome, GraphError> {
        self.write().upsert_node(node)
    }

    fn upsert_edge(&self, edge: Edge) -> Result<UpsertOutcome, GraphError> {
        self.write().upsert_edge(edge)
    }
}

/// Apply nodes, then edges, in order. Failures are collected, not raised.
pub fn apply_items(sink: &dyn IngestSink, nodes: Vec<Node>, edges: Vec<Edge>) -> IngestReport {
    let mut report = IngestReport::default();
    for node in nodes {
        let id = node.id.to_string();
        match sink.upsert_node(node) {
            Ok(outcome) => report.count_node(outcome),
            Err(e) => report.failures.push(IngestFailure::new(id, &e)),
        }
    }
    for edge in edges {
        let id = edge.id.to_string();
        match sink.upsert_edge(edge) {
            Ok(outcome) => report.count_edge(outcome),
            Err(e) => report.failures.push(IngestFailure::new(id, &e)),
        }
    }
    report
}

/// Ingest one batch synchronously.
pub fn apply_batch(sink: &dyn IngestSink, batch: IngestBatch, now: Timestamp) -> IngestReport {
    let file = batch.provenance.file.clone();
    let (nodes, edges) = batch.into_items(now);
    let report = apply_items(sink, nodes, edges);
    if !report.failures.is_empty() {
        warn!(file = %file, failures = report.failures.len(), "batch ingested with rejected items");
    }
    report
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Items per chunk (default: 100).
    pub chunk_size: usize,
    /// Chunks processed concurrently (default: 3).
    pub workers: usize,
    /// Retries for chunks with dangling edges (default: 3).
    pub max_retries: usize,
    /// Backoff step; retry `n` waits `n × step` (default: 50 ms).
    pub retry_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            workers: 3,
            max_retries: 3,
            retry_backoff_ms: 50,
        }
    }
}

enum Chunk {
    Nodes(Vec<Node>),
    Edges(Vec<Edge>),
}

impl Chunk {
    fn len(&self) -> usize {
        match self {
            Chunk::Nodes(n) => n.len(),
            Chunk::Edges(e) => e.len(),
        }
    }
}

/// Runs a chunk to completion, retrying edges that still dangle.
async fn run_chunk(sink: Arc<dyn IngestSink>, chunk: Chunk, config: IngestConfig) -> IngestReport {
    match chunk {
        Chunk::Nodes(nodes) => {
            let result = tokio::task::spawn_blocking(move || apply_items(sink.as_ref(), nodes, Vec::new())).await;
            let mut report = result.unwrap_or_else(|e| {
                warn!(error = %e, "ingest worker failed");
                IngestReport::default()
            });
            report.chunks = 1;
            report
        }
        Chunk::Edges(mut pending) => {
            let mut total = IngestReport { chunks: 1, ..IngestReport::default() };
            let mut attempt = 0;
            loop {
                let work = pending.clone();
                let worker_sink = Arc::clone(&sink);
                let result =
                    tokio::task::spawn_blocking(move || apply_items(worker_sink.as_ref(), Vec::new(), work)).await;
                let mut report = match result {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "ingest worker failed");
                        break;
                    }
                };
                let (dangling, fatal): (Vec<IngestFailure>, Vec<IngestFailure>) =
                    std::mem::take(&mut report.failures).into_iter().partition(|f| f.dangling);
                total.merge(IngestReport { chunks: 0, ..report });
                total.failures.extend(fatal);

                if dangling.is_empty() || attempt >= config.max_retries {
                    total.failures.extend(dangling);
                    break;
                }
                attempt += 1;
                total.retries += 1;
                pending.retain(|e| dangling.iter().any(|f| f.item == e.id.as_str()));
                debug!(attempt, remaining = pending.len(), "retrying dangling edges");
                tokio::time::sleep(Duration::from_millis(config.retry_backoff_ms * attempt as u64)).await;
            }
            total
        }
    }
}

/// Spreads ingestion over a bounded set of tokio workers.
#[derive(Debug, Clone, Default)]
pub struct IngestScheduler {
    config: IngestConfig,
    cancel: CancellationFlag,
}

impl IngestScheduler {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Flag that stops scheduling of further chunks once set.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn run_phase(&self, sink: &Arc<dyn IngestSink>, chunks: Vec<Chunk>, report: &mut IngestReport) {
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut running = JoinSet::new();
        let mut queue = chunks.into_iter();

        while let Some(chunk) = queue.next() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                report.skipped += chunk.len() + queue.by_ref().map(|c| c.len()).sum::<usize>();
                break;
            }
            let permit = match Arc::clone(&permits).acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let sink = Arc::clone(sink);
            let config = self.config.clone();
            running.spawn(async move {
                let report = run_chunk(sink, chunk, config).await;
                drop(permit);
                report
            });
        }

        while let Some(done) = running.join_next().await {
            match done {
                Ok(r) => report.merge(r),
                Err(e) => warn!(error = %e, "ingest chunk task failed"),
            }
        }
    }

    /// Ingest `batches` through `sink`. All node chunks land before any
    /// edge chunk starts.
    pub async fn run(&self, sink: Arc<dyn IngestSink>, batches: Vec<IngestBatch>, now: Timestamp) -> IngestReport {
        let size = self.config.chunk_size.max(1);
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for batch in batches {
            let (n, e) = batch.into_items(now);
            nodes.extend(n);
            edges.extend(e);
        }
        let total = nodes.len() + edges.len();

        let node_chunks: Vec<Chunk> = nodes.chunks(size).map(|c| Chunk::Nodes(c.to_vec())).collect();
        let edge_chunks: Vec<Chunk> = edges.chunks(size).map(|c| Chunk::Edges(c.to_vec())).collect();

        let mut report = IngestReport::default();
        self.run_phase(&sink, node_chunks, &mut report).await;
        if report.cancelled {
            report.skipped += edges.len();
        } else {
            self.run_phase(&sink, edge_chunks, &mut report).await;
        }

        info!(
            items = total,
            chunks = report.chunks,
            changed = report.changed(),
            failures = report.failures.len(),
            cancelled = report.cancelled,
            "ingestion finished"
        );
        report
    }
}
