//! MindmapEngine: owns every store and runs queries against them.
//!
//! Each store sits behind its own lock. When more than one is needed the
//! order is always graph, temporal, hierarchy, hebbian, inhibitory,
//! attention, fusion, cache, prediction.

use mindmap_core::cancel::CancellationFlag;
use mindmap_core::clock::{Clock, SystemClock};
use mindmap_core::context::{OutcomeKind, QueryContext, TaskOutcome};
use mindmap_core::error::{ConfigError, GraphError, MindmapError, PersistenceError, ValidationError};
use mindmap_core::store::GraphStore;
use mindmap_core::types::{Edge, EdgeId, EdgeUpdate, Node, NodeId, Timestamp, UpsertOutcome};
use mindmap_runtime::activation::ActivationEngine;
use mindmap_runtime::attention::AttentionAllocator;
use mindmap_runtime::context_hierarchy::{ContextHierarchy, ContextLevel};
use mindmap_runtime::fusion::ConfidenceFusion;
use mindmap_runtime::graph_store::PetGraphStore;
use mindmap_runtime::hebbian::HebbianLearner;
use mindmap_runtime::inhibitory::InhibitoryLearner;
use mindmap_runtime::ingest::{apply_batch, IngestBatch, IngestReport, IngestScheduler, IngestSink};
use mindmap_runtime::prediction::{PatternPrediction, PatternPredictionEngine, PatternType};
use mindmap_runtime::session::{EngineSnapshot, LearnedState, SnapshotBackend, SnapshotMetadata};
use mindmap_runtime::temporal::{ContextWindow, TemporalLayer};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::QueryCache;
use crate::config::EngineConfig;
use crate::options::QueryOptions;
use crate::pipeline::QueryPipeline;
use crate::response::QueryResponse;

/// Learning subsystems that can be switched off when their state fails to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Temporal,
    Hebbian,
    Inhibitory,
    Fusion,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Temporal => "temporal",
            Subsystem::Hebbian => "hebbian",
            Subsystem::Inhibitory => "inhibitory",
            Subsystem::Fusion => "fusion",
        }
    }
}

pub(crate) struct Stores {
    pub graph: RwLock<PetGraphStore>,
    pub temporal: RwLock<TemporalLayer>,
    pub hierarchy: RwLock<ContextHierarchy>,
    pub hebbian: RwLock<HebbianLearner>,
    pub inhibitory: RwLock<InhibitoryLearner>,
    pub attention: Mutex<AttentionAllocator>,
    pub fusion: RwLock<ConfidenceFusion>,
    pub cache: Mutex<QueryCache<QueryResponse>>,
    pub prediction: Mutex<PatternPredictionEngine>,
}

impl Stores {
    fn new(config: &EngineConfig) -> Self {
        Self {
            graph: RwLock::new(PetGraphStore::new()),
            temporal: RwLock::new(TemporalLayer::with_config(config.temporal.clone())),
            hierarchy: RwLock::new(ContextHierarchy::with_config(config.hierarchy.clone())),
            hebbian: RwLock::new(HebbianLearner::with_config(config.hebbian.clone())),
            inhibitory: RwLock::new(InhibitoryLearner::with_config(config.inhibitory.clone())),
            attention: Mutex::new(AttentionAllocator::with_config(config.attention.clone())),
            fusion: RwLock::new(ConfidenceFusion::with_config(config.fusion.clone())),
            cache: Mutex::new(QueryCache::with_config(config.cache.clone())),
            prediction: Mutex::new(PatternPredictionEngine::with_config(config.prediction.clone())),
        }
    }
}

/// What one reported outcome changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    /// Involved files that matched a node by id or path.
    pub resolved: Vec<NodeId>,
    pub unresolved: Vec<String>,
    pub hebbian_pairs: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inhibitory_pattern: Option<String>,
    pub pattern_created: bool,
    pub fusion_samples: usize,
    pub predictions_confirmed: usize,
    pub cache_invalidated: usize,
}

/// What a restore kept and what it had to drop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub nodes: usize,
    pub edges: usize,
    /// Nodes whose bounds failed validation.
    #[serde(default)]
    pub rejected_nodes: Vec<(NodeId, String)>,
    /// Edges whose endpoints or bounds failed validation.
    pub rejected_edges: Vec<(EdgeId, String)>,
    /// Edges that could not be re-tracked after the temporal section was lost.
    #[serde(default)]
    pub untracked_edges: Vec<(EdgeId, String)>,
    /// Subsystems whose state failed to decode and were started empty.
    pub disabled: Vec<Subsystem>,
}

pub struct MindmapEngine {
    config: EngineConfig,
    pub(crate) stores: Stores,
    activation: ActivationEngine,
    clock: Arc<dyn Clock>,
    revision: AtomicU64,
    disabled: RwLock<BTreeSet<Subsystem>>,
}

impl std::fmt::Debug for MindmapEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MindmapEngine")
            .field("project", &self.config.project)
            .field("revision", &self.revision.load(Ordering::SeqCst))
            .field("disabled", &*self.disabled.read())
            .finish_non_exhaustive()
    }
}

impl MindmapEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(project = %config.project, "engine created");
        Ok(Self {
            stores: Stores::new(&config),
            activation: ActivationEngine::with_config(config.activation.clone()),
            clock,
            revision: AtomicU64::new(0),
            disabled: RwLock::new(BTreeSet::new()),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn project(&self) -> &str {
        &self.config.project
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    fn invalidate_cache(&self, ids: BTreeSet<NodeId>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        self.stores.cache.lock().invalidate(&ids)
    }

    fn is_enabled(&self, subsystem: Subsystem) -> bool {
        !self.disabled.read().contains(&subsystem)
    }

    pub fn disabled_subsystems(&self) -> Vec<Subsystem> {
        self.disabled.read().iter().copied().collect()
    }

    /// Turn a disabled subsystem back on with whatever it learned since.
    pub fn enable_subsystem(&self, subsystem: Subsystem) -> bool {
        let removed = self.disabled.write().remove(&subsystem);
        if removed {
            self.bump_revision();
            self.stores.cache.lock().invalidate_all();
            info!(subsystem = subsystem.as_str(), "subsystem re-enabled");
        }
        removed
    }

    // Queries

    pub fn query(&self, text: &str, options: &QueryOptions) -> Result<QueryResponse, ValidationError> {
        self.query_with_cancel(text, options, &CancellationFlag::new())
    }

    pub fn query_with_cancel(
        &self,
        text: &str,
        options: &QueryOptions,
        cancel: &CancellationFlag,
    ) -> Result<QueryResponse, ValidationError> {
        options.validate()?;
        let disabled = self.disabled.read().clone();
        let pipeline = self.pipeline(&disabled, self.revision.load(Ordering::SeqCst));
        Ok(pipeline.run(text, options, cancel))
    }

    fn pipeline<'a>(&'a self, disabled: &'a BTreeSet<Subsystem>, revision: u64) -> QueryPipeline<'a> {
        QueryPipeline {
            stores: &self.stores,
            activation: &self.activation,
            config: &self.config.pipeline,
            clock: self.clock.as_ref(),
            disabled,
            revision,
        }
    }

    /// Query with options sent as JSON. An empty string means defaults.
    pub fn query_json(&self, text: &str, options_json: &str) -> Result<QueryResponse, ValidationError> {
        let options = if options_json.trim().is_empty() {
            QueryOptions::default()
        } else {
            QueryOptions::from_json(options_json)?
        };
        self.query(text, &options)
    }

    // Outcomes

    /// Nodes named by `files`, matched by id first and then by path.
    fn resolve_files(&self, files: &[String]) -> (Vec<NodeId>, Vec<String>) {
        let graph = self.stores.graph.read();
        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        for file in files {
            let id = NodeId::from(file.as_str());
            let found = if graph.contains_node(&id) {
                Some(id)
            } else {
                graph
                    .all_nodes()
                    .into_iter()
                    .find(|n| n.path.as_deref() == Some(file.as_str()))
                    .map(|n| n.id.clone())
            };
            match found {
                Some(id) if !resolved.contains(&id) => resolved.push(id),
                Some(_) => {}
                None => unresolved.push(file.clone()),
            }
        }
        (resolved, unresolved)
    }

    /// Learn from a finished task.
    ///
    /// Success and partial outcomes strengthen associations among the
    /// involved nodes. Errors record an inhibitory pattern against them in
    /// `context` (the task description alone when none is given) and
    /// confirm pending error-hotspot predictions.
    pub fn report_outcome(&self, outcome: &TaskOutcome, context: Option<&QueryContext>) -> OutcomeReport {
        let now = self.clock.now();
        let fallback;
        let context = match context {
            Some(c) => c,
            None => {
                fallback = QueryContext::new().with_task(outcome.task_description.clone());
                &fallback
            }
        };

        let (resolved, unresolved) = self.resolve_files(&outcome.involved_files);
        let mut report = OutcomeReport {
            resolved: resolved.clone(),
            unresolved,
            ..OutcomeReport::default()
        };

        let success = outcome.outcome != OutcomeKind::Error;
        if success {
            if self.is_enabled(Subsystem::Hebbian) {
                report.hebbian_pairs =
                    self.stores
                        .hebbian
                        .write()
                        .record_outcome(&resolved, outcome.outcome, context, now);
            }
        } else if self.is_enabled(Subsystem::Inhibitory) {
            let mut inhibitory = self.stores.inhibitory.write();
            let signature = inhibitory.extract_failure_signature(outcome, context);
            let record = inhibitory.record_failure(&signature, &resolved, now);
            report.inhibitory_pattern = Some(record.pattern_id);
            report.pattern_created = record.created;
        }

        if self.is_enabled(Subsystem::Fusion) {
            report.fusion_samples = self.stores.fusion.write().learn_from_nodes(&resolved, success);
        }

        let mut touched: BTreeSet<NodeId> = resolved.into_iter().collect();
        if !success {
            // inhibition can reach nodes outside the involved set; the
            // revision bump keeps in-flight queries from storing stale rankings
            self.bump_revision();
            report.cache_invalidated = self.stores.cache.lock().invalidate_all();
            touched.clear();
            report.predictions_confirmed = self.stores.prediction.lock().confirm(PatternType::ErrorHotspot, now);
        }
        report.cache_invalidated += self.invalidate_cache(touched);

        info!(
            outcome = outcome.outcome.as_str(),
            nodes = report.resolved.len(),
            unresolved = report.unresolved.len(),
            "outcome recorded"
        );
        self.maybe_scan(now);
        report
    }

    // Graph mutations

    pub fn get_node(&self, id: &NodeId) -> Option<Node> {
        self.stores.graph.read().get_node(id).cloned()
    }

    pub fn get_edge(&self, id: &EdgeId) -> Option<Edge> {
        self.stores.graph.read().get_edge(id).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.stores.graph.read().node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.stores.graph.read().edge_count()
    }

    pub fn graph_version(&self) -> u64 {
        self.stores.graph.read().version()
    }

    pub fn add_node(&self, node: Node) -> Result<(), MindmapError> {
        let id = node.id.clone();
        self.stores.graph.write().add_node(node)?;
        self.invalidate_cache(BTreeSet::from([id]));
        Ok(())
    }

    /// Add an edge and start tracking its validity from now.
    pub fn add_edge(&self, edge: Edge) -> Result<(), MindmapError> {
        let now = self.clock.now();
        let ends = BTreeSet::from([edge.source.clone(), edge.target.clone()]);
        {
            let mut graph = self.stores.graph.write();
            graph.add_edge(edge.clone())?;
            self.stores.temporal.write().sync(&edge, now)?;
        }
        self.invalidate_cache(ends);
        Ok(())
    }

    /// Update an edge's properties, appending a temporal revision.
    pub fn update_edge(&self, id: &EdgeId, update: &EdgeUpdate) -> Result<Edge, MindmapError> {
        let now = self.clock.now();
        let edge = {
            let mut graph = self.stores.graph.write();
            let edge = graph.update_edge(id, update)?;
            let mut temporal = self.stores.temporal.write();
            if temporal.is_tracked(id) {
                temporal.update(id, update, now)?;
            } else {
                temporal.sync(&edge, now)?;
            }
            edge
        };
        self.invalidate_cache(BTreeSet::from([edge.source.clone(), edge.target.clone()]));
        Ok(edge)
    }

    /// Remove a node and its edges. Temporal history of the removed edges
    /// is kept; their validity ends now. Returns the removed edge ids.
    pub fn remove_node(&self, id: &NodeId) -> Result<Vec<EdgeId>, MindmapError> {
        let now = self.clock.now();
        let removed = {
            let mut graph = self.stores.graph.write();
            let removed = graph.remove_node(id)?;
            let mut temporal = self.stores.temporal.write();
            for edge in &removed {
                end_validity(&mut temporal, &edge.id, now);
            }
            removed
        };

        self.stores.hebbian.write().forget_node(id);
        self.stores.inhibitory.write().forget_node(id);
        self.stores.attention.lock().forget_node(id);
        self.stores.fusion.write().forget_node(id);
        let mut touched = BTreeSet::from([id.clone()]);
        for edge in &removed {
            touched.insert(edge.other_end(id).clone());
        }
        self.invalidate_cache(touched);
        self.stores.prediction.lock().forget_node(id);

        info!(node = %id, edges = removed.len(), "node removed");
        Ok(removed.into_iter().map(|e| e.id).collect())
    }

    pub fn remove_edge(&self, id: &EdgeId) -> Result<Edge, MindmapError> {
        let now = self.clock.now();
        let edge = {
            let mut graph = self.stores.graph.write();
            let edge = graph.remove_edge(id)?;
            end_validity(&mut self.stores.temporal.write(), id, now);
            edge
        };
        self.invalidate_cache(BTreeSet::from([edge.source.clone(), edge.target.clone()]));
        Ok(edge)
    }

    /// End an edge's validity at `at` (default now). The edge stays in the
    /// graph and in history; queries at later times skip it.
    pub fn invalidate_edge(&self, id: &EdgeId, at: Option<Timestamp>) -> Result<(), MindmapError> {
        let now = self.clock.now();
        let ends = {
            let graph = self.stores.graph.read();
            let mut temporal = self.stores.temporal.write();
            temporal.invalidate(id, at.unwrap_or(now), now)?;
            graph
                .get_edge(id)
                .or_else(|| temporal.get(id).map(|t| &t.edge))
                .map(|e| BTreeSet::from([e.source.clone(), e.target.clone()]))
                .unwrap_or_default()
        };
        self.bump_revision();
        self.invalidate_cache(ends);
        Ok(())
    }

    // Context

    pub fn set_context_layer(&self, level: ContextLevel, context: QueryContext, exclude_parent: bool) {
        let now = self.clock.now();
        self.stores.hierarchy.write().set_layer(level, context, exclude_parent, now);
        self.bump_revision();
        debug!(?level, exclude_parent, "context layer set");
    }

    pub fn clear_context_layer(&self, level: ContextLevel) -> bool {
        let cleared = self.stores.hierarchy.write().clear_layer(level).is_some();
        if cleared {
            self.bump_revision();
        }
        cleared
    }

    pub fn open_context_window(&self, name: &str) -> Result<(), MindmapError> {
        let now = self.clock.now();
        self.stores.temporal.write().open_window(name, now)?;
        Ok(())
    }

    pub fn close_context_window(&self, name: &str) -> Result<ContextWindow, MindmapError> {
        let now = self.clock.now();
        Ok(self.stores.temporal.write().close_window(name, now)?)
    }

    // Predictions

    fn maybe_scan(&self, now: Timestamp) {
        if !self.config.pipeline.auto_scan {
            return;
        }
        let graph = self.stores.graph.read();
        let temporal = self.stores.temporal.read();
        self.stores.prediction.lock().scan(&*graph, &temporal, now, false);
    }

    /// Scan the change log. Without `force` this is a no-op until the scan
    /// interval has passed.
    pub fn run_prediction_scan(&self, force: bool) -> Vec<PatternPrediction> {
        let now = self.clock.now();
        let graph = self.stores.graph.read();
        let temporal = self.stores.temporal.read();
        self.stores.prediction.lock().scan(&*graph, &temporal, now, force)
    }

    /// Predictions neither confirmed nor expired.
    pub fn predictions(&self) -> Vec<PatternPrediction> {
        let now = self.clock.now();
        self.stores
            .prediction
            .lock()
            .active_predictions(now)
            .into_iter()
            .cloned()
            .collect()
    }

    // Ingestion

    pub fn ingest_batch(&self, batch: IngestBatch) -> IngestReport {
        let now = self.clock.now();
        let report = apply_batch(self, batch, now);
        self.maybe_scan(now);
        report
    }

    pub fn ingest_scheduler(&self) -> IngestScheduler {
        IngestScheduler::new(self.config.ingest.clone())
    }

    /// Ingest many batches through `scheduler`'s worker pool.
    pub async fn ingest_batches(self: &Arc<Self>, scheduler: &IngestScheduler, batches: Vec<IngestBatch>) -> IngestReport {
        let now = self.clock.now();
        let sink: Arc<dyn IngestSink> = Arc::clone(self) as Arc<dyn IngestSink>;
        let report = scheduler.run(sink, batches, now).await;
        self.maybe_scan(self.clock.now());
        report
    }

    // Persistence

    pub fn snapshot(&self) -> Result<EngineSnapshot, PersistenceError> {
        let graph = self.stores.graph.read();
        let temporal = self.stores.temporal.read();
        let hebbian = self.stores.hebbian.read().export();
        let inhibitory = self.stores.inhibitory.read().export();
        let fusion = self.stores.fusion.read().export();
        EngineSnapshot::new(
            &self.config.project,
            graph.version(),
            graph.all_nodes().into_iter().cloned().collect(),
            graph.all_edges().into_iter().cloned().collect(),
            LearnedState {
                temporal: Some(&temporal),
                hebbian: Some(hebbian),
                inhibitory: Some(inhibitory),
                fusion: Some(fusion),
            },
        )
    }

    /// Replace all state with a snapshot's.
    ///
    /// Graph edges that fail validation are dropped and reported. A learning
    /// section that fails to decode leaves its subsystem empty and disabled.
    pub fn restore(&self, snapshot: EngineSnapshot) -> RestoreReport {
        let now = self.clock.now();
        let mut disabled = BTreeSet::new();

        let temporal = match snapshot.decode_temporal() {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "temporal section unreadable, subsystem disabled");
                disabled.insert(Subsystem::Temporal);
                TemporalLayer::with_config(self.config.temporal.clone())
            }
        };

        let mut hebbian = HebbianLearner::with_config(self.config.hebbian.clone());
        if let Err(e) = snapshot.decode_hebbian().and_then(|t| hebbian.import(t)) {
            warn!(error = %e, "hebbian section unreadable, subsystem disabled");
            disabled.insert(Subsystem::Hebbian);
            hebbian = HebbianLearner::with_config(self.config.hebbian.clone());
        }

        let mut inhibitory = InhibitoryLearner::with_config(self.config.inhibitory.clone());
        if let Err(e) = snapshot.decode_inhibitory().and_then(|t| inhibitory.import(t)) {
            warn!(error = %e, "inhibitory section unreadable, subsystem disabled");
            disabled.insert(Subsystem::Inhibitory);
            inhibitory = InhibitoryLearner::with_config(self.config.inhibitory.clone());
        }

        let mut fusion = ConfidenceFusion::with_config(self.config.fusion.clone());
        if let Err(e) = snapshot.decode_fusion().and_then(|t| fusion.import(t)) {
            warn!(error = %e, "fusion section unreadable, subsystem disabled");
            disabled.insert(Subsystem::Fusion);
            fusion = ConfidenceFusion::with_config(self.config.fusion.clone());
        }

        let version = snapshot.metadata.graph_version;
        let (graph, rejected) = PetGraphStore::from_parts(snapshot.nodes, snapshot.edges, version);
        for (id, e) in &rejected.nodes {
            warn!(node = %id, error = %e, "snapshot node rejected");
        }
        for (id, e) in &rejected.edges {
            warn!(edge = %id, error = %e, "snapshot edge rejected");
        }
        let mut report = RestoreReport {
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            rejected_nodes: rejected.nodes.into_iter().map(|(id, e)| (id, e.to_string())).collect(),
            rejected_edges: rejected.edges.into_iter().map(|(id, e)| (id, e.to_string())).collect(),
            untracked_edges: Vec::new(),
            disabled: disabled.iter().copied().collect(),
        };

        {
            let mut g = self.stores.graph.write();
            let mut t = self.stores.temporal.write();
            *g = graph;
            *t = temporal;
            if disabled.contains(&Subsystem::Temporal) {
                // without history every surviving edge counts as valid from now
                for edge in g.all_edges() {
                    if let Err(e) = t.sync(edge, now) {
                        warn!(edge = %edge.id, error = %e, "edge not re-tracked after restore");
                        report.untracked_edges.push((edge.id.clone(), e.to_string()));
                    }
                }
            }
        }
        *self.stores.hebbian.write() = hebbian;
        *self.stores.inhibitory.write() = inhibitory;
        *self.stores.fusion.write() = fusion;
        self.stores.cache.lock().invalidate_all();
        *self.stores.prediction.lock() = PatternPredictionEngine::with_config(self.config.prediction.clone());
        *self.disabled.write() = disabled;
        self.bump_revision();

        info!(
            project = %snapshot.metadata.project,
            nodes = report.nodes,
            edges = report.edges,
            rejected_nodes = report.rejected_nodes.len(),
            rejected_edges = report.rejected_edges.len(),
            disabled = report.disabled.len(),
            "engine restored"
        );
        report
    }

    pub fn save(&self, backend: &dyn SnapshotBackend) -> Result<SnapshotMetadata, PersistenceError> {
        let snapshot = self.snapshot()?;
        backend.save(&snapshot)?;
        Ok(snapshot.metadata)
    }

    /// Load this engine's project from `backend`.
    pub fn load(&self, backend: &dyn SnapshotBackend) -> Result<RestoreReport, PersistenceError> {
        let snapshot = backend.load(&self.config.project)?;
        Ok(self.restore(snapshot))
    }
}

/// End an edge's validity at `now` unless it already ended.
fn end_validity(temporal: &mut TemporalLayer, id: &EdgeId, now: Timestamp) {
    let open = temporal.get(id).is_some_and(|t| t.valid_time.end.is_none());
    if !open {
        return;
    }
    if let Err(e) = temporal.invalidate(id, now, now) {
        debug!(edge = %id, error = %e, "could not end edge validity");
    }
}

impl IngestSink for MindmapEngine {
    fn upsert_node(&self, node: Node) -> Result<UpsertOutcome, GraphError> {
        let id = node.id.clone();
        let outcome = self.stores.graph.write().upsert_node(node)?;
        if outcome != UpsertOutcome::Unchanged {
            self.invalidate_cache(BTreeSet::from([id]));
        }
        Ok(outcome)
    }

    fn upsert_edge(&self, edge: Edge) -> Result<UpsertOutcome, GraphError> {
        let now = self.clock.now();
        let ends = BTreeSet::from([edge.source.clone(), edge.target.clone()]);
        let outcome = {
            let mut graph = self.stores.graph.write();
            let outcome = graph.upsert_edge(edge.clone())?;
            if outcome != UpsertOutcome::Unchanged {
                if let Err(e) = self.stores.temporal.write().sync(&edge, now) {
                    warn!(edge = %edge.id, error = %e, "temporal sync failed");
                }
            }
            outcome
        };
        if outcome != UpsertOutcome::Unchanged {
            self.invalidate_cache(ends);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use mindmap_core::clock::ManualClock;
    use mindmap_core::types::{EdgeType, NodeType};

    fn engine() -> (MindmapEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()));
        let engine = MindmapEngine::with_clock(EngineConfig::default(), clock.clone()).unwrap();
        (engine, clock)
    }

    fn seed(engine: &MindmapEngine) {
        engine.add_node(Node::new("src/auth.rs", NodeType::File, "auth.rs").with_path("src/auth.rs")).unwrap();
        engine.add_node(Node::new("login", NodeType::Function, "login")).unwrap();
        engine.add_node(Node::new("session", NodeType::Function, "session")).unwrap();
        engine.add_edge(Edge::new("src/auth.rs", "login", EdgeType::Contains)).unwrap();
        engine.add_edge(Edge::new("login", "session", EdgeType::Calls)).unwrap();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.pipeline.fusion_mix = 2.0;
        assert!(MindmapEngine::new(config).is_err());
    }

    #[test]
    fn remove_node_keeps_temporal_history() {
        let (engine, clock) = engine();
        seed(&engine);
        let before = clock.now();
        clock.advance(Duration::minutes(5));

        let removed = engine.remove_node(&NodeId::from("login")).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(engine.edge_count(), 0);

        let temporal = engine.stores.temporal.read();
        let calls = EdgeId::from("login-calls->session");
        assert!(temporal.is_tracked(&calls));
        assert!(temporal.is_valid_at(&calls, before));
        assert!(!temporal.is_valid_at(&calls, clock.now() + Duration::seconds(1)));
    }

    #[test]
    fn outcome_resolves_files_by_id_or_path() {
        let (engine, _) = engine();
        seed(&engine);
        let outcome = TaskOutcome::success("add login")
            .with_file("src/auth.rs")
            .with_file("login")
            .with_file("missing.rs");
        let report = engine.report_outcome(&outcome, None);
        assert_eq!(report.resolved, vec![NodeId::from("src/auth.rs"), NodeId::from("login")]);
        assert_eq!(report.unresolved, vec!["missing.rs".to_string()]);
        assert!(report.hebbian_pairs >= 1);
    }

    #[test]
    fn error_outcome_creates_pattern_then_reinforces() {
        let (engine, _) = engine();
        seed(&engine);
        let ctx = QueryContext::new().with_task("fix login timeout");
        let outcome = TaskOutcome::error("fix login timeout", "TimeoutError: upstream").with_file("login");
        let first = engine.report_outcome(&outcome, Some(&ctx));
        assert!(first.pattern_created);
        let second = engine.report_outcome(&outcome, Some(&ctx));
        assert!(!second.pattern_created);
        assert_eq!(first.inhibitory_pattern, second.inhibitory_pattern);
    }

    #[test]
    fn error_outcome_makes_in_flight_results_stale() {
        let (engine, _) = engine();
        seed(&engine);
        let options = QueryOptions::default();
        let started_at = engine.revision.load(Ordering::SeqCst);

        let outcome = TaskOutcome::error("fix login", "AuthError: token expired").with_file("login");
        engine.report_outcome(&outcome, None);

        // a query that read the engine state before the outcome stores its result afterwards
        let disabled = BTreeSet::new();
        let late = engine.pipeline(&disabled, started_at).run("login", &options, &CancellationFlag::new());
        assert!(!late.cached);

        let next = engine.query("login", &options).unwrap();
        assert!(!next.cached);
    }

    #[test]
    fn context_windows_round_trip() {
        let (engine, _) = engine();
        engine.open_context_window("refactor").unwrap();
        assert!(engine.open_context_window("refactor").is_err());
        let window = engine.close_context_window("refactor").unwrap();
        assert_eq!(window.name, "refactor");
        assert!(matches!(
            engine.close_context_window("refactor"),
            Err(MindmapError::Temporal(_))
        ));
    }
}
