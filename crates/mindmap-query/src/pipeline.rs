//! The query pipeline.
//!
//! A query walks a fixed sequence of states:
//!
//! ```text
//! RECEIVED -> CACHE_CHECK -> (hit) DONE
//!                         -> CONTEXT_RESOLVE -> ACTIVATION_SPREAD -> INHIBITION_APPLY
//!                         -> ATTENTION_WEIGHT -> FUSION -> RANK_LIMIT
//!                         -> HEBBIAN_RECORD -> CACHE_STORE -> DONE
//! ```
//!
//! Each scoring stage multiplies candidate scores by a stage factor and
//! can be bypassed. The deadline and the cancel flag are checked before
//! every stage up to FUSION; when either fires the run jumps to
//! RANK_LIMIT and returns what it has, flagged partial. Partial runs
//! neither teach the Hebbian table nor enter the cache.
//!
//! Graph and temporal read locks are held for the whole run so every
//! stage sees the same graph. Other stores are locked per stage in the
//! engine's lock order.

use chrono::Duration;
use mindmap_core::cancel::CancellationFlag;
use mindmap_core::clock::Clock;
use mindmap_core::store::GraphStore;
use mindmap_core::text::token_set;
use mindmap_core::types::{EdgeId, NodeId, Timestamp};
use mindmap_runtime::activation::{
    node_tokens, ActivationEngine, ActivationResult, AssociationSource, NoAssociations, SpreadRequest,
};
use mindmap_runtime::attention::AttentionFactors;
use mindmap_runtime::context_hierarchy::ContextProfile;
use mindmap_runtime::fusion::{FusionResult, Modality, MultiModalConfidence};
use mindmap_runtime::temporal::TemporalLayer;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, warn};

use crate::cache::CacheKey;
use crate::config::PipelineConfig;
use crate::engine::{Stores, Subsystem};
use crate::options::QueryOptions;
use crate::response::{EdgeHistory, QueryResponse, RankedNode, Stage, StageFailure};

/// A node under consideration during one run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Candidate {
    pub id: NodeId,
    pub score: f64,
    pub activation_strength: f64,
    pub hop_distance: usize,
    pub context_relevance: f64,
    /// Share of query tokens found on the node.
    pub semantic: f64,
    /// Recency of the node's last update.
    pub recency: f64,
    pub confidence: f64,
    pub attention_weight: Option<f64>,
    pub fusion: Option<FusionResult>,
}

/// Multiply a candidate's score by `factor`. A non-finite result keeps the
/// old score and is recorded against `stage`.
pub(crate) fn adjust_score(
    candidate: &mut Candidate,
    factor: f64,
    stage: Stage,
    failures: &mut Vec<StageFailure>,
) -> bool {
    let next = candidate.score * factor;
    if next.is_finite() {
        candidate.score = next;
        return true;
    }
    warn!(stage = %stage, node = %candidate.id, factor, "non-finite score, keeping pre-stage value");
    failures.push(StageFailure {
        stage,
        node_id: candidate.id.clone(),
        reason: format!("score {} x factor {} is not finite", candidate.score, factor),
    });
    false
}

fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
}

/// Mutable state of one run.
#[derive(Default)]
struct Run {
    query_tokens: BTreeSet<String>,
    profile: ContextProfile,
    candidates: Vec<Candidate>,
    activation_results: Option<Vec<ActivationResult>>,
    response: QueryResponse,
}

/// One query's view of the engine.
pub(crate) struct QueryPipeline<'a> {
    pub stores: &'a Stores,
    pub activation: &'a ActivationEngine,
    pub config: &'a PipelineConfig,
    pub clock: &'a dyn Clock,
    pub disabled: &'a BTreeSet<Subsystem>,
    /// Engine revision: moves on changes the graph version does not see.
    pub revision: u64,
}

impl<'a> QueryPipeline<'a> {
    fn enabled(&self, subsystem: Subsystem) -> bool {
        !self.disabled.contains(&subsystem)
    }

    pub fn run(&self, query: &str, options: &QueryOptions, cancel: &CancellationFlag) -> QueryResponse {
        let started = Instant::now();
        let now = self.clock.now();
        let deadline = i64::try_from(options.timeout_ms)
            .ok()
            .and_then(|ms| now.checked_add_signed(Duration::milliseconds(ms)));
        let valid_at = options.valid_at.unwrap_or(now);

        let graph = self.stores.graph.read();
        let temporal = self.stores.temporal.read();
        let version = graph.version() + self.revision;

        let cache_query = format!("{}\u{1f}{}", query.trim(), options.fingerprint());
        let context_tokens = options.context.tokens();
        let context_hash = options.context.hash();
        let key = CacheKey {
            query: &cache_query,
            context_tokens: &context_tokens,
            context_hash: &context_hash,
        };

        let mut run = Run {
            query_tokens: token_set(query),
            ..Run::default()
        };
        run.response.graph_version = graph.version();

        let mut stage = Stage::Received;
        loop {
            run.response.stages.push(stage);
            if matches!(
                stage,
                Stage::CacheCheck
                    | Stage::ContextResolve
                    | Stage::ActivationSpread
                    | Stage::InhibitionApply
                    | Stage::AttentionWeight
                    | Stage::Fusion
            ) && self.interrupted(&mut run, cancel, deadline)
            {
                // the interrupted stage did not run
                run.response.stages.pop();
                stage = Stage::RankLimit;
                continue;
            }

            stage = match stage {
                Stage::Received => Stage::CacheCheck,
                Stage::CacheCheck => {
                    if options.bypass.cache {
                        Stage::ContextResolve
                    } else if let Some(mut hit) = self.stores.cache.lock().get(&key, version, now) {
                        hit.cached = true;
                        hit.stages = vec![Stage::Received, Stage::CacheCheck, Stage::Done];
                        hit.query_time_ms = started.elapsed().as_millis() as u64;
                        debug!(query, "cache hit");
                        return hit;
                    } else {
                        Stage::ContextResolve
                    }
                }
                Stage::ContextResolve => {
                    run.profile = self.stores.hierarchy.read().resolve(&options.context, options.context_level);
                    Stage::ActivationSpread
                }
                Stage::ActivationSpread => {
                    self.spread(&mut run, &*graph, &temporal, options, valid_at, now);
                    Stage::InhibitionApply
                }
                Stage::InhibitionApply => {
                    if !options.bypass.inhibition && self.enabled(Subsystem::Inhibitory) {
                        self.inhibit(&mut run, &context_hash, now);
                    }
                    Stage::AttentionWeight
                }
                Stage::AttentionWeight => {
                    if !options.bypass.attention {
                        self.attend(&mut run, options, now);
                    }
                    Stage::Fusion
                }
                Stage::Fusion => {
                    if !options.bypass.fusion && self.enabled(Subsystem::Fusion) {
                        self.fuse(&mut run, options, now);
                    }
                    Stage::RankLimit
                }
                Stage::RankLimit => {
                    self.rank_limit(&mut run, &*graph, &temporal, options, valid_at);
                    if run.response.partial {
                        Stage::Done
                    } else {
                        Stage::HebbianRecord
                    }
                }
                Stage::HebbianRecord => {
                    if !options.bypass.hebbian && self.enabled(Subsystem::Hebbian) {
                        let ids = run.response.node_ids();
                        self.stores
                            .hebbian
                            .write()
                            .record_co_activation(&ids, &options.context, self.config.query_signal, now);
                    }
                    Stage::CacheStore
                }
                Stage::CacheStore => {
                    if !options.bypass.cache {
                        let mut deps: BTreeSet<NodeId> = run.response.node_ids().into_iter().collect();
                        for edge in &run.response.edges {
                            deps.insert(edge.source.clone());
                            deps.insert(edge.target.clone());
                        }
                        let mut stored = run.response.clone();
                        stored.stages.push(Stage::Done);
                        self.stores.cache.lock().insert(&key, stored, deps, version, now);
                    }
                    Stage::Done
                }
                Stage::Done => break,
            };
        }

        run.response.query_time_ms = started.elapsed().as_millis() as u64;
        debug!(
            query,
            results = run.response.nodes.len(),
            total = run.response.total_matches,
            partial = run.response.partial,
            ms = run.response.query_time_ms,
            "query finished"
        );
        run.response
    }

    fn interrupted(&self, run: &mut Run, cancel: &CancellationFlag, deadline: Option<Timestamp>) -> bool {
        if cancel.is_cancelled() {
            run.response.cancelled = true;
        } else if deadline.is_some_and(|d| self.clock.now() > d) {
            run.response.timed_out = true;
        } else {
            return false;
        }
        if !run.response.partial {
            warn!(
                cancelled = run.response.cancelled,
                timed_out = run.response.timed_out,
                "query interrupted, returning partial ranking"
            );
        }
        run.response.partial = true;
        true
    }

    fn spread(
        &self,
        run: &mut Run,
        graph: &dyn GraphStore,
        temporal: &TemporalLayer,
        options: &QueryOptions,
        valid_at: Timestamp,
        now: Timestamp,
    ) {
        let mut seeds: BTreeSet<NodeId> = BTreeSet::new();
        for token in &run.query_tokens {
            seeds.extend(graph.find_nodes_by_token(token));
        }
        seeds.extend(run.profile.focus_nodes().iter().filter(|id| graph.contains_node(id)).cloned());
        let seeds: Vec<NodeId> = seeds.into_iter().collect();

        let results = if options.bypass.activation || !options.activation.enabled {
            let boost = self.activation.config().context_boost;
            seeds
                .iter()
                .filter_map(|id| {
                    let node = graph.get_node(id)?;
                    let relevance = run.profile.relevance(&node_tokens(node));
                    Some(ActivationResult {
                        node_id: id.clone(),
                        activation_strength: 1.0,
                        hop_distance: 0,
                        context_relevance: relevance,
                        total_score: 1.0 + boost * relevance,
                    })
                })
                .collect()
        } else {
            let check_validity = self.enabled(Subsystem::Temporal);
            let valid = |id: &EdgeId| !check_validity || temporal.is_valid_at(id, valid_at);
            let request = SpreadRequest::new(&seeds, &run.profile, options.activation.max_levels).with_edge_filter(&valid);
            if self.enabled(Subsystem::Hebbian) {
                let hebbian = self.stores.hebbian.read();
                let view = hebbian.at(now);
                self.activation.spread(graph, &view as &dyn AssociationSource, &request).0
            } else {
                self.activation.spread(graph, &NoAssociations, &request).0
            }
        };

        let recency_days = self.config.recency_days;
        run.candidates = results
            .iter()
            .filter_map(|r| {
                let node = graph.get_node(&r.node_id)?;
                let tokens = node_tokens(node);
                let semantic = if run.query_tokens.is_empty() {
                    0.0
                } else {
                    run.query_tokens.intersection(&tokens).count() as f64 / run.query_tokens.len() as f64
                };
                let age_days = (now - node.last_updated).num_seconds().max(0) as f64 / 86_400.0;
                Some(Candidate {
                    id: r.node_id.clone(),
                    score: r.total_score,
                    activation_strength: r.activation_strength,
                    hop_distance: r.hop_distance,
                    context_relevance: r.context_relevance,
                    semantic,
                    recency: (-age_days / recency_days).exp(),
                    confidence: node.confidence,
                    attention_weight: None,
                    fusion: None,
                })
            })
            .collect();
        debug!(seeds = seeds.len(), candidates = run.candidates.len(), "activation stage");
        run.activation_results = Some(results);
    }

    fn inhibit(&self, run: &mut Run, context_hash: &str, now: Timestamp) {
        let mut tokens = run.profile.tokens();
        tokens.extend(run.query_tokens.iter().cloned());

        let mut inhibitory = self.stores.inhibitory.write();
        let factors = inhibitory.inhibition_factors(&tokens, context_hash, now);
        let mut applied = 0;
        for c in run.candidates.iter_mut() {
            if let Some(f) = factors.get(&c.id) {
                if adjust_score(c, *f, Stage::InhibitionApply, &mut run.response.stage_failures) {
                    applied += 1;
                }
            }
        }
        inhibitory.note_applied(applied);
        run.response.inhibition_applied = applied;
        debug!(applied, "inhibition stage");
    }

    fn attend(&self, run: &mut Run, options: &QueryOptions, now: Timestamp) {
        if run.candidates.is_empty() {
            return;
        }
        let factors: Vec<(NodeId, AttentionFactors)> = run
            .candidates
            .iter()
            .map(|c| {
                (
                    c.id.clone(),
                    AttentionFactors {
                        semantic: c.semantic,
                        structural: c.activation_strength.clamp(0.0, 1.0),
                        temporal: c.recency,
                        contextual: c.context_relevance,
                        relational: 1.0 / (1.0 + c.hop_distance as f64),
                    },
                )
            })
            .collect();

        let allocation = {
            let mut attention = self.stores.attention.lock();
            let raw = attention.calculate_attention_weights(&factors);
            attention.allocate_attention(raw, &options.context, options.attention_type, now)
        };

        let n = run.candidates.len() as f64;
        let mix = self.config.attention_mix;
        for c in run.candidates.iter_mut() {
            let w = allocation.weight_of(&c.id);
            c.attention_weight = Some(w);
            let factor = (1.0 - mix) + mix * (w * n).clamp(0.0, 2.0);
            adjust_score(c, factor, Stage::AttentionWeight, &mut run.response.stage_failures);
        }
        debug!(kind = options.attention_type.as_str(), focus = allocation.focus.len(), "attention stage");
    }

    fn signals_for(&self, run: &Run, historical: &BTreeMap<NodeId, f64>) -> Vec<MultiModalConfidence> {
        run.candidates
            .iter()
            .map(|c| {
                let mut s = MultiModalConfidence::new()
                    .with(Modality::Structural, c.activation_strength.clamp(0.0, 1.0))
                    .with(Modality::Temporal, c.recency)
                    .with(Modality::Collaborative, c.confidence);
                if !run.query_tokens.is_empty() {
                    s = s.with(Modality::Semantic, c.semantic);
                }
                if let Some(h) = historical.get(&c.id) {
                    s = s.with(Modality::Historical, *h);
                }
                if !run.profile.is_empty() {
                    s = s.with(Modality::Contextual, c.context_relevance);
                }
                s
            })
            .collect()
    }

    fn fuse(&self, run: &mut Run, options: &QueryOptions, now: Timestamp) {
        if run.candidates.is_empty() {
            return;
        }
        let historical: BTreeMap<NodeId, f64> = if self.enabled(Subsystem::Hebbian) {
            let hebbian = self.stores.hebbian.read();
            run.candidates
                .iter()
                .filter_map(|c| {
                    let best = hebbian
                        .associations(&c.id, now)
                        .into_iter()
                        .map(|(_, s)| s)
                        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))))?;
                    Some((c.id.clone(), best))
                })
                .collect()
        } else {
            BTreeMap::new()
        };

        let signals = self.signals_for(run, &historical);
        let results = self.stores.fusion.read().fuse_batch(&signals, options.calibrate);

        let mix = self.config.fusion_mix;
        let mut noted = Vec::with_capacity(results.len());
        for ((c, s), r) in run.candidates.iter_mut().zip(signals).zip(results) {
            let factor = (1.0 - mix) + mix * r.confidence;
            adjust_score(c, factor, Stage::Fusion, &mut run.response.stage_failures);
            if r.conflict {
                run.response.conflicts += 1;
            }
            noted.push((c.id.clone(), s, r.clone()));
            c.fusion = Some(r);
        }
        self.stores.fusion.write().note(&noted);
        debug!(candidates = noted.len(), conflicts = run.response.conflicts, "fusion stage");
    }

    fn rank_limit(
        &self,
        run: &mut Run,
        graph: &dyn GraphStore,
        temporal: &TemporalLayer,
        options: &QueryOptions,
        valid_at: Timestamp,
    ) {
        let mut kept: Vec<Candidate> = run
            .candidates
            .drain(..)
            .filter(|c| {
                graph.get_node(&c.id).is_some_and(|node| {
                    node.confidence >= options.min_confidence
                        && options
                            .node_types
                            .as_ref()
                            .map_or(true, |types| types.contains(&node.node_type))
                })
            })
            .collect();
        rank(&mut kept);
        run.response.total_matches = kept.len();
        kept.truncate(options.limit);

        run.response.nodes = kept
            .into_iter()
            .filter_map(|c| {
                let node = graph.get_node(&c.id)?.clone();
                Some(RankedNode {
                    node,
                    score: c.score,
                    activation_strength: c.activation_strength,
                    hop_distance: c.hop_distance,
                    context_relevance: c.context_relevance,
                    attention_weight: c.attention_weight,
                    fusion: c.fusion,
                })
            })
            .collect();

        let ids: BTreeSet<NodeId> = run.response.node_ids().into_iter().collect();
        let check_validity = self.enabled(Subsystem::Temporal);
        run.response.edges = graph
            .edges_between(&ids)
            .into_iter()
            .filter(|e| !check_validity || temporal.is_valid_at(&e.id, valid_at))
            .cloned()
            .collect();

        if options.include_history {
            let history = run
                .response
                .edges
                .iter()
                .filter_map(|e| {
                    let tracked = temporal.get(&e.id)?;
                    Some((
                        e.id.clone(),
                        EdgeHistory {
                            valid_time: tracked.valid_time,
                            earlier_valid: tracked.earlier_valid.clone(),
                            revisions: tracked.transaction_time.revisions.clone(),
                        },
                    ))
                })
                .collect();
            run.response.history = Some(history);
        }
        run.response.activation_results = run.activation_results.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, score: f64) -> Candidate {
        Candidate {
            id: NodeId::from(id),
            score,
            activation_strength: 1.0,
            hop_distance: 0,
            context_relevance: 0.0,
            semantic: 0.0,
            recency: 1.0,
            confidence: 1.0,
            attention_weight: None,
            fusion: None,
        }
    }

    #[test]
    fn non_finite_adjustment_keeps_previous_score() {
        let mut failures = Vec::new();
        let mut c = candidate("alpha", 0.8);
        assert!(adjust_score(&mut c, 0.5, Stage::Fusion, &mut failures));
        assert_eq!(c.score, 0.4);

        assert!(!adjust_score(&mut c, f64::NAN, Stage::AttentionWeight, &mut failures));
        assert!(!adjust_score(&mut c, f64::INFINITY, Stage::Fusion, &mut failures));
        assert_eq!(c.score, 0.4);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].stage, Stage::AttentionWeight);
        assert_eq!(failures[0].node_id, NodeId::from("alpha"));
    }

    #[test]
    fn ranking_breaks_ties_by_id() {
        let mut cs = vec![candidate("gamma", 0.5), candidate("alpha", 0.5), candidate("beta", 0.9)];
        rank(&mut cs);
        let order: Vec<&str> = cs.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["beta", "alpha", "gamma"]);
    }
}
