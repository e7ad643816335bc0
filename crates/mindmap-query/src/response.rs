//! What a query returns.

use mindmap_core::types::{Edge, EdgeId, Node, NodeId};
use mindmap_runtime::activation::ActivationResult;
use mindmap_runtime::fusion::FusionResult;
use mindmap_runtime::temporal::{Revision, ValidTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Pipeline states, in the order a full run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Received,
    CacheCheck,
    ContextResolve,
    ActivationSpread,
    InhibitionApply,
    AttentionWeight,
    Fusion,
    RankLimit,
    HebbianRecord,
    CacheStore,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "RECEIVED",
            Stage::CacheCheck => "CACHE_CHECK",
            Stage::ContextResolve => "CONTEXT_RESOLVE",
            Stage::ActivationSpread => "ACTIVATION_SPREAD",
            Stage::InhibitionApply => "INHIBITION_APPLY",
            Stage::AttentionWeight => "ATTENTION_WEIGHT",
            Stage::Fusion => "FUSION",
            Stage::RankLimit => "RANK_LIMIT",
            Stage::HebbianRecord => "HEBBIAN_RECORD",
            Stage::CacheStore => "CACHE_STORE",
            Stage::Done => "DONE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node whose score a stage could not adjust. It kept its pre-stage score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub node_id: NodeId,
    pub reason: String,
}

/// One ranked result with the signals that produced its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedNode {
    pub node: Node,
    pub score: f64,
    pub activation_strength: f64,
    pub hop_distance: usize,
    pub context_relevance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attention_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fusion: Option<FusionResult>,
}

/// Validity and revisions of a returned edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeHistory {
    pub valid_time: ValidTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub earlier_valid: Vec<ValidTime>,
    pub revisions: Vec<Revision>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub nodes: Vec<RankedNode>,
    /// Edges among the returned nodes that are valid at the query time.
    pub edges: Vec<Edge>,
    /// Candidates that passed the filters, before the limit.
    pub total_matches: usize,
    pub query_time_ms: u64,
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_results: Option<Vec<ActivationResult>>,
    pub inhibition_applied: usize,
    /// Best-effort ranking: a stage was skipped by timeout or cancellation.
    pub partial: bool,
    pub timed_out: bool,
    pub cancelled: bool,
    pub stages: Vec<Stage>,
    pub stage_failures: Vec<StageFailure>,
    /// Why the whole run degraded before any stage ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<BTreeMap<EdgeId, EdgeHistory>>,
    /// Candidates whose signals disagreed during fusion.
    pub conflicts: usize,
    pub graph_version: u64,
}

impl QueryResponse {
    /// Empty partial answer for a query whose budget ran out before it started.
    pub fn unstarted(reason: impl Into<String>, waited_ms: u64, graph_version: u64) -> Self {
        Self {
            query_time_ms: waited_ms,
            partial: true,
            timed_out: true,
            stages: vec![Stage::Received, Stage::Done],
            degraded: Some(reason.into()),
            graph_version,
            ..Self::default()
        }
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.node.id.clone()).collect()
    }

    pub fn score_of(&self, id: &NodeId) -> Option<f64> {
        self.nodes.iter().find(|n| &n.node.id == id).map(|n| n.score)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
