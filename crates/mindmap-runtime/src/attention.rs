//! Attention allocation across a candidate set.
//!
//! Raw weights come from five per-candidate factors combined linearly.
//! They are then normalised to sum to 1 so no candidate dominates by
//! absolute magnitude, and shaped by one of four policies.

use mindmap_core::context::QueryContext;
use mindmap_core::types::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionType {
    /// Only the top N candidates receive attention.
    Selective,
    /// Attention split in proportion to weight.
    #[default]
    Divided,
    /// Weights carry over between queries for the same task.
    Sustained,
    /// Caller-named focus nodes always get at least the top weight.
    Executive,
}

impl AttentionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttentionType::Selective => "selective",
            AttentionType::Divided => "divided",
            AttentionType::Sustained => "sustained",
            AttentionType::Executive => "executive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "selective" => Some(AttentionType::Selective),
            "divided" => Some(AttentionType::Divided),
            "sustained" => Some(AttentionType::Sustained),
            "executive" => Some(AttentionType::Executive),
            _ => None,
        }
    }
}

/// Per-candidate factor scores, each in 0.0-1.0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AttentionFactors {
    pub semantic: f64,
    pub structural: f64,
    pub temporal: f64,
    pub contextual: f64,
    pub relational: f64,
}

/// Linear weights applied to the factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub semantic: f64,
    pub structural: f64,
    pub temporal: f64,
    pub contextual: f64,
    pub relational: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            semantic: 0.3,
            structural: 0.25,
            temporal: 0.15,
            contextual: 0.2,
            relational: 0.1,
        }
    }
}

impl FactorWeights {
    pub fn combine(&self, f: &AttentionFactors) -> f64 {
        self.semantic * f.semantic
            + self.structural * f.structural
            + self.temporal * f.temporal
            + self.contextual * f.contextual
            + self.relational * f.relational
    }
}

/// Attention configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    pub factor_weights: FactorWeights,
    /// Candidates kept by selective attention (default: 5).
    pub selective_top_n: usize,
    /// Share of the remembered task weights in sustained attention (default: 0.5).
    pub sustained_blend: f64,
    /// Tasks remembered by sustained attention; least recently used go first (default: 64).
    pub max_sustained_tasks: usize,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            factor_weights: FactorWeights::default(),
            selective_top_n: 5,
            sustained_blend: 0.5,
            max_sustained_tasks: 64,
        }
    }
}

/// Outcome of one allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub attention_type: AttentionType,
    /// Normalised weights in input order, focus additions last.
    pub weights: Vec<(NodeId, f64)>,
    /// Candidates that received non-zero attention.
    pub focus: Vec<NodeId>,
}

impl Allocation {
    pub fn weight_of(&self, id: &NodeId) -> f64 {
        self.weights
            .iter()
            .find(|(n, _)| n == id)
            .map_or(0.0, |(_, w)| *w)
    }
}

/// Counters reported by `get_attention_stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttentionStats {
    pub total_allocations: u64,
    pub allocations_by_type: BTreeMap<String, u64>,
    pub sustained_tasks: usize,
    pub average_focus_size: f64,
}

#[derive(Debug, Clone)]
struct SustainedTask {
    weights: BTreeMap<NodeId, f64>,
    last_used: Timestamp,
}

/// Rescale weights to sum to 1. Uniform when nothing is positive.
///
/// Negative and non-finite weights count as zero.
pub fn normalize_attention(weights: &mut [(NodeId, f64)]) {
    if weights.is_empty() {
        return;
    }
    for (_, w) in weights.iter_mut() {
        if !w.is_finite() || *w < 0.0 {
            *w = 0.0;
        }
    }
    let sum: f64 = weights.iter().map(|(_, w)| w).sum();
    if sum > 0.0 {
        for (_, w) in weights.iter_mut() {
            *w /= sum;
        }
    } else {
        let uniform = 1.0 / weights.len() as f64;
        for (_, w) in weights.iter_mut() {
            *w = uniform;
        }
    }
}

/// Allocates attention and remembers sustained task weights.
#[derive(Debug, Clone, Default)]
pub struct AttentionAllocator {
    config: AttentionConfig,
    sustained: BTreeMap<String, SustainedTask>,
    allocations_by_type: BTreeMap<AttentionType, u64>,
    total_allocations: u64,
    focus_total: u64,
}

impl AttentionAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AttentionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Raw (unnormalised) weight per candidate.
    pub fn calculate_attention_weights(&self, candidates: &[(NodeId, AttentionFactors)]) -> Vec<(NodeId, f64)> {
        candidates
            .iter()
            .map(|(id, f)| (id.clone(), self.config.factor_weights.combine(f)))
            .collect()
    }

    /// Shape normalised weights according to `kind`.
    pub fn allocate_attention(
        &mut self,
        mut weights: Vec<(NodeId, f64)>,
        context: &QueryContext,
        kind: AttentionType,
        now: Timestamp,
    ) -> Allocation {
        normalize_attention(&mut weights);

        match kind {
            AttentionType::Divided => {}
            AttentionType::Selective => {
                let mut order: Vec<usize> = (0..weights.len()).collect();
                order.sort_by(|&a, &b| {
                    weights[b]
                        .1
                        .total_cmp(&weights[a].1)
                        .then_with(|| weights[a].0.cmp(&weights[b].0))
                });
                let keep: BTreeSet<usize> = order.into_iter().take(self.config.selective_top_n).collect();
                for (i, (_, w)) in weights.iter_mut().enumerate() {
                    if !keep.contains(&i) {
                        *w = 0.0;
                    }
                }
                normalize_attention(&mut weights);
            }
            AttentionType::Sustained => {
                if let Some(task) = context.task.as_deref().filter(|t| !t.trim().is_empty()) {
                    let blend = self.config.sustained_blend.clamp(0.0, 1.0);
                    if let Some(prev) = self.sustained.get(task) {
                        for (id, w) in weights.iter_mut() {
                            let remembered = prev.weights.get(id).copied().unwrap_or(0.0);
                            *w = (1.0 - blend) * *w + blend * remembered;
                        }
                        normalize_attention(&mut weights);
                    }
                    self.remember(task, &weights, now);
                }
            }
            AttentionType::Executive => {
                let max = weights.iter().map(|(_, w)| *w).fold(0.0, f64::max);
                let floor = if max > 0.0 { max } else { 1.0 };
                for focus in &context.focus_nodes {
                    match weights.iter_mut().find(|(id, _)| id == focus) {
                        Some((_, w)) => *w = w.max(floor),
                        None => weights.push((focus.clone(), floor)),
                    }
                }
                normalize_attention(&mut weights);
            }
        }

        let focus: Vec<NodeId> = weights
            .iter()
            .filter(|(_, w)| *w > 0.0)
            .map(|(id, _)| id.clone())
            .collect();
        self.total_allocations += 1;
        *self.allocations_by_type.entry(kind).or_default() += 1;
        self.focus_total += focus.len() as u64;

        Allocation {
            attention_type: kind,
            weights,
            focus,
        }
    }

    fn remember(&mut self, task: &str, weights: &[(NodeId, f64)], now: Timestamp) {
        self.sustained.insert(
            task.to_string(),
            SustainedTask {
                weights: weights.iter().cloned().collect(),
                last_used: now,
            },
        );
        while self.sustained.len() > self.config.max_sustained_tasks {
            let oldest = self
                .sustained
                .iter()
                .min_by(|a, b| a.1.last_used.cmp(&b.1.last_used).then_with(|| a.0.cmp(b.0)))
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    self.sustained.remove(&k);
                }
                None => break,
            }
        }
    }

    pub fn forget_node(&mut self, id: &NodeId) {
        for task in self.sustained.values_mut() {
            task.weights.remove(id);
        }
    }

    pub fn stats(&self) -> AttentionStats {
        AttentionStats {
            total_allocations: self.total_allocations,
            allocations_by_type: self
                .allocations_by_type
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), *v))
                .collect(),
            sustained_tasks: self.sustained.len(),
            average_focus_size: if self.total_allocations == 0 {
                0.0
            } else {
                self.focus_total as f64 / self.total_allocations as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn w(pairs: &[(&str, f64)]) -> Vec<(NodeId, f64)> {
        pairs.iter().map(|(id, w)| (NodeId::from(*id), *w)).collect()
    }

    fn sum(weights: &[(NodeId, f64)]) -> f64 {
        weights.iter().map(|(_, w)| w).sum()
    }

    #[test]
    fn normalize_sums_to_one_or_uniform() {
        let mut a = w(&[("a", 2.0), ("b", 6.0)]);
        normalize_attention(&mut a);
        assert!((a[0].1 - 0.25).abs() < 1e-12);
        assert!((sum(&a) - 1.0).abs() < 1e-12);

        let mut zero = w(&[("a", 0.0), ("b", 0.0), ("c", f64::NAN)]);
        normalize_attention(&mut zero);
        assert!(zero.iter().all(|(_, x)| (*x - 1.0 / 3.0).abs() < 1e-12));
    }

    #[test]
    fn factor_weights_combine_linearly() {
        let alloc = AttentionAllocator::new();
        let raw = alloc.calculate_attention_weights(&[(
            NodeId::from("a"),
            AttentionFactors {
                semantic: 1.0,
                structural: 1.0,
                temporal: 1.0,
                contextual: 1.0,
                relational: 1.0,
            },
        )]);
        assert!((raw[0].1 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn selective_keeps_top_n() {
        let mut alloc = AttentionAllocator::with_config(AttentionConfig {
            selective_top_n: 2,
            ..AttentionConfig::default()
        });
        let out = alloc.allocate_attention(
            w(&[("a", 0.1), ("b", 0.5), ("c", 0.3), ("d", 0.1)]),
            &QueryContext::default(),
            AttentionType::Selective,
            Utc::now(),
        );
        assert_eq!(out.focus, vec![NodeId::from("b"), NodeId::from("c")]);
        assert!((sum(&out.weights) - 1.0).abs() < 1e-12);
        assert_eq!(out.weight_of(&NodeId::from("a")), 0.0);
    }

    #[test]
    fn sustained_remembers_task_weights() {
        let mut alloc = AttentionAllocator::new();
        let ctx = QueryContext::new().with_task("refactor cache");
        let now = Utc::now();
        alloc.allocate_attention(w(&[("a", 1.0), ("b", 0.0)]), &ctx, AttentionType::Sustained, now);
        let second = alloc.allocate_attention(w(&[("a", 0.0), ("b", 1.0)]), &ctx, AttentionType::Sustained, now);
        assert!((second.weight_of(&NodeId::from("a")) - 0.5).abs() < 1e-12);
        assert_eq!(alloc.stats().sustained_tasks, 1);

        let other = QueryContext::new().with_task("write docs");
        let fresh = alloc.allocate_attention(w(&[("a", 0.0), ("b", 1.0)]), &other, AttentionType::Sustained, now);
        assert_eq!(fresh.weight_of(&NodeId::from("a")), 0.0);
    }

    #[test]
    fn executive_includes_focus_with_max_weight() {
        let mut alloc = AttentionAllocator::new();
        let ctx = QueryContext::new().with_focus("pinned").with_focus("b");
        let out = alloc.allocate_attention(w(&[("a", 0.9), ("b", 0.1)]), &ctx, AttentionType::Executive, Utc::now());
        let a = out.weight_of(&NodeId::from("a"));
        assert!(out.weight_of(&NodeId::from("pinned")) >= a);
        assert!(out.weight_of(&NodeId::from("b")) >= a);
        assert!((sum(&out.weights) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stats_count_by_type() {
        let mut alloc = AttentionAllocator::new();
        let now = Utc::now();
        alloc.allocate_attention(w(&[("a", 1.0)]), &QueryContext::default(), AttentionType::Divided, now);
        alloc.allocate_attention(w(&[("a", 1.0)]), &QueryContext::default(), AttentionType::Selective, now);
        let stats = alloc.stats();
        assert_eq!(stats.total_allocations, 2);
        assert_eq!(stats.allocations_by_type["divided"], 1);
        assert_eq!(stats.average_focus_size, 1.0);
    }
}
