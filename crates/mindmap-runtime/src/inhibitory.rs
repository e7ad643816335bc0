//! Inhibitory learning: remember what led to failure and suppress it.
//!
//! A failed task is reduced to a signature (error type, keywords, context
//! hash, files). Signatures that match an existing pattern reinforce it
//! multiplicatively; new ones start a pattern at the base strength. At
//! query time every pattern matching the query context scales the score
//! of its inhibited nodes by `max(0, 1 − Σ strengths)`.

use mindmap_core::context::{hash_tokens, QueryContext, TaskOutcome};
use mindmap_core::error::PersistenceError;
use mindmap_core::text::{jaccard, tokenize};
use mindmap_core::types::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Inhibitory learning configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InhibitoryConfig {
    /// Strength of a freshly created pattern (default: 0.3).
    pub base_strength: f64,
    /// Reinforcement adds `strength · multiplier` (default: 0.5).
    pub reinforcement_multiplier: f64,
    /// Exponential decay per hour since last reinforcement (default: 0.005).
    pub decay_rate: f64,
    /// Patterns below this are removed (default: 0.05).
    pub strength_floor: f64,
    /// Upper bound on stored patterns; the weakest go first (default: 1000).
    pub max_patterns: usize,
    /// Keyword overlap needed for a signature or context to match (default: 0.5).
    pub match_threshold: f64,
    /// Keywords kept per signature (default: 8).
    pub max_keywords: usize,
    /// Failure descriptions kept per pattern (default: 20).
    pub max_failures_per_pattern: usize,
}

impl Default for InhibitoryConfig {
    fn default() -> Self {
        Self {
            base_strength: 0.3,
            reinforcement_multiplier: 0.5,
            decay_rate: 0.005,
            strength_floor: 0.05,
            max_patterns: 1000,
            match_threshold: 0.5,
            max_keywords: 8,
            max_failures_per_pattern: 20,
        }
    }
}

/// What a failure looked like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSignature {
    pub error_type: String,
    pub keywords: Vec<String>,
    pub context_hash: String,
    pub involved_files: Vec<String>,
}

/// Context a pattern was learned in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternContext {
    pub context_hash: String,
    pub error_type: String,
}

/// A learned negative association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InhibitoryPattern {
    pub id: String,
    /// Keywords that must show up in a query context for the pattern to fire.
    pub trigger_conditions: Vec<String>,
    pub inhibited_nodes: BTreeSet<NodeId>,
    /// Stored strength as of `last_reinforced`.
    pub strength: f64,
    pub based_on_failures: Vec<String>,
    pub reinforcement_count: u64,
    pub decay_rate: f64,
    pub context: PatternContext,
    pub last_reinforced: Timestamp,
}

impl InhibitoryPattern {
    pub fn effective_strength(&self, now: Timestamp) -> f64 {
        let hours = (now - self.last_reinforced).num_milliseconds().max(0) as f64 / 3_600_000.0;
        self.strength * (-self.decay_rate * hours).exp()
    }

    /// Share of trigger keywords present in `tokens`.
    fn coverage(&self, tokens: &BTreeSet<String>) -> f64 {
        if self.trigger_conditions.is_empty() {
            return 0.0;
        }
        let hit = self.trigger_conditions.iter().filter(|k| tokens.contains(*k)).count();
        hit as f64 / self.trigger_conditions.len() as f64
    }
}

/// Counters reported alongside Hebbian stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InhibitoryStats {
    pub pattern_count: usize,
    pub average_strength: f64,
    pub total_failures: u64,
    pub reinforcements: u64,
    pub inhibitions_applied: u64,
}

/// Persistable pattern table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InhibitoryTable {
    pub patterns: Vec<InhibitoryPattern>,
    pub total_failures: u64,
    pub reinforcements: u64,
    pub inhibitions_applied: u64,
}

/// Result of recording one failure.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub pattern_id: String,
    pub created: bool,
    pub strength: f64,
}

/// Error type named in free-form error text.
///
/// The first word ending in `Error` or `Exception`, or `panic`, otherwise
/// `unknown`.
pub fn error_type_of(details: &str) -> String {
    for word in details.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if word.len() > 5 && (word.ends_with("Error") || word.ends_with("Exception")) {
            return word.to_string();
        }
        let lower = word.to_lowercase();
        if lower == "panic" || lower == "panicked" {
            return "panic".to_string();
        }
    }
    "unknown".to_string()
}

/// The inhibitory pattern table.
#[derive(Debug, Clone, Default)]
pub struct InhibitoryLearner {
    config: InhibitoryConfig,
    patterns: BTreeMap<String, InhibitoryPattern>,
    total_failures: u64,
    reinforcements: u64,
    inhibitions_applied: u64,
}

/// Hash of a context with no tokens. It identifies nothing, so it never
/// ties a pattern to a query.
fn blank_context_hash() -> String {
    hash_tokens(&BTreeSet::new())
}

impl InhibitoryLearner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: InhibitoryConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &InhibitoryPattern> {
        self.patterns.values()
    }

    /// Reduce a failed outcome to its signature.
    pub fn extract_failure_signature(&self, outcome: &TaskOutcome, context: &QueryContext) -> FailureSignature {
        let details = outcome.error_details.as_deref().unwrap_or("");
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for t in tokenize(&outcome.task_description).into_iter().chain(tokenize(details)) {
            *counts.entry(t).or_default() += 1;
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let mut keywords: Vec<String> = ranked
            .into_iter()
            .take(self.config.max_keywords)
            .map(|(t, _)| t)
            .collect();
        keywords.sort();

        let mut files = outcome.involved_files.clone();
        files.sort();
        files.dedup();

        FailureSignature {
            error_type: error_type_of(details),
            keywords,
            context_hash: context.hash(),
            involved_files: files,
        }
    }

    fn matches_signature(&self, pattern: &InhibitoryPattern, sig: &FailureSignature, blank: &str) -> bool {
        if sig.context_hash != blank && pattern.context.context_hash == sig.context_hash {
            return true;
        }
        if pattern.context.error_type != sig.error_type {
            return false;
        }
        let a: BTreeSet<String> = pattern.trigger_conditions.iter().cloned().collect();
        let b: BTreeSet<String> = sig.keywords.iter().cloned().collect();
        jaccard(&a, &b) >= self.config.match_threshold
    }

    /// Reinforce the matching pattern or start a new one.
    pub fn record_failure(
        &mut self,
        signature: &FailureSignature,
        inhibited_nodes: &[NodeId],
        now: Timestamp,
    ) -> FailureRecord {
        self.total_failures += 1;
        let description = format!("{}: {}", signature.error_type, signature.keywords.join(" "));
        let blank = blank_context_hash();

        let matched = self
            .patterns
            .values()
            .filter(|p| self.matches_signature(p, signature, &blank))
            .max_by(|a, b| {
                a.effective_strength(now)
                    .total_cmp(&b.effective_strength(now))
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|p| p.id.clone());

        let record = match matched.and_then(|id| self.patterns.get_mut(&id)) {
            Some(pattern) => {
                let eff = pattern.effective_strength(now);
                pattern.strength = (eff + eff * self.config.reinforcement_multiplier).min(1.0);
                pattern.reinforcement_count += 1;
                pattern.last_reinforced = now;
                pattern.inhibited_nodes.extend(inhibited_nodes.iter().cloned());
                pattern.based_on_failures.push(description);
                let excess = pattern
                    .based_on_failures
                    .len()
                    .saturating_sub(self.config.max_failures_per_pattern);
                pattern.based_on_failures.drain(..excess);
                self.reinforcements += 1;
                FailureRecord {
                    pattern_id: pattern.id.clone(),
                    created: false,
                    strength: pattern.strength,
                }
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                let pattern = InhibitoryPattern {
                    id: id.clone(),
                    trigger_conditions: signature.keywords.clone(),
                    inhibited_nodes: inhibited_nodes.iter().cloned().collect(),
                    strength: self.config.base_strength,
                    based_on_failures: vec![description],
                    reinforcement_count: 0,
                    decay_rate: self.config.decay_rate,
                    context: PatternContext {
                        context_hash: signature.context_hash.clone(),
                        error_type: signature.error_type.clone(),
                    },
                    last_reinforced: now,
                };
                self.patterns.insert(id.clone(), pattern);
                FailureRecord {
                    pattern_id: id,
                    created: true,
                    strength: self.config.base_strength,
                }
            }
        };

        debug!(
            pattern = %record.pattern_id,
            created = record.created,
            strength = record.strength,
            "recorded failure"
        );
        self.prune(now);
        record
    }

    /// Per-node multipliers for a query context. Nodes not listed keep 1.0.
    pub fn inhibition_factors(
        &self,
        context_tokens: &BTreeSet<String>,
        context_hash: &str,
        now: Timestamp,
    ) -> BTreeMap<NodeId, f64> {
        let mut sums: BTreeMap<NodeId, f64> = BTreeMap::new();
        let specific = context_hash != blank_context_hash();
        let same_context = |hash: &str| specific && hash == context_hash;
        for pattern in self.patterns.values() {
            let fires = same_context(&pattern.context.context_hash)
                || pattern.coverage(context_tokens) >= self.config.match_threshold;
            if !fires {
                continue;
            }
            let s = pattern.effective_strength(now);
            if s < self.config.strength_floor {
                continue;
            }
            for node in &pattern.inhibited_nodes {
                *sums.entry(node.clone()).or_insert(0.0) += s;
            }
        }
        sums.into_iter()
            .map(|(id, total)| (id, (1.0 - total).max(0.0)))
            .collect()
    }

    /// Scale matching scores in place. Returns how many were inhibited.
    pub fn apply_inhibition(
        &mut self,
        scores: &mut [(NodeId, f64)],
        context_tokens: &BTreeSet<String>,
        context_hash: &str,
        now: Timestamp,
    ) -> usize {
        let factors = self.inhibition_factors(context_tokens, context_hash, now);
        let mut applied = 0;
        for (id, score) in scores.iter_mut() {
            if let Some(f) = factors.get(id) {
                *score *= f;
                applied += 1;
            }
        }
        self.note_applied(applied);
        applied
    }

    pub fn note_applied(&mut self, count: usize) {
        self.inhibitions_applied += count as u64;
    }

    /// Drop decayed patterns and enforce `max_patterns`.
    pub fn prune(&mut self, now: Timestamp) -> usize {
        let floor = self.config.strength_floor;
        let before = self.patterns.len();
        self.patterns.retain(|_, p| p.effective_strength(now) >= floor);

        if self.patterns.len() > self.config.max_patterns {
            let mut ranked: Vec<(String, f64)> = self
                .patterns
                .values()
                .map(|p| (p.id.clone(), p.effective_strength(now)))
                .collect();
            ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let excess = self.patterns.len() - self.config.max_patterns;
            for (id, _) in ranked.into_iter().take(excess) {
                self.patterns.remove(&id);
            }
        }
        before - self.patterns.len()
    }

    /// Stop inhibiting a removed node; patterns left with no nodes go.
    pub fn forget_node(&mut self, id: &NodeId) {
        for p in self.patterns.values_mut() {
            p.inhibited_nodes.remove(id);
        }
        self.patterns.retain(|_, p| !p.inhibited_nodes.is_empty());
    }

    pub fn stats(&self, now: Timestamp) -> InhibitoryStats {
        let strengths: Vec<f64> = self.patterns.values().map(|p| p.effective_strength(now)).collect();
        InhibitoryStats {
            pattern_count: strengths.len(),
            average_strength: if strengths.is_empty() {
                0.0
            } else {
                strengths.iter().sum::<f64>() / strengths.len() as f64
            },
            total_failures: self.total_failures,
            reinforcements: self.reinforcements,
            inhibitions_applied: self.inhibitions_applied,
        }
    }

    pub fn export(&self) -> InhibitoryTable {
        InhibitoryTable {
            patterns: self.patterns.values().cloned().collect(),
            total_failures: self.total_failures,
            reinforcements: self.reinforcements,
            inhibitions_applied: self.inhibitions_applied,
        }
    }

    pub fn import(&mut self, table: InhibitoryTable) -> Result<(), PersistenceError> {
        for p in &table.patterns {
            if !(0.0..=1.0).contains(&p.strength) || !p.decay_rate.is_finite() || p.id.is_empty() {
                return Err(PersistenceError::Corrupt(format!(
                    "inhibitory pattern {} has invalid fields",
                    p.id
                )));
            }
        }
        self.patterns = table.patterns.into_iter().map(|p| (p.id.clone(), p)).collect();
        self.total_failures = table.total_failures;
        self.reinforcements = table.reinforcements;
        self.inhibitions_applied = table.inhibitions_applied;
        Ok(())
    }
}
