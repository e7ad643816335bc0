//! Layered task context: immediate, session, project and domain.
//!
//! Each level holds a context that applies to every query issued while it
//! is set. Resolution starts at the immediate level (the query's own
//! context plus any stored immediate layer) and walks up towards broader
//! levels, discounting each by its level decay. A layer marked
//! `exclude_parent` stops the walk there.

use mindmap_core::context::QueryContext;
use mindmap_core::types::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextLevel {
    Immediate,
    Session,
    #[default]
    Project,
    Domain,
}

impl ContextLevel {
    pub const ALL: [ContextLevel; 4] = [
        ContextLevel::Immediate,
        ContextLevel::Session,
        ContextLevel::Project,
        ContextLevel::Domain,
    ];

    fn rank(self) -> usize {
        match self {
            ContextLevel::Immediate => 0,
            ContextLevel::Session => 1,
            ContextLevel::Project => 2,
            ContextLevel::Domain => 3,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "immediate" => Some(ContextLevel::Immediate),
            "session" => Some(ContextLevel::Session),
            "project" => Some(ContextLevel::Project),
            "domain" => Some(ContextLevel::Domain),
            _ => None,
        }
    }
}

/// Context hierarchy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    /// Relevance multiplier per level, immediate to domain (default: 1.0, 0.8, 0.6, 0.4).
    pub level_decays: [f64; 4],
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            level_decays: [1.0, 0.8, 0.6, 0.4],
        }
    }
}

impl HierarchyConfig {
    pub fn decay(&self, level: ContextLevel) -> f64 {
        self.level_decays[level.rank()]
    }
}

/// A stored context at one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextLayer {
    pub level: ContextLevel,
    pub context: QueryContext,
    /// Stop inheritance from broader levels at this layer.
    pub exclude_parent: bool,
    pub updated_at: Timestamp,
}

/// Weighted token profile produced by resolving the hierarchy.
///
/// Consumed by activation (context relevance), attention (contextual
/// factor), fusion (contextual modality) and the inhibitory matcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextProfile {
    weights: BTreeMap<String, f64>,
    focus_nodes: BTreeSet<NodeId>,
    levels: Vec<ContextLevel>,
}

impl ContextProfile {
    /// A flat profile at weight 1.0 for a single context.
    pub fn from_context(ctx: &QueryContext) -> Self {
        let mut profile = Self::default();
        profile.add_context(ctx, 1.0);
        profile
    }

    /// Merge a context's tokens at `weight`, keeping the higher weight per token.
    pub fn add_context(&mut self, ctx: &QueryContext, weight: f64) {
        for token in ctx.tokens() {
            let w = self.weights.entry(token).or_insert(0.0);
            if weight > *w {
                *w = weight;
            }
        }
        self.focus_nodes.extend(ctx.focus_nodes.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn tokens(&self) -> BTreeSet<String> {
        self.weights.keys().cloned().collect()
    }

    pub fn weight(&self, token: &str) -> f64 {
        self.weights.get(token).copied().unwrap_or(0.0)
    }

    pub fn focus_nodes(&self) -> &BTreeSet<NodeId> {
        &self.focus_nodes
    }

    /// Levels that contributed, narrowest first.
    pub fn levels(&self) -> &[ContextLevel] {
        &self.levels
    }

    /// Weighted share of the profile covered by `tokens`, in 0.0-1.0.
    ///
    /// Adding an overlapping token never lowers the value.
    pub fn relevance(&self, tokens: &BTreeSet<String>) -> f64 {
        let total: f64 = self.weights.values().sum();
        if total <= 0.0 {
            return 0.0;
        }
        let matched: f64 = tokens.iter().map(|t| self.weight(t)).sum();
        (matched / total).clamp(0.0, 1.0)
    }
}

/// The four-level context store.
#[derive(Debug, Clone, Default)]
pub struct ContextHierarchy {
    config: HierarchyConfig,
    layers: BTreeMap<ContextLevel, ContextLayer>,
}

impl ContextHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: HierarchyConfig) -> Self {
        Self {
            config,
            layers: BTreeMap::new(),
        }
    }

    pub fn set_layer(&mut self, level: ContextLevel, context: QueryContext, exclude_parent: bool, now: Timestamp) {
        self.layers.insert(
            level,
            ContextLayer {
                level,
                context,
                exclude_parent,
                updated_at: now,
            },
        );
    }

    pub fn clear_layer(&mut self, level: ContextLevel) -> Option<ContextLayer> {
        self.layers.remove(&level)
    }

    pub fn layer(&self, level: ContextLevel) -> Option<&ContextLayer> {
        self.layers.get(&level)
    }

    /// Resolve the request context against stored layers up to `up_to`.
    pub fn resolve(&self, request: &QueryContext, up_to: ContextLevel) -> ContextProfile {
        let mut profile = ContextProfile::from_context(request);
        profile.levels.push(ContextLevel::Immediate);

        for level in ContextLevel::ALL {
            if level.rank() > up_to.rank() {
                break;
            }
            let Some(layer) = self.layers.get(&level) else {
                continue;
            };
            profile.add_context(&layer.context, self.config.decay(level));
            if !profile.levels.contains(&level) {
                profile.levels.push(level);
            }
            if layer.exclude_parent {
                break;
            }
        }
        profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn hierarchy() -> ContextHierarchy {
        let now = Utc::now();
        let mut h = ContextHierarchy::new();
        h.set_layer(ContextLevel::Session, QueryContext::new().with_task("payment refactor"), false, now);
        h.set_layer(ContextLevel::Project, QueryContext::new().with_goal("billing platform"), false, now);
        h.set_layer(ContextLevel::Domain, QueryContext::new().with_goal("fintech ledger"), false, now);
        h
    }

    #[test]
    fn resolve_walks_up_to_requested_level() {
        let h = hierarchy();
        let request = QueryContext::new().with_task("fix invoice");

        let immediate = h.resolve(&request, ContextLevel::Immediate);
        assert_eq!(immediate.weight("invoice"), 1.0);
        assert_eq!(immediate.weight("payment"), 0.0);

        let project = h.resolve(&request, ContextLevel::Project);
        assert_eq!(project.weight("payment"), 0.8);
        assert_eq!(project.weight("billing"), 0.6);
        assert_eq!(project.weight("ledger"), 0.0);

        let domain = h.resolve(&request, ContextLevel::Domain);
        assert_eq!(domain.weight("ledger"), 0.4);
    }

    #[test]
    fn exclude_parent_stops_inheritance() {
        let mut h = hierarchy();
        h.set_layer(ContextLevel::Session, QueryContext::new().with_task("payment refactor"), true, Utc::now());
        let profile = h.resolve(&QueryContext::new(), ContextLevel::Domain);
        assert_eq!(profile.weight("payment"), 0.8);
        assert_eq!(profile.weight("billing"), 0.0);
    }

    #[test]
    fn relevance_is_monotonic_in_overlap() {
        let profile = ContextProfile::from_context(&QueryContext::new().with_task("payment timeout retry"));
        let none: BTreeSet<String> = BTreeSet::new();
        let one: BTreeSet<String> = ["payment".to_string()].into_iter().collect();
        let two: BTreeSet<String> = ["payment".to_string(), "retry".to_string()].into_iter().collect();
        assert_eq!(profile.relevance(&none), 0.0);
        assert!(profile.relevance(&one) < profile.relevance(&two));
        assert!(profile.relevance(&two) <= 1.0);
    }
}
