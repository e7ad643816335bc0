//! Activation spreading: multi-hop relevance propagation.
//!
//! Energy starts at 1.0 on each seed and flows outward one level at a
//! time. Every hop multiplies it by the edge's confidence, its weight
//! (capped at 1.0) and a fixed decay. Nodes that end up below the
//! activation threshold are dropped and do not propagate.
//!
//! Each node is expanded at most once, at the first level it is reached,
//! which is its minimum hop distance. That keeps the walk finite on
//! cyclic graphs and bounds it to `max_levels` rounds.

use mindmap_core::store::GraphStore;
use mindmap_core::text::tokenize;
use mindmap_core::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::context_hierarchy::ContextProfile;

/// Activation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    /// Energy multiplier per hop (default: 0.7).
    pub decay: f64,
    /// Energy below which a node neither surfaces nor propagates (default: 0.1).
    pub threshold: f64,
    /// Scale of the context relevance boost on the total score (default: 0.5).
    pub context_boost: f64,
    /// Hard upper bound on hops accepted from callers (default: 10).
    pub max_levels_limit: usize,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            decay: 0.7,
            threshold: 0.1,
            context_boost: 0.5,
            max_levels_limit: 10,
        }
    }
}

/// Learned associations that act as extra `co_activates` neighbours.
pub trait AssociationSource {
    /// Associated nodes and their current strengths.
    fn associations(&self, id: &NodeId) -> Vec<(NodeId, f64)>;
}

/// No learned associations.
pub struct NoAssociations;

impl AssociationSource for NoAssociations {
    fn associations(&self, _id: &NodeId) -> Vec<(NodeId, f64)> {
        Vec::new()
    }
}

/// One activated node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationResult {
    pub node_id: NodeId,
    pub activation_strength: f64,
    pub hop_distance: usize,
    pub context_relevance: f64,
    pub total_score: f64,
}

/// Which nodes were expanded, and at which hop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpreadTrace {
    pub expanded: Vec<(NodeId, usize)>,
    pub levels_run: usize,
}

/// Everything a spread needs besides the graph.
pub struct SpreadRequest<'a> {
    pub seeds: &'a [NodeId],
    pub profile: &'a ContextProfile,
    pub max_levels: usize,
    pub edge_types: Option<&'a [EdgeType]>,
    /// Edges rejected here do not carry energy (used for `valid_at`).
    pub edge_filter: Option<&'a dyn Fn(&EdgeId) -> bool>,
}

impl<'a> SpreadRequest<'a> {
    pub fn new(seeds: &'a [NodeId], profile: &'a ContextProfile, max_levels: usize) -> Self {
        Self {
            seeds,
            profile,
            max_levels,
            edge_types: None,
            edge_filter: None,
        }
    }

    pub fn with_edge_types(mut self, types: &'a [EdgeType]) -> Self {
        self.edge_types = Some(types);
        self
    }

    pub fn with_edge_filter(mut self, filter: &'a dyn Fn(&EdgeId) -> bool) -> Self {
        self.edge_filter = Some(filter);
        self
    }
}

/// Tokens a node exposes to context matching: name, path, type and metadata values.
pub fn node_tokens(node: &Node) -> BTreeSet<String> {
    let mut tokens: BTreeSet<String> = tokenize(&node.name).into_iter().collect();
    if let Some(path) = &node.path {
        tokens.extend(tokenize(path));
    }
    tokens.extend(tokenize(node.node_type.as_str()));
    for value in node.metadata.values() {
        tokens.extend(tokenize(value));
    }
    tokens
}

/// Spreads activation over a graph store.
#[derive(Debug, Clone, Default)]
pub struct ActivationEngine {
    config: ActivationConfig,
}

impl ActivationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ActivationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ActivationConfig {
        &self.config
    }

    /// Spread from `seeds` over at most `max_levels` hops.
    pub fn spread_activation(
        &self,
        graph: &dyn GraphStore,
        associations: &dyn AssociationSource,
        seeds: &[NodeId],
        profile: &ContextProfile,
        max_levels: usize,
    ) -> Vec<ActivationResult> {
        self.spread(graph, associations, &SpreadRequest::new(seeds, profile, max_levels)).0
    }

    /// Spread and also report which nodes were expanded.
    pub fn spread(
        &self,
        graph: &dyn GraphStore,
        associations: &dyn AssociationSource,
        request: &SpreadRequest<'_>,
    ) -> (Vec<ActivationResult>, SpreadTrace) {
        let mut trace = SpreadTrace::default();
        let max_levels = request.max_levels.min(self.config.max_levels_limit);

        // node -> (minimum hop, energy at that hop)
        let mut visited: BTreeMap<NodeId, (usize, f64)> = BTreeMap::new();
        let mut frontier: BTreeMap<NodeId, f64> = BTreeMap::new();
        for seed in request.seeds {
            if graph.contains_node(seed) {
                visited.insert(seed.clone(), (0, 1.0));
                frontier.insert(seed.clone(), 1.0);
            }
        }
        if frontier.is_empty() {
            return (Vec::new(), trace);
        }

        for level in 1..=max_levels {
            let mut next: BTreeMap<NodeId, f64> = BTreeMap::new();

            for (id, energy) in &frontier {
                if *energy < self.config.threshold {
                    continue;
                }
                trace.expanded.push((id.clone(), level - 1));

                let mut offer = |target: &NodeId, factor: f64| {
                    if visited.contains_key(target) {
                        return;
                    }
                    let e = energy * factor * self.config.decay;
                    if !e.is_finite() || e < self.config.threshold {
                        return;
                    }
                    let slot = next.entry(target.clone()).or_insert(0.0);
                    if e > *slot {
                        *slot = e;
                    }
                };

                for n in graph.neighbors(id, request.edge_types) {
                    if let Some(filter) = request.edge_filter {
                        if !filter(&n.edge_id) {
                            continue;
                        }
                    }
                    offer(&n.node_id, n.confidence * n.weight.min(1.0));
                }

                let assoc_allowed = request
                    .edge_types
                    .map_or(true, |types| types.contains(&EdgeType::CoActivates));
                if assoc_allowed {
                    for (other, strength) in associations.associations(id) {
                        if graph.contains_node(&other) {
                            offer(&other, strength.clamp(0.0, 1.0));
                        }
                    }
                }
            }

            trace.levels_run = level;
            if next.is_empty() {
                break;
            }
            for (id, energy) in &next {
                visited.insert(id.clone(), (level, *energy));
            }
            frontier = next;
        }

        let mut results: Vec<ActivationResult> = visited
            .into_iter()
            .filter_map(|(id, (hop, energy))| {
                let node = graph.get_node(&id)?;
                let relevance = request.profile.relevance(&node_tokens(node));
                Some(ActivationResult {
                    node_id: id,
                    activation_strength: energy,
                    hop_distance: hop,
                    context_relevance: relevance,
                    total_score: energy * (1.0 + self.config.context_boost * relevance),
                })
            })
            .collect();
        sort_results(&mut results);

        debug!(
            seeds = request.seeds.len(),
            activated = results.len(),
            levels = trace.levels_run,
            "spread activation"
        );
        (results, trace)
    }
}

/// Score descending, then node id ascending.
pub fn sort_results(results: &mut [ActivationResult]) {
    results.sort_by(|a, b| {
        b.total_score
            .total_cmp(&a.total_score)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::PetGraphStore;
    use mindmap_core::context::QueryContext;

    fn chain() -> PetGraphStore {
        let mut g = PetGraphStore::new();
        g.add_node(Node::new("fileA", NodeType::File, "fileA").with_confidence(0.9)).unwrap();
        g.add_node(Node::new("fileB", NodeType::File, "fileB").with_confidence(0.5)).unwrap();
        g.add_edge(Edge::new("fileA", "fileB", EdgeType::Imports).with_confidence(0.8)).unwrap();
        g
    }

    fn ids(v: &[&str]) -> Vec<NodeId> {
        v.iter().map(|s| NodeId::from(*s)).collect()
    }

    #[test]
    fn one_hop_energy_is_confidence_times_decay() {
        let g = chain();
        let engine = ActivationEngine::new();
        let results = engine.spread_activation(&g, &NoAssociations, &ids(&["fileA"]), &ContextProfile::default(), 2);

        let b = results.iter().find(|r| r.node_id == NodeId::from("fileB")).unwrap();
        assert_eq!(b.hop_distance, 1);
        assert!((b.activation_strength - 0.56).abs() < 1e-9);
        assert_eq!(results[0].node_id, NodeId::from("fileA"));
    }

    #[test]
    fn empty_seeds_give_empty_result() {
        let g = chain();
        let engine = ActivationEngine::new();
        assert!(engine.spread_activation(&g, &NoAssociations, &[], &ContextProfile::default(), 3).is_empty());
        assert!(engine
            .spread_activation(&g, &NoAssociations, &ids(&["missing"]), &ContextProfile::default(), 3)
            .is_empty());
    }

    #[test]
    fn below_threshold_nodes_do_not_surface() {
        let mut g = chain();
        g.add_node(Node::new("fileC", NodeType::File, "fileC")).unwrap();
        g.add_edge(Edge::new("fileB", "fileC", EdgeType::Imports).with_confidence(0.1)).unwrap();
        let engine = ActivationEngine::new();
        let results = engine.spread_activation(&g, &NoAssociations, &ids(&["fileA"]), &ContextProfile::default(), 5);
        assert!(results.iter().all(|r| r.node_id != NodeId::from("fileC")));
    }

    #[test]
    fn cycles_terminate_and_expand_once() {
        let mut g = PetGraphStore::new();
        for id in ["a", "b", "c"] {
            g.add_node(Node::new(id, NodeType::Function, id)).unwrap();
        }
        g.add_edge(Edge::new("a", "b", EdgeType::Calls)).unwrap();
        g.add_edge(Edge::new("b", "c", EdgeType::Calls)).unwrap();
        g.add_edge(Edge::new("c", "a", EdgeType::Calls)).unwrap();

        let engine = ActivationEngine::new();
        let profile = ContextProfile::default();
        let seeds = ids(&["a"]);
        let (results, trace) = engine.spread(&g, &NoAssociations, &SpreadRequest::new(&seeds, &profile, 10));
        assert_eq!(results.len(), 3);
        let mut seen = BTreeSet::new();
        for (id, _) in &trace.expanded {
            assert!(seen.insert(id.clone()), "{} expanded twice", id);
        }
        // a -> b and a <- c are both one hop in an undirected walk.
        let c = results.iter().find(|r| r.node_id == NodeId::from("c")).unwrap();
        assert_eq!(c.hop_distance, 1);
    }

    #[test]
    fn context_relevance_boosts_score() {
        let mut g = PetGraphStore::new();
        g.add_node(Node::new("root", NodeType::Directory, "root")).unwrap();
        g.add_node(Node::new("auth", NodeType::File, "auth.rs").with_path("src/auth.rs")).unwrap();
        g.add_node(Node::new("zzz", NodeType::File, "render.rs").with_path("src/render.rs")).unwrap();
        g.add_edge(Edge::new("root", "auth", EdgeType::Contains)).unwrap();
        g.add_edge(Edge::new("root", "zzz", EdgeType::Contains)).unwrap();

        let profile = ContextProfile::from_context(&QueryContext::new().with_task("auth login"));
        let engine = ActivationEngine::new();
        let results = engine.spread_activation(&g, &NoAssociations, &ids(&["root"]), &profile, 1);
        let auth = results.iter().position(|r| r.node_id == NodeId::from("auth")).unwrap();
        let other = results.iter().position(|r| r.node_id == NodeId::from("zzz")).unwrap();
        assert!(auth < other);
        assert!(results[auth].context_relevance > 0.0);
        assert_eq!(results[other].context_relevance, 0.0);
    }

    #[test]
    fn associations_act_as_neighbours() {
        struct Fixed;
        impl AssociationSource for Fixed {
            fn associations(&self, id: &NodeId) -> Vec<(NodeId, f64)> {
                if id.as_str() == "fileA" {
                    vec![(NodeId::from("lonely"), 0.9)]
                } else {
                    Vec::new()
                }
            }
        }
        let mut g = chain();
        g.add_node(Node::new("lonely", NodeType::File, "lonely")).unwrap();
        let engine = ActivationEngine::new();
        let results = engine.spread_activation(&g, &Fixed, &ids(&["fileA"]), &ContextProfile::default(), 2);
        let lonely = results.iter().find(|r| r.node_id == NodeId::from("lonely")).unwrap();
        assert!((lonely.activation_strength - 0.63).abs() < 1e-9);

        let no_assoc = engine.spread(
            &g,
            &Fixed,
            &SpreadRequest::new(&ids(&["fileA"]), &ContextProfile::default(), 2).with_edge_types(&[EdgeType::Imports]),
        );
        assert!(no_assoc.0.iter().all(|r| r.node_id != NodeId::from("lonely")));
    }
}
