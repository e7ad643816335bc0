//! Hebbian learning: nodes that surface together wire together.
//!
//! Each query records co-activation over its top results. Connections
//! are undirected, stored under a canonical (smaller id, larger id) key,
//! and strengthen by a saturating rule so they approach but never exceed
//! 1.0. Decay is applied lazily when a strength is read:
//!
//! ```text
//! effective = stored · exp(−decay_rate · hours_since_last_activation)
//! ```
//!
//! A transitive pass links A and C when both A–B and B–C are strong, and
//! pruning keeps the table bounded: connections under the floor go, and
//! no node keeps more than `max_connections_per_node`.

use mindmap_core::context::{OutcomeKind, QueryContext};
use mindmap_core::error::PersistenceError;
use mindmap_core::types::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

use crate::activation::AssociationSource;

/// Hebbian learning configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HebbianConfig {
    /// Step size of the saturating update (default: 0.1).
    pub learning_rate: f64,
    /// Exponential decay per hour of inactivity (default: 0.01).
    pub decay_rate: f64,
    /// Co-activation window in seconds (default: 5).
    pub window_secs: i64,
    /// Results per query that take part in co-activation (default: 5).
    pub top_k: usize,
    /// Both legs must exceed this for a transitive link (default: 0.5).
    pub strengthening_threshold: f64,
    /// Transitive strength is `min(legs) · factor` (default: 0.5).
    pub transitivity_factor: f64,
    /// Connections below this are pruned (default: 0.05).
    pub prune_floor: f64,
    /// Cap on connections touching one node (default: 32).
    pub max_connections_per_node: usize,
    /// Minimum strength for a connection to feed activation (default: 0.1).
    pub association_floor: f64,
}

impl Default for HebbianConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            decay_rate: 0.01,
            window_secs: 5,
            top_k: 5,
            strengthening_threshold: 0.5,
            transitivity_factor: 0.5,
            prune_floor: 0.05,
            max_connections_per_node: 32,
            association_floor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Direct,
    Transitive,
}

/// A learned undirected association. `source_id < target_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HebbianConnection {
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub connection_type: ConnectionType,
    /// Stored strength as of `last_activation`.
    pub strength: f64,
    pub activation_count: u64,
    pub last_activation: Timestamp,
    pub decay_rate: f64,
    pub learning_rate: f64,
}

impl HebbianConnection {
    /// Strength after lazy decay up to `now`.
    pub fn effective_strength(&self, now: Timestamp) -> f64 {
        let hours = (now - self.last_activation).num_milliseconds().max(0) as f64 / 3_600_000.0;
        self.strength * (-self.decay_rate * hours).exp()
    }

    pub fn other(&self, id: &NodeId) -> &NodeId {
        if &self.source_id == id {
            &self.target_id
        } else {
            &self.source_id
        }
    }
}

/// Counters reported by `get_hebbian_stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HebbianStats {
    /// Connections whose effective strength is still above the prune floor.
    pub total_connections: usize,
    pub average_strength: f64,
    pub strongest: Option<(NodeId, NodeId, f64)>,
    pub total_co_activations: u64,
    pub transitive_connections: usize,
}

/// Persistable connection table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HebbianTable {
    pub connections: Vec<HebbianConnection>,
    pub total_co_activations: u64,
}

type PairKey = (NodeId, NodeId);

fn key(a: &NodeId, b: &NodeId) -> PairKey {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// The Hebbian connection table.
#[derive(Debug, Clone, Default)]
pub struct HebbianLearner {
    config: HebbianConfig,
    connections: BTreeMap<PairKey, HebbianConnection>,
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Node sets recorded inside the current window.
    recent: VecDeque<(Timestamp, Vec<NodeId>)>,
    total_co_activations: u64,
}

impl HebbianLearner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: HebbianConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &HebbianConfig {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection(&self, a: &NodeId, b: &NodeId) -> Option<&HebbianConnection> {
        self.connections.get(&key(a, b))
    }

    /// Effective strength between two nodes; 0.0 when unconnected.
    pub fn strength(&self, a: &NodeId, b: &NodeId, now: Timestamp) -> f64 {
        self.connection(a, b).map_or(0.0, |c| c.effective_strength(now))
    }

    /// Associated nodes above the association floor, strongest first.
    pub fn associations(&self, id: &NodeId, now: Timestamp) -> Vec<(NodeId, f64)> {
        let Some(neighbours) = self.adjacency.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<(NodeId, f64)> = neighbours
            .iter()
            .filter_map(|other| {
                let s = self.strength(id, other, now);
                (s >= self.config.association_floor).then(|| (other.clone(), s))
            })
            .collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }

    /// A view that feeds associations into activation at a fixed instant.
    pub fn at(&self, now: Timestamp) -> HebbianView<'_> {
        HebbianView { learner: self, now }
    }

    fn insert(&mut self, conn: HebbianConnection) {
        self.adjacency
            .entry(conn.source_id.clone())
            .or_default()
            .insert(conn.target_id.clone());
        self.adjacency
            .entry(conn.target_id.clone())
            .or_default()
            .insert(conn.source_id.clone());
        self.connections.insert(key(&conn.source_id, &conn.target_id), conn);
    }

    fn remove(&mut self, k: &PairKey) {
        if self.connections.remove(k).is_none() {
            return;
        }
        for (a, b) in [(&k.0, &k.1), (&k.1, &k.0)] {
            if let Some(set) = self.adjacency.get_mut(a) {
                set.remove(b);
                if set.is_empty() {
                    self.adjacency.remove(a);
                }
            }
        }
    }

    /// Apply the saturating rule to one pair.
    fn strengthen(&mut self, a: &NodeId, b: &NodeId, signal: f64, now: Timestamp) {
        let k = key(a, b);
        let lr = self.config.learning_rate;
        match self.connections.get_mut(&k) {
            Some(conn) => {
                let eff = conn.effective_strength(now);
                conn.strength = (eff + conn.learning_rate * (1.0 - eff) * signal).clamp(0.0, 1.0);
                conn.activation_count += 1;
                conn.last_activation = now;
                conn.connection_type = ConnectionType::Direct;
            }
            None => {
                let conn = HebbianConnection {
                    source_id: k.0.clone(),
                    target_id: k.1.clone(),
                    connection_type: ConnectionType::Direct,
                    strength: (lr * signal).clamp(0.0, 1.0),
                    activation_count: 1,
                    last_activation: now,
                    decay_rate: self.config.decay_rate,
                    learning_rate: lr,
                };
                self.insert(conn);
            }
        }
    }

    /// Record that `ids` surfaced together for one query.
    ///
    /// Only the first `top_k` distinct ids take part. Nodes recorded by
    /// earlier calls inside the window pair with the current ones. Returns
    /// the number of pairs updated.
    pub fn record_co_activation(
        &mut self,
        ids: &[NodeId],
        context: &QueryContext,
        signal: f64,
        now: Timestamp,
    ) -> usize {
        let signal = if signal.is_finite() { signal.clamp(0.0, 1.0) } else { 0.0 };
        let mut current: Vec<NodeId> = Vec::new();
        for id in ids {
            if !current.contains(id) {
                current.push(id.clone());
            }
            if current.len() >= self.config.top_k {
                break;
            }
        }

        let horizon = now - chrono::Duration::seconds(self.config.window_secs);
        while self.recent.front().map_or(false, |(t, _)| *t < horizon) {
            self.recent.pop_front();
        }
        if signal <= 0.0 || current.is_empty() {
            return 0;
        }

        let mut window: BTreeSet<NodeId> = current.iter().cloned().collect();
        for (_, earlier) in &self.recent {
            window.extend(earlier.iter().cloned());
        }
        let current_set: BTreeSet<NodeId> = current.iter().cloned().collect();

        let members: Vec<NodeId> = window.into_iter().collect();
        let mut updated = 0;
        for (i, a) in members.iter().enumerate() {
            for b in &members[i + 1..] {
                if current_set.contains(a) || current_set.contains(b) {
                    self.strengthen(a, b, signal, now);
                    updated += 1;
                }
            }
        }

        self.recent.push_back((now, current.clone()));
        self.total_co_activations += 1;

        self.transitive_pass(&current, now);
        self.prune(now);

        debug!(
            nodes = current.len(),
            pairs = updated,
            context = %context.hash(),
            "recorded co-activation"
        );
        updated
    }

    /// Learn from a reported outcome: success at full signal, partial at half.
    pub fn record_outcome(
        &mut self,
        ids: &[NodeId],
        outcome: OutcomeKind,
        context: &QueryContext,
        now: Timestamp,
    ) -> usize {
        let signal = match outcome {
            OutcomeKind::Success => 1.0,
            OutcomeKind::Partial => 0.5,
            OutcomeKind::Error => return 0,
        };
        self.record_co_activation(ids, context, signal, now)
    }

    /// Create or boost A–C for every strong A–B–C path through a current node.
    fn transitive_pass(&mut self, bridges: &[NodeId], now: Timestamp) -> usize {
        let threshold = self.config.strengthening_threshold;
        let mut proposals: BTreeMap<PairKey, f64> = BTreeMap::new();

        for b in bridges {
            let strong: Vec<(NodeId, f64)> = self
                .adjacency
                .get(b)
                .into_iter()
                .flatten()
                .map(|other| (other.clone(), self.strength(b, other, now)))
                .filter(|(_, s)| *s > threshold)
                .collect();
            for (i, (a, sab)) in strong.iter().enumerate() {
                for (c, sbc) in &strong[i + 1..] {
                    let target = sab.min(*sbc) * self.config.transitivity_factor;
                    let slot = proposals.entry(key(a, c)).or_insert(0.0);
                    if target > *slot {
                        *slot = target;
                    }
                }
            }
        }

        let mut touched = 0;
        for (k, target) in proposals {
            if target < self.config.prune_floor {
                continue;
            }
            match self.connections.get_mut(&k) {
                Some(conn) => {
                    if conn.effective_strength(now) < target {
                        conn.strength = target;
                        conn.last_activation = now;
                        touched += 1;
                    }
                }
                None => {
                    self.insert(HebbianConnection {
                        source_id: k.0.clone(),
                        target_id: k.1.clone(),
                        connection_type: ConnectionType::Transitive,
                        strength: target,
                        activation_count: 0,
                        last_activation: now,
                        decay_rate: self.config.decay_rate,
                        learning_rate: self.config.learning_rate,
                    });
                    touched += 1;
                }
            }
        }
        touched
    }

    /// Drop connections under the floor and enforce the per-node cap.
    /// Returns the number removed.
    pub fn prune(&mut self, now: Timestamp) -> usize {
        let floor = self.config.prune_floor;
        let dead: Vec<PairKey> = self
            .connections
            .iter()
            .filter(|(_, c)| c.effective_strength(now) < floor)
            .map(|(k, _)| k.clone())
            .collect();
        let mut removed = dead.len();
        for k in &dead {
            self.remove(k);
        }

        let cap = self.config.max_connections_per_node;
        let crowded: Vec<NodeId> = self
            .adjacency
            .iter()
            .filter(|(_, set)| set.len() > cap)
            .map(|(id, _)| id.clone())
            .collect();
        for id in crowded {
            let mut ranked: Vec<(PairKey, f64)> = self
                .adjacency
                .get(&id)
                .into_iter()
                .flatten()
                .map(|other| {
                    let k = key(&id, other);
                    let s = self.connections.get(&k).map_or(0.0, |c| c.effective_strength(now));
                    (k, s)
                })
                .collect();
            if ranked.len() <= cap {
                continue;
            }
            ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let excess = ranked.len() - cap;
            for (k, _) in ranked.into_iter().take(excess) {
                self.remove(&k);
                removed += 1;
            }
        }
        removed
    }

    pub fn stats(&self, now: Timestamp) -> HebbianStats {
        let live: Vec<(&HebbianConnection, f64)> = self
            .connections
            .values()
            .map(|c| (c, c.effective_strength(now)))
            .filter(|(_, s)| *s >= self.config.prune_floor)
            .collect();
        let total = live.len();
        let average = if total == 0 {
            0.0
        } else {
            live.iter().map(|(_, s)| s).sum::<f64>() / total as f64
        };
        let strongest = live
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(c, s)| (c.source_id.clone(), c.target_id.clone(), *s));
        HebbianStats {
            total_connections: total,
            average_strength: average,
            strongest,
            total_co_activations: self.total_co_activations,
            transitive_connections: live
                .iter()
                .filter(|(c, _)| c.connection_type == ConnectionType::Transitive)
                .count(),
        }
    }

    /// Forget every connection touching `id`.
    pub fn forget_node(&mut self, id: &NodeId) {
        let keys: Vec<PairKey> = self
            .adjacency
            .get(id)
            .into_iter()
            .flatten()
            .map(|other| key(id, other))
            .collect();
        for k in keys {
            self.remove(&k);
        }
    }

    pub fn export(&self) -> HebbianTable {
        HebbianTable {
            connections: self.connections.values().cloned().collect(),
            total_co_activations: self.total_co_activations,
        }
    }

    /// Replace the table with a persisted one, rejecting corrupt entries.
    pub fn import(&mut self, table: HebbianTable) -> Result<(), PersistenceError> {
        for c in &table.connections {
            let valid = (0.0..=1.0).contains(&c.strength)
                && c.decay_rate.is_finite()
                && c.decay_rate >= 0.0
                && c.source_id <= c.target_id;
            if !valid {
                return Err(PersistenceError::Corrupt(format!(
                    "hebbian connection {}-{} has invalid fields",
                    c.source_id, c.target_id
                )));
            }
        }
        self.connections.clear();
        self.adjacency.clear();
        self.recent.clear();
        for c in table.connections {
            self.insert(c);
        }
        self.total_co_activations = table.total_co_activations;
        Ok(())
    }
}

/// A Hebbian table read at a fixed instant.
pub struct HebbianView<'a> {
    learner: &'a HebbianLearner,
    now: Timestamp,
}

impl AssociationSource for HebbianView<'_> {
    fn associations(&self, id: &NodeId) -> Vec<(NodeId, f64)> {
        self.learner.associations(id, self.now)
    }
}
