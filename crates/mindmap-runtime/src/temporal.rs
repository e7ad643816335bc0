//! Bi-temporal layer: valid time, transaction time and revision history.
//!
//! Every tracked edge carries two clocks. Valid time says when the
//! relation was true in the codebase; transaction time says when we
//! learned about it and each later change. Invalidation only closes the
//! valid interval, so history survives for audit and for trend analysis.
//!
//! Named context windows tag revisions made while they are open. They
//! never touch the graph itself.

use mindmap_core::error::TemporalError;
use mindmap_core::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Temporal layer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    /// Change events retained for the prediction engine (default: 10000).
    pub max_events: usize,
    /// Closed context windows retained for audit (default: 256).
    pub max_closed_windows: usize,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            max_events: 10_000,
            max_closed_windows: 256,
        }
    }
}

/// When a relation holds. `end == None` means still valid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidTime {
    pub start: Timestamp,
    pub end: Option<Timestamp>,
}

impl ValidTime {
    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && self.end.map_or(true, |end| t <= end)
    }
}

/// Before/after values of one changed property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub before: Option<String>,
    pub after: Option<String>,
}

/// One append-only entry in an edge's transaction history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub at: Timestamp,
    pub changes: BTreeMap<String, PropertyChange>,
    /// Context windows open when the revision was recorded.
    #[serde(default)]
    pub windows: Vec<String>,
}

/// When we learned about a relation and every change since.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionTime {
    pub created: Timestamp,
    pub last_modified: Timestamp,
    pub revisions: Vec<Revision>,
}

/// An edge annotated with valid time and transaction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalEdge {
    pub edge: Edge,
    pub valid_time: ValidTime,
    /// Closed intervals from before the edge was last revalidated, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub earlier_valid: Vec<ValidTime>,
    pub transaction_time: TransactionTime,
    /// Every context window that ever tagged a revision of this edge.
    #[serde(default)]
    pub context_windows: Vec<String>,
}

impl TemporalEdge {
    /// Whether the relation held at `t` in any of its valid intervals.
    pub fn valid_at(&self, t: Timestamp) -> bool {
        self.valid_time.contains(t) || self.earlier_valid.iter().any(|v| v.contains(t))
    }
}

/// A named audit window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub name: String,
    pub opened_at: Timestamp,
    pub closed_at: Option<Timestamp>,
    pub edges_touched: Vec<EdgeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Revised,
    Invalidated,
}

/// A change to a tracked edge, consumed by trend analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub edge_id: EdgeId,
    pub edge_type: EdgeType,
    pub source: NodeId,
    pub target: NodeId,
    pub kind: ChangeKind,
    pub at: Timestamp,
}

/// Counters reported by `get_bi_temporal_stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiTemporalStats {
    pub tracked_edges: usize,
    pub currently_valid: usize,
    pub invalidated: usize,
    pub total_revisions: usize,
    pub open_windows: usize,
    pub windows_opened: u64,
}

/// Valid-time and transaction-time bookkeeping for graph edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalLayer {
    config: TemporalConfig,
    edges: BTreeMap<EdgeId, TemporalEdge>,
    open_windows: BTreeMap<String, ContextWindow>,
    closed_windows: VecDeque<ContextWindow>,
    events: VecDeque<ChangeEvent>,
    windows_opened: u64,
}

fn describe(value: f64) -> Option<String> {
    Some(format!("{}", value))
}

fn diff(before: &Edge, after: &Edge) -> BTreeMap<String, PropertyChange> {
    let mut changes = BTreeMap::new();
    if before.weight != after.weight {
        changes.insert(
            "weight".to_string(),
            PropertyChange { before: describe(before.weight), after: describe(after.weight) },
        );
    }
    if before.confidence != after.confidence {
        changes.insert(
            "confidence".to_string(),
            PropertyChange { before: describe(before.confidence), after: describe(after.confidence) },
        );
    }
    let keys: std::collections::BTreeSet<&String> =
        before.metadata.keys().chain(after.metadata.keys()).collect();
    for key in keys {
        let b = before.metadata.get(key);
        let a = after.metadata.get(key);
        if a != b {
            changes.insert(
                format!("metadata.{}", key),
                PropertyChange { before: b.cloned(), after: a.cloned() },
            );
        }
    }
    changes
}

impl TemporalLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TemporalConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    fn record_event(&mut self, edge: &Edge, kind: ChangeKind, at: Timestamp) {
        self.events.push_back(ChangeEvent {
            edge_id: edge.id.clone(),
            edge_type: edge.edge_type,
            source: edge.source.clone(),
            target: edge.target.clone(),
            kind,
            at,
        });
        while self.events.len() > self.config.max_events {
            self.events.pop_front();
        }
    }

    fn open_window_names(&self) -> Vec<String> {
        self.open_windows.keys().cloned().collect()
    }

    /// Append a revision, tagging it with the open windows.
    fn append_revision(
        &mut self,
        id: &EdgeId,
        changes: BTreeMap<String, PropertyChange>,
        now: Timestamp,
    ) -> Result<(), TemporalError> {
        let windows = self.open_window_names();
        for w in self.open_windows.values_mut() {
            if !w.edges_touched.contains(id) {
                w.edges_touched.push(id.clone());
            }
        }
        let tracked = self
            .edges
            .get_mut(id)
            .ok_or_else(|| TemporalError::NotTracked(id.clone()))?;
        // Revisions stay ordered even if the caller's clock steps back.
        let at = now.max(tracked.transaction_time.last_modified);
        for w in &windows {
            if !tracked.context_windows.contains(w) {
                tracked.context_windows.push(w.clone());
            }
        }
        tracked.transaction_time.revisions.push(Revision { at, changes, windows });
        tracked.transaction_time.last_modified = at;
        Ok(())
    }

    /// Start tracking an edge valid from `valid_from`.
    pub fn track(&mut self, edge: Edge, valid_from: Timestamp, now: Timestamp) -> Result<(), TemporalError> {
        if self.edges.contains_key(&edge.id) {
            return Err(TemporalError::AlreadyTracked(edge.id));
        }
        let windows = self.open_window_names();
        for w in self.open_windows.values_mut() {
            w.edges_touched.push(edge.id.clone());
        }
        self.record_event(&edge, ChangeKind::Created, now);
        debug!(edge = %edge.id, "tracking temporal edge");
        self.edges.insert(
            edge.id.clone(),
            TemporalEdge {
                edge,
                valid_time: ValidTime { start: valid_from, end: None },
                earlier_valid: Vec::new(),
                transaction_time: TransactionTime {
                    created: now,
                    last_modified: now,
                    revisions: Vec::new(),
                },
                context_windows: windows,
            },
        );
        Ok(())
    }

    /// Track a new edge, or record a revision if its properties changed.
    ///
    /// An edge that was invalidated and shows up again is revalidated
    /// from `now`; the closed interval moves to `earlier_valid`.
    pub fn sync(&mut self, edge: &Edge, now: Timestamp) -> Result<(), TemporalError> {
        let Some(existing) = self.edges.get(&edge.id) else {
            return self.track(edge.clone(), now, now);
        };
        let mut changes = diff(&existing.edge, edge);
        let revalidate = existing.valid_time.end.is_some();
        if revalidate {
            changes.insert(
                "valid_time.end".to_string(),
                PropertyChange {
                    before: existing.valid_time.end.map(|t| t.to_rfc3339()),
                    after: None,
                },
            );
        }
        if changes.is_empty() {
            return Ok(());
        }
        self.append_revision(&edge.id, changes, now)?;
        if let Some(tracked) = self.edges.get_mut(&edge.id) {
            tracked.edge = edge.clone();
            if revalidate {
                let closed = std::mem::replace(&mut tracked.valid_time, ValidTime { start: now, end: None });
                tracked.earlier_valid.push(closed);
            }
        }
        self.record_event(edge, ChangeKind::Revised, now);
        Ok(())
    }

    /// Apply a property update, appending a revision. Valid time is untouched.
    pub fn update(&mut self, id: &EdgeId, update: &EdgeUpdate, now: Timestamp) -> Result<&Revision, TemporalError> {
        let tracked = self
            .edges
            .get(id)
            .ok_or_else(|| TemporalError::NotTracked(id.clone()))?;
        let mut next = tracked.edge.clone();
        if let Some(w) = update.weight {
            next.weight = w;
        }
        if let Some(c) = update.confidence {
            next.confidence = c;
        }
        for (k, v) in &update.metadata {
            next.metadata.insert(k.clone(), v.clone());
        }
        let changes = diff(&tracked.edge, &next);
        self.append_revision(id, changes, now)?;
        self.record_event(&next, ChangeKind::Revised, now);
        let tracked = self
            .edges
            .get_mut(id)
            .ok_or_else(|| TemporalError::NotTracked(id.clone()))?;
        tracked.edge = next;
        tracked
            .transaction_time
            .revisions
            .last()
            .ok_or_else(|| TemporalError::NotTracked(id.clone()))
    }

    /// Soft-expire an edge: its valid interval ends at `at`.
    pub fn invalidate(&mut self, id: &EdgeId, at: Timestamp, now: Timestamp) -> Result<(), TemporalError> {
        let tracked = self
            .edges
            .get(id)
            .ok_or_else(|| TemporalError::NotTracked(id.clone()))?;
        if at < tracked.valid_time.start {
            return Err(TemporalError::InvalidInterval {
                edge: id.clone(),
                start: tracked.valid_time.start.to_rfc3339(),
                end: at.to_rfc3339(),
            });
        }
        let mut changes = BTreeMap::new();
        changes.insert(
            "valid_time.end".to_string(),
            PropertyChange {
                before: tracked.valid_time.end.map(|t| t.to_rfc3339()),
                after: Some(at.to_rfc3339()),
            },
        );
        let edge = tracked.edge.clone();
        self.append_revision(id, changes, now)?;
        if let Some(tracked) = self.edges.get_mut(id) {
            tracked.valid_time.end = Some(at);
        }
        self.record_event(&edge, ChangeKind::Invalidated, now);
        debug!(edge = %id, at = %at, "invalidated temporal edge");
        Ok(())
    }

    /// Edges valid at `t`, ordered by id.
    pub fn query_at(&self, t: Timestamp) -> Vec<&TemporalEdge> {
        self.edges.values().filter(|e| e.valid_at(t)).collect()
    }

    /// Whether `id` is valid at `t`. Untracked edges are treated as always valid.
    pub fn is_valid_at(&self, id: &EdgeId, t: Timestamp) -> bool {
        self.edges.get(id).map_or(true, |e| e.valid_at(t))
    }

    pub fn is_tracked(&self, id: &EdgeId) -> bool {
        self.edges.contains_key(id)
    }

    pub fn get(&self, id: &EdgeId) -> Option<&TemporalEdge> {
        self.edges.get(id)
    }

    /// Revision list of an edge, oldest first.
    pub fn history(&self, id: &EdgeId) -> Result<&[Revision], TemporalError> {
        self.edges
            .get(id)
            .map(|e| e.transaction_time.revisions.as_slice())
            .ok_or_else(|| TemporalError::NotTracked(id.clone()))
    }

    pub fn open_window(&mut self, name: &str, now: Timestamp) -> Result<(), TemporalError> {
        if self.open_windows.contains_key(name) {
            return Err(TemporalError::WindowAlreadyOpen(name.to_string()));
        }
        self.open_windows.insert(
            name.to_string(),
            ContextWindow {
                name: name.to_string(),
                opened_at: now,
                closed_at: None,
                edges_touched: Vec::new(),
            },
        );
        self.windows_opened += 1;
        Ok(())
    }

    pub fn close_window(&mut self, name: &str, now: Timestamp) -> Result<ContextWindow, TemporalError> {
        let mut window = self
            .open_windows
            .remove(name)
            .ok_or_else(|| TemporalError::WindowNotOpen(name.to_string()))?;
        window.closed_at = Some(now);
        self.closed_windows.push_back(window.clone());
        while self.closed_windows.len() > self.config.max_closed_windows {
            self.closed_windows.pop_front();
        }
        Ok(window)
    }

    pub fn closed_windows(&self) -> impl Iterator<Item = &ContextWindow> {
        self.closed_windows.iter()
    }

    /// Change events at or after `since`, oldest first.
    pub fn change_events(&self, since: Timestamp) -> Vec<&ChangeEvent> {
        self.events.iter().filter(|e| e.at >= since).collect()
    }

    pub fn stats(&self, now: Timestamp) -> BiTemporalStats {
        BiTemporalStats {
            tracked_edges: self.edges.len(),
            currently_valid: self.edges.values().filter(|e| e.valid_time.contains(now)).count(),
            invalidated: self.edges.values().filter(|e| e.valid_time.end.is_some()).count(),
            total_revisions: self.edges.values().map(|e| e.transaction_time.revisions.len()).sum(),
            open_windows: self.open_windows.len(),
            windows_opened: self.windows_opened,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn edge() -> Edge {
        Edge::new("a.rs", "b.rs", EdgeType::Imports)
    }

    #[test]
    fn invalidate_closes_valid_interval() {
        let mut layer = TemporalLayer::new();
        let e = edge();
        let id = e.id.clone();
        layer.track(e, t0(), t0()).unwrap();

        let at = t0() + Duration::hours(5);
        layer.invalidate(&id, at, at).unwrap();

        let eps = Duration::milliseconds(1);
        assert_eq!(layer.query_at(at - eps).len(), 1);
        assert!(layer.query_at(at + eps).is_empty());
        assert!(layer.get(&id).is_some(), "history is preserved");
        assert_eq!(layer.history(&id).unwrap().len(), 1);
    }

    #[test]
    fn invalidate_before_start_rejected() {
        let mut layer = TemporalLayer::new();
        let e = edge();
        let id = e.id.clone();
        layer.track(e, t0(), t0()).unwrap();
        let err = layer.invalidate(&id, t0() - Duration::seconds(1), t0()).unwrap_err();
        assert!(matches!(err, TemporalError::InvalidInterval { .. }));
    }

    #[test]
    fn update_appends_revision_without_touching_valid_time() {
        let mut layer = TemporalLayer::new();
        let e = edge();
        let id = e.id.clone();
        layer.track(e, t0(), t0()).unwrap();

        let rev = layer.update(&id, &EdgeUpdate::confidence(0.4), t0() + Duration::minutes(1)).unwrap();
        let change = &rev.changes["confidence"];
        assert_eq!(change.before.as_deref(), Some("1"));
        assert_eq!(change.after.as_deref(), Some("0.4"));

        layer.update(&id, &EdgeUpdate::weight(2.0), t0() + Duration::minutes(2)).unwrap();
        let tracked = layer.get(&id).unwrap();
        assert_eq!(tracked.valid_time, ValidTime { start: t0(), end: None });
        let times: Vec<_> = tracked.transaction_time.revisions.iter().map(|r| r.at).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(tracked.edge.weight, 2.0);
    }

    #[test]
    fn windows_tag_revisions() {
        let mut layer = TemporalLayer::new();
        let e = edge();
        let id = e.id.clone();
        layer.track(e, t0(), t0()).unwrap();

        layer.open_window("refactor-auth", t0()).unwrap();
        assert!(layer.open_window("refactor-auth", t0()).is_err());
        layer.update(&id, &EdgeUpdate::weight(0.5), t0() + Duration::seconds(1)).unwrap();
        let window = layer.close_window("refactor-auth", t0() + Duration::seconds(2)).unwrap();

        assert_eq!(window.edges_touched, vec![id.clone()]);
        let rev = &layer.history(&id).unwrap()[0];
        assert_eq!(rev.windows, vec!["refactor-auth".to_string()]);
        assert_eq!(layer.get(&id).unwrap().context_windows, vec!["refactor-auth".to_string()]);
        assert!(layer.close_window("refactor-auth", t0()).is_err());
        assert_eq!(layer.stats(t0()).windows_opened, 1);
    }

    #[test]
    fn sync_is_idempotent_and_revalidates() {
        let mut layer = TemporalLayer::new();
        let e = edge();
        layer.sync(&e, t0()).unwrap();
        layer.sync(&e, t0() + Duration::seconds(1)).unwrap();
        assert!(layer.history(&e.id).unwrap().is_empty());

        layer.invalidate(&e.id, t0() + Duration::hours(1), t0() + Duration::hours(1)).unwrap();
        let back = t0() + Duration::hours(2);
        layer.sync(&e, back).unwrap();
        assert!(layer.is_valid_at(&e.id, back));
        assert_eq!(layer.change_events(t0()).len(), 3);
    }

    #[test]
    fn revalidation_keeps_the_closed_interval() {
        let mut layer = TemporalLayer::new();
        let e = edge();
        layer.sync(&e, t0()).unwrap();
        let cut = t0() + Duration::hours(1);
        layer.invalidate(&e.id, cut, cut).unwrap();
        let back = t0() + Duration::hours(3);
        layer.sync(&e, back).unwrap();

        assert!(layer.is_valid_at(&e.id, cut - Duration::minutes(1)));
        assert!(!layer.is_valid_at(&e.id, t0() + Duration::hours(2)));
        assert!(layer.is_valid_at(&e.id, back + Duration::minutes(1)));
        let tracked = layer.get(&e.id).unwrap();
        assert_eq!(tracked.earlier_valid, vec![ValidTime { start: t0(), end: Some(cut) }]);
        assert_eq!(layer.query_at(t0() + Duration::minutes(30)).len(), 1);
    }

    #[test]
    fn stats_count_valid_and_invalidated() {
        let mut layer = TemporalLayer::new();
        let a = edge();
        let b = Edge::new("b.rs", "c.rs", EdgeType::Calls);
        layer.track(a.clone(), t0(), t0()).unwrap();
        layer.track(b, t0(), t0()).unwrap();
        layer.invalidate(&a.id, t0() + Duration::seconds(10), t0()).unwrap();
        let stats = layer.stats(t0() + Duration::minutes(1));
        assert_eq!(stats.tracked_edges, 2);
        assert_eq!(stats.currently_valid, 1);
        assert_eq!(stats.invalidated, 1);
        assert_eq!(stats.total_revisions, 1);
    }
}
