//! Pattern-emergence prediction over the temporal change log.
//!
//! A scan buckets recent change events per pattern type, fits a
//! least-squares line through the bucket counts and emits a prediction
//! when the rise is both steady (high r²) and backed by enough events.
//! The fitted line also says how many buckets remain until the pattern
//! reaches the emergence level; a prediction that is not confirmed
//! within that time expires.

use chrono::Duration;
use mindmap_core::store::GraphStore;
use mindmap_core::types::{EdgeType, NodeId, NodeType, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};
use uuid::Uuid;

use crate::temporal::{ChangeEvent, ChangeKind, TemporalLayer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Failures and fixes piling up around the same code.
    ErrorHotspot,
    /// New import / dependency edges.
    DependencyGrowth,
    /// Repeated revisions of existing relations.
    RefactoringChurn,
    /// Learned co-activation links forming.
    CouplingEmergence,
}

impl PatternType {
    pub const ALL: [PatternType; 4] = [
        PatternType::ErrorHotspot,
        PatternType::DependencyGrowth,
        PatternType::RefactoringChurn,
        PatternType::CouplingEmergence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::ErrorHotspot => "error_hotspot",
            PatternType::DependencyGrowth => "dependency_growth",
            PatternType::RefactoringChurn => "refactoring_churn",
            PatternType::CouplingEmergence => "coupling_emergence",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prediction engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Minimum time between unforced scans, in seconds (default: 300).
    pub scan_interval_secs: i64,
    /// How far back a scan looks, in seconds (default: 86400).
    pub lookback_secs: i64,
    /// Width of one trend bucket, in seconds (default: 3600).
    pub bucket_secs: i64,
    /// Minimum confidence for a prediction to be emitted (default: 0.5).
    pub detection_threshold: f64,
    /// Events per bucket at which a pattern counts as emerged (default: 10.0).
    pub emergence_level: f64,
    /// Fewer events than this in the lookback never predict (default: 3).
    pub min_events: usize,
    /// Evidence ids kept per prediction (default: 10).
    pub max_evidence: usize,
    /// Bound on stored predictions, oldest dropped first (default: 200).
    pub max_predictions: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 300,
            lookback_secs: 86_400,
            bucket_secs: 3_600,
            detection_threshold: 0.5,
            emergence_level: 10.0,
            min_events: 3,
            max_evidence: 10,
            max_predictions: 200,
        }
    }
}

/// A forecast that a pattern is about to emerge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternPrediction {
    pub id: String,
    pub pattern_type: PatternType,
    pub confidence: f64,
    /// Seconds until the fitted trend reaches the emergence level.
    pub time_to_emergence_secs: i64,
    /// Edge ids of the most recent supporting events.
    pub evidence: Vec<String>,
    /// Other rising patterns that fell short of the threshold.
    pub alternatives: Vec<PatternType>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub confirmed: bool,
    pub confirmed_at: Option<Timestamp>,
}

impl PatternPrediction {
    pub fn is_active(&self, now: Timestamp) -> bool {
        !self.confirmed && self.expires_at > now
    }
}

/// Least-squares fit through bucket counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub total_events: usize,
    pub buckets: usize,
}

impl Trend {
    /// Fit `count = intercept + slope · bucket`.
    pub fn fit(counts: &[f64]) -> Self {
        let n = counts.len();
        let total_events = counts.iter().sum::<f64>().round() as usize;
        if n < 2 {
            return Self {
                slope: 0.0,
                intercept: counts.first().copied().unwrap_or(0.0),
                r_squared: 0.0,
                total_events,
                buckets: n,
            };
        }
        let nf = n as f64;
        let mean_x = (nf - 1.0) / 2.0;
        let mean_y = counts.iter().sum::<f64>() / nf;
        let mut sxy = 0.0;
        let mut sxx = 0.0;
        let mut syy = 0.0;
        for (i, y) in counts.iter().enumerate() {
            let dx = i as f64 - mean_x;
            let dy = y - mean_y;
            sxy += dx * dy;
            sxx += dx * dx;
            syy += dy * dy;
        }
        let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
        let r_squared = if sxx > 0.0 && syy > 0.0 {
            (sxy * sxy) / (sxx * syy)
        } else {
            0.0
        };
        Self {
            slope,
            intercept: mean_y - slope * mean_x,
            r_squared,
            total_events,
            buckets: n,
        }
    }

    /// Fitted value at the newest bucket.
    pub fn current(&self) -> f64 {
        self.intercept + self.slope * self.buckets.saturating_sub(1) as f64
    }

    /// Buckets until the fitted line reaches `level`, at least one.
    pub fn buckets_until(&self, level: f64) -> Option<i64> {
        if self.slope <= 0.0 {
            return None;
        }
        let remaining = ((level - self.current()) / self.slope).ceil();
        Some((remaining as i64).max(1))
    }
}

/// Counters reported by `get_prediction_engine_stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionStats {
    pub scans: u64,
    pub predictions_emitted: u64,
    pub active: usize,
    pub confirmed: u64,
    pub expired: u64,
    pub last_scan: Option<Timestamp>,
}

/// Which pattern a change event feeds, if any.
fn classify(event: &ChangeEvent, graph: &dyn GraphStore) -> Option<PatternType> {
    if event.edge_type == EdgeType::CoActivates {
        return Some(PatternType::CouplingEmergence);
    }
    let touches_error = [&event.source, &event.target]
        .iter()
        .any(|id| graph.get_node(id).is_some_and(|n| n.node_type == NodeType::Error));
    if matches!(event.edge_type, EdgeType::Fixes | EdgeType::Detects) || touches_error {
        return Some(PatternType::ErrorHotspot);
    }
    match (event.kind, event.edge_type) {
        (ChangeKind::Revised, _) => Some(PatternType::RefactoringChurn),
        (ChangeKind::Created, EdgeType::Imports | EdgeType::DependsOn) => Some(PatternType::DependencyGrowth),
        _ => None,
    }
}

/// Scans the change log and keeps the resulting predictions.
#[derive(Debug, Clone, Default)]
pub struct PatternPredictionEngine {
    config: PredictionConfig,
    predictions: Vec<PatternPrediction>,
    last_scan: Option<Timestamp>,
    scans: u64,
    emitted: u64,
    confirmed: u64,
    expired: u64,
}

impl PatternPredictionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PredictionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    /// Whether an unforced scan would run at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        match self.last_scan {
            None => true,
            Some(last) => now - last >= Duration::seconds(self.config.scan_interval_secs),
        }
    }

    /// Per-type trends over the lookback window ending at `now`.
    pub fn trends(&self, graph: &dyn GraphStore, temporal: &TemporalLayer, now: Timestamp) -> BTreeMap<PatternType, (Trend, Vec<String>)> {
        let bucket_secs = self.config.bucket_secs.max(1);
        let lookback = self.config.lookback_secs.max(bucket_secs);
        let buckets = (lookback / bucket_secs) as usize;
        let start = now - Duration::seconds(buckets as i64 * bucket_secs);

        let mut counts: BTreeMap<PatternType, Vec<f64>> =
            PatternType::ALL.iter().map(|t| (*t, vec![0.0; buckets])).collect();
        let mut evidence: BTreeMap<PatternType, Vec<String>> = BTreeMap::new();

        for event in temporal.change_events(start) {
            if event.at > now {
                continue;
            }
            let Some(kind) = classify(event, graph) else {
                continue;
            };
            let idx = (((event.at - start).num_seconds() / bucket_secs) as usize).min(buckets - 1);
            if let Some(c) = counts.get_mut(&kind) {
                c[idx] += 1.0;
            }
            evidence.entry(kind).or_default().push(event.edge_id.to_string());
        }

        counts
            .into_iter()
            .map(|(kind, c)| {
                let mut ev = evidence.remove(&kind).unwrap_or_default();
                ev.reverse();
                let mut seen = BTreeSet::new();
                ev.retain(|id| seen.insert(id.clone()));
                ev.truncate(self.config.max_evidence);
                (kind, (Trend::fit(&c), ev))
            })
            .collect()
    }

    fn confidence_of(&self, trend: &Trend) -> f64 {
        if trend.slope <= 0.0 || trend.total_events < self.config.min_events {
            return 0.0;
        }
        let volume = (trend.total_events as f64 / (2.0 * self.config.min_events.max(1) as f64)).min(1.0);
        (trend.r_squared * volume).clamp(0.0, 1.0)
    }

    /// Run a scan if one is due (or `force`), returning predictions
    /// emitted or refreshed by it.
    pub fn scan(
        &mut self,
        graph: &dyn GraphStore,
        temporal: &TemporalLayer,
        now: Timestamp,
        force: bool,
    ) -> Vec<PatternPrediction> {
        if !force && !self.is_due(now) {
            return Vec::new();
        }
        self.expire(now);
        self.last_scan = Some(now);
        self.scans += 1;

        let trends = self.trends(graph, temporal, now);
        let scored: Vec<(PatternType, f64, Trend, Vec<String>)> = trends
            .into_iter()
            .map(|(kind, (trend, ev))| (kind, self.confidence_of(&trend), trend, ev))
            .collect();

        let mut out = Vec::new();
        for (kind, confidence, trend, evidence) in &scored {
            if *confidence < self.config.detection_threshold || *confidence <= 0.0 {
                continue;
            }
            let Some(buckets) = trend.buckets_until(self.config.emergence_level) else {
                continue;
            };
            let tte = buckets * self.config.bucket_secs.max(1);
            let mut alternatives: Vec<(PatternType, f64)> = scored
                .iter()
                .filter(|(k, c, _, _)| k != kind && *c > 0.0 && *c < self.config.detection_threshold)
                .map(|(k, c, _, _)| (*k, *c))
                .collect();
            alternatives.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            let alternatives: Vec<PatternType> = alternatives.into_iter().map(|(k, _)| k).collect();
            let expires_at = now + Duration::seconds(tte);

            let existing = self
                .predictions
                .iter_mut()
                .find(|p| p.pattern_type == *kind && p.is_active(now));
            let prediction = match existing {
                Some(p) => {
                    p.confidence = *confidence;
                    p.time_to_emergence_secs = tte;
                    p.evidence = evidence.clone();
                    p.alternatives = alternatives;
                    p.expires_at = expires_at;
                    p.clone()
                }
                None => {
                    let p = PatternPrediction {
                        id: Uuid::new_v4().to_string(),
                        pattern_type: *kind,
                        confidence: *confidence,
                        time_to_emergence_secs: tte,
                        evidence: evidence.clone(),
                        alternatives,
                        created_at: now,
                        expires_at,
                        confirmed: false,
                        confirmed_at: None,
                    };
                    self.emitted += 1;
                    self.predictions.push(p.clone());
                    p
                }
            };
            debug!(
                pattern = %kind,
                confidence = *confidence,
                slope = trend.slope,
                "pattern trend above threshold"
            );
            out.push(prediction);
        }

        if self.predictions.len() > self.config.max_predictions {
            let excess = self.predictions.len() - self.config.max_predictions;
            self.predictions.drain(..excess);
        }
        info!(emitted = out.len(), active = self.active_predictions(now).len(), "prediction scan finished");
        out
    }

    pub fn active_predictions(&self, now: Timestamp) -> Vec<&PatternPrediction> {
        self.predictions.iter().filter(|p| p.is_active(now)).collect()
    }

    pub fn predictions(&self) -> &[PatternPrediction] {
        &self.predictions
    }

    /// Confirm every active prediction of `kind`. Returns how many.
    pub fn confirm(&mut self, kind: PatternType, now: Timestamp) -> usize {
        let mut n = 0;
        for p in self.predictions.iter_mut().filter(|p| p.pattern_type == kind && p.is_active(now)) {
            p.confirmed = true;
            p.confirmed_at = Some(now);
            n += 1;
        }
        self.confirmed += n as u64;
        n
    }

    /// Drop unconfirmed predictions past their expiry. Returns how many.
    pub fn expire(&mut self, now: Timestamp) -> usize {
        let before = self.predictions.len();
        self.predictions.retain(|p| p.confirmed || p.expires_at > now);
        let n = before - self.predictions.len();
        self.expired += n as u64;
        n
    }

    /// Drop evidence pointing at removed edges of a node.
    pub fn forget_node(&mut self, id: &NodeId) {
        let needle = id.as_str();
        for p in &mut self.predictions {
            p.evidence.retain(|e| !e.starts_with(needle) && !e.ends_with(needle));
        }
    }

    pub fn stats(&self, now: Timestamp) -> PredictionStats {
        PredictionStats {
            scans: self.scans,
            predictions_emitted: self.emitted,
            active: self.active_predictions(now).len(),
            confirmed: self.confirmed,
            expired: self.expired,
            last_scan: self.last_scan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::PetGraphStore;
    use chrono::{TimeZone, Utc};
    use mindmap_core::types::{Edge, Node};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn config() -> PredictionConfig {
        PredictionConfig {
            lookback_secs: 6 * 3600,
            bucket_secs: 3600,
            ..PredictionConfig::default()
        }
    }

    /// Bucket `i` gets `i + 1` new import edges.
    fn growing_imports() -> TemporalLayer {
        let mut temporal = TemporalLayer::new();
        for hour in 0..6 {
            for j in 0..=hour {
                let at = t0() + Duration::hours(hour) + Duration::minutes(10 + j);
                let edge = Edge::new(format!("module_{}_{}.rs", hour, j).as_str(), "lib.rs", EdgeType::Imports);
                temporal.track(edge, at, at).unwrap();
            }
        }
        temporal
    }

    #[test]
    fn trend_fit_on_a_line() {
        let t = Trend::fit(&[1.0, 2.0, 3.0, 4.0]);
        assert!((t.slope - 1.0).abs() < 1e-9);
        assert!((t.intercept - 1.0).abs() < 1e-9);
        assert!((t.r_squared - 1.0).abs() < 1e-9);
        assert_eq!(t.buckets_until(10.0), Some(6));
        assert_eq!(Trend::fit(&[3.0, 3.0, 3.0]).buckets_until(10.0), None);
    }

    #[test]
    fn rising_imports_predict_dependency_growth() {
        let graph = PetGraphStore::new();
        let temporal = growing_imports();
        let mut engine = PatternPredictionEngine::with_config(config());
        let now = t0() + Duration::hours(6);

        let out = engine.scan(&graph, &temporal, now, false);
        assert_eq!(out.len(), 1);
        let p = &out[0];
        assert_eq!(p.pattern_type, PatternType::DependencyGrowth);
        assert!(p.confidence > 0.9);
        // fitted value at the newest bucket is 6, one more per bucket
        assert_eq!(p.time_to_emergence_secs, 4 * 3600);
        assert!(!p.evidence.is_empty());
        assert_eq!(engine.stats(now).predictions_emitted, 1);
    }

    #[test]
    fn scan_interval_and_refresh() {
        let graph = PetGraphStore::new();
        let temporal = growing_imports();
        let mut engine = PatternPredictionEngine::with_config(config());
        let now = t0() + Duration::hours(6);
        engine.scan(&graph, &temporal, now, false);

        let soon = now + Duration::seconds(10);
        assert!(engine.scan(&graph, &temporal, soon, false).is_empty());
        assert_eq!(engine.stats(soon).scans, 1);

        // a forced rescan refreshes rather than duplicates
        engine.scan(&graph, &temporal, soon, true);
        assert_eq!(engine.active_predictions(soon).len(), 1);
        assert_eq!(engine.stats(soon).predictions_emitted, 1);
    }

    #[test]
    fn confirm_and_expire() {
        let graph = PetGraphStore::new();
        let temporal = growing_imports();
        let mut engine = PatternPredictionEngine::with_config(config());
        let now = t0() + Duration::hours(6);
        engine.scan(&graph, &temporal, now, false);

        assert_eq!(engine.confirm(PatternType::ErrorHotspot, now), 0);
        assert_eq!(engine.expire(now + Duration::hours(5)), 1);
        assert!(engine.active_predictions(now + Duration::hours(5)).is_empty());
        assert_eq!(engine.stats(now).expired, 1);

        engine.scan(&graph, &temporal, now, true);
        assert_eq!(engine.confirm(PatternType::DependencyGrowth, now), 1);
        assert_eq!(engine.expire(now + Duration::days(30)), 0);
        assert!(engine.predictions()[0].confirmed);
    }

    #[test]
    fn error_nodes_classify_as_hotspot() {
        let mut graph = PetGraphStore::new();
        graph
            .add_node(Node::new("panic_handler", NodeType::Error, "panic handler"))
            .unwrap();
        let event = ChangeEvent {
            edge_id: "x".into(),
            edge_type: EdgeType::RelatesTo,
            source: "main.rs".into(),
            target: "panic_handler".into(),
            kind: ChangeKind::Created,
            at: t0(),
        };
        assert_eq!(classify(&event, &graph), Some(PatternType::ErrorHotspot));
    }

    #[test]
    fn sparse_changes_predict_nothing() {
        let graph = PetGraphStore::new();
        let mut temporal = TemporalLayer::new();
        let at = t0() + Duration::hours(1);
        temporal.track(Edge::new("a.rs", "b.rs", EdgeType::Imports), at, at).unwrap();
        let mut engine = PatternPredictionEngine::with_config(config());
        assert!(engine.scan(&graph, &temporal, t0() + Duration::hours(6), true).is_empty());
    }
}
