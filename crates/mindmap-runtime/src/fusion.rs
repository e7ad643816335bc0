//! Multi-modal confidence fusion.
//!
//! Up to six independent signals per candidate are pooled in log-odds
//! space from a neutral 0.5 prior:
//!
//! ```text
//! fused = σ( κ · Σ wᵢ · dᵢ · logit(sᵢ) )
//! ```
//!
//! `wᵢ` are the modality weights (always summing to 1), `dᵢ` is 1 for a
//! certain signal, the uncertainty factor for an uncertain one, and 0 for
//! a missing one. Every term is non-decreasing in its signal, so the
//! fused value is too.
//!
//! The conflict penalty only ever pulls the result towards the weakest
//! signal: `fused − λ · max(0, fused − min − tolerance)`, which is
//! `min(fused, (1 − λ) · fused + λ · (min + tolerance))` and therefore
//! stays monotone. The variance across signals decides the conflict flag.

use mindmap_core::error::PersistenceError;
use mindmap_core::types::NodeId;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Semantic,
    Structural,
    Historical,
    Temporal,
    Contextual,
    Collaborative,
}

impl Modality {
    pub const ALL: [Modality; 6] = [
        Modality::Semantic,
        Modality::Structural,
        Modality::Historical,
        Modality::Temporal,
        Modality::Contextual,
        Modality::Collaborative,
    ];

    fn index(self) -> usize {
        match self {
            Modality::Semantic => 0,
            Modality::Structural => 1,
            Modality::Historical => 2,
            Modality::Temporal => 3,
            Modality::Contextual => 4,
            Modality::Collaborative => 5,
        }
    }
}

/// One modality reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub value: f64,
    #[serde(default)]
    pub uncertain: bool,
}

/// Per-candidate signals. Missing modalities are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiModalConfidence {
    signals: [Option<Signal>; 6],
}

impl MultiModalConfidence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, modality: Modality, value: f64) -> Self {
        self.set(modality, value, false);
        self
    }

    pub fn with_uncertain(mut self, modality: Modality, value: f64) -> Self {
        self.set(modality, value, true);
        self
    }

    pub fn set(&mut self, modality: Modality, value: f64, uncertain: bool) {
        self.signals[modality.index()] = Some(Signal { value, uncertain });
    }

    pub fn get(&self, modality: Modality) -> Option<Signal> {
        self.signals[modality.index()]
    }

    /// Present modalities with their signals.
    pub fn present(&self) -> impl Iterator<Item = (Modality, Signal)> + '_ {
        Modality::ALL
            .iter()
            .filter_map(move |m| self.get(*m).map(|s| (*m, s)))
    }
}

/// Fusion configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Starting modality weights, renormalised to sum 1.
    pub initial_weights: BTreeMap<Modality, f64>,
    /// Multiplier applied to uncertain signals (default: 0.5).
    pub uncertainty_factor: f64,
    /// Variance above which a conflict is flagged (default: 0.08).
    pub conflict_threshold: f64,
    /// Share of the excess over the weakest signal removed (default: 0.5).
    pub conflict_penalty: f64,
    /// Spread over the weakest signal tolerated before penalising (default: 0.25).
    pub conflict_tolerance: f64,
    /// Log-odds gain κ (default: 2.0).
    pub gain: f64,
    /// EMA rate for modality reliability (default: 0.1).
    pub reliability_rate: f64,
    /// Step size when nudging weights towards reliable modalities (default: 0.05).
    pub adaptation_rate: f64,
    /// No modality weight goes below this before renormalising (default: 0.02).
    pub min_weight: f64,
    /// Calibration buckets over 0.0-1.0 (default: 10).
    pub calibration_buckets: usize,
    /// Samples at which a bucket's accuracy gets half the say (default: 20).
    pub calibration_half_weight: f64,
    /// Recent fusions remembered for outcome learning (default: 512).
    pub memory: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        let initial_weights = [
            (Modality::Semantic, 0.25),
            (Modality::Structural, 0.2),
            (Modality::Historical, 0.15),
            (Modality::Temporal, 0.1),
            (Modality::Contextual, 0.2),
            (Modality::Collaborative, 0.1),
        ]
        .into_iter()
        .collect();
        Self {
            initial_weights,
            uncertainty_factor: 0.5,
            conflict_threshold: 0.08,
            conflict_penalty: 0.5,
            conflict_tolerance: 0.25,
            gain: 2.0,
            reliability_rate: 0.1,
            adaptation_rate: 0.05,
            min_weight: 0.02,
            calibration_buckets: 10,
            calibration_half_weight: 20.0,
            memory: 512,
        }
    }
}

/// One modality's share of a fused result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub modality: Modality,
    pub signal: f64,
    pub weight: f64,
    /// Log-odds pushed onto the result; negative pulls below 0.5.
    pub contribution: f64,
}

/// Fused confidence for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    pub confidence: f64,
    /// Pooled value before the conflict penalty and calibration.
    pub pooled: f64,
    pub conflict_score: f64,
    pub conflict: bool,
    pub calibrated: bool,
    /// Contributions ranked by absolute size.
    pub explanation: Vec<Contribution>,
}

/// Counters reported by `get_multi_modal_fusion_stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionStats {
    pub fusions: u64,
    pub conflicts: u64,
    pub mean_confidence: f64,
    pub weights: BTreeMap<Modality, f64>,
    pub reliability: BTreeMap<Modality, f64>,
    pub calibration_samples: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub samples: u64,
    pub successes: u64,
}

/// Persistable learned state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionTable {
    pub weights: BTreeMap<Modality, f64>,
    pub reliability: BTreeMap<Modality, f64>,
    pub calibration: Vec<CalibrationBucket>,
    pub fusions: u64,
    pub conflicts: u64,
    pub confidence_sum: f64,
}

const EPS: f64 = 1e-4;

fn logit(p: f64) -> f64 {
    let p = p.clamp(EPS, 1.0 - EPS);
    (p / (1.0 - p)).ln()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn normalize(weights: &mut [f64; 6], floor: f64) {
    for w in weights.iter_mut() {
        if !w.is_finite() || *w < floor {
            *w = floor.max(0.0);
        }
    }
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 {
        for w in weights.iter_mut() {
            *w /= sum;
        }
    } else {
        *weights = [1.0 / 6.0; 6];
    }
}

/// The fusion engine and its learned weights.
#[derive(Debug, Clone)]
pub struct ConfidenceFusion {
    config: FusionConfig,
    weights: [f64; 6],
    reliability: [f64; 6],
    calibration: Vec<CalibrationBucket>,
    recent: BTreeMap<NodeId, (MultiModalConfidence, f64)>,
    recent_order: VecDeque<NodeId>,
    fusions: u64,
    conflicts: u64,
    confidence_sum: f64,
}

impl Default for ConfidenceFusion {
    fn default() -> Self {
        Self::with_config(FusionConfig::default())
    }
}

impl ConfidenceFusion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FusionConfig) -> Self {
        let mut weights = [0.0; 6];
        for m in Modality::ALL {
            weights[m.index()] = config.initial_weights.get(&m).copied().unwrap_or(0.0);
        }
        normalize(&mut weights, 0.0);
        let buckets = config.calibration_buckets.max(1);
        Self {
            weights,
            reliability: [0.5; 6],
            calibration: vec![CalibrationBucket::default(); buckets],
            recent: BTreeMap::new(),
            recent_order: VecDeque::new(),
            fusions: 0,
            conflicts: 0,
            confidence_sum: 0.0,
            config,
        }
    }

    pub fn weight(&self, modality: Modality) -> f64 {
        self.weights[modality.index()]
    }

    pub fn weights(&self) -> BTreeMap<Modality, f64> {
        Modality::ALL.iter().map(|m| (*m, self.weights[m.index()])).collect()
    }

    fn bucket_of(&self, p: f64) -> usize {
        let n = self.calibration.len();
        ((p.clamp(0.0, 1.0) * n as f64) as usize).min(n - 1)
    }

    /// Calibrated value for a fused confidence.
    ///
    /// Bucket accuracies are made non-decreasing with a running maximum and
    /// blended with the raw value by how many samples back them.
    fn calibrate(&self, p: f64) -> f64 {
        let idx = self.bucket_of(p);
        let mut running = 0.0_f64;
        let mut accuracy = 0.0;
        for (i, b) in self.calibration.iter().enumerate() {
            if b.samples > 0 {
                running = running.max(b.successes as f64 / b.samples as f64);
            }
            if i == idx {
                accuracy = running;
                break;
            }
        }
        let n = self.calibration[idx].samples as f64;
        if n == 0.0 {
            return p;
        }
        let trust = n / (n + self.config.calibration_half_weight.max(1.0));
        (trust * accuracy + (1.0 - trust) * p).clamp(0.0, 1.0)
    }

    /// Fuse one candidate's signals.
    ///
    /// Signals are pooled in log-odds space. The result is then pulled down
    /// by `conflict_penalty` times however far it sits above the weakest
    /// signal plus `conflict_tolerance`. That pull applies whether or not
    /// the variance crosses `conflict_threshold`: the threshold only sets
    /// the `conflict` flag. Gating the pull on the flag would make the
    /// result jump when one signal rises past the threshold, and fused
    /// confidence must stay non-decreasing in every signal. Calibration is
    /// the one step that can break that.
    pub fn fuse(&self, signals: &MultiModalConfidence, calibrate: bool) -> FusionResult {
        let present: Vec<(Modality, Signal)> = signals
            .present()
            .filter(|(_, s)| s.value.is_finite())
            .map(|(m, s)| (m, Signal { value: s.value.clamp(0.0, 1.0), ..s }))
            .collect();

        let mut explanation: Vec<Contribution> = present
            .iter()
            .map(|(m, s)| {
                let discount = if s.uncertain { self.config.uncertainty_factor } else { 1.0 };
                let weight = self.weights[m.index()];
                Contribution {
                    modality: *m,
                    signal: s.value,
                    weight,
                    contribution: self.config.gain * weight * discount * logit(s.value),
                }
            })
            .collect();
        let pooled = sigmoid(explanation.iter().map(|c| c.contribution).sum());

        let (conflict_score, min) = if present.is_empty() {
            (0.0, pooled)
        } else {
            let n = present.len() as f64;
            let mean = present.iter().map(|(_, s)| s.value).sum::<f64>() / n;
            let var = present.iter().map(|(_, s)| (s.value - mean).powi(2)).sum::<f64>() / n;
            let min = present.iter().map(|(_, s)| s.value).fold(f64::INFINITY, f64::min);
            (var, min)
        };
        let conflict = conflict_score > self.config.conflict_threshold;
        let excess = (pooled - min - self.config.conflict_tolerance).max(0.0);
        let mut confidence = pooled - self.config.conflict_penalty.clamp(0.0, 1.0) * excess;

        if calibrate {
            confidence = self.calibrate(confidence);
        }

        explanation.sort_by(|a, b| {
            b.contribution
                .abs()
                .total_cmp(&a.contribution.abs())
                .then_with(|| a.modality.cmp(&b.modality))
        });

        FusionResult {
            confidence: confidence.clamp(0.0, 1.0),
            pooled,
            conflict_score,
            conflict,
            calibrated: calibrate,
            explanation,
        }
    }

    /// Fuse many candidates in parallel. Each result lands in its own slot.
    pub fn fuse_batch(&self, batch: &[MultiModalConfidence], calibrate: bool) -> Vec<FusionResult> {
        batch.par_iter().map(|s| self.fuse(s, calibrate)).collect()
    }

    /// Count finished fusions and remember them for outcome learning.
    pub fn note(&mut self, fused: &[(NodeId, MultiModalConfidence, FusionResult)]) {
        for (id, signals, result) in fused {
            self.fusions += 1;
            self.confidence_sum += result.confidence;
            if result.conflict {
                self.conflicts += 1;
            }
            if self.recent.insert(id.clone(), (*signals, result.pooled)).is_none() {
                self.recent_order.push_back(id.clone());
            }
        }
        while self.recent_order.len() > self.config.memory {
            if let Some(old) = self.recent_order.pop_front() {
                self.recent.remove(&old);
            }
        }
    }

    /// Update reliability, weights and calibration from one observed outcome.
    pub fn record_outcome(&mut self, signals: &MultiModalConfidence, pooled: f64, success: bool) {
        let rate = self.config.reliability_rate.clamp(0.0, 1.0);
        for (m, s) in signals.present() {
            if !s.value.is_finite() {
                continue;
            }
            let v = s.value.clamp(0.0, 1.0);
            let correct = if success { v } else { 1.0 - v };
            let r = &mut self.reliability[m.index()];
            *r = (1.0 - rate) * *r + rate * correct;
        }

        let mean = self.reliability.iter().sum::<f64>() / 6.0;
        for i in 0..6 {
            self.weights[i] += self.config.adaptation_rate * (self.reliability[i] - mean);
        }
        normalize(&mut self.weights, self.config.min_weight);

        let idx = self.bucket_of(pooled);
        let bucket = &mut self.calibration[idx];
        bucket.samples += 1;
        if success {
            bucket.successes += 1;
        }
    }

    /// Learn from an outcome for nodes fused recently. Returns how many matched.
    pub fn learn_from_nodes(&mut self, ids: &[NodeId], success: bool) -> usize {
        let matched: Vec<(MultiModalConfidence, f64)> =
            ids.iter().filter_map(|id| self.recent.get(id).copied()).collect();
        for (signals, pooled) in &matched {
            self.record_outcome(signals, *pooled, success);
        }
        matched.len()
    }

    pub fn forget_node(&mut self, id: &NodeId) {
        if self.recent.remove(id).is_some() {
            self.recent_order.retain(|n| n != id);
        }
    }

    pub fn stats(&self) -> FusionStats {
        FusionStats {
            fusions: self.fusions,
            conflicts: self.conflicts,
            mean_confidence: if self.fusions == 0 {
                0.0
            } else {
                self.confidence_sum / self.fusions as f64
            },
            weights: self.weights(),
            reliability: Modality::ALL.iter().map(|m| (*m, self.reliability[m.index()])).collect(),
            calibration_samples: self.calibration.iter().map(|b| b.samples).sum(),
        }
    }

    pub fn export(&self) -> FusionTable {
        FusionTable {
            weights: self.weights(),
            reliability: Modality::ALL.iter().map(|m| (*m, self.reliability[m.index()])).collect(),
            calibration: self.calibration.clone(),
            fusions: self.fusions,
            conflicts: self.conflicts,
            confidence_sum: self.confidence_sum,
        }
    }

    pub fn import(&mut self, table: FusionTable) -> Result<(), PersistenceError> {
        let mut weights = [0.0; 6];
        let mut reliability = [0.5; 6];
        for m in Modality::ALL {
            let w = table.weights.get(&m).copied().unwrap_or(0.0);
            let r = table.reliability.get(&m).copied().unwrap_or(0.5);
            if !w.is_finite() || w < 0.0 || !(0.0..=1.0).contains(&r) {
                return Err(PersistenceError::Corrupt(format!("fusion entry for {:?} is invalid", m)));
            }
            weights[m.index()] = w;
            reliability[m.index()] = r;
        }
        if table.calibration.iter().any(|b| b.successes > b.samples) {
            return Err(PersistenceError::Corrupt("calibration bucket has more successes than samples".into()));
        }
        normalize(&mut weights, 0.0);
        self.weights = weights;
        self.reliability = reliability;
        if table.calibration.len() == self.calibration.len() {
            self.calibration = table.calibration;
        }
        self.fusions = table.fusions;
        self.conflicts = table.conflicts;
        self.confidence_sum = table.confidence_sum;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all(value: f64) -> MultiModalConfidence {
        Modality::ALL.iter().fold(MultiModalConfidence::new(), |acc, m| acc.with(*m, value))
    }

    #[test]
    fn neutral_signals_stay_neutral() {
        let f = ConfidenceFusion::new();
        let r = f.fuse(&all(0.5), false);
        assert!((r.confidence - 0.5).abs() < 1e-9);
        assert!(!r.conflict);
        let empty = f.fuse(&MultiModalConfidence::new(), false);
        assert!((empty.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn agreement_pushes_away_from_prior() {
        let f = ConfidenceFusion::new();
        assert!(f.fuse(&all(0.8), false).confidence > 0.8);
        assert!(f.fuse(&all(0.2), false).confidence < 0.2);
    }

    #[test]
    fn uncertain_and_missing_signals_count_less() {
        let f = ConfidenceFusion::new();
        let certain = f.fuse(&MultiModalConfidence::new().with(Modality::Semantic, 0.9), false);
        let unsure = f.fuse(&MultiModalConfidence::new().with_uncertain(Modality::Semantic, 0.9), false);
        let missing = f.fuse(&MultiModalConfidence::new(), false);
        assert!(certain.confidence > unsure.confidence);
        assert!(unsure.confidence > missing.confidence);
    }

    #[test]
    fn penalty_applies_below_the_conflict_threshold() {
        let f = ConfidenceFusion::new();
        let spread = MultiModalConfidence::new()
            .with(Modality::Semantic, 0.99)
            .with(Modality::Structural, 0.6);
        let r = f.fuse(&spread, false);
        assert!(!r.conflict);
        assert!(r.conflict_score < FusionConfig::default().conflict_threshold);
        assert!(r.confidence < r.pooled);

        let higher = f.fuse(&spread.with(Modality::Structural, 0.7), false);
        assert!(higher.confidence >= r.confidence);
    }

    #[test]
    fn conflict_is_flagged_and_penalised() {
        let f = ConfidenceFusion::new();
        let split = MultiModalConfidence::new()
            .with(Modality::Semantic, 0.99)
            .with(Modality::Structural, 0.99)
            .with(Modality::Contextual, 0.99)
            .with(Modality::Historical, 0.05);
        let r = f.fuse(&split, false);
        assert!(r.conflict);
        assert!(r.conflict_score > 0.08);
        assert!(r.confidence < r.pooled);
    }

    #[test]
    fn explanation_ranked_by_magnitude() {
        let f = ConfidenceFusion::new();
        let r = f.fuse(
            &MultiModalConfidence::new()
                .with(Modality::Semantic, 0.95)
                .with(Modality::Temporal, 0.55),
            false,
        );
        assert_eq!(r.explanation[0].modality, Modality::Semantic);
        assert!(r.explanation[0].contribution.abs() >= r.explanation[1].contribution.abs());
    }

    #[test]
    fn weights_adapt_towards_reliable_modalities() {
        let mut f = ConfidenceFusion::new();
        let before = f.weight(Modality::Semantic);
        let signals = MultiModalConfidence::new()
            .with(Modality::Semantic, 0.95)
            .with(Modality::Temporal, 0.05);
        for _ in 0..20 {
            f.record_outcome(&signals, 0.9, true);
        }
        assert!(f.weight(Modality::Semantic) > before);
        let total: f64 = f.weights().values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn calibration_follows_outcomes() {
        let mut f = ConfidenceFusion::new();
        let signals = all(0.9);
        let pooled = f.fuse(&signals, false).pooled;
        for _ in 0..200 {
            f.record_outcome(&signals, pooled, false);
        }
        let calibrated = f.fuse(&signals, true);
        assert!(calibrated.calibrated);
        assert!(calibrated.confidence < pooled);
    }

    #[test]
    fn batch_matches_single() {
        let f = ConfidenceFusion::new();
        let batch = vec![all(0.3), all(0.7), MultiModalConfidence::new().with(Modality::Contextual, 0.6)];
        let out = f.fuse_batch(&batch, false);
        for (s, r) in batch.iter().zip(&out) {
            assert_eq!(&f.fuse(s, false), r);
        }
    }

    #[test]
    fn export_import_round_trip() {
        let mut f = ConfidenceFusion::new();
        f.record_outcome(&all(0.8), 0.8, true);
        let table = f.export();
        let mut g = ConfidenceFusion::new();
        g.import(table.clone()).unwrap();
        assert_eq!(g.export(), table);
    }
}
