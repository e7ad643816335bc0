//! Engine configuration: one section per subsystem.

use mindmap_core::error::ConfigError;
use mindmap_runtime::activation::ActivationConfig;
use mindmap_runtime::attention::AttentionConfig;
use mindmap_runtime::context_hierarchy::HierarchyConfig;
use mindmap_runtime::fusion::FusionConfig;
use mindmap_runtime::hebbian::HebbianConfig;
use mindmap_runtime::inhibitory::InhibitoryConfig;
use mindmap_runtime::ingest::IngestConfig;
use mindmap_runtime::prediction::PredictionConfig;
use mindmap_runtime::temporal::TemporalConfig;
use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;

/// How the pipeline folds stage outputs into the running score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Co-activation signal recorded for each answered query (default: 0.5).
    pub query_signal: f64,
    /// Share of the score attention may move (default: 0.3).
    pub attention_mix: f64,
    /// Share of the score fused confidence may move (default: 0.5).
    pub fusion_mix: f64,
    /// Days for the recency factor to fall to 1/e (default: 30.0).
    pub recency_days: f64,
    /// Run a prediction scan after outcomes and ingestion when one is due (default: true).
    pub auto_scan: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            query_signal: 0.5,
            attention_mix: 0.3,
            fusion_mix: 0.5,
            recency_days: 30.0,
            auto_scan: true,
        }
    }
}

/// Query service sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Concurrent requests (default: 4).
    pub workers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Snapshot key (default: "default").
    pub project: String,
    pub activation: ActivationConfig,
    pub temporal: TemporalConfig,
    pub hierarchy: HierarchyConfig,
    pub hebbian: HebbianConfig,
    pub inhibitory: InhibitoryConfig,
    pub attention: AttentionConfig,
    pub fusion: FusionConfig,
    pub prediction: PredictionConfig,
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
    pub ingest: IngestConfig,
    pub service: ServiceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            project: "default".to_string(),
            activation: ActivationConfig::default(),
            temporal: TemporalConfig::default(),
            hierarchy: HierarchyConfig::default(),
            hebbian: HebbianConfig::default(),
            inhibitory: InhibitoryConfig::default(),
            attention: AttentionConfig::default(),
            fusion: FusionConfig::default(),
            prediction: PredictionConfig::default(),
            cache: CacheConfig::default(),
            pipeline: PipelineConfig::default(),
            ingest: IngestConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

fn unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(field, value, "0.0..=1.0"))
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(field, value, "> 0"))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(field, value, ">= 0"))
    }
}

fn at_least_one(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value >= 1 {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(field, value, ">= 1"))
    }
}

impl EngineConfig {
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    /// Check every section. The first problem found is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "project",
                reason: "must not be empty".into(),
            });
        }

        let a = &self.activation;
        unit("activation.decay", a.decay)?;
        unit("activation.threshold", a.threshold)?;
        non_negative("activation.context_boost", a.context_boost)?;
        if a.max_levels_limit > 10 {
            return Err(ConfigError::out_of_range("activation.max_levels_limit", a.max_levels_limit, "0..=10"));
        }

        if self.hierarchy.level_decays.iter().any(|d| !(0.0..=1.0).contains(d)) {
            return Err(ConfigError::InvalidValue {
                field: "hierarchy.level_decays",
                reason: "each decay must be within 0.0..=1.0".into(),
            });
        }

        let h = &self.hebbian;
        unit("hebbian.learning_rate", h.learning_rate)?;
        non_negative("hebbian.decay_rate", h.decay_rate)?;
        unit("hebbian.strengthening_threshold", h.strengthening_threshold)?;
        unit("hebbian.transitivity_factor", h.transitivity_factor)?;
        unit("hebbian.prune_floor", h.prune_floor)?;
        unit("hebbian.association_floor", h.association_floor)?;
        at_least_one("hebbian.top_k", h.top_k)?;
        at_least_one("hebbian.max_connections_per_node", h.max_connections_per_node)?;
        if h.window_secs < 0 {
            return Err(ConfigError::out_of_range("hebbian.window_secs", h.window_secs, ">= 0"));
        }

        let i = &self.inhibitory;
        unit("inhibitory.base_strength", i.base_strength)?;
        non_negative("inhibitory.reinforcement_multiplier", i.reinforcement_multiplier)?;
        non_negative("inhibitory.decay_rate", i.decay_rate)?;
        unit("inhibitory.strength_floor", i.strength_floor)?;
        unit("inhibitory.match_threshold", i.match_threshold)?;
        at_least_one("inhibitory.max_patterns", i.max_patterns)?;

        let w = &self.attention.factor_weights;
        for (field, v) in [
            ("attention.factor_weights.semantic", w.semantic),
            ("attention.factor_weights.structural", w.structural),
            ("attention.factor_weights.temporal", w.temporal),
            ("attention.factor_weights.contextual", w.contextual),
            ("attention.factor_weights.relational", w.relational),
        ] {
            non_negative(field, v)?;
        }
        unit("attention.sustained_blend", self.attention.sustained_blend)?;
        at_least_one("attention.selective_top_n", self.attention.selective_top_n)?;

        let f = &self.fusion;
        unit("fusion.uncertainty_factor", f.uncertainty_factor)?;
        non_negative("fusion.conflict_threshold", f.conflict_threshold)?;
        unit("fusion.conflict_penalty", f.conflict_penalty)?;
        non_negative("fusion.conflict_tolerance", f.conflict_tolerance)?;
        positive("fusion.gain", f.gain)?;
        unit("fusion.reliability_rate", f.reliability_rate)?;
        non_negative("fusion.adaptation_rate", f.adaptation_rate)?;
        unit("fusion.min_weight", f.min_weight)?;
        at_least_one("fusion.calibration_buckets", f.calibration_buckets)?;
        if f.initial_weights.values().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "fusion.initial_weights",
                reason: "weights must be finite and non-negative".into(),
            });
        }

        let p = &self.prediction;
        if p.bucket_secs <= 0 || p.lookback_secs < p.bucket_secs {
            return Err(ConfigError::InvalidValue {
                field: "prediction.lookback_secs",
                reason: "needs at least one positive-width bucket".into(),
            });
        }
        unit("prediction.detection_threshold", p.detection_threshold)?;
        positive("prediction.emergence_level", p.emergence_level)?;

        let c = &self.cache;
        at_least_one("cache.max_entries", c.max_entries)?;
        at_least_one("cache.max_memory_bytes", c.max_memory_bytes)?;
        unit("cache.similarity_threshold", c.similarity_threshold)?;
        if c.ttl_secs <= 0 {
            return Err(ConfigError::out_of_range("cache.ttl_secs", c.ttl_secs, "> 0"));
        }

        let pl = &self.pipeline;
        unit("pipeline.query_signal", pl.query_signal)?;
        unit("pipeline.attention_mix", pl.attention_mix)?;
        unit("pipeline.fusion_mix", pl.fusion_mix)?;
        positive("pipeline.recency_days", pl.recency_days)?;

        at_least_one("ingest.chunk_size", self.ingest.chunk_size)?;
        at_least_one("ingest.workers", self.ingest.workers)?;
        at_least_one("service.workers", self.service.workers)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_values_name_their_field() {
        let mut config = EngineConfig::default();
        config.hebbian.learning_rate = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "hebbian.learning_rate", .. })
        ));

        let mut config = EngineConfig::default();
        config.cache.ttl_secs = 0;
        assert!(config.validate().is_err());

        let config = EngineConfig::default().with_project("  ");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { field: "project", .. })));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"project": "api", "cache": {"ttl_secs": 60}}"#).unwrap();
        assert_eq!(config.project, "api");
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.service.workers, 4);
    }
}
