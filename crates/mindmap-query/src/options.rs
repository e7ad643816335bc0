//! Validated query options.
//!
//! Options are a closed struct: unknown JSON fields are rejected, and
//! every numeric field is range-checked before a query runs.

use mindmap_core::context::QueryContext;
use mindmap_core::error::ValidationError;
use mindmap_core::types::{NodeType, Timestamp};
use mindmap_runtime::attention::AttentionType;
use mindmap_runtime::context_hierarchy::ContextLevel;
use serde::{Deserialize, Serialize};

pub const MAX_LIMIT: usize = 1000;
pub const MAX_ACTIVATION_LEVELS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActivationOptions {
    pub enabled: bool,
    /// Hops to spread (default: 3, at most 10).
    pub max_levels: usize,
}

impl Default for ActivationOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_levels: 3,
        }
    }
}

/// Per-stage switches. A bypassed stage leaves scores untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageBypass {
    pub cache: bool,
    pub activation: bool,
    pub inhibition: bool,
    pub attention: bool,
    pub fusion: bool,
    pub hebbian: bool,
}

impl StageBypass {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            cache: true,
            activation: true,
            inhibition: true,
            attention: true,
            fusion: true,
            hebbian: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryOptions {
    /// Only these node types are returned (default: all).
    pub node_types: Option<Vec<NodeType>>,
    /// Maximum nodes returned, 1..=1000 (default: 20).
    pub limit: usize,
    /// Nodes below this extractor confidence are dropped (default: 0.0).
    pub min_confidence: f64,
    pub activation: ActivationOptions,
    pub context: QueryContext,
    pub bypass: StageBypass,
    /// Broadest hierarchy level consulted (default: project).
    pub context_level: ContextLevel,
    /// Evaluate edge validity at this time instead of now.
    pub valid_at: Option<Timestamp>,
    /// Attach revision history of returned edges.
    pub include_history: bool,
    pub attention_type: AttentionType,
    /// Run fused confidence through outcome calibration.
    pub calibrate: bool,
    /// Soft timeout in milliseconds (default: 5000).
    pub timeout_ms: u64,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            node_types: None,
            limit: 20,
            min_confidence: 0.0,
            activation: ActivationOptions::default(),
            context: QueryContext::default(),
            bypass: StageBypass::default(),
            context_level: ContextLevel::default(),
            valid_at: None,
            include_history: false,
            attention_type: AttentionType::default(),
            calibrate: false,
            timeout_ms: 5000,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_node_types(mut self, types: Vec<NodeType>) -> Self {
        self.node_types = Some(types);
        self
    }

    pub fn with_bypass(mut self, bypass: StageBypass) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn with_attention(mut self, kind: AttentionType) -> Self {
        self.attention_type = kind;
        self
    }

    pub fn with_valid_at(mut self, at: Timestamp) -> Self {
        self.valid_at = Some(at);
        self
    }

    pub fn with_history(mut self) -> Self {
        self.include_history = true;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn with_max_levels(mut self, levels: usize) -> Self {
        self.activation.max_levels = levels;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(ValidationError::out_of_range("limit", self.limit, "1..=1000"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ValidationError::out_of_range("min_confidence", self.min_confidence, "0.0..=1.0"));
        }
        if self.activation.max_levels > MAX_ACTIVATION_LEVELS {
            return Err(ValidationError::out_of_range(
                "activation.max_levels",
                self.activation.max_levels,
                "0..=10",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ValidationError::out_of_range("timeout_ms", self.timeout_ms, "> 0"));
        }
        if let Some(types) = &self.node_types {
            if types.is_empty() {
                return Err(ValidationError::InvalidValue {
                    field: "node_types",
                    reason: "an empty type filter matches nothing".into(),
                });
            }
        }
        Ok(())
    }

    /// Parse and validate options sent as JSON.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let options: QueryOptions =
            serde_json::from_str(json).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Stable key for everything except the context text, which the cache
    /// compares by similarity instead. Focus nodes seed activation, so the
    /// focus set is part of the key.
    pub fn fingerprint(&self) -> String {
        let mut keyed = self.clone();
        let mut focus = std::mem::take(&mut keyed.context.focus_nodes);
        focus.sort();
        focus.dedup();
        keyed.context = QueryContext { focus_nodes: focus, ..QueryContext::default() };
        keyed.timeout_ms = 0;
        let json = serde_json::to_string(&keyed).unwrap_or_default();
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let opts = QueryOptions::default();
        assert!(opts.validate().is_ok());
        assert_eq!(opts.limit, 20);
        assert_eq!(opts.context_level, ContextLevel::Project);
        assert_eq!(opts.attention_type, AttentionType::Divided);
    }

    #[test]
    fn out_of_range_rejected() {
        assert!(QueryOptions::new().with_limit(0).validate().is_err());
        assert!(QueryOptions::new().with_limit(1001).validate().is_err());
        assert!(QueryOptions::new().with_max_levels(11).validate().is_err());
        assert!(QueryOptions::new().with_timeout_ms(0).validate().is_err());
        let mut opts = QueryOptions::new();
        opts.min_confidence = 1.5;
        assert!(matches!(opts.validate(), Err(ValidationError::OutOfRange { field: "min_confidence", .. })));
    }

    #[test]
    fn json_options() {
        let opts = QueryOptions::from_json(
            r#"{"limit": 5, "node_types": ["function"], "context": {"task": "fix login"},
                "bypass": {"fusion": true}, "attention_type": "selective"}"#,
        )
        .unwrap();
        assert_eq!(opts.limit, 5);
        assert_eq!(opts.node_types, Some(vec![NodeType::Function]));
        assert!(opts.bypass.fusion);
        assert_eq!(opts.attention_type, AttentionType::Selective);

        assert!(matches!(QueryOptions::from_json("{"), Err(ValidationError::Malformed(_))));
        assert!(matches!(QueryOptions::from_json(r#"{"limti": 3}"#), Err(ValidationError::Malformed(_))));
        assert!(matches!(
            QueryOptions::from_json(r#"{"limit": 0}"#),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn fingerprint_ignores_context() {
        let a = QueryOptions::new().with_context(QueryContext::new().with_task("one"));
        let b = QueryOptions::new().with_context(QueryContext::new().with_task("two"));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), QueryOptions::new().with_limit(3).fingerprint());
    }

    #[test]
    fn fingerprint_keys_on_focus_set() {
        let plain = QueryOptions::new();
        let focused = QueryOptions::new().with_context(QueryContext::new().with_focus("util").with_focus("api"));
        let reordered = QueryOptions::new().with_context(QueryContext::new().with_focus("api").with_focus("util"));
        assert_ne!(plain.fingerprint(), focused.fingerprint());
        assert_eq!(focused.fingerprint(), reordered.fingerprint());
    }
}
