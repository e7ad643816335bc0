//! Read-only statistics for every subsystem.

use mindmap_core::store::GraphStore;
use mindmap_runtime::attention::AttentionStats;
use mindmap_runtime::fusion::FusionStats;
use mindmap_runtime::hebbian::HebbianStats;
use mindmap_runtime::inhibitory::InhibitoryStats;
use mindmap_runtime::prediction::PredictionStats;
use mindmap_runtime::temporal::BiTemporalStats;
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::engine::{MindmapEngine, Subsystem};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub version: u64,
}

/// Everything the getters report, in one value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub project: String,
    pub graph: GraphStats,
    pub cache: CacheStats,
    pub hebbian: HebbianStats,
    pub inhibitory: InhibitoryStats,
    pub attention: AttentionStats,
    pub temporal: BiTemporalStats,
    pub prediction: PredictionStats,
    pub fusion: FusionStats,
    pub disabled: Vec<Subsystem>,
}

impl MindmapEngine {
    pub fn get_graph_stats(&self) -> GraphStats {
        let graph = self.stores.graph.read();
        GraphStats {
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            version: graph.version(),
        }
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        self.stores.cache.lock().stats()
    }

    pub fn get_hebbian_stats(&self) -> HebbianStats {
        self.stores.hebbian.read().stats(self.now())
    }

    pub fn get_inhibitory_stats(&self) -> InhibitoryStats {
        self.stores.inhibitory.read().stats(self.now())
    }

    pub fn get_attention_stats(&self) -> AttentionStats {
        self.stores.attention.lock().stats()
    }

    pub fn get_bi_temporal_stats(&self) -> BiTemporalStats {
        self.stores.temporal.read().stats(self.now())
    }

    pub fn get_prediction_engine_stats(&self) -> PredictionStats {
        self.stores.prediction.lock().stats(self.now())
    }

    pub fn get_multi_modal_fusion_stats(&self) -> FusionStats {
        self.stores.fusion.read().stats()
    }

    /// All statistics. Stores are read one at a time, so the parts may
    /// straddle a concurrent mutation.
    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            project: self.project().to_string(),
            graph: self.get_graph_stats(),
            temporal: self.get_bi_temporal_stats(),
            hebbian: self.get_hebbian_stats(),
            inhibitory: self.get_inhibitory_stats(),
            attention: self.get_attention_stats(),
            fusion: self.get_multi_modal_fusion_stats(),
            cache: self.get_cache_stats(),
            prediction: self.get_prediction_engine_stats(),
            disabled: self.disabled_subsystems(),
        }
    }
}
