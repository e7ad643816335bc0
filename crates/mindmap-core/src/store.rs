//! GraphStore: the authoritative node and edge storage.
//!
//! Every other store holds ids into this graph, never nodes or edges.
//! A monotonic version counter moves on each effective mutation so
//! caches can detect staleness without diffing.

use std::collections::BTreeSet;

use crate::error::GraphError;
use crate::types::*;

/// Storage backend for the code knowledge graph.
///
/// This is a trait rather than a concrete type so the engine can run on
/// different graph backends.
pub trait GraphStore: Send + Sync {
    /// Insert a new node. Fails if the id is taken.
    fn add_node(&mut self, node: Node) -> Result<(), GraphError>;

    /// Insert or replace a node. Identical content is a no-op.
    fn upsert_node(&mut self, node: Node) -> Result<UpsertOutcome, GraphError>;

    /// Insert a new edge. Both endpoints must already exist.
    fn add_edge(&mut self, edge: Edge) -> Result<(), GraphError>;

    /// Insert or replace an edge. Identical content is a no-op.
    fn upsert_edge(&mut self, edge: Edge) -> Result<UpsertOutcome, GraphError>;

    /// Apply a partial update to an edge and return the new edge.
    fn update_edge(&mut self, id: &EdgeId, update: &EdgeUpdate) -> Result<Edge, GraphError>;

    /// Remove a node and every edge touching it. Returns the removed edges.
    fn remove_node(&mut self, id: &NodeId) -> Result<Vec<Edge>, GraphError>;

    /// Remove a single edge.
    fn remove_edge(&mut self, id: &EdgeId) -> Result<Edge, GraphError>;

    fn get_node(&self, id: &NodeId) -> Option<&Node>;

    fn get_edge(&self, id: &EdgeId) -> Option<&Edge>;

    fn contains_node(&self, id: &NodeId) -> bool {
        self.get_node(id).is_some()
    }

    /// Adjacent nodes in both directions, optionally filtered by edge type.
    ///
    /// Order is deterministic: by neighbour id, then edge id.
    fn neighbors(&self, id: &NodeId, edge_types: Option<&[EdgeType]>) -> Vec<Neighbor>;

    /// Nodes whose name or path tokenizes to `token`, sorted by id.
    fn find_nodes_by_token(&self, token: &str) -> Vec<NodeId>;

    /// All nodes, sorted by id.
    fn all_nodes(&self) -> Vec<&Node>;

    /// All edges, sorted by id.
    fn all_edges(&self) -> Vec<&Edge>;

    fn node_count(&self) -> usize;

    fn edge_count(&self) -> usize;

    /// Monotonic mutation counter.
    fn version(&self) -> u64;

    /// Edges with both endpoints in `ids`, sorted by id.
    fn edges_between(&self, ids: &BTreeSet<NodeId>) -> Vec<&Edge> {
        self.all_edges()
            .into_iter()
            .filter(|e| ids.contains(&e.source) && ids.contains(&e.target))
            .collect()
    }
}

/// Reject weights that are negative or not finite.
pub fn check_weight(weight: f64) -> Result<(), GraphError> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(())
    } else {
        Err(GraphError::InvalidWeight(weight))
    }
}

/// Reject confidences outside 0.0-1.0.
pub fn check_confidence(confidence: f64) -> Result<(), GraphError> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(GraphError::InvalidConfidence(confidence))
    }
}

/// Bounds checks applied to every edge write.
pub fn check_edge(edge: &Edge) -> Result<(), GraphError> {
    check_weight(edge.weight)?;
    check_confidence(edge.confidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_checks() {
        assert!(check_weight(0.0).is_ok());
        assert!(check_weight(3.5).is_ok());
        assert_eq!(check_weight(-0.1), Err(GraphError::InvalidWeight(-0.1)));
        assert!(check_weight(f64::NAN).is_err());
        assert!(check_confidence(1.0).is_ok());
        assert!(check_confidence(1.01).is_err());
        assert!(check_confidence(f64::NAN).is_err());
    }
}
