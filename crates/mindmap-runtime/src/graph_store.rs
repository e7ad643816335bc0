//! Concrete implementation of the GraphStore trait using petgraph.
//!
//! Uses petgraph's `StableDiGraph` so indices stay valid across removals,
//! with ordered maps from our ids to petgraph indices and a token index
//! over node names and paths for query seeding.

use mindmap_core::error::GraphError;
use mindmap_core::store::{check_confidence, check_edge, GraphStore};
use mindmap_core::text::tokenize;
use mindmap_core::types::*;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet};

/// Petgraph-backed graph store.
#[derive(Debug, Clone, Default)]
pub struct PetGraphStore {
    graph: StableDiGraph<Node, Edge>,
    node_index: BTreeMap<NodeId, NodeIndex>,
    edge_index: BTreeMap<EdgeId, EdgeIndex>,
    /// Lowercase name/path token to the nodes carrying it.
    token_index: BTreeMap<String, BTreeSet<NodeId>>,
    version: u64,
}

fn node_tokens(node: &Node) -> Vec<String> {
    let mut tokens = tokenize(&node.name);
    if let Some(path) = &node.path {
        for t in tokenize(path) {
            if !tokens.contains(&t) {
                tokens.push(t);
            }
        }
    }
    tokens
}

/// Snapshot contents that failed validation during a rebuild.
#[derive(Debug, Default)]
pub struct RejectedParts {
    pub nodes: Vec<(NodeId, GraphError)>,
    pub edges: Vec<(EdgeId, GraphError)>,
}

impl RejectedParts {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

impl PetGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from snapshot contents.
    ///
    /// Nodes and edges that fail validation are returned instead of aborting
    /// the load. Edges of a rejected node are rejected as dangling.
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>, version: u64) -> (Self, RejectedParts) {
        let mut store = Self::new();
        let mut rejected = RejectedParts::default();
        for node in nodes {
            let id = node.id.clone();
            if let Err(e) = store.upsert_node(node) {
                rejected.nodes.push((id, e));
            }
        }
        for edge in edges {
            let id = edge.id.clone();
            if let Err(e) = store.add_edge(edge) {
                rejected.edges.push((id, e));
            }
        }
        store.version = version.max(store.version);
        (store, rejected)
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    fn index_tokens(&mut self, node: &Node) {
        for t in node_tokens(node) {
            self.token_index.entry(t).or_default().insert(node.id.clone());
        }
    }

    fn unindex_tokens(&mut self, node: &Node) {
        for t in node_tokens(node) {
            if let Some(ids) = self.token_index.get_mut(&t) {
                ids.remove(&node.id);
                if ids.is_empty() {
                    self.token_index.remove(&t);
                }
            }
        }
    }

    fn endpoints(&self, edge: &Edge) -> Result<(NodeIndex, NodeIndex), GraphError> {
        let from = self
            .node_index
            .get(&edge.source)
            .copied()
            .ok_or_else(|| GraphError::DanglingReference {
                edge: edge.id.clone(),
                node: edge.source.clone(),
            })?;
        let to = self
            .node_index
            .get(&edge.target)
            .copied()
            .ok_or_else(|| GraphError::DanglingReference {
                edge: edge.id.clone(),
                node: edge.target.clone(),
            })?;
        Ok((from, to))
    }

    fn insert_edge(&mut self, edge: Edge, from: NodeIndex, to: NodeIndex) {
        let id = edge.id.clone();
        let idx = self.graph.add_edge(from, to, edge);
        self.edge_index.insert(id, idx);
    }
}

impl GraphStore for PetGraphStore {
    fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.node_index.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        check_confidence(node.confidence)?;
        self.index_tokens(&node);
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.node_index.insert(id, idx);
        self.bump();
        Ok(())
    }

    fn upsert_node(&mut self, node: Node) -> Result<UpsertOutcome, GraphError> {
        check_confidence(node.confidence)?;
        let Some(&idx) = self.node_index.get(&node.id) else {
            self.add_node(node)?;
            return Ok(UpsertOutcome::Inserted);
        };
        if self.graph[idx].same_content(&node) {
            return Ok(UpsertOutcome::Unchanged);
        }
        let old = std::mem::replace(&mut self.graph[idx], node.clone());
        self.unindex_tokens(&old);
        self.index_tokens(&node);
        self.bump();
        Ok(UpsertOutcome::Updated)
    }

    fn add_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        if self.edge_index.contains_key(&edge.id) {
            return Err(GraphError::DuplicateEdge(edge.id));
        }
        check_edge(&edge)?;
        let (from, to) = self.endpoints(&edge)?;
        self.insert_edge(edge, from, to);
        self.bump();
        Ok(())
    }

    fn upsert_edge(&mut self, edge: Edge) -> Result<UpsertOutcome, GraphError> {
        check_edge(&edge)?;
        let (from, to) = self.endpoints(&edge)?;
        let Some(&idx) = self.edge_index.get(&edge.id) else {
            self.insert_edge(edge, from, to);
            self.bump();
            return Ok(UpsertOutcome::Inserted);
        };
        if self.graph[idx] == edge {
            return Ok(UpsertOutcome::Unchanged);
        }
        let same_endpoints = self.graph[idx].source == edge.source && self.graph[idx].target == edge.target;
        if same_endpoints {
            self.graph[idx] = edge;
        } else {
            self.graph.remove_edge(idx);
            self.insert_edge(edge, from, to);
        }
        self.bump();
        Ok(UpsertOutcome::Updated)
    }

    fn update_edge(&mut self, id: &EdgeId, update: &EdgeUpdate) -> Result<Edge, GraphError> {
        let idx = *self
            .edge_index
            .get(id)
            .ok_or_else(|| GraphError::EdgeNotFound(id.clone()))?;
        let mut next = self.graph[idx].clone();
        if let Some(w) = update.weight {
            next.weight = w;
        }
        if let Some(c) = update.confidence {
            next.confidence = c;
        }
        for (k, v) in &update.metadata {
            next.metadata.insert(k.clone(), v.clone());
        }
        check_edge(&next)?;
        if self.graph[idx] != next {
            self.graph[idx] = next.clone();
            self.bump();
        }
        Ok(next)
    }

    fn remove_node(&mut self, id: &NodeId) -> Result<Vec<Edge>, GraphError> {
        let idx = self
            .node_index
            .remove(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;

        let mut removed: Vec<Edge> = self
            .graph
            .edges_directed(idx, petgraph::Direction::Outgoing)
            .chain(self.graph.edges_directed(idx, petgraph::Direction::Incoming))
            .map(|e| e.weight().clone())
            .collect();
        removed.sort_by(|a, b| a.id.cmp(&b.id));
        removed.dedup_by(|a, b| a.id == b.id);

        for edge in &removed {
            if let Some(eidx) = self.edge_index.remove(&edge.id) {
                self.graph.remove_edge(eidx);
            }
        }
        if let Some(node) = self.graph.remove_node(idx) {
            self.unindex_tokens(&node);
        }
        self.bump();
        Ok(removed)
    }

    fn remove_edge(&mut self, id: &EdgeId) -> Result<Edge, GraphError> {
        let idx = self
            .edge_index
            .remove(id)
            .ok_or_else(|| GraphError::EdgeNotFound(id.clone()))?;
        let edge = self
            .graph
            .remove_edge(idx)
            .ok_or_else(|| GraphError::EdgeNotFound(id.clone()))?;
        self.bump();
        Ok(edge)
    }

    fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.node_index.get(id).and_then(|idx| self.graph.node_weight(*idx))
    }

    fn get_edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edge_index.get(id).and_then(|idx| self.graph.edge_weight(*idx))
    }

    fn neighbors(&self, id: &NodeId, edge_types: Option<&[EdgeType]>) -> Vec<Neighbor> {
        let Some(&idx) = self.node_index.get(id) else {
            return Vec::new();
        };
        let wanted = |t: EdgeType| edge_types.map_or(true, |types| types.contains(&t));

        let outgoing = self
            .graph
            .edges_directed(idx, petgraph::Direction::Outgoing)
            .map(|e| (e.weight(), Direction::Outgoing));
        let incoming = self
            .graph
            .edges_directed(idx, petgraph::Direction::Incoming)
            .map(|e| (e.weight(), Direction::Incoming));

        let mut out: Vec<Neighbor> = outgoing
            .chain(incoming)
            .filter(|(edge, _)| wanted(edge.edge_type))
            .map(|(edge, direction)| Neighbor {
                node_id: edge.other_end(id).clone(),
                edge_id: edge.id.clone(),
                edge_type: edge.edge_type,
                weight: edge.weight,
                confidence: edge.confidence,
                direction,
            })
            .collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id).then_with(|| a.edge_id.cmp(&b.edge_id)));
        out
    }

    fn find_nodes_by_token(&self, token: &str) -> Vec<NodeId> {
        self.token_index
            .get(&token.to_lowercase())
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn all_nodes(&self) -> Vec<&Node> {
        self.node_index.values().map(|idx| &self.graph[*idx]).collect()
    }

    fn all_edges(&self) -> Vec<&Edge> {
        self.edge_index.values().map(|idx| &self.graph[*idx]).collect()
    }

    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn version(&self) -> u64 {
        self.version
    }
}
