//! Shared types used across all Mindmap crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Wall-clock instant used for every timestamp in the system.
pub type Timestamp = DateTime<Utc>;

/// Ordered string metadata attached to nodes and edges.
pub type Metadata = BTreeMap<String, String>;

/// Unique identifier for a node in the knowledge graph.
///
/// Ids are caller-chosen strings (usually a path or a qualified symbol
/// name) so that re-ingesting the same entity lands on the same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A random id, for nodes with no natural key (episodic memories).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier for an edge in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub String);

impl EdgeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Deterministic id for a relation: `source-type->target`.
    ///
    /// Used whenever the caller does not supply an explicit id, which
    /// makes resubmitting the same relation idempotent.
    pub fn derive(source: &NodeId, edge_type: EdgeType, target: &NodeId) -> Self {
        Self(format!("{}-{}->{}", source, edge_type.as_str(), target))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EdgeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kinds of code entities stored in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    File,
    Directory,
    Function,
    Class,
    Error,
    Pattern,
    EpisodicMemory,
    CallPattern,
}

impl NodeType {
    pub const ALL: [NodeType; 8] = [
        NodeType::File,
        NodeType::Directory,
        NodeType::Function,
        NodeType::Class,
        NodeType::Error,
        NodeType::Pattern,
        NodeType::EpisodicMemory,
        NodeType::CallPattern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::File => "file",
            NodeType::Directory => "directory",
            NodeType::Function => "function",
            NodeType::Class => "class",
            NodeType::Error => "error",
            NodeType::Pattern => "pattern",
            NodeType::EpisodicMemory => "episodic_memory",
            NodeType::CallPattern => "call_pattern",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of relations between code entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Contains,
    Imports,
    Calls,
    Fixes,
    RelatesTo,
    DependsOn,
    Detects,
    CoActivates,
}

impl EdgeType {
    pub const ALL: [EdgeType; 8] = [
        EdgeType::Contains,
        EdgeType::Imports,
        EdgeType::Calls,
        EdgeType::Fixes,
        EdgeType::RelatesTo,
        EdgeType::DependsOn,
        EdgeType::Detects,
        EdgeType::CoActivates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Contains => "contains",
            EdgeType::Imports => "imports",
            EdgeType::Calls => "calls",
            EdgeType::Fixes => "fixes",
            EdgeType::RelatesTo => "relates_to",
            EdgeType::DependsOn => "depends_on",
            EdgeType::Detects => "detects",
            EdgeType::CoActivates => "co_activates",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A code entity in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub node_type: NodeType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    /// How sure the extractor is that this entity is real (0.0-1.0).
    pub confidence: f64,
    pub last_updated: Timestamp,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type,
            name: name.into(),
            path: None,
            metadata: Metadata::new(),
            confidence: 1.0,
            last_updated: Utc::now(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, at: Timestamp) -> Self {
        self.last_updated = at;
        self
    }

    /// Whether two nodes carry the same content, ignoring the timestamp.
    pub fn same_content(&self, other: &Node) -> bool {
        self.id == other.id
            && self.node_type == other.node_type
            && self.name == other.name
            && self.path == other.path
            && self.metadata == other.metadata
            && self.confidence == other.confidence
    }
}

/// A typed relation between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,
    /// Relation strength (>= 0.0). 1.0 is a plain structural relation.
    pub weight: f64,
    /// How sure the extractor is that this relation holds (0.0-1.0).
    pub confidence: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Edge {
    /// A new edge with a derived id, weight 1.0 and confidence 1.0.
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>, edge_type: EdgeType) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: EdgeId::derive(&source, edge_type, &target),
            source,
            target,
            edge_type,
            weight: 1.0,
            confidence: 1.0,
            metadata: Metadata::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = EdgeId::new(id);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The node on the other side of this edge, seen from `from`.
    pub fn other_end(&self, from: &NodeId) -> &NodeId {
        if &self.source == from {
            &self.target
        } else {
            &self.source
        }
    }
}

/// Partial update applied to an existing edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl EdgeUpdate {
    pub fn weight(weight: f64) -> Self {
        Self {
            weight: Some(weight),
            ..Default::default()
        }
    }

    pub fn confidence(confidence: f64) -> Self {
        Self {
            confidence: Some(confidence),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.weight.is_none() && self.confidence.is_none() && self.metadata.is_empty()
    }
}

/// Direction of an adjacency entry relative to the queried node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// One adjacency entry returned by `GraphStore::neighbors`.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub node_id: NodeId,
    pub edge_id: EdgeId,
    pub edge_type: EdgeType,
    pub weight: f64,
    pub confidence: f64,
    pub direction: Direction,
}

/// Result of an idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Where an ingested item came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub file: String,
    #[serde(default)]
    pub language: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_edge_ids_are_stable() {
        let a = Edge::new("a.rs", "b.rs", EdgeType::Imports);
        let b = Edge::new("a.rs", "b.rs", EdgeType::Imports);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.as_str(), "a.rs-imports->b.rs");
        let c = Edge::new("a.rs", "b.rs", EdgeType::Calls);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn node_type_names_round_trip() {
        for t in NodeType::ALL {
            assert_eq!(NodeType::parse(t.as_str()), Some(t));
        }
        for t in EdgeType::ALL {
            assert_eq!(EdgeType::parse(t.as_str()), Some(t));
        }
        assert_eq!(NodeType::parse("module"), None);
    }

    #[test]
    fn same_content_ignores_timestamp() {
        let a = Node::new("x", NodeType::Function, "parse");
        let b = a.clone().with_timestamp(a.last_updated + chrono::Duration::hours(1));
        assert!(a.same_content(&b));
        assert!(!a.same_content(&b.with_confidence(0.4)));
    }

    #[test]
    fn other_end_resolves_both_directions() {
        let e = Edge::new("a", "b", EdgeType::Calls);
        assert_eq!(e.other_end(&NodeId::from("a")), &NodeId::from("b"));
        assert_eq!(e.other_end(&NodeId::from("b")), &NodeId::from("a"));
    }
}
