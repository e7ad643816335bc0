//! Snapshot persistence: save and load a project's graph and learned state.
//!
//! A snapshot carries the graph (nodes + edges) plus one section per
//! learning subsystem. Sections are kept as raw JSON until asked for, so
//! a damaged Hebbian table does not stop the graph or the temporal layer
//! from loading. The caller decides what to do with a section that fails
//! to decode; the engine disables that subsystem and logs a warning.

use chrono::Utc;
use mindmap_core::error::PersistenceError;
use mindmap_core::types::{Edge, Node, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::fusion::FusionTable;
use crate::hebbian::HebbianTable;
use crate::inhibitory::InhibitoryTable;
use crate::temporal::TemporalLayer;

/// Current on-disk format.
pub const SNAPSHOT_FORMAT: u32 = 1;

/// Snapshot metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub snapshot_id: String,
    pub project: String,
    pub format: u32,
    pub graph_version: u64,
    pub saved_at: Timestamp,
    pub node_count: usize,
    pub edge_count: usize,
}

/// Serializable state of one project's engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub metadata: SnapshotMetadata,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub temporal: serde_json::Value,
    #[serde(default)]
    pub hebbian: serde_json::Value,
    #[serde(default)]
    pub inhibitory: serde_json::Value,
    #[serde(default)]
    pub fusion: serde_json::Value,
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value, PersistenceError> {
    serde_json::to_value(value).map_err(|e| PersistenceError::Serialization(e.to_string()))
}

/// Decode one section. A missing section decodes to the default.
fn decode<T: DeserializeOwned + Default>(value: &serde_json::Value, section: &str) -> Result<T, PersistenceError> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| PersistenceError::Corrupt(format!("{} section: {}", section, e)))
}

/// The learned tables that go into a snapshot next to the graph.
#[derive(Debug, Clone, Default)]
pub struct LearnedState<'a> {
    pub temporal: Option<&'a TemporalLayer>,
    pub hebbian: Option<HebbianTable>,
    pub inhibitory: Option<InhibitoryTable>,
    pub fusion: Option<FusionTable>,
}

impl EngineSnapshot {
    pub fn new(
        project: &str,
        graph_version: u64,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        learned: LearnedState<'_>,
    ) -> Result<Self, PersistenceError> {
        let section = |v: Option<serde_json::Value>| v.unwrap_or(serde_json::Value::Null);
        Ok(Self {
            metadata: SnapshotMetadata {
                snapshot_id: uuid::Uuid::new_v4().to_string(),
                project: project.to_string(),
                format: SNAPSHOT_FORMAT,
                graph_version,
                saved_at: Utc::now(),
                node_count: nodes.len(),
                edge_count: edges.len(),
            },
            nodes,
            edges,
            temporal: section(learned.temporal.map(encode).transpose()?),
            hebbian: section(learned.hebbian.as_ref().map(encode).transpose()?),
            inhibitory: section(learned.inhibitory.as_ref().map(encode).transpose()?),
            fusion: section(learned.fusion.as_ref().map(encode).transpose()?),
        })
    }

    pub fn decode_temporal(&self) -> Result<TemporalLayer, PersistenceError> {
        decode(&self.temporal, "temporal")
    }

    pub fn decode_hebbian(&self) -> Result<HebbianTable, PersistenceError> {
        decode(&self.hebbian, "hebbian")
    }

    pub fn decode_inhibitory(&self) -> Result<InhibitoryTable, PersistenceError> {
        decode(&self.inhibitory, "inhibitory")
    }

    pub fn decode_fusion(&self) -> Result<FusionTable, PersistenceError> {
        decode(&self.fusion, "fusion")
    }

    pub fn to_json(&self) -> Result<String, PersistenceError> {
        serde_json::to_string_pretty(self).map_err(|e| PersistenceError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, PersistenceError> {
        let snapshot: EngineSnapshot =
            serde_json::from_str(json).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        if snapshot.metadata.format != SNAPSHOT_FORMAT {
            return Err(PersistenceError::VersionMismatch {
                expected: SNAPSHOT_FORMAT,
                found: snapshot.metadata.format,
            });
        }
        Ok(snapshot)
    }
}

/// Where snapshots live, keyed by project.
pub trait SnapshotBackend: Send + Sync {
    fn save(&self, snapshot: &EngineSnapshot) -> Result<(), PersistenceError>;
    fn load(&self, project: &str) -> Result<EngineSnapshot, PersistenceError>;
    fn exists(&self, project: &str) -> bool;
    fn delete(&self, project: &str) -> Result<(), PersistenceError>;
    fn projects(&self) -> Result<Vec<String>, PersistenceError>;
}

/// One JSON file per project under a data directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

fn io_err(e: std::io::Error) -> PersistenceError {
    PersistenceError::Io(e.to_string())
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a project's snapshot. Path separators in the key are flattened.
    pub fn path_for(&self, project: &str) -> PathBuf {
        let key: String = project
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.json", key))
    }
}

impl SnapshotBackend for SnapshotStore {
    fn save(&self, snapshot: &EngineSnapshot) -> Result<(), PersistenceError> {
        let path = self.path_for(&snapshot.metadata.project);
        let json = snapshot.to_json()?;
        std::fs::create_dir_all(&self.root).map_err(io_err)?;
        // write-then-rename so a crash never leaves half a snapshot
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &path).map_err(io_err)?;
        info!(
            project = %snapshot.metadata.project,
            nodes = snapshot.metadata.node_count,
            edges = snapshot.metadata.edge_count,
            "snapshot saved"
        );
        Ok(())
    }

    fn load(&self, project: &str) -> Result<EngineSnapshot, PersistenceError> {
        let path = self.path_for(project);
        if !path.exists() {
            return Err(PersistenceError::NotFound(project.to_string()));
        }
        let json = std::fs::read_to_string(&path).map_err(io_err)?;
        let snapshot = EngineSnapshot::from_json(&json)?;
        info!(project, nodes = snapshot.metadata.node_count, "snapshot loaded");
        Ok(snapshot)
    }

    fn exists(&self, project: &str) -> bool {
        self.path_for(project).exists()
    }

    fn delete(&self, project: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(project);
        if !path.exists() {
            return Err(PersistenceError::NotFound(project.to_string()));
        }
        std::fs::remove_file(path).map_err(io_err)
    }

    fn projects(&self) -> Result<Vec<String>, PersistenceError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    out.push(stem.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindmap_core::types::{EdgeType, NodeType};

    fn snapshot(project: &str) -> EngineSnapshot {
        let nodes = vec![
            Node::new("src/main.rs", NodeType::File, "main.rs"),
            Node::new("run_server", NodeType::Function, "run_server"),
        ];
        let edges = vec![Edge::new("src/main.rs", "run_server", EdgeType::Contains)];
        let mut temporal = TemporalLayer::new();
        temporal.track(edges[0].clone(), Utc::now(), Utc::now()).unwrap();
        EngineSnapshot::new(
            project,
            7,
            nodes,
            edges,
            LearnedState {
                temporal: Some(&temporal),
                hebbian: Some(HebbianTable::default()),
                ..LearnedState::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let snap = snapshot("demo");
        store.save(&snap).unwrap();

        assert!(store.exists("demo"));
        let loaded = store.load("demo").unwrap();
        assert_eq!(loaded, snap);
        assert_eq!(loaded.decode_temporal().unwrap().stats(Utc::now()).tracked_edges, 1);
        assert_eq!(store.projects().unwrap(), vec!["demo".to_string()]);
    }

    #[test]
    fn missing_sections_decode_to_defaults() {
        let snap = snapshot("demo");
        assert!(snap.decode_inhibitory().unwrap().patterns.is_empty());
        assert_eq!(snap.decode_fusion().unwrap(), FusionTable::default());
    }

    #[test]
    fn corrupt_section_is_isolated() {
        let mut snap = snapshot("demo");
        snap.hebbian = serde_json::json!({"connections": "not a list"});
        let json = snap.to_json().unwrap();
        let loaded = EngineSnapshot::from_json(&json).unwrap();
        assert!(matches!(loaded.decode_hebbian(), Err(PersistenceError::Corrupt(_))));
        assert!(loaded.decode_temporal().is_ok());
        assert_eq!(loaded.nodes.len(), 2);
    }

    #[test]
    fn format_mismatch_and_not_found() {
        let mut snap = snapshot("demo");
        snap.metadata.format = 99;
        let json = snap.to_json().unwrap();
        assert!(matches!(
            EngineSnapshot::from_json(&json),
            Err(PersistenceError::VersionMismatch { expected: 1, found: 99 })
        ));

        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(matches!(store.load("nope"), Err(PersistenceError::NotFound(_))));
    }

    #[test]
    fn project_keys_are_flattened() {
        let store = SnapshotStore::new("/data");
        assert_eq!(store.path_for("team/app"), PathBuf::from("/data/team_app.json"));
    }
}
