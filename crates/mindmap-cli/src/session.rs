//! The project snapshot under `.mindmap/`, loaded per command.

use anyhow::{Context, Result};
use colored::Colorize;
use mindmap::prelude::*;
use std::path::Path;
use std::sync::Arc;

use crate::config::{data_dir, snapshots_dir, Config};

pub struct Session {
    pub engine: Arc<MindmapEngine>,
    backend: Box<dyn SnapshotBackend>,
}

#[cfg(not(feature = "sqlite"))]
fn open_backend(_data: &Path) -> Result<Box<dyn SnapshotBackend>> {
    Ok(Box::new(SnapshotStore::new(snapshots_dir()?)))
}

#[cfg(feature = "sqlite")]
fn open_backend(data: &Path) -> Result<Box<dyn SnapshotBackend>> {
    let path = data.join("mindmap.db");
    let store = SqliteSnapshotStore::open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(Box::new(store))
}

impl Session {
    /// Load the project's engine, or start an empty one when nothing was
    /// saved yet.
    pub fn open(config: &Config) -> Result<Self> {
        let data = data_dir()?;
        std::fs::create_dir_all(&data)
            .with_context(|| format!("Failed to create {}", data.display()))?;
        let backend = open_backend(&data)?;
        let engine = MindmapEngine::new(config.engine_config()).context("Invalid engine configuration")?;

        if backend.exists(&config.project) {
            let report = engine
                .load(backend.as_ref())
                .with_context(|| format!("Failed to load snapshot for {}", config.project))?;
            for subsystem in &report.disabled {
                eprintln!(
                    "{} {} state was unreadable and starts empty",
                    "•".yellow(),
                    subsystem.as_str()
                );
            }
            if !report.rejected_nodes.is_empty() {
                eprintln!(
                    "{} {} snapshot nodes rejected",
                    "•".yellow(),
                    report.rejected_nodes.len()
                );
            }
            if !report.rejected_edges.is_empty() {
                eprintln!(
                    "{} {} snapshot edges rejected",
                    "•".yellow(),
                    report.rejected_edges.len()
                );
            }
        }
        Ok(Self {
            engine: Arc::new(engine),
            backend,
        })
    }

    /// Open a session that must already have a snapshot.
    pub fn existing(config: &Config) -> Result<Self> {
        let session = Self::open(config)?;
        if !session.backend.exists(&config.project) {
            anyhow::bail!("No snapshot for project {}. Run {} first.", config.project, "mindmap ingest".cyan());
        }
        Ok(session)
    }

    pub fn save(&self) -> Result<SnapshotMetadata> {
        self.engine
            .save(self.backend.as_ref())
            .context("Failed to save snapshot")
    }
}
