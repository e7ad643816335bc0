//! Export the project snapshot.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

use crate::config::Config;
use crate::session::Session;

pub fn run(output: &str) -> Result<()> {
    let config = Config::load()?;
    let session = Session::existing(&config)?;

    let snapshot = session.engine.snapshot().context("Failed to build snapshot")?;
    let json = snapshot.to_json().context("Failed to serialize snapshot")?;

    let path = Path::new(output);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, json).with_context(|| format!("Failed to write: {}", path.display()))?;

    println!(
        "{} Exported {} nodes and {} edges to {}",
        "✓".green().bold(),
        snapshot.metadata.node_count.to_string().cyan(),
        snapshot.metadata.edge_count.to_string().cyan(),
        path.display()
    );

    Ok(())
}
