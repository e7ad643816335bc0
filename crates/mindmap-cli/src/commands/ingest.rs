//! Ingest extractor batches into the project graph.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use mindmap::prelude::*;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::session::Session;

/// Read every batch from the given files.
pub fn read_batches(files: &[String]) -> Result<Vec<IngestBatch>> {
    let mut batches = Vec::new();
    for file in files {
        let path = Path::new(file);
        if !path.exists() {
            bail!("Path does not exist: {}", path.display());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read: {}", path.display()))?;
        let parsed = IngestBatch::parse_many(&content)
            .with_context(|| format!("Invalid batch file: {}", path.display()))?;
        batches.extend(parsed);
    }
    Ok(batches)
}

pub fn run(files: &[String], verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let batches = read_batches(files)?;
    if batches.is_empty() {
        bail!("No batches found in {} file(s)", files.len());
    }
    let items: usize = batches.iter().map(IngestBatch::len).sum();

    let session = Session::open(&config)?;
    println!(
        "{} Ingesting {} items from {} batches...",
        "→".blue(),
        items.to_string().cyan(),
        batches.len().to_string().cyan()
    );

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .context("Invalid progress template")?,
    );
    pb.set_message("ingesting");
    pb.enable_steady_tick(Duration::from_millis(100));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let report = runtime.block_on(async {
        let scheduler = session.engine.ingest_scheduler();
        session.engine.ingest_batches(&scheduler, batches).await
    });
    pb.finish_with_message("done");

    let metadata = session.save()?;

    println!();
    println!("{} Ingestion complete!", "✓".green().bold());
    println!(
        "  Nodes: {} new, {} updated, {} unchanged",
        report.nodes_inserted.to_string().cyan(),
        report.nodes_updated.to_string().cyan(),
        report.nodes_unchanged
    );
    println!(
        "  Edges: {} new, {} updated, {} unchanged",
        report.edges_inserted.to_string().cyan(),
        report.edges_updated.to_string().cyan(),
        report.edges_unchanged
    );
    println!(
        "  Graph: {} nodes, {} edges (version {})",
        metadata.node_count, metadata.edge_count, metadata.graph_version
    );
    if report.retries > 0 {
        println!("  Retried chunks: {}", report.retries);
    }
    if !report.failures.is_empty() {
        println!(
            "{} {} items rejected",
            "•".yellow(),
            report.failures.len().to_string().yellow()
        );
        let shown = if verbose { report.failures.len() } else { 5 };
        for failure in report.failures.iter().take(shown) {
            println!("    {} {}", failure.item.dimmed(), failure.error);
        }
    }

    Ok(())
}
