//! Show engine statistics.

use anyhow::Result;
use colored::Colorize;

use crate::config::Config;
use crate::session::Session;

pub fn run(json: bool) -> Result<()> {
    let config = Config::load()?;
    let session = Session::existing(&config)?;
    let stats = session.engine.get_stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{} {}", "Mindmap Statistics:".white().bold(), stats.project.cyan());
    println!("{}", "═".repeat(40).dimmed());
    println!();

    println!("{}", "Graph".blue().bold());
    println!("  Nodes:             {}", stats.graph.nodes.to_string().cyan());
    println!("  Edges:             {}", stats.graph.edges.to_string().cyan());
    println!("  Version:           {}", stats.graph.version);
    println!();

    println!("{}", "Temporal".blue().bold());
    println!("  Tracked edges:     {}", stats.temporal.tracked_edges);
    println!("  Currently valid:   {}", stats.temporal.currently_valid);
    println!("  Invalidated:       {}", stats.temporal.invalidated);
    println!("  Revisions:         {}", stats.temporal.total_revisions);
    println!();

    println!("{}", "Learning".blue().bold());
    println!(
        "  Associations:      {} (avg strength {:.3})",
        stats.hebbian.total_connections.to_string().cyan(),
        stats.hebbian.average_strength
    );
    if let Some((a, b, s)) = &stats.hebbian.strongest {
        println!("  Strongest:         {} <-> {} ({:.3})", a, b, s);
    }
    println!(
        "  Failure patterns:  {} (avg strength {:.3})",
        stats.inhibitory.pattern_count.to_string().cyan(),
        stats.inhibitory.average_strength
    );
    println!("  Fused results:     {} ({} conflicts)", stats.fusion.fusions, stats.fusion.conflicts);
    println!();

    println!("{}", "Cache".blue().bold());
    println!("  Entries:           {}", stats.cache.entries);
    println!("  Hit rate:          {:.1}%", stats.cache.hit_rate * 100.0);
    println!();

    println!("{}", "Predictions".blue().bold());
    println!("  Active:            {}", stats.prediction.active);
    println!("  Confirmed:         {}", stats.prediction.confirmed);

    if !stats.disabled.is_empty() {
        println!();
        let names: Vec<&str> = stats.disabled.iter().map(|s| s.as_str()).collect();
        println!("{} Disabled subsystems: {}", "•".yellow(), names.join(", "));
    }

    println!();
    println!("{}", "═".repeat(40).dimmed());

    Ok(())
}
