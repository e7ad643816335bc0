//! Record a task outcome.

use anyhow::{bail, Result};
use colored::Colorize;
use mindmap::prelude::*;

use crate::config::Config;
use crate::session::Session;

pub fn build_outcome(kind: &str, task: &str, error: Option<String>, files: Vec<String>) -> Result<TaskOutcome> {
    let Some(kind) = OutcomeKind::parse(kind) else {
        bail!("Unknown outcome {}: expected success, error or partial", kind.cyan());
    };
    let mut outcome = match (kind, error) {
        (OutcomeKind::Error, Some(details)) => TaskOutcome::error(task, details),
        (OutcomeKind::Error, None) => bail!("Error outcomes need {}", "--error".cyan()),
        (kind, _) => TaskOutcome::new(task, kind),
    };
    for file in files {
        outcome = outcome.with_file(file);
    }
    Ok(outcome)
}

pub fn run(kind: &str, task: &str, error: Option<String>, files: Vec<String>) -> Result<()> {
    let config = Config::load()?;
    let outcome = build_outcome(kind, task, error, files)?;
    let session = Session::existing(&config)?;

    let report = session.engine.report_outcome(&outcome, None);
    session.save()?;

    println!("{} Recorded {} outcome", "✓".green().bold(), outcome.outcome.as_str().cyan());
    println!("  Resolved nodes:   {}", report.resolved.len().to_string().cyan());
    if report.hebbian_pairs > 0 {
        println!("  Associations:     {}", report.hebbian_pairs.to_string().cyan());
    }
    if let Some(pattern) = &report.inhibitory_pattern {
        let verb = if report.pattern_created { "created" } else { "reinforced" };
        println!("  Failure pattern:  {} ({})", pattern.dimmed(), verb);
    }
    if report.predictions_confirmed > 0 {
        println!("  Predictions confirmed: {}", report.predictions_confirmed);
    }
    if !report.unresolved.is_empty() {
        println!(
            "{} Not in the graph: {}",
            "•".yellow(),
            report.unresolved.join(", ").dimmed()
        );
    }

    Ok(())
}
