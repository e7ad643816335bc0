//! Scan the change log for emerging patterns.

use anyhow::Result;
use colored::Colorize;

use crate::config::Config;
use crate::session::Session;

pub fn run(json: bool) -> Result<()> {
    let config = Config::load()?;
    let session = Session::existing(&config)?;

    let emitted = session.engine.run_prediction_scan(true);
    session.save()?;
    let active = session.engine.predictions();

    if json {
        println!("{}", serde_json::to_string_pretty(&active)?);
        return Ok(());
    }

    println!(
        "{} Scan emitted {} new prediction(s)",
        "→".blue(),
        emitted.len().to_string().cyan()
    );
    if active.is_empty() {
        println!("{} No emerging patterns", "•".yellow());
        return Ok(());
    }

    println!();
    for prediction in &active {
        let hours = prediction.time_to_emergence_secs as f64 / 3600.0;
        println!(
            "  {} {} {}",
            "•".blue(),
            prediction.pattern_type.as_str().white().bold(),
            format!("(confidence {:.2})", prediction.confidence).dimmed()
        );
        println!("      expected within {:.1} h, evidence: {}", hours, prediction.evidence.len());
        for edge in prediction.evidence.iter().take(3) {
            println!("        {}", edge.dimmed());
        }
    }

    Ok(())
}
