//! Query the knowledge graph.

use anyhow::{anyhow, Result};
use colored::Colorize;
use mindmap::prelude::*;

use crate::config::Config;
use crate::session::Session;

/// Command-line overrides for one query.
#[derive(Debug, Default)]
pub struct Request {
    pub limit: Option<usize>,
    pub types: Option<String>,
    pub task: Option<String>,
    pub files: Vec<String>,
    pub errors: Vec<String>,
    pub json: bool,
}

fn parse_types(types: &str) -> Result<Vec<NodeType>> {
    types
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| NodeType::parse(t).ok_or_else(|| anyhow!("Unknown node type: {t}")))
        .collect()
}

/// Build validated options from config defaults and overrides.
pub fn build_options(config: &Config, request: &Request) -> Result<QueryOptions> {
    let mut options = config.query_options();
    if let Some(limit) = request.limit {
        options = options.with_limit(limit);
    }
    if let Some(types) = &request.types {
        options = options.with_node_types(parse_types(types)?);
    }

    let mut context = QueryContext::new();
    if let Some(task) = &request.task {
        context = context.with_task(task.clone());
    }
    for file in &request.files {
        context = context.with_active_file(file.clone());
    }
    for error in &request.errors {
        context = context.with_error(error.clone());
    }
    options = options.with_context(context);
    options.validate()?;
    Ok(options)
}

pub fn run(query: &str, request: Request) -> Result<()> {
    let config = Config::load()?;
    let options = build_options(&config, &request)?;
    let session = Session::existing(&config)?;

    let response = session.engine.query(query, &options)?;
    // the query itself taught the Hebbian table
    if !response.cached && !response.partial {
        session.save()?;
    }

    if request.json {
        println!("{}", response.to_json()?);
        return Ok(());
    }

    if response.nodes.is_empty() {
        println!("{} No results found for: {}", "•".yellow(), query.cyan());
        return Ok(());
    }

    println!("{} Results for {}:", "→".blue(), query.cyan().bold());
    println!();

    for (i, ranked) in response.nodes.iter().enumerate() {
        let rank = format!("{}.", i + 1);
        let score = format!("{:.3}", ranked.score);
        let location = ranked.node.path.as_deref().unwrap_or(ranked.node.id.as_str());

        println!(
            "  {} {} {} {}",
            rank.blue(),
            ranked.node.name.white().bold(),
            ranked.node.node_type.as_str().dimmed(),
            format!("({})", score).dimmed()
        );
        println!(
            "      {}  hop: {}  activation: {:.3}  context: {:.3}",
            location,
            ranked.hop_distance,
            ranked.activation_strength,
            ranked.context_relevance
        );
        if let Some(fusion) = &ranked.fusion {
            let flag = if fusion.conflict { " conflict".yellow().to_string() } else { String::new() };
            println!("      fused confidence: {:.3}{}", fusion.confidence, flag);
        }
    }

    println!();
    let mut summary = format!(
        "{} {} of {} matches in {} ms",
        "✓".green(),
        response.nodes.len().to_string().cyan(),
        response.total_matches,
        response.query_time_ms
    );
    if response.cached {
        summary.push_str(&format!(" {}", "(cached)".dimmed()));
    }
    if response.inhibition_applied > 0 {
        summary.push_str(&format!(", {} suppressed", response.inhibition_applied));
    }
    println!("{summary}");
    if response.partial {
        println!("{} Partial result: the query stopped early", "•".yellow());
    }
    for failure in &response.stage_failures {
        println!("{} {} skipped for {}: {}", "•".yellow(), failure.stage, failure.node_id, failure.reason);
    }

    Ok(())
}
