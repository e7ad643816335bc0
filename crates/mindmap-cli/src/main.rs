//! Mindmap CLI - Command-line interface for the code knowledge graph.

mod commands;
mod config;
mod session;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mindmap")]
#[command(author, version, about = "Mindmap - Adaptive code knowledge graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new Mindmap project
    Init {
        /// Project directory (default: current directory)
        #[arg(short, long)]
        path: Option<String>,

        /// Project name used as the snapshot key
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Ingest extractor batch files (JSON)
    Ingest {
        /// Batch files, each holding one batch or an array of batches
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Query the knowledge graph
    Query {
        /// Search query
        query: String,

        /// Maximum results to return
        #[arg(short, long)]
        limit: Option<usize>,

        /// Node types to keep (e.g., "file,function")
        #[arg(short, long)]
        types: Option<String>,

        /// Current task description
        #[arg(long)]
        task: Option<String>,

        /// Files currently open
        #[arg(long, value_delimiter = ',')]
        files: Vec<String>,

        /// Recent error messages
        #[arg(long)]
        errors: Vec<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report how a task went
    Outcome {
        /// success, error or partial
        kind: String,

        /// Task description
        task: String,

        /// Error details (for error outcomes)
        #[arg(short, long)]
        error: Option<String>,

        /// Files or node ids involved
        #[arg(short, long, value_delimiter = ',')]
        files: Vec<String>,
    },

    /// Show engine statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Scan for emerging patterns
    Predict {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export the project snapshot
    Export {
        /// Output file path
        output: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init { path, name } => commands::init::run(path, name),
        Commands::Ingest { files } => commands::ingest::run(&files, cli.verbose),
        Commands::Query { query, limit, types, task, files, errors, json } => {
            let request = commands::query::Request {
                limit,
                types,
                task,
                files,
                errors,
                json,
            };
            commands::query::run(&query, request)
        }
        Commands::Outcome { kind, task, error, files } => {
            commands::outcome::run(&kind, &task, error, files)
        }
        Commands::Stats { json } => commands::stats::run(json),
        Commands::Predict { json } => commands::predict::run(json),
        Commands::Export { output } => commands::export::run(&output),
    }
}
