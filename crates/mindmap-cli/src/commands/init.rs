//! Initialize a new Mindmap project.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use crate::config::{Config, CONFIG_FILE, DATA_DIR};

pub fn run(path: Option<String>, name: Option<String>) -> Result<()> {
    let base_path = match path {
        Some(p) => PathBuf::from(p),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    println!("{} Initializing Mindmap project...", "→".blue());

    // Create .mindmap directory
    let data_dir = base_path.join(DATA_DIR);
    let snapshots = data_dir.join("snapshots");
    std::fs::create_dir_all(&snapshots)
        .with_context(|| format!("Failed to create {}", snapshots.display()))?;
    println!("  {} Created {}", "✓".green(), snapshots.display());

    // Create default config
    let config_path = base_path.join(CONFIG_FILE);
    if !config_path.exists() {
        let mut config = Config::default();
        if let Some(name) = name {
            config.project = name;
        }
        config.save(&config_path)?;
        println!("  {} Created {}", "✓".green(), config_path.display());
    } else {
        println!("  {} {} already exists", "•".yellow(), config_path.display());
    }

    let gitignore_path = data_dir.join(".gitignore");
    if !gitignore_path.exists() {
        std::fs::write(&gitignore_path, "snapshots/\n*.db\n")?;
        println!("  {} Created {}", "✓".green(), gitignore_path.display());
    }

    println!();
    println!("{} Mindmap project initialized!", "✓".green().bold());
    println!();
    println!("Next steps:");
    println!("  {} mindmap ingest <batches.json>", "1.".blue());
    println!("  {} mindmap query \"your search\"", "2.".blue());
    println!("  {} mindmap outcome success \"what you did\" --files a.rs,b.rs", "3.".blue());

    Ok(())
}
