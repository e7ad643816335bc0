//! Configuration management for the Mindmap CLI.

use anyhow::{Context, Result};
use mindmap::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "mindmap.toml";
pub const DATA_DIR: &str = ".mindmap";

/// Mindmap project configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Snapshot key for this project.
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default)]
    pub query: QueryDefaults,
    /// Subsystem tuning. Read when present, never written by `init`.
    #[serde(default, skip_serializing)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDefaults {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

// Default value functions
fn default_project() -> String { "default".to_string() }
fn default_limit() -> usize { 20 }
fn default_timeout_ms() -> u64 { 5000 }

impl Default for Config {
    fn default() -> Self {
        Self {
            project: default_project(),
            query: QueryDefaults::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Config {
    /// Load config from mindmap.toml in the current or parent directories.
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Some(path) => Self::load_from(&path),
            None => Ok(Config::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config
            .engine_config()
            .validate()
            .with_context(|| format!("Invalid engine settings in {}", path.display()))?;
        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        self.engine.clone().with_project(self.project.clone())
    }

    /// Save config to the specified path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Options for a query before command-line overrides.
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions::new()
            .with_limit(self.query.limit)
            .with_timeout_ms(self.query.timeout_ms)
    }
}

/// Find mindmap.toml in current or parent directories.
fn find_config_file() -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }
        if !dir.pop() {
            break;
        }
    }
    None
}

/// Directory holding mindmap.toml, or the current directory.
pub fn project_root() -> Result<PathBuf> {
    match find_config_file() {
        Some(mut path) => {
            path.pop();
            Ok(path)
        }
        None => Ok(std::env::current_dir()?),
    }
}

/// Get the Mindmap data directory (.mindmap/).
pub fn data_dir() -> Result<PathBuf> {
    Ok(project_root()?.join(DATA_DIR))
}

/// Get the snapshots directory.
pub fn snapshots_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("snapshots"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_survives_toml() {
        let mut config = Config::default();
        config.project = "shop".into();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(!text.contains("[engine"));
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.project, "shop");
        assert_eq!(back.query.limit, 20);
        assert_eq!(back.engine_config(), EngineConfig::default().with_project("shop"));
    }

    #[test]
    fn sparse_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "project = \"api\"\n\n[query]\nlimit = 5\n\n[engine.activation]\ndecay = 0.5\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.query.limit, 5);
        assert_eq!(config.query.timeout_ms, 5000);
        let engine = config.engine_config();
        assert_eq!(engine.project, "api");
        assert_eq!(engine.activation.decay, 0.5);
        assert_eq!(engine.hebbian, EngineConfig::default().hebbian);
    }

    #[test]
    fn invalid_engine_settings_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[engine.cache]\nmax_entries = 0\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_entries"));
    }
}
