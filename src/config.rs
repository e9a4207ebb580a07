//! Configuration parsing and validation.
//!
//! Configuration is loaded from a TOML file (default `./config/qcsnap.toml`)
//! with `[db]`, `[documents]`, `[snapshot]` and `[logging]` sections.
//! `QCSNAP_WINDOW_MINUTES` overrides the window length after parsing, and
//! the result is validated before any command runs.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding `snapshot.window_minutes`.
pub const WINDOW_MINUTES_ENV: &str = "QCSNAP_WINDOW_MINUTES";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub documents: DocumentsConfig,
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    /// Directory holding one `<collection>.jsonl` (or `.json`) file per collection.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    /// Window length: both the scheduler interval and the first-run lookback.
    pub window_minutes: i64,
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    #[serde(default = "default_group_timeout_secs")]
    pub group_timeout_secs: u64,
    #[serde(default)]
    pub lock_file: Option<PathBuf>,
}

fn default_scan_timeout_secs() -> u64 {
    60
}
fn default_group_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Path of the advisory lock file guarding snapshot cycles.
    ///
    /// Falls back to `qcsnap.lock` next to the database file.
    pub fn lock_path(&self) -> PathBuf {
        match &self.snapshot.lock_file {
            Some(path) => path.clone(),
            None => self
                .db
                .path
                .parent()
                .map(|p| p.join("qcsnap.lock"))
                .unwrap_or_else(|| PathBuf::from("qcsnap.lock")),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;

    if let Ok(raw) = std::env::var(WINDOW_MINUTES_ENV) {
        config.snapshot.window_minutes = raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be an integer, got '{}'", WINDOW_MINUTES_ENV, raw))?;
    }

    validate(&config)?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

fn validate(config: &Config) -> Result<()> {
    if config.snapshot.window_minutes <= 0 {
        anyhow::bail!("snapshot.window_minutes must be > 0");
    }

    if config.snapshot.scan_timeout_secs == 0 {
        anyhow::bail!("snapshot.scan_timeout_secs must be > 0");
    }

    if config.snapshot.group_timeout_secs == 0 {
        anyhow::bail!("snapshot.group_timeout_secs must be > 0");
    }

    Ok(())
}
