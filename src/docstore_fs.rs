//! JSON directory backend for [`DocumentStore`].
//!
//! Reads source collections exported as files under `[documents].root`,
//! one file per collection. Used by the CLI; tests mostly use the
//! in-memory store.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::Config;
use crate::documents::{DocFilter, DocumentStore};

/// Directory-backed document store.
///
/// Each collection is a file directly under `root`: `<name>.jsonl` holds one
/// JSON document per line, `<name>.json` holds a JSON array. Lines that do
/// not parse are skipped with a warning.
pub struct JsonDirStore {
    root: PathBuf,
    include: GlobSet,
}

impl JsonDirStore {
    pub fn open(root: &Path) -> Result<Self> {
        if !root.exists() {
            bail!("Document store root does not exist: {}", root.display());
        }
        Ok(Self {
            root: root.to_path_buf(),
            include: build_globset(&["*.jsonl", "*.json"])?,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open(&config.documents.root)
    }

    fn collection_path(&self, collection: &str) -> Option<PathBuf> {
        ["jsonl", "json"]
            .iter()
            .map(|ext| self.root.join(format!("{}.{}", collection, ext)))
            .find(|p| p.is_file())
    }
}

#[async_trait]
impl DocumentStore for JsonDirStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !self.include.is_match(&file_name) {
                continue;
            }
            if let Some(stem) = entry.path().file_stem() {
                names.push(stem.to_string_lossy().to_string());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn find(&self, collection: &str, filter: &DocFilter) -> Result<Vec<Value>> {
        let Some(path) = self.collection_path(collection) else {
            return Ok(Vec::new());
        };
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read collection file: {}", path.display()))?;

        let docs = if path.extension().is_some_and(|e| e == "json") {
            parse_array(&content, &path)?
        } else {
            parse_lines(&content, collection)
        };

        Ok(docs.into_iter().filter(|d| filter.matches(d)).collect())
    }
}

fn parse_lines(content: &str, collection: &str) -> Vec<Value> {
    let mut docs = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(doc) => docs.push(doc),
            Err(e) => warn!(
                collection,
                line = lineno + 1,
                error = %e,
                "Skipping unparseable document"
            ),
        }
    }
    docs
}

fn parse_array(content: &str, path: &Path) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(content)
        .with_context(|| format!("Failed to parse collection file: {}", path.display()))?
    {
        Value::Array(items) => Ok(items),
        _ => bail!("Collection file is not a JSON array: {}", path.display()),
    }
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
