//! Document store abstraction.
//!
//! The [`DocumentStore`] trait is the read-only view the pipeline has of the
//! template-partitioned source collections. Queries are expressed as a
//! [`DocFilter`], a composable list of predicates evaluated against raw
//! JSON documents, so every backend applies exactly the same semantics.
//!
//! | Backend | Purpose |
//! |---------|---------|
//! | [`JsonDirStore`](crate::docstore_fs::JsonDirStore) | One JSON-lines file per collection on disk |
//! | [`MemoryDocumentStore`] | In-process collections for tests and embedding |

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::models::SnapshotWindow;
use crate::normalize::parse_timestamp;

/// Collection holding the key → label mapping of every template.
pub const LABEL_PAIRS_COLLECTION: &str = "form_template_key_label_pairs";

/// A single document predicate.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// `field` parses as a timestamp inside the half-open window.
    TimeRange { field: String, window: SnapshotWindow },
    /// `field` is present (any value, including null).
    Exists(String),
    /// `field` equals `value` (numbers compare by value, not representation).
    Equals(String, Value),
}

impl Predicate {
    fn matches(&self, doc: &Value) -> bool {
        match self {
            Predicate::TimeRange { field, window } => doc
                .get(field)
                .and_then(parse_timestamp)
                .map(|ts| window.contains(ts))
                .unwrap_or(false),
            Predicate::Exists(field) => doc.get(field).is_some(),
            Predicate::Equals(field, expected) => match (doc.get(field), expected) {
                (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
                (Some(actual), expected) => actual == expected,
                (None, _) => false,
            },
        }
    }
}

/// Conjunction of predicates. An empty filter matches every object document.
#[derive(Debug, Clone, Default)]
pub struct DocFilter {
    predicates: Vec<Predicate>,
}

impl DocFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_range(mut self, field: &str, window: SnapshotWindow) -> Self {
        self.predicates.push(Predicate::TimeRange {
            field: field.to_string(),
            window,
        });
        self
    }

    pub fn exists(mut self, field: &str) -> Self {
        self.predicates.push(Predicate::Exists(field.to_string()));
        self
    }

    pub fn equals(mut self, field: &str, value: Value) -> Self {
        self.predicates.push(Predicate::Equals(field.to_string(), value));
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        doc.is_object() && self.predicates.iter().all(|p| p.matches(doc))
    }
}

/// Read-only access to source collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of every collection in the store.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Documents in `collection` matching `filter`. A missing collection
    /// yields an empty result.
    async fn find(&self, collection: &str, filter: &DocFilter) -> Result<Vec<Value>>;

    /// Number of documents in `collection` matching `filter`.
    async fn count(&self, collection: &str, filter: &DocFilter) -> Result<u64> {
        Ok(self.find(collection, filter).await?.len() as u64)
    }

    /// First matching document, if any.
    async fn find_one(&self, collection: &str, filter: &DocFilter) -> Result<Option<Value>> {
        Ok(self.find(collection, filter).await?.into_iter().next())
    }
}

/// In-memory document store.
pub struct MemoryDocumentStore {
    collections: RwLock<BTreeMap<String, Vec<Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
        }
    }

    /// Append a document, creating the collection on first use.
    pub fn insert(&self, collection: &str, doc: Value) {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    pub fn create_collection(&self, collection: &str) {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        collections.entry(collection.to_string()).or_default();
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(collections.keys().cloned().collect())
    }

    async fn find(&self, collection: &str, filter: &DocFilter) -> Result<Vec<Value>> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }
}
