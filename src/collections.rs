//! Selection of the month-partitioned source collections in scope for a cycle.
//!
//! Source collections are named `form_template_<templateId>_<YYYYMM>`. Only
//! collections whose month falls inside the scanned span are read;
//! documents outside the exact window are filtered later by the per-document
//! time predicate.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Datelike, Utc};
use tracing::debug;

use crate::documents::DocumentStore;
use crate::error::SnapshotError;

pub const COLLECTION_PREFIX: &str = "form_template_";

/// Parsed `form_template_<templateId>_<YYYYMM>` name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CollectionName {
    pub template_id: i64,
    pub month: String,
}

impl CollectionName {
    pub fn parse(name: &str) -> Result<Self, SnapshotError> {
        let invalid = || SnapshotError::InvalidCollectionName(name.to_string());
        let rest = name.strip_prefix(COLLECTION_PREFIX).ok_or_else(invalid)?;
        let (id, month) = rest.split_once('_').ok_or_else(invalid)?;
        let template_id = id.parse::<i64>().map_err(|_| invalid())?;
        if month.len() != 6 || !month.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        Ok(Self {
            template_id,
            month: month.to_string(),
        })
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}_{}", COLLECTION_PREFIX, self.template_id, self.month)
    }
}

/// `YYYYMM` suffixes of every calendar month touched by `[start, end]`,
/// partial months at both ends included.
pub fn month_suffixes(start: DateTime<Utc>, end: DateTime<Utc>) -> BTreeSet<String> {
    let mut suffixes = BTreeSet::new();
    let last = (end.year(), end.month());
    let (mut year, mut month) = (start.year(), start.month());

    while (year, month) <= last {
        suffixes.insert(format!("{:04}{:02}", year, month));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    suffixes
}

/// Source collections whose month overlaps `[since, now]`, sorted by name.
///
/// Names that carry the prefix but not the `<id>_<YYYYMM>` shape (the label
/// mapping collection, stray exports) are logged at debug and left out.
pub async fn list_candidate_collections(
    store: &dyn DocumentStore,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<CollectionName>> {
    let suffixes = month_suffixes(since, now);
    let mut selected: Vec<CollectionName> = store
        .list_collections()
        .await?
        .iter()
        .filter(|name| name.starts_with(COLLECTION_PREFIX))
        .filter_map(|name| match CollectionName::parse(name) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!(error = %e, "Ignoring collection");
                None
            }
        })
        .filter(|c| suffixes.contains(&c.month))
        .collect();
    selected.sort();
    Ok(selected)
}
