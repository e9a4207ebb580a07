//! Error taxonomy for the snapshot pipeline.
//!
//! Most functions return `anyhow::Result`; the variants here are the
//! classified failures callers branch on (skip a group, skip a document,
//! reject a concurrent cycle). Use `err.downcast_ref::<SnapshotError>()`
//! to recover them from an `anyhow::Error`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    /// No `qc_form_template` row for the id embedded in a collection name.
    #[error("form template {0} not found")]
    TemplateNotFound(i64),

    /// A source document could not be normalized.
    #[error("malformed document in {collection}: {reason}")]
    MalformedDocument { collection: String, reason: String },

    /// Collection name does not follow `form_template_<id>_<YYYYMM>`.
    #[error("invalid collection name: {0}")]
    InvalidCollectionName(String),

    /// A bounded stage (collection scan, group transaction) ran out of time.
    #[error("{stage} exceeded timeout of {secs}s")]
    Timeout { stage: String, secs: u64 },

    /// Another cycle holds the in-process guard.
    #[error("a snapshot cycle is already running")]
    CycleInProgress,

    /// Another process holds the advisory lock file.
    #[error("snapshot lock {0} is held by another process")]
    LockUnavailable(String),
}

impl SnapshotError {
    /// Whether this failure should skip the current unit of work rather
    /// than abort the cycle.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SnapshotError::CycleInProgress | SnapshotError::LockUnavailable(_)
        )
    }
}
