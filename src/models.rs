//! Core data models used throughout the snapshot pipeline.
//!
//! These types represent the window, the snapshot rows, and the cycle
//! report that flow from the document store into the relational snapshot
//! tables.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;

/// Half-open aggregation interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SnapshotWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// A window of `minutes` ending at `end`.
    pub fn lookback(end: DateTime<Utc>, minutes: i64) -> Self {
        Self {
            start: end - Duration::minutes(minutes),
            end,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Render a timestamp the way it is stored in the relational tables.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Related business entity captured on a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum JunctionKind {
    Batch,
    Product,
    Shift,
    Team,
    Inspector,
}

impl JunctionKind {
    pub const ALL: [JunctionKind; 5] = [
        JunctionKind::Batch,
        JunctionKind::Product,
        JunctionKind::Shift,
        JunctionKind::Team,
        JunctionKind::Inspector,
    ];

    /// Source document field holding the identifiers.
    pub fn id_field(self) -> &'static str {
        match self {
            JunctionKind::Batch => "related_batch_ids",
            JunctionKind::Product => "related_product_ids",
            JunctionKind::Shift => "related_shift_id",
            JunctionKind::Team => "related_team_id",
            JunctionKind::Inspector => "related_inspector_ids",
        }
    }

    /// Source document field holding denormalized display names.
    pub fn name_field(self) -> &'static str {
        match self {
            JunctionKind::Batch => "related_batches",
            JunctionKind::Product => "related_products",
            JunctionKind::Shift => "related_shifts",
            JunctionKind::Team => "related_teams",
            JunctionKind::Inspector => "related_inspectors",
        }
    }

    /// Lookup table and column resolving an id to its display name.
    pub fn lookup(self) -> (&'static str, &'static str) {
        match self {
            JunctionKind::Batch => ("qc_suggested_batch", "code"),
            JunctionKind::Product => ("qc_suggested_product", "name"),
            JunctionKind::Shift => ("shift", "name"),
            JunctionKind::Team => ("team", "name"),
            JunctionKind::Inspector => ("\"user\"", "name"),
        }
    }

    /// Snapshot junction table and its (id, name) columns.
    pub fn junction(self) -> (&'static str, &'static str, &'static str) {
        match self {
            JunctionKind::Batch => ("qc_snapshot_batch", "batch_id", "batch_code"),
            JunctionKind::Product => ("qc_snapshot_product", "product_id", "product_name"),
            JunctionKind::Shift => ("qc_snapshot_shift", "shift_id", "shift_name"),
            JunctionKind::Team => ("qc_snapshot_team", "team_id", "team_name"),
            JunctionKind::Inspector => ("qc_snapshot_inspector", "inspector_id", "inspector_name"),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            JunctionKind::Batch => "batch",
            JunctionKind::Product => "product",
            JunctionKind::Shift => "shift",
            JunctionKind::Team => "team",
            JunctionKind::Inspector => "inspector",
        }
    }
}

/// Declared inspection field of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelField {
    pub key: String,
    pub label: String,
}

/// Denormalized approval event flagged for re-inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRetest {
    pub qc_form_template_id: i64,
    pub qc_form_template_name: String,
    pub approver_id: Option<String>,
    pub approver_name: Option<String>,
    pub comments: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub related_product_ids: Vec<String>,
    pub related_products: Vec<String>,
    pub related_batch_ids: Vec<String>,
    pub related_batches: Vec<String>,
    pub related_team_ids: Vec<String>,
    pub related_teams: Vec<String>,
    pub related_inspector_ids: Vec<String>,
    pub related_inspectors: Vec<String>,
    pub related_shift_ids: Vec<String>,
    pub related_shifts: Vec<String>,
    pub submission_id: String,
    pub collection_name: String,
}

/// Audit row recorded once per completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerLogEntry {
    pub id: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub note: Option<String>,
    pub is_manual: bool,
}

/// Outcome of one snapshot cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub window: SnapshotWindow,
    pub is_manual: bool,
    pub collections_scanned: usize,
    pub documents_scanned: usize,
    pub documents_skipped: usize,
    pub snapshots_written: usize,
    pub groups_skipped: usize,
    pub retests_written: usize,
}
