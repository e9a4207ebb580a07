//! Retest extraction.
//!
//! Independently of the template grouping, every candidate collection is
//! re-scanned on `approver_updated_at` (not `created_at`). Each document
//! yields at most one retest row: the first approval with
//! `suggest_retest == true`. A document that fails to normalize or insert
//! is skipped without stopping the scan.

use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::collections::CollectionName;
use crate::documents::{DocFilter, DocumentStore};
use crate::error::SnapshotError;
use crate::lookup::resolve_template_name;
use crate::models::{format_ts, JunctionKind, SnapshotRetest, SnapshotWindow};
use crate::normalize::{normalize_document, Approval, NormalizedDocument};

/// Build the retest row for a document's qualifying approval.
pub fn build_retest(
    template_id: i64,
    template_name: &str,
    collection: &str,
    doc: &NormalizedDocument,
    approval: &Approval,
) -> SnapshotRetest {
    SnapshotRetest {
        qc_form_template_id: template_id,
        qc_form_template_name: template_name.to_string(),
        approver_id: approval.user_id.clone(),
        approver_name: approval.user_name.clone(),
        comments: approval.comments.clone(),
        created_at: approval.timestamp,
        related_product_ids: doc.entity_ids(JunctionKind::Product),
        related_products: doc.entity_names(JunctionKind::Product),
        related_batch_ids: doc.entity_ids(JunctionKind::Batch),
        related_batches: doc.entity_names(JunctionKind::Batch),
        related_team_ids: doc.entity_ids(JunctionKind::Team),
        related_teams: doc.entity_names(JunctionKind::Team),
        related_inspector_ids: doc.entity_ids(JunctionKind::Inspector),
        related_inspectors: doc.entity_names(JunctionKind::Inspector),
        related_shift_ids: doc.entity_ids(JunctionKind::Shift),
        related_shifts: doc.entity_names(JunctionKind::Shift),
        submission_id: doc.id.clone(),
        collection_name: collection.to_string(),
    }
}

pub async fn insert_retest(pool: &SqlitePool, row: &SnapshotRetest) -> Result<()> {
    let arrays = [
        &row.related_product_ids,
        &row.related_products,
        &row.related_batch_ids,
        &row.related_batches,
        &row.related_team_ids,
        &row.related_teams,
        &row.related_inspector_ids,
        &row.related_inspectors,
        &row.related_shift_ids,
        &row.related_shifts,
    ]
    .iter()
    .map(|values| serde_json::to_string(values))
    .collect::<Result<Vec<_>, _>>()?;

    let mut query = sqlx::query(
        r#"
        INSERT INTO qc_snapshot_retest (
            qc_form_template_id, qc_form_template_name,
            approver_id, approver_name, comments, created_at,
            related_product_ids, related_products,
            related_batch_ids, related_batches,
            related_team_ids, related_teams,
            related_inspector_ids, related_inspectors,
            related_shift_ids, related_shifts,
            submission_id, collection_name
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(row.qc_form_template_id)
    .bind(&row.qc_form_template_name)
    .bind(&row.approver_id)
    .bind(&row.approver_name)
    .bind(&row.comments)
    .bind(row.created_at.map(format_ts));
    for array in arrays {
        query = query.bind(array);
    }
    query
        .bind(&row.submission_id)
        .bind(&row.collection_name)
        .execute(pool)
        .await?;
    Ok(())
}

/// Scan every candidate collection for retest approvals inside `window`.
///
/// Returns the number of rows inserted. Per-collection and per-document
/// failures are logged and skipped.
pub async fn extract_retests(
    pool: &SqlitePool,
    docs: &dyn DocumentStore,
    collections: &[CollectionName],
    window: &SnapshotWindow,
    scan_timeout: Duration,
) -> usize {
    let mut inserted = 0;
    for collection in collections {
        match extract_from_collection(pool, docs, collection, window, scan_timeout).await {
            Ok(count) => inserted += count,
            Err(e) => warn!(
                collection = %collection,
                error = %e,
                "Skipping collection during retest extraction"
            ),
        }
    }
    info!(inserted, "Retest extraction finished");
    inserted
}

async fn extract_from_collection(
    pool: &SqlitePool,
    docs: &dyn DocumentStore,
    collection: &CollectionName,
    window: &SnapshotWindow,
    scan_timeout: Duration,
) -> Result<usize> {
    let template_id = collection.template_id;
    let template_name = resolve_template_name(pool, template_id)
        .await?
        .ok_or(SnapshotError::TemplateNotFound(template_id))?;

    let name = collection.to_string();
    let filter = DocFilter::new().time_range("approver_updated_at", *window);
    let raw_docs = tokio::time::timeout(scan_timeout, docs.find(&name, &filter))
        .await
        .map_err(|_| SnapshotError::Timeout {
            stage: format!("retest scan of {}", name),
            secs: scan_timeout.as_secs(),
        })??;

    let mut inserted = 0;
    for raw in &raw_docs {
        let doc = match normalize_document(&name, raw) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(collection = %name, error = %e, "Skipping malformed document");
                continue;
            }
        };
        let approval = match doc.first_retest() {
            Ok(Some(approval)) => approval,
            Ok(None) => continue,
            Err(reason) => {
                warn!(
                    submission_id = %doc.id,
                    collection = %name,
                    reason,
                    "Skipping malformed approval_info"
                );
                continue;
            }
        };

        let row = build_retest(template_id, &template_name, &name, &doc, approval);
        match insert_retest(pool, &row).await {
            Ok(()) => {
                inserted += 1;
                debug!(
                    submission_id = %row.submission_id,
                    collection = %name,
                    approver = ?row.approver_name,
                    "Inserted retest"
                );
            }
            Err(e) => warn!(
                submission_id = %row.submission_id,
                collection = %name,
                error = %e,
                "Failed to insert retest"
            ),
        }
    }
    Ok(inserted)
}
