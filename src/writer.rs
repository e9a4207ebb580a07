//! Snapshot writer: one transactional snapshot per template group.
//!
//! For each form template seen in the window the writer inserts, inside a
//! single transaction:
//!
//! 1. one `qc_snapshot_base` row stamped with the window,
//! 2. one junction row per distinct related batch/product/shift/team/inspector,
//!    carrying the entity's name at snapshot time,
//! 3. one `qc_snapshot_item` row per declared field of the template.
//!
//! A failure anywhere rolls the whole group back; the caller skips the group
//! and carries on with the next one.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::documents::{DocFilter, DocumentStore};
use crate::error::SnapshotError;
use crate::labels::resolve_labels;
use crate::lookup::{resolve_entity_name, resolve_template_name};
use crate::models::{format_ts, JunctionKind, LabelField, SnapshotWindow};
use crate::normalize::NormalizedDocument;
use crate::query::{bind_scalar, Bind, SelectBuilder};

/// A normalized document together with the physical collection it came from.
#[derive(Debug, Clone)]
pub struct GroupDocument {
    pub collection: String,
    pub doc: NormalizedDocument,
}

/// What a committed group produced.
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub snapshot_id: i64,
    pub template_id: i64,
    pub template_name: String,
    pub junction_rows: BTreeMap<JunctionKind, usize>,
    pub item_rows: usize,
    pub collections: usize,
}

/// Statistics of one declared field, before insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldStats {
    pub field: LabelField,
    pub total_count: i64,
    pub abnormal_count: i64,
}

/// Distinct identifiers per related-entity category across a group.
pub fn aggregate_entities(group: &[GroupDocument]) -> BTreeMap<JunctionKind, BTreeSet<String>> {
    let mut sets: BTreeMap<JunctionKind, BTreeSet<String>> = JunctionKind::ALL
        .iter()
        .map(|kind| (*kind, BTreeSet::new()))
        .collect();
    for member in group {
        for kind in JunctionKind::ALL {
            if let Some(set) = sets.get_mut(&kind) {
                set.extend(member.doc.entity_ids(kind));
            }
        }
    }
    sets
}

pub struct SnapshotWriter<'a> {
    pool: &'a SqlitePool,
    docs: &'a dyn DocumentStore,
    window: SnapshotWindow,
}

impl<'a> SnapshotWriter<'a> {
    pub fn new(pool: &'a SqlitePool, docs: &'a dyn DocumentStore, window: SnapshotWindow) -> Self {
        Self { pool, docs, window }
    }

    /// Aggregate and persist one template group.
    ///
    /// Returns [`SnapshotError::TemplateNotFound`] (nothing written) when
    /// the template id does not resolve.
    pub async fn process_template_group(
        &self,
        template_id: i64,
        group: &[GroupDocument],
    ) -> Result<GroupSummary> {
        let template_name = resolve_template_name(self.pool, template_id)
            .await?
            .ok_or(SnapshotError::TemplateNotFound(template_id))?;

        let entities = aggregate_entities(group);
        let collections: BTreeSet<&str> = group.iter().map(|m| m.collection.as_str()).collect();
        let stats = self.field_statistics(template_id, &collections).await?;

        let mut tx = self.pool.begin().await?;

        let snapshot_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO qc_snapshot_base (
                snapshot_time, start_time, end_time, qc_form_template_id, qc_form_template_name
            ) VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(format_ts(self.window.end))
        .bind(format_ts(self.window.start))
        .bind(format_ts(self.window.end))
        .bind(template_id)
        .bind(&template_name)
        .fetch_one(&mut *tx)
        .await?;

        let mut junction_rows = BTreeMap::new();
        for (kind, ids) in &entities {
            insert_junctions(&mut *tx, snapshot_id, *kind, ids).await?;
            junction_rows.insert(*kind, ids.len());
        }

        for stat in &stats {
            sqlx::query(
                r#"
                INSERT INTO qc_snapshot_item (snapshot_id, key, label, total_count, abnormal_count)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(snapshot_id)
            .bind(&stat.field.key)
            .bind(&stat.field.label)
            .bind(stat.total_count)
            .bind(stat.abnormal_count)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(GroupSummary {
            snapshot_id,
            template_id,
            template_name,
            junction_rows,
            item_rows: stats.len(),
            collections: collections.len(),
        })
    }

    /// Per-field totals and alert counts for the window.
    ///
    /// `total_count` re-queries each distinct collection once and sums;
    /// `abnormal_count` comes from `qc_alert_record`, once per field.
    pub async fn field_statistics(
        &self,
        template_id: i64,
        collections: &BTreeSet<&str>,
    ) -> Result<Vec<FieldStats>> {
        let fields = match resolve_labels(self.docs, template_id).await? {
            Some(fields) if !fields.is_empty() => fields,
            Some(_) => {
                warn!(template_id, "Label mapping declares no fields; no snapshot items");
                return Ok(Vec::new());
            }
            None => {
                warn!(template_id, "No label mapping for template; no snapshot items");
                return Ok(Vec::new());
            }
        };

        let mut stats = Vec::with_capacity(fields.len());
        for field in fields {
            let filter = DocFilter::new()
                .exists(&field.key)
                .time_range("created_at", self.window);
            let mut total_count = 0i64;
            for collection in collections {
                total_count += self.docs.count(collection, &filter).await? as i64;
            }

            let abnormal_count =
                count_alert_records(self.pool, template_id, &field.key, &self.window).await?;
            if abnormal_count > total_count {
                warn!(
                    template_id,
                    key = %field.key,
                    total_count,
                    abnormal_count,
                    "Alert count exceeds submissions for field"
                );
            }
            debug!(template_id, key = %field.key, total_count, abnormal_count, "Field statistics");

            stats.push(FieldStats {
                field,
                total_count,
                abnormal_count,
            });
        }
        Ok(stats)
    }
}

async fn insert_junctions(
    conn: &mut SqliteConnection,
    snapshot_id: i64,
    kind: JunctionKind,
    ids: &BTreeSet<String>,
) -> Result<()> {
    let (table, id_column, name_column) = kind.junction();
    let sql = format!(
        "INSERT INTO {} (snapshot_id, {}, {}) VALUES (?, ?, ?)",
        table, id_column, name_column
    );
    for entity_id in ids {
        let name = resolve_entity_name(&mut *conn, kind, entity_id).await?;
        if name.is_none() {
            debug!(kind = kind.label(), entity_id = %entity_id, "Entity name not found");
        }
        sqlx::query(&sql)
            .bind(snapshot_id)
            .bind(entity_id)
            .bind(name)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Alert-table definition of "abnormal": alert rows recorded against the
/// template and field inside the window.
pub async fn count_alert_records(
    pool: &SqlitePool,
    template_id: i64,
    key: &str,
    window: &SnapshotWindow,
) -> Result<i64> {
    let (sql, binds) = SelectBuilder::new("COUNT(*)", "qc_alert_record")
        .filter("qc_form_template_id = ?", [Bind::Int(template_id)])
        .filter("inspection_item_key = ?", [Bind::Text(key.to_string())])
        .within("created_at", window)
        .build();
    let count = bind_scalar(sqlx::query_scalar::<_, i64>(&sql), &binds)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
