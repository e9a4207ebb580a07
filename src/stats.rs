//! Snapshot database statistics.
//!
//! Provides a quick overview of what the pipeline has written: row counts
//! per snapshot table and a per-template breakdown of snapshots, item
//! totals and alert totals. Used by `qcsnap stats` to give confidence that
//! scheduled cycles are landing.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::normalize::parse_timestamp_str;
use crate::query::{bind_query, Bind, SelectBuilder};

const SNAPSHOT_TABLES: &[&str] = &[
    "qc_snapshot_base",
    "qc_snapshot_item",
    "qc_snapshot_batch",
    "qc_snapshot_product",
    "qc_snapshot_shift",
    "qc_snapshot_team",
    "qc_snapshot_inspector",
    "qc_snapshot_retest",
    "qc_snapshot_trigger_log",
    "qc_summary_snapshot",
];

/// Per-template breakdown of snapshot rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateStats {
    pub template_id: i64,
    pub template_name: String,
    pub snapshots: i64,
    pub total_count: i64,
    pub abnormal_count: i64,
    pub last_snapshot: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SnapshotStats {
    pub tables: Vec<(&'static str, i64)>,
    pub templates: Vec<TemplateStats>,
}

impl SnapshotStats {
    pub fn table_count(&self, table: &str) -> Option<i64> {
        self.tables
            .iter()
            .find(|(name, _)| *name == table)
            .map(|(_, count)| *count)
    }
}

/// Gather counts, optionally restricted to one template.
pub async fn collect_stats(pool: &SqlitePool, template_id: Option<i64>) -> Result<SnapshotStats> {
    let mut tables = Vec::with_capacity(SNAPSHOT_TABLES.len());
    for table in SNAPSHOT_TABLES {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await?;
        tables.push((*table, count));
    }

    let (sql, binds) = SelectBuilder::new(
        r#"b.qc_form_template_id AS template_id,
           MAX(b.qc_form_template_name) AS template_name,
           COUNT(DISTINCT b.id) AS snapshots,
           COALESCE(SUM(i.total_count), 0) AS total_count,
           COALESCE(SUM(i.abnormal_count), 0) AS abnormal_count,
           MAX(b.snapshot_time) AS last_snapshot"#,
        "qc_snapshot_base b",
    )
    .join("LEFT JOIN qc_snapshot_item i ON i.snapshot_id = b.id")
    .filter_opt("b.qc_form_template_id = ?", template_id, Bind::Int)
    .group_by("b.qc_form_template_id")
    .order_by("snapshots DESC, template_id")
    .build();

    let rows = bind_query(sqlx::query(&sql), &binds).fetch_all(pool).await?;

    let templates = rows
        .iter()
        .map(|row| {
            let last: Option<String> = row.get("last_snapshot");
            TemplateStats {
                template_id: row.get("template_id"),
                template_name: row.get("template_name"),
                snapshots: row.get("snapshots"),
                total_count: row.get("total_count"),
                abnormal_count: row.get("abnormal_count"),
                last_snapshot: last.as_deref().and_then(parse_timestamp_str),
            }
        })
        .collect();

    Ok(SnapshotStats { tables, templates })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config, template_id: Option<i64>) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool, template_id).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("QC Snapshot — Database Stats");
    println!("============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    for (table, count) in &stats.tables {
        println!("  {:<26} {:>8}", table, count);
    }

    if !stats.templates.is_empty() {
        println!();
        println!("  By template:");
        println!(
            "  {:<8} {:<24} {:>9} {:>8} {:>9}   {}",
            "ID", "TEMPLATE", "SNAPSHOTS", "TOTAL", "ABNORMAL", "LAST SNAPSHOT"
        );
        println!("  {}", "-".repeat(84));

        for t in &stats.templates {
            let last_display = match t.last_snapshot {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<8} {:<24} {:>9} {:>8} {:>9}   {}",
                t.template_id,
                t.template_name,
                t.snapshots,
                t.total_count,
                t.abnormal_count,
                last_display
            );
        }
    } else if let Some(id) = template_id {
        println!();
        println!("  No snapshots for template {}.", id);
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();

    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}
