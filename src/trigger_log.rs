//! Trigger log: the durable cursor and audit trail of completed cycles.
//!
//! One row is appended per completed cycle. The `end_at` of the newest row
//! is the start of the next window; nothing else advances the cursor.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::models::{format_ts, SnapshotWindow, TriggerLogEntry};
use crate::normalize::parse_timestamp_str;
use crate::query::{bind_query, Bind, SelectBuilder};

/// `end_at` of the most recently inserted row, normalized to UTC.
pub async fn latest_end(pool: &SqlitePool) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> =
        sqlx::query_scalar("SELECT end_at FROM qc_snapshot_trigger_log ORDER BY id DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    match raw {
        None => Ok(None),
        Some(s) => parse_timestamp_str(&s)
            .map(Some)
            .with_context(|| format!("Unreadable trigger log end_at: '{}'", s)),
    }
}

/// Record a completed cycle.
pub async fn commit_cycle(
    pool: &SqlitePool,
    window: &SnapshotWindow,
    snapshot_count: usize,
    retest_count: usize,
    is_manual: bool,
) -> Result<i64> {
    let note = format!(
        "Inserted {} snapshots, {} retests",
        snapshot_count, retest_count
    );
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO qc_snapshot_trigger_log (start_at, end_at, note, is_manual)
        VALUES (?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(format_ts(window.start))
    .bind(format_ts(window.end))
    .bind(&note)
    .bind(is_manual)
    .fetch_one(pool)
    .await
    .context("Failed to write trigger log")?;

    Ok(id)
}

/// Most recent entries, newest first.
pub async fn recent(
    pool: &SqlitePool,
    limit: i64,
    manual_only: bool,
) -> Result<Vec<TriggerLogEntry>> {
    let (sql, binds) = SelectBuilder::new(
        "id, start_at, end_at, note, is_manual",
        "qc_snapshot_trigger_log",
    )
    .filter_opt("is_manual = ?", manual_only.then_some(1), Bind::Int)
    .order_by("id DESC")
    .limit(limit)
    .build();

    let rows = bind_query(sqlx::query(&sql), &binds).fetch_all(pool).await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let start_raw: String = row.get("start_at");
        let end_raw: String = row.get("end_at");
        entries.push(TriggerLogEntry {
            id: row.get("id"),
            start_at: parse_timestamp_str(&start_raw)
                .with_context(|| format!("Unreadable trigger log start_at: '{}'", start_raw))?,
            end_at: parse_timestamp_str(&end_raw)
                .with_context(|| format!("Unreadable trigger log end_at: '{}'", end_raw))?,
            note: row.get("note"),
            is_manual: row.get::<i64, _>("is_manual") != 0,
        });
    }
    Ok(entries)
}

/// `qcsnap history`: print recent cycles, newest first.
pub async fn run_history(config: &Config, limit: i64, manual_only: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let entries = recent(&pool, limit, manual_only).await?;

    if entries.is_empty() {
        println!("No snapshot cycles recorded.");
    } else {
        println!(
            "{:>6}  {:<24}  {:<24}  {:<9}  {}",
            "ID", "START", "END", "TRIGGER", "NOTE"
        );
        for e in &entries {
            println!(
                "{:>6}  {:<24}  {:<24}  {:<9}  {}",
                e.id,
                format_ts(e.start_at),
                format_ts(e.end_at),
                if e.is_manual { "manual" } else { "scheduled" },
                e.note.as_deref().unwrap_or("")
            );
        }
    }

    pool.close().await;
    Ok(())
}
