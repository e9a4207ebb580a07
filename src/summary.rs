//! Control-limit pass-rate summary.
//!
//! A second notion of "abnormal", kept apart from the per-field alert
//! counts on snapshot items: here an alert record is abnormal only when it
//! is numeric and its inspection value falls outside the recorded control
//! limits. The result is a single row in `qc_summary_snapshot`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::models::{format_ts, SnapshotWindow};
use crate::query::{bind_query, SelectBuilder};

const OUT_OF_LIMITS: &str = "alert_type = 'number' AND inspection_value IS NOT NULL AND (\
     (lower_control_limit IS NOT NULL AND inspection_value < lower_control_limit) OR \
     (upper_control_limit IS NOT NULL AND inspection_value > upper_control_limit))";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlLimitSummary {
    pub snapshot_time: DateTime<Utc>,
    pub window: SnapshotWindow,
    pub total_fields: i64,
    pub abnormal_fields: i64,
    pub pass_rate_percent: f64,
}

/// `(1 - abnormal / max(total, 1)) * 100`, rounded to two decimals.
pub fn pass_rate_percent(total_fields: i64, abnormal_fields: i64) -> f64 {
    let rate = 1.0 - abnormal_fields as f64 / total_fields.max(1) as f64;
    (rate * 10_000.0).round() / 100.0
}

pub async fn summarize_control_limits(
    pool: &SqlitePool,
    window: &SnapshotWindow,
) -> Result<ControlLimitSummary> {
    let columns = format!(
        "COUNT(*) AS total_fields, \
         COALESCE(SUM(CASE WHEN {} THEN 1 ELSE 0 END), 0) AS abnormal_fields",
        OUT_OF_LIMITS
    );
    let (sql, binds) = SelectBuilder::new(&columns, "qc_alert_record")
        .within("created_at", window)
        .build();

    let row = bind_query(sqlx::query(&sql), &binds).fetch_one(pool).await?;
    let total_fields: i64 = row.get("total_fields");
    let abnormal_fields: i64 = row.get("abnormal_fields");

    Ok(ControlLimitSummary {
        snapshot_time: window.end,
        window: *window,
        total_fields,
        abnormal_fields,
        pass_rate_percent: pass_rate_percent(total_fields, abnormal_fields),
    })
}

/// Summarize `window` and append the result to `qc_summary_snapshot`.
pub async fn record_control_limit_summary(
    pool: &SqlitePool,
    window: &SnapshotWindow,
) -> Result<ControlLimitSummary> {
    let summary = summarize_control_limits(pool, window).await?;
    sqlx::query(
        r#"
        INSERT INTO qc_summary_snapshot (snapshot_time, total_fields, abnormal_fields, pass_rate_percent)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(format_ts(summary.snapshot_time))
    .bind(summary.total_fields)
    .bind(summary.abnormal_fields)
    .bind(summary.pass_rate_percent)
    .execute(pool)
    .await?;
    Ok(summary)
}

/// `qcsnap summary`: summarize the last `window_minutes` and record it.
pub async fn run_summary(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let window = SnapshotWindow::lookback(Utc::now(), config.snapshot.window_minutes);
    let summary = record_control_limit_summary(&pool, &window).await?;

    println!("control-limit summary");
    println!(
        "  window: {} .. {}",
        format_ts(summary.window.start),
        format_ts(summary.window.end)
    );
    println!("  total fields:    {}", summary.total_fields);
    println!("  abnormal fields: {}", summary.abnormal_fields);
    println!("  pass rate:       {:.2}%", summary.pass_rate_percent);
    println!("ok");

    pool.close().await;
    Ok(())
}
