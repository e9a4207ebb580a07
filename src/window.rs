//! Computes the `[start, end)` window of the next cycle.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::SnapshotWindow;
use crate::trigger_log;

/// Window for a cycle running at `now`.
///
/// Starts at the previous cycle's `end_at` when one exists, otherwise
/// `lookback_minutes` before `now`. Pure read; the window is only committed
/// by [`trigger_log::commit_cycle`].
pub async fn compute_window(
    pool: &SqlitePool,
    lookback_minutes: i64,
    now: DateTime<Utc>,
) -> Result<SnapshotWindow> {
    let window = match trigger_log::latest_end(pool).await? {
        Some(previous_end) => SnapshotWindow::new(previous_end, now),
        None => SnapshotWindow::lookback(now, lookback_minutes),
    };
    Ok(window)
}
