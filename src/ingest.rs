//! Snapshot cycle orchestration.
//!
//! Coordinates one full cycle: window → candidate collections → scan and
//! normalize → group by template → transactional snapshot per group →
//! retest extraction → trigger log commit.
//!
//! The trigger log row is written last, so a cycle that dies midway leaves
//! the cursor untouched and the next cycle replays the same window
//! (at-least-once). Concurrent cycles are rejected, never queued: an
//! in-process guard covers the scheduler and a lock file covers separate
//! processes sharing a database.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::collections::{list_candidate_collections, CollectionName};
use crate::config::{Config, SnapshotConfig};
use crate::db;
use crate::docstore_fs::JsonDirStore;
use crate::documents::{DocFilter, DocumentStore};
use crate::error::SnapshotError;
use crate::lock::CycleLock;
use crate::models::{format_ts, CycleReport, SnapshotWindow};
use crate::normalize::normalize_document;
use crate::retest::extract_retests;
use crate::trigger_log;
use crate::window::compute_window;
use crate::writer::{GroupDocument, SnapshotWriter};

/// What the next cycle would cover.
#[derive(Debug, Clone)]
pub struct CyclePlan {
    pub window: SnapshotWindow,
    pub collections: Vec<CollectionName>,
}

pub struct Pipeline {
    pool: SqlitePool,
    docs: Arc<dyn DocumentStore>,
    settings: SnapshotConfig,
    lock_path: Option<PathBuf>,
    running: Mutex<()>,
}

impl Pipeline {
    /// Pipeline without a cross-process lock file.
    pub fn new(pool: SqlitePool, docs: Arc<dyn DocumentStore>, settings: SnapshotConfig) -> Self {
        Self {
            pool,
            docs,
            settings,
            lock_path: None,
            running: Mutex::new(()),
        }
    }

    pub fn with_lock_file(mut self, path: PathBuf) -> Self {
        self.lock_path = Some(path);
        self
    }

    /// Connect to the configured database and document root.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let docs = Arc::new(JsonDirStore::from_config(config)?);
        Ok(Self::new(pool, docs, config.snapshot.clone()).with_lock_file(config.lock_path()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn settings(&self) -> &SnapshotConfig {
        &self.settings
    }

    pub async fn run_scheduled_cycle(&self) -> Result<CycleReport> {
        self.run_cycle(false).await
    }

    pub async fn run_manual_cycle(&self) -> Result<CycleReport> {
        self.run_cycle(true).await
    }

    pub async fn run_cycle(&self, is_manual: bool) -> Result<CycleReport> {
        self.run_cycle_at(is_manual, Utc::now()).await
    }

    /// Run one cycle whose window ends at `now`.
    ///
    /// Fails with [`SnapshotError::CycleInProgress`] or
    /// [`SnapshotError::LockUnavailable`] without touching any table when
    /// another cycle is running.
    pub async fn run_cycle_at(&self, is_manual: bool, now: DateTime<Utc>) -> Result<CycleReport> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| SnapshotError::CycleInProgress)?;
        let _lock = match &self.lock_path {
            Some(path) => Some(CycleLock::acquire(path)?),
            None => None,
        };

        let cycle_id = Uuid::new_v4();
        let span = info_span!("snapshot_cycle", %cycle_id, manual = is_manual);
        self.cycle(is_manual, now).instrument(span).await
    }

    /// Window and candidate collections a cycle at `now` would use. Read-only.
    ///
    /// `now` is truncated to whole milliseconds, the precision the trigger
    /// log stores, so the next window starts exactly where this one ends.
    pub async fn plan(&self, now: DateTime<Utc>) -> Result<CyclePlan> {
        let now = now.trunc_subsecs(3);
        let window = compute_window(&self.pool, self.settings.window_minutes, now).await?;

        // A cursor older than the configured lookback (downtime, late tick,
        // manual backfill) still needs every month back to its start.
        let lookback = chrono::Duration::minutes(self.settings.window_minutes);
        let since = window.start.min(now - lookback);
        let collections = list_candidate_collections(self.docs.as_ref(), since, now).await?;
        Ok(CyclePlan {
            window,
            collections,
        })
    }

    async fn cycle(&self, is_manual: bool, now: DateTime<Utc>) -> Result<CycleReport> {
        let CyclePlan {
            window,
            collections,
        } = self.plan(now).await?;
        info!(
            start = %window.start,
            end = %window.end,
            collections = collections.len(),
            "Snapshot cycle started"
        );

        let scan = self.scan_collections(&collections, &window).await;

        let writer = SnapshotWriter::new(&self.pool, self.docs.as_ref(), window);
        let group_timeout = Duration::from_secs(self.settings.group_timeout_secs);
        let mut snapshots_written = 0;
        let mut groups_skipped = 0;
        for (template_id, group) in &scan.groups {
            let outcome =
                tokio::time::timeout(group_timeout, writer.process_template_group(*template_id, group))
                    .await
                    .unwrap_or_else(|_| {
                        Err(SnapshotError::Timeout {
                            stage: format!("snapshot of template {}", template_id),
                            secs: group_timeout.as_secs(),
                        }
                        .into())
                    });

            match outcome {
                Ok(summary) => {
                    snapshots_written += 1;
                    info!(
                        template_id,
                        template_name = %summary.template_name,
                        snapshot_id = summary.snapshot_id,
                        documents = group.len(),
                        collections = summary.collections,
                        junctions = summary.junction_rows.values().sum::<usize>(),
                        items = summary.item_rows,
                        "Snapshot written"
                    );
                }
                Err(e) => {
                    groups_skipped += 1;
                    warn!(template_id, error = %e, "Skipping template group");
                }
            }
        }

        let retests_written = extract_retests(
            &self.pool,
            self.docs.as_ref(),
            &collections,
            &window,
            self.scan_timeout(),
        )
        .await;

        let log_id = trigger_log::commit_cycle(
            &self.pool,
            &window,
            snapshots_written,
            retests_written,
            is_manual,
        )
        .await?;

        info!(
            trigger_log_id = log_id,
            snapshots_written,
            groups_skipped,
            retests_written,
            "Snapshot cycle committed"
        );

        Ok(CycleReport {
            window,
            is_manual,
            collections_scanned: collections.len(),
            documents_scanned: scan.documents_scanned,
            documents_skipped: scan.documents_skipped,
            snapshots_written,
            groups_skipped,
            retests_written,
        })
    }

    fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.scan_timeout_secs)
    }

    /// Read every candidate collection and group its in-window documents by
    /// template. A collection that fails or times out is skipped.
    async fn scan_collections(
        &self,
        collections: &[CollectionName],
        window: &SnapshotWindow,
    ) -> ScanOutcome {
        let filter = DocFilter::new().time_range("created_at", *window);
        let scan_timeout = self.scan_timeout();
        let mut outcome = ScanOutcome::default();

        for collection in collections {
            let name = collection.to_string();
            let raw_docs =
                match tokio::time::timeout(scan_timeout, self.docs.find(&name, &filter)).await {
                    Ok(Ok(docs)) => docs,
                    Ok(Err(e)) => {
                        warn!(collection = %name, error = %e, "Skipping collection");
                        continue;
                    }
                    Err(_) => {
                        let e = SnapshotError::Timeout {
                            stage: format!("scan of {}", name),
                            secs: scan_timeout.as_secs(),
                        };
                        warn!(collection = %name, error = %e, "Skipping collection");
                        continue;
                    }
                };

            for raw in &raw_docs {
                outcome.documents_scanned += 1;
                match normalize_document(&name, raw) {
                    Ok(doc) => outcome
                        .groups
                        .entry(collection.template_id)
                        .or_default()
                        .push(GroupDocument {
                            collection: name.clone(),
                            doc,
                        }),
                    Err(e) => {
                        outcome.documents_skipped += 1;
                        warn!(collection = %name, error = %e, "Skipping malformed document");
                    }
                }
            }
        }
        outcome
    }
}

#[derive(Default)]
struct ScanOutcome {
    groups: BTreeMap<i64, Vec<GroupDocument>>,
    documents_scanned: usize,
    documents_skipped: usize,
}

/// `qcsnap run`: one manual cycle, then a summary on stdout.
pub async fn run_manual(config: &Config) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let report = pipeline.run_manual_cycle().await?;

    println!("snapshot cycle (manual)");
    println!(
        "  window: {} .. {}",
        format_ts(report.window.start),
        format_ts(report.window.end)
    );
    println!("  collections scanned: {}", report.collections_scanned);
    println!(
        "  documents: {} ({} skipped)",
        report.documents_scanned, report.documents_skipped
    );
    println!(
        "  snapshots written: {} ({} groups skipped)",
        report.snapshots_written, report.groups_skipped
    );
    println!("  retests written: {}", report.retests_written);
    println!("ok");

    pipeline.pool().close().await;
    Ok(())
}

/// `qcsnap window` / `qcsnap collections`: preview the next cycle.
pub async fn run_preview(config: &Config, collections_only: bool) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let previous = trigger_log::latest_end(pipeline.pool()).await?;
    let plan = pipeline.plan(Utc::now()).await?;

    if collections_only {
        for collection in &plan.collections {
            println!("{}", collection);
        }
    } else {
        println!("next window");
        println!("  start: {}", format_ts(plan.window.start));
        println!("  end:   {}", format_ts(plan.window.end));
        match previous {
            Some(_) => println!("  cursor: previous cycle end"),
            None => println!(
                "  cursor: none (first run, {} minute lookback)",
                config.snapshot.window_minutes
            ),
        }
        println!("  candidate collections: {}", plan.collections.len());
        for collection in &plan.collections {
            println!("    {}", collection);
        }
    }

    pipeline.pool().close().await;
    Ok(())
}
