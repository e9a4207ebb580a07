use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};
use tempfile::TempDir;

use qc_snapshot::config::SnapshotConfig;
use qc_snapshot::db::connect_path;
use qc_snapshot::documents::{DocFilter, DocumentStore, MemoryDocumentStore, LABEL_PAIRS_COLLECTION};
use qc_snapshot::error::SnapshotError;
use qc_snapshot::ingest::Pipeline;
use qc_snapshot::lock::CycleLock;
use qc_snapshot::migrate::apply_schema;
use qc_snapshot::scheduler::Scheduler;
use qc_snapshot::stats::collect_stats;
use qc_snapshot::trigger_log;

const COLLECTION: &str = "form_template_368_202505";

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 20, h, m, s).unwrap()
}

fn settings() -> SnapshotConfig {
    SnapshotConfig {
        window_minutes: 10,
        scan_timeout_secs: 5,
        group_timeout_secs: 5,
        lock_file: None,
    }
}

struct TestEnv {
    _tmp: TempDir,
    pool: SqlitePool,
    docs: Arc<MemoryDocumentStore>,
}

impl TestEnv {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let pool = connect_path(&tmp.path().join("qc.sqlite")).await.unwrap();
        apply_schema(&pool).await.unwrap();
        Self {
            _tmp: tmp,
            pool,
            docs: Arc::new(MemoryDocumentStore::new()),
        }
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.pool.clone(), self.docs.clone(), settings())
    }

    async fn template(&self, id: i64, name: &str) {
        sqlx::query("INSERT INTO qc_form_template (id, name) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    async fn alert(&self, template_id: i64, key: &str, created_at: &str) {
        sqlx::query(
            "INSERT INTO qc_alert_record (qc_form_template_id, inspection_item_key, created_at) \
             VALUES (?, ?, ?)",
        )
        .bind(template_id)
        .bind(key)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .unwrap();
    }

    fn moisture_mapping(&self) {
        self.docs.insert(
            LABEL_PAIRS_COLLECTION,
            json!({
                "qc_form_template_id": 368,
                "fields": [{"key": "moisture", "label": "水分"}]
            }),
        );
    }

    async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_moisture_counts_end_to_end() {
    let env = TestEnv::new().await;
    env.template(368, "Milk QC").await;
    env.moisture_mapping();
    for (id, minute) in [("a", 51), ("b", 55), ("c", 59)] {
        env.docs.insert(
            COLLECTION,
            json!({"_id": id, "created_at": format!("2025-05-20T08:{}:00Z", minute), "moisture": 12.1}),
        );
    }
    env.alert(368, "moisture", "2025-05-20T08:56:00.000Z").await;
    env.alert(368, "moisture", "2025-05-20T08:40:00.000Z").await;
    env.alert(368, "fat", "2025-05-20T08:56:00.000Z").await;

    let report = env.pipeline().run_cycle_at(false, at(9, 0, 0)).await.unwrap();
    assert_eq!(report.window.start, at(8, 50, 0));
    assert_eq!(report.window.end, at(9, 0, 0));
    assert_eq!(report.snapshots_written, 1);
    assert_eq!(report.documents_scanned, 3);

    let base = sqlx::query("SELECT id, start_time, end_time, qc_form_template_name FROM qc_snapshot_base")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(base.get::<String, _>("start_time"), "2025-05-20T08:50:00.000Z");
    assert_eq!(base.get::<String, _>("end_time"), "2025-05-20T09:00:00.000Z");
    assert_eq!(base.get::<String, _>("qc_form_template_name"), "Milk QC");

    let item = sqlx::query("SELECT key, label, total_count, abnormal_count FROM qc_snapshot_item")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(item.get::<String, _>("key"), "moisture");
    assert_eq!(item.get::<String, _>("label"), "水分");
    assert_eq!(item.get::<i64, _>("total_count"), 3);
    assert_eq!(item.get::<i64, _>("abnormal_count"), 1);

    let log = trigger_log::recent(&env.pool, 10, false).await.unwrap();
    assert_eq!(log.len(), 1);
    assert!(!log[0].is_manual);
    assert_eq!(log[0].note.as_deref(), Some("Inserted 1 snapshots, 0 retests"));

    let stats = collect_stats(&env.pool, Some(368)).await.unwrap();
    assert_eq!(stats.table_count("qc_snapshot_base"), Some(1));
    assert_eq!(stats.table_count("qc_snapshot_trigger_log"), Some(1));
    assert_eq!(stats.templates.len(), 1);
    assert_eq!(stats.templates[0].total_count, 3);
    assert_eq!(stats.templates[0].abnormal_count, 1);
    assert_eq!(stats.templates[0].last_snapshot, Some(at(9, 0, 0)));
}

#[tokio::test]
async fn test_windows_tile_without_double_counting() {
    let env = TestEnv::new().await;
    env.template(368, "Milk QC").await;
    env.moisture_mapping();
    env.docs.insert(COLLECTION, json!({"_id": "early", "created_at": "2025-05-20T08:55:00Z", "moisture": 1}));
    env.docs.insert(COLLECTION, json!({"_id": "edge", "created_at": "2025-05-20T09:00:00Z", "moisture": 2}));

    let pipeline = env.pipeline();
    let first = pipeline.run_cycle_at(false, at(9, 0, 0)).await.unwrap();
    let second = pipeline.run_cycle_at(true, at(9, 10, 0)).await.unwrap();

    assert_eq!(second.window.start, first.window.end);
    assert_eq!(first.documents_scanned, 1);
    assert_eq!(second.documents_scanned, 1);

    let total: i64 = sqlx::query_scalar("SELECT SUM(total_count) FROM qc_snapshot_item")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(total, 2);

    let manual = trigger_log::recent(&env.pool, 10, true).await.unwrap();
    assert_eq!(manual.len(), 1);
    assert_eq!(manual[0].start_at, at(9, 0, 0));
}

#[tokio::test]
async fn test_replayed_window_duplicates_snapshots() {
    let env = TestEnv::new().await;
    env.template(368, "Milk QC").await;
    env.docs.insert(COLLECTION, json!({"_id": "a", "created_at": "2025-05-20T08:55:00Z"}));

    let pipeline = env.pipeline();
    pipeline.run_cycle_at(false, at(9, 0, 0)).await.unwrap();

    // Losing the trigger log row is what a crash before commit looks like.
    sqlx::query("DELETE FROM qc_snapshot_trigger_log")
        .execute(&env.pool)
        .await
        .unwrap();
    let replay = pipeline.run_cycle_at(false, at(9, 0, 0)).await.unwrap();
    assert_eq!(replay.window.start, at(8, 50, 0));

    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT start_time, end_time FROM qc_snapshot_base ORDER BY id")
            .fetch_all(&env.pool)
            .await
            .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], rows[1]);
}

#[tokio::test]
async fn test_junctions_are_distinct_with_nullable_names() {
    let env = TestEnv::new().await;
    env.template(368, "Milk QC").await;
    for (id, code) in [(1, "B-001"), (2, "B-002")] {
        sqlx::query("INSERT INTO qc_suggested_batch (id, code) VALUES (?, ?)")
            .bind(id)
            .bind(code)
            .execute(&env.pool)
            .await
            .unwrap();
    }
    sqlx::query("INSERT INTO team (id, name) VALUES (7, 'Night crew')")
        .execute(&env.pool)
        .await
        .unwrap();

    env.docs.insert(
        COLLECTION,
        json!({"_id": "a", "created_at": "2025-05-20T08:51:00Z", "related_batch_ids": [1, 2], "related_team_id": 7}),
    );
    env.docs.insert(
        COLLECTION,
        json!({"_id": "b", "created_at": "2025-05-20T08:52:00Z", "related_batch_ids": "2,3", "related_team_id": "7"}),
    );

    let report = env.pipeline().run_cycle_at(false, at(9, 0, 0)).await.unwrap();
    assert_eq!(report.snapshots_written, 1);

    let batches: Vec<(String, Option<String>)> =
        sqlx::query_as("SELECT batch_id, batch_code FROM qc_snapshot_batch ORDER BY batch_id")
            .fetch_all(&env.pool)
            .await
            .unwrap();
    assert_eq!(
        batches,
        vec![
            ("1".to_string(), Some("B-001".to_string())),
            ("2".to_string(), Some("B-002".to_string())),
            ("3".to_string(), None),
        ]
    );

    let teams: Vec<(String, Option<String>)> =
        sqlx::query_as("SELECT team_id, team_name FROM qc_snapshot_team")
            .fetch_all(&env.pool)
            .await
            .unwrap();
    assert_eq!(teams, vec![("7".to_string(), Some("Night crew".to_string()))]);
    assert_eq!(env.count("qc_snapshot_product").await, 0);
}

#[tokio::test]
async fn test_missing_label_mapping_writes_base_without_items() {
    let env = TestEnv::new().await;
    env.template(368, "Milk QC").await;
    env.docs.insert(COLLECTION, json!({"_id": "a", "created_at": "2025-05-20T08:55:00Z", "moisture": 3}));

    let report = env.pipeline().run_cycle_at(false, at(9, 0, 0)).await.unwrap();
    assert_eq!(report.snapshots_written, 1);
    assert_eq!(env.count("qc_snapshot_base").await, 1);
    assert_eq!(env.count("qc_snapshot_item").await, 0);
}

#[tokio::test]
async fn test_unknown_template_group_is_skipped() {
    let env = TestEnv::new().await;
    env.template(368, "Milk QC").await;
    env.docs.insert(COLLECTION, json!({"_id": "a", "created_at": "2025-05-20T08:55:00Z"}));
    env.docs.insert(
        "form_template_999_202505",
        json!({"_id": "z", "created_at": "2025-05-20T08:55:00Z"}),
    );
    env.docs.insert(COLLECTION, json!(["not", "an", "object"]));

    let report = env.pipeline().run_cycle_at(false, at(9, 0, 0)).await.unwrap();
    assert_eq!(report.collections_scanned, 2);
    assert_eq!(report.snapshots_written, 1);
    assert_eq!(report.groups_skipped, 1);
    assert_eq!(env.count("qc_snapshot_trigger_log").await, 1);

    let template_ids: Vec<i64> = sqlx::query_scalar("SELECT qc_form_template_id FROM qc_snapshot_base")
        .fetch_all(&env.pool)
        .await
        .unwrap();
    assert_eq!(template_ids, vec![368]);
}

#[tokio::test]
async fn test_group_spans_month_collections() {
    let env = TestEnv::new().await;
    env.template(368, "Milk QC").await;
    env.moisture_mapping();
    env.docs.insert(
        "form_template_368_202505",
        json!({"_id": "may", "created_at": "2025-05-31T23:58:00Z", "moisture": 1}),
    );
    env.docs.insert(
        "form_template_368_202506",
        json!({"_id": "june", "created_at": "2025-06-01T00:01:00Z", "moisture": 1}),
    );

    let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 5, 0).unwrap();
    let report = env.pipeline().run_cycle_at(false, now).await.unwrap();
    assert_eq!(report.collections_scanned, 2);
    assert_eq!(report.snapshots_written, 1);

    let total: i64 = sqlx::query_scalar("SELECT total_count FROM qc_snapshot_item")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(total, 2);
}

#[tokio::test]
async fn test_late_cycle_keeps_previous_month() {
    let env = TestEnv::new().await;
    env.template(368, "Milk QC").await;
    let pipeline = env.pipeline();

    let cursor = Utc.with_ymd_and_hms(2025, 5, 31, 23, 59, 58).unwrap();
    pipeline.run_cycle_at(false, cursor).await.unwrap();

    env.docs.insert(
        "form_template_368_202505",
        json!({"_id": "last-second", "created_at": "2025-05-31T23:59:59Z"}),
    );

    // Ten minutes and three seconds after the cursor.
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 10, 1).unwrap();
    let plan = pipeline.plan(now).await.unwrap();
    let names: Vec<String> = plan.collections.iter().map(|c| c.to_string()).collect();
    assert_eq!(names, vec!["form_template_368_202505"]);

    let report = pipeline.run_cycle_at(false, now).await.unwrap();
    assert_eq!(report.window.start, cursor);
    assert_eq!(report.documents_scanned, 1);
    assert_eq!(report.snapshots_written, 1);
}

#[tokio::test]
async fn test_sub_millisecond_end_does_not_double_count() {
    let env = TestEnv::new().await;
    env.template(368, "Milk QC").await;
    env.moisture_mapping();
    env.docs.insert(
        COLLECTION,
        json!({"_id": "edge", "created_at": "2025-05-20T09:00:00.000Z", "moisture": 2}),
    );

    let pipeline = env.pipeline();
    let first = pipeline
        .run_cycle_at(false, at(9, 0, 0) + chrono::Duration::microseconds(700))
        .await
        .unwrap();
    let second = pipeline.run_cycle_at(false, at(9, 10, 0)).await.unwrap();

    assert_eq!(first.window.end, at(9, 0, 0));
    assert_eq!(second.window.start, first.window.end);
    assert_eq!(first.documents_scanned + second.documents_scanned, 1);

    let total: i64 = sqlx::query_scalar("SELECT SUM(total_count) FROM qc_snapshot_item")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn test_malformed_approval_still_snapshots_document() {
    let env = TestEnv::new().await;
    env.template(368, "Milk QC").await;
    env.docs.insert(
        COLLECTION,
        json!({
            "_id": "a",
            "created_at": "2025-05-20T08:55:00Z",
            "approver_updated_at": "2025-05-20T08:56:00Z",
            "related_batch_ids": [1],
            "approval_info": ["approved"]
        }),
    );

    let report = env.pipeline().run_cycle_at(false, at(9, 0, 0)).await.unwrap();
    assert_eq!(report.documents_scanned, 1);
    assert_eq!(report.documents_skipped, 0);
    assert_eq!(report.snapshots_written, 1);
    assert_eq!(report.retests_written, 0);
    assert_eq!(env.count("qc_snapshot_batch").await, 1);
}

#[tokio::test]
async fn test_failed_group_rolls_back_and_next_commits() {
    let env = TestEnv::new().await;
    env.template(367, "Butter QC").await;
    env.template(368, "Milk QC").await;
    env.moisture_mapping();
    env.docs.insert(
        LABEL_PAIRS_COLLECTION,
        json!({"qc_form_template_id": 367, "fields": [{"key": "salt", "label": "盐分"}]}),
    );
    env.docs.insert(
        "form_template_367_202505",
        json!({"_id": "b1", "created_at": "2025-05-20T08:55:00Z", "related_batch_ids": [1], "salt": 2}),
    );
    env.docs.insert(
        COLLECTION,
        json!({"_id": "m1", "created_at": "2025-05-20T08:55:00Z", "moisture": 12}),
    );

    // Fails after the base row and junctions of template 367 are inserted.
    sqlx::query(
        "CREATE TRIGGER reject_salt BEFORE INSERT ON qc_snapshot_item          WHEN NEW.key = 'salt' BEGIN SELECT RAISE(ABORT, 'item rejected'); END",
    )
    .execute(&env.pool)
    .await
    .unwrap();

    let report = env.pipeline().run_cycle_at(false, at(9, 0, 0)).await.unwrap();
    assert_eq!(report.groups_skipped, 1);
    assert_eq!(report.snapshots_written, 1);

    let template_ids: Vec<i64> = sqlx::query_scalar("SELECT qc_form_template_id FROM qc_snapshot_base")
        .fetch_all(&env.pool)
        .await
        .unwrap();
    assert_eq!(template_ids, vec![368]);
    assert_eq!(env.count("qc_snapshot_batch").await, 0);
    assert_eq!(env.count("qc_snapshot_item").await, 1);

    let log = trigger_log::recent(&env.pool, 1, false).await.unwrap();
    assert_eq!(log[0].note.as_deref(), Some("Inserted 1 snapshots, 0 retests"));
}

#[tokio::test]
async fn test_trigger_log_failure_keeps_cursor() {
    let env = TestEnv::new().await;
    env.template(368, "Milk QC").await;
    let pipeline = env.pipeline();
    pipeline.run_cycle_at(false, at(9, 0, 0)).await.unwrap();

    sqlx::query(
        "CREATE TRIGGER reject_log BEFORE INSERT ON qc_snapshot_trigger_log          BEGIN SELECT RAISE(ABORT, 'log rejected'); END",
    )
    .execute(&env.pool)
    .await
    .unwrap();
    env.docs.insert(COLLECTION, json!({"_id": "a", "created_at": "2025-05-20T09:05:00Z"}));

    let result = pipeline.run_cycle_at(false, at(9, 10, 0)).await;
    assert!(result.is_err());
    assert_eq!(trigger_log::latest_end(&env.pool).await.unwrap(), Some(at(9, 0, 0)));
    assert_eq!(env.count("qc_snapshot_trigger_log").await, 1);
}

#[tokio::test]
async fn test_retest_first_match_per_document() {
    let env = TestEnv::new().await;
    env.template(368, "Milk QC").await;
    env.docs.insert(
        COLLECTION,
        json!({
            "_id": "sub-1",
            "created_at": "2025-05-19T10:00:00Z",
            "approver_updated_at": "2025-05-20T08:57:00Z",
            "related_product_ids": [11],
            "related_products": "Milk",
            "approval_info": [
                {"suggest_retest": false, "user_name": "Z"},
                {"suggest_retest": true, "user_id": 5, "user_name": "A", "comments": "redo"},
                {"suggest_retest": true, "user_name": "B"}
            ]
        }),
    );
    env.docs.insert(
        COLLECTION,
        json!({
            "_id": "sub-2",
            "approver_updated_at": "2025-05-20T08:30:00Z",
            "approval_info": [{"suggest_retest": true, "user_name": "late"}]
        }),
    );
    env.docs.insert(
        COLLECTION,
        json!({
            "_id": "sub-3",
            "approver_updated_at": "2025-05-20T08:58:00Z",
            "approval_info": "approved"
        }),
    );

    let report = env.pipeline().run_cycle_at(false, at(9, 0, 0)).await.unwrap();
    assert_eq!(report.retests_written, 1);
    assert_eq!(report.snapshots_written, 0);

    let row = sqlx::query(
        "SELECT approver_id, approver_name, comments, related_product_ids, related_products, \
         related_batch_ids, submission_id, collection_name, qc_form_template_name FROM qc_snapshot_retest",
    )
    .fetch_one(&env.pool)
    .await
    .unwrap();
    assert_eq!(row.get::<Option<String>, _>("approver_name").as_deref(), Some("A"));
    assert_eq!(row.get::<Option<String>, _>("approver_id").as_deref(), Some("5"));
    assert_eq!(row.get::<Option<String>, _>("comments").as_deref(), Some("redo"));
    assert_eq!(row.get::<String, _>("related_product_ids"), r#"["11"]"#);
    assert_eq!(row.get::<String, _>("related_products"), r#"["Milk"]"#);
    assert_eq!(row.get::<String, _>("related_batch_ids"), "[]");
    assert_eq!(row.get::<String, _>("submission_id"), "sub-1");
    assert_eq!(row.get::<String, _>("collection_name"), COLLECTION);
    assert_eq!(row.get::<String, _>("qc_form_template_name"), "Milk QC");

    let log = trigger_log::recent(&env.pool, 1, false).await.unwrap();
    assert_eq!(log[0].note.as_deref(), Some("Inserted 0 snapshots, 1 retests"));
}

#[tokio::test]
async fn test_lock_held_elsewhere_rejects_cycle() {
    let env = TestEnv::new().await;
    let lock_path = env._tmp.path().join("qcsnap.lock");
    let pipeline = env.pipeline().with_lock_file(lock_path.clone());

    let held = CycleLock::acquire(&lock_path).unwrap();
    let err = pipeline.run_cycle_at(false, at(9, 0, 0)).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SnapshotError>(),
        Some(SnapshotError::LockUnavailable(_))
    ));
    assert_eq!(env.count("qc_snapshot_trigger_log").await, 0);

    drop(held);
    pipeline.run_cycle_at(false, at(9, 0, 0)).await.unwrap();
    assert_eq!(env.count("qc_snapshot_trigger_log").await, 1);
}

/// Document store that stalls every read.
struct SlowStore {
    inner: MemoryDocumentStore,
    delay: Duration,
}

#[async_trait]
impl DocumentStore for SlowStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn find(&self, collection: &str, filter: &DocFilter) -> Result<Vec<Value>> {
        tokio::time::sleep(self.delay).await;
        self.inner.find(collection, filter).await
    }
}

#[tokio::test]
async fn test_concurrent_cycle_is_rejected() {
    let env = TestEnv::new().await;
    let inner = MemoryDocumentStore::new();
    inner.create_collection(COLLECTION);
    let slow = Arc::new(SlowStore {
        inner,
        delay: Duration::from_millis(300),
    });
    let pipeline = Arc::new(Pipeline::new(env.pool.clone(), slow, settings()));

    let running = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run_cycle_at(false, at(9, 0, 0)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = pipeline.run_cycle_at(true, at(9, 0, 0)).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SnapshotError>(),
        Some(SnapshotError::CycleInProgress)
    ));

    running.await.unwrap().unwrap();
    let log = trigger_log::recent(&env.pool, 10, false).await.unwrap();
    assert_eq!(log.len(), 1);
    assert!(!log[0].is_manual);
}

#[tokio::test]
async fn test_scan_timeout_skips_collection() {
    let env = TestEnv::new().await;
    env.template(368, "Milk QC").await;
    let inner = MemoryDocumentStore::new();
    inner.insert(COLLECTION, json!({"_id": "a", "created_at": "2025-05-20T08:55:00Z"}));
    let slow = Arc::new(SlowStore {
        inner,
        delay: Duration::from_millis(1500),
    });
    let settings = SnapshotConfig {
        scan_timeout_secs: 1,
        ..settings()
    };
    let pipeline = Pipeline::new(env.pool.clone(), slow, settings);

    let report = pipeline.run_cycle_at(false, at(9, 0, 0)).await.unwrap();
    assert_eq!(report.documents_scanned, 0);
    assert_eq!(report.snapshots_written, 0);
    assert_eq!(env.count("qc_snapshot_trigger_log").await, 1);
}

#[tokio::test]
async fn test_scheduler_ticks_tile_windows() {
    let env = TestEnv::new().await;
    let pipeline = Arc::new(env.pipeline());
    let scheduler = Scheduler::with_period(pipeline, Duration::from_millis(200));

    scheduler
        .run(tokio::time::sleep(Duration::from_millis(500)))
        .await;

    let mut log = trigger_log::recent(&env.pool, 10, false).await.unwrap();
    assert!(log.len() >= 2, "expected at least two cycles, got {}", log.len());
    assert!(log.iter().all(|e| !e.is_manual));

    log.reverse();
    for pair in log.windows(2) {
        assert_eq!(pair[1].start_at, pair[0].end_at);
    }
}

#[tokio::test]
async fn test_group_timeout_skips_template() {
    let env = TestEnv::new().await;
    env.template(368, "Milk QC").await;
    let inner = MemoryDocumentStore::new();
    inner.insert(COLLECTION, json!({"_id": "a", "created_at": "2025-05-20T08:55:00Z", "moisture": 1}));
    inner.insert(
        LABEL_PAIRS_COLLECTION,
        json!({"qc_form_template_id": 368, "fields": [{"key": "moisture", "label": "水分"}]}),
    );
    // Scans fit the scan timeout; the label lookup inside the group does not
    // fit the group timeout.
    let slow = Arc::new(SlowStore {
        inner,
        delay: Duration::from_millis(1500),
    });
    let settings = SnapshotConfig {
        scan_timeout_secs: 5,
        group_timeout_secs: 1,
        ..settings()
    };
    let pipeline = Pipeline::new(env.pool.clone(), slow, settings);

    let report = pipeline.run_cycle_at(false, at(9, 0, 0)).await.unwrap();
    assert_eq!(report.documents_scanned, 1);
    assert_eq!(report.groups_skipped, 1);
    assert_eq!(report.snapshots_written, 0);
    assert_eq!(env.count("qc_snapshot_base").await, 0);
    assert_eq!(env.count("qc_snapshot_trigger_log").await, 1);
}
