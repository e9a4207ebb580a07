//! Schema creation for the relational side of the pipeline.
//!
//! Creates both the snapshot tables this pipeline writes and the reference
//! tables it only reads (templates, alert records, entity lookups), so a
//! fresh database can be seeded and exercised end to end.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Reference tables owned by other systems; read-only to the pipeline.
const REFERENCE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS qc_form_template (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        form_template_json TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS qc_alert_record (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        qc_form_template_id INTEGER NOT NULL,
        inspection_item_key TEXT NOT NULL,
        alert_type TEXT,
        inspection_value REAL,
        lower_control_limit REAL,
        upper_control_limit REAL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE TABLE IF NOT EXISTS qc_suggested_product (id INTEGER PRIMARY KEY, name TEXT)",
    "CREATE TABLE IF NOT EXISTS qc_suggested_batch (id INTEGER PRIMARY KEY, code TEXT)",
    "CREATE TABLE IF NOT EXISTS shift (id INTEGER PRIMARY KEY, name TEXT)",
    "CREATE TABLE IF NOT EXISTS team (id INTEGER PRIMARY KEY, name TEXT)",
    r#"CREATE TABLE IF NOT EXISTS "user" (id INTEGER PRIMARY KEY, name TEXT)"#,
];

const SNAPSHOT_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS qc_snapshot_base (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_time TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        qc_form_template_id INTEGER NOT NULL,
        qc_form_template_name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS qc_snapshot_batch (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_id INTEGER NOT NULL REFERENCES qc_snapshot_base(id) ON DELETE CASCADE,
        batch_id TEXT NOT NULL,
        batch_code TEXT,
        UNIQUE(snapshot_id, batch_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS qc_snapshot_product (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_id INTEGER NOT NULL REFERENCES qc_snapshot_base(id) ON DELETE CASCADE,
        product_id TEXT NOT NULL,
        product_name TEXT,
        UNIQUE(snapshot_id, product_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS qc_snapshot_shift (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_id INTEGER NOT NULL REFERENCES qc_snapshot_base(id) ON DELETE CASCADE,
        shift_id TEXT NOT NULL,
        shift_name TEXT,
        UNIQUE(snapshot_id, shift_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS qc_snapshot_team (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_id INTEGER NOT NULL REFERENCES qc_snapshot_base(id) ON DELETE CASCADE,
        team_id TEXT NOT NULL,
        team_name TEXT,
        UNIQUE(snapshot_id, team_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS qc_snapshot_inspector (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_id INTEGER NOT NULL REFERENCES qc_snapshot_base(id) ON DELETE CASCADE,
        inspector_id TEXT NOT NULL,
        inspector_name TEXT,
        UNIQUE(snapshot_id, inspector_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS qc_snapshot_item (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_id INTEGER NOT NULL REFERENCES qc_snapshot_base(id) ON DELETE CASCADE,
        key TEXT NOT NULL,
        label TEXT NOT NULL,
        total_count INTEGER NOT NULL,
        abnormal_count INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS qc_snapshot_retest (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        qc_form_template_id INTEGER NOT NULL,
        qc_form_template_name TEXT NOT NULL,
        approver_id TEXT,
        approver_name TEXT,
        comments TEXT,
        created_at TEXT,
        related_product_ids TEXT NOT NULL DEFAULT '[]',
        related_products TEXT NOT NULL DEFAULT '[]',
        related_batch_ids TEXT NOT NULL DEFAULT '[]',
        related_batches TEXT NOT NULL DEFAULT '[]',
        related_team_ids TEXT NOT NULL DEFAULT '[]',
        related_teams TEXT NOT NULL DEFAULT '[]',
        related_inspector_ids TEXT NOT NULL DEFAULT '[]',
        related_inspectors TEXT NOT NULL DEFAULT '[]',
        related_shift_ids TEXT NOT NULL DEFAULT '[]',
        related_shifts TEXT NOT NULL DEFAULT '[]',
        submission_id TEXT NOT NULL,
        collection_name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS qc_snapshot_trigger_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        start_at TEXT NOT NULL,
        end_at TEXT NOT NULL,
        note TEXT,
        is_manual INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS qc_summary_snapshot (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_time TEXT NOT NULL,
        total_fields INTEGER NOT NULL,
        abnormal_fields INTEGER NOT NULL,
        pass_rate_percent REAL NOT NULL
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_alert_template_key ON qc_alert_record(qc_form_template_id, inspection_item_key)",
    "CREATE INDEX IF NOT EXISTS idx_snapshot_base_template ON qc_snapshot_base(qc_form_template_id, snapshot_time)",
    "CREATE INDEX IF NOT EXISTS idx_snapshot_item_snapshot ON qc_snapshot_item(snapshot_id)",
    "CREATE INDEX IF NOT EXISTS idx_snapshot_retest_template ON qc_snapshot_retest(qc_form_template_id)",
];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    for ddl in REFERENCE_TABLES
        .iter()
        .chain(SNAPSHOT_TABLES.iter())
        .chain(INDEXES.iter())
    {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}
