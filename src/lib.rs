//! # QC Snapshot
//!
//! Periodic ingestion of quality-control form submissions into relational
//! snapshot tables.
//!
//! Every cycle reads the submissions that arrived since the previous cycle
//! from month-partitioned document collections, groups them by form
//! template, and writes one transactional snapshot per template (base row,
//! related-entity junctions, per-field statistics). Retest requests found in
//! approval histories are denormalized into their own table, and the cycle
//! closes by appending to the trigger log, which is the cursor for the next
//! window.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │  Documents   │──▶│   Pipeline    │──▶│    SQLite    │
//! │ form_template│   │ window+group  │   │ qc_snapshot_*│
//! │  _<id>_<YM>  │   │ +retest       │   │ trigger_log  │
//! └──────────────┘   └───────┬───────┘   └──────────────┘
//!                            │
//!                 ┌──────────┴──────────┐
//!                 ▼                     ▼
//!           ┌──────────┐         ┌────────────┐
//!           │ qcsnap   │         │ Scheduler  │
//!           │  run     │         │ (interval) │
//!           └──────────┘         └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! qcsnap init                   # create database
//! qcsnap window                 # preview the next window
//! qcsnap run                    # one manual cycle
//! qcsnap schedule               # cycle every window_minutes
//! qcsnap history --limit 5
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`documents`] | Document store trait and filters |
//! | [`docstore_fs`] | JSON-lines directory document store |
//! | [`normalize`] | Tolerant parsing of source documents |
//! | [`collections`] | Candidate collection selection |
//! | [`window`] | Window computation |
//! | [`labels`] | Template field label lookup |
//! | [`writer`] | Transactional per-template snapshots |
//! | [`retest`] | Retest extraction |
//! | [`trigger_log`] | Cycle cursor and audit log |
//! | [`ingest`] | Cycle orchestration |
//! | [`scheduler`] | Periodic trigger |
//! | [`lock`] | Cross-process cycle lock |
//! | [`summary`] | Control-limit pass rate |
//! | [`stats`] | Snapshot statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod collections;
pub mod config;
pub mod db;
pub mod docstore_fs;
pub mod documents;
pub mod error;
pub mod ingest;
pub mod labels;
pub mod lock;
pub mod lookup;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod query;
pub mod retest;
pub mod scheduler;
pub mod stats;
pub mod summary;
pub mod trigger_log;
pub mod window;
pub mod writer;
