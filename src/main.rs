//! # QC Snapshot CLI (`qcsnap`)
//!
//! The `qcsnap` binary drives the snapshot pipeline: schema setup, manual
//! and scheduled cycles, and read-only views of what has been written.
//!
//! ## Usage
//!
//! ```bash
//! qcsnap --config ./config/qcsnap.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qcsnap init` | Create the SQLite database and all tables |
//! | `qcsnap run` | Run one manual snapshot cycle |
//! | `qcsnap schedule` | Run a cycle every `window_minutes` until Ctrl-C |
//! | `qcsnap window` | Show the window the next cycle would cover |
//! | `qcsnap collections` | List the collections the next cycle would scan |
//! | `qcsnap history` | List recent cycles from the trigger log |
//! | `qcsnap stats` | Row counts and per-template totals |
//! | `qcsnap summary` | Record a control-limit pass-rate summary |
//!
//! Logs go to stderr. The filter comes from `RUST_LOG`, then
//! `[logging].filter`; `--verbose` forces `debug`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use qc_snapshot::{config, ingest, migrate, scheduler, stats, summary, trigger_log};

/// QC Snapshot CLI: periodic QC submission snapshots into SQLite.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/qcsnap.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "qcsnap",
    about = "QC Snapshot: periodic QC submission snapshots into SQLite",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/qcsnap.toml")]
    config: PathBuf,

    /// Log at debug level regardless of the configured filter.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, the snapshot tables and the
    /// reference tables they read from. Safe to run repeatedly.
    Init,

    /// Run one snapshot cycle now, recorded as manual.
    Run,

    /// Run snapshot cycles every `window_minutes`, first one immediately.
    Schedule,

    /// Show the window the next cycle would cover.
    Window,

    /// List the source collections the next cycle would scan.
    Collections,

    /// List recent cycles, newest first.
    History {
        /// Maximum number of cycles to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,

        /// Only show manually triggered cycles.
        #[arg(long)]
        manual_only: bool,
    },

    /// Show snapshot table counts and per-template totals.
    Stats {
        /// Restrict the breakdown to one form template.
        #[arg(long)]
        template: Option<i64>,
    },

    /// Summarize control-limit violations over the last window and record it.
    Summary,
}

fn init_tracing(default_filter: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging.filter, cli.verbose);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            std::fs::create_dir_all(&cfg.documents.root)?;
            println!("Database initialized successfully.");
        }
        Commands::Run => {
            ingest::run_manual(&cfg).await?;
        }
        Commands::Schedule => {
            scheduler::run_schedule(&cfg).await?;
        }
        Commands::Window => {
            ingest::run_preview(&cfg, false).await?;
        }
        Commands::Collections => {
            ingest::run_preview(&cfg, true).await?;
        }
        Commands::History { limit, manual_only } => {
            trigger_log::run_history(&cfg, limit, manual_only).await?;
        }
        Commands::Stats { template } => {
            stats::run_stats(&cfg, template).await?;
        }
        Commands::Summary => {
            summary::run_summary(&cfg).await?;
        }
    }

    Ok(())
}
