//! Fixed-period trigger for scheduled cycles.
//!
//! Ticks every `window_minutes` (first tick immediately). Each tick spawns a
//! cycle on its own task so a slow cycle never delays the clock; a tick that
//! lands while a cycle is still running is rejected by the pipeline guard
//! and logged, not queued.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::SnapshotError;
use crate::ingest::Pipeline;

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    period: Duration,
}

impl Scheduler {
    /// Period taken from the pipeline's `window_minutes`.
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        let minutes = pipeline.settings().window_minutes.max(1) as u64;
        Self::with_period(pipeline, Duration::from_secs(minutes * 60))
    }

    pub fn with_period(pipeline: Arc<Pipeline>, period: Duration) -> Self {
        Self { pipeline, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Tick until `shutdown` resolves, then wait for the in-flight cycle.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(period_secs = self.period.as_secs_f64(), "Scheduler started");
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Some(handle) = in_flight.take() {
                        if !handle.is_finished() {
                            in_flight = Some(handle);
                            warn!("Previous cycle still running; tick skipped");
                            continue;
                        }
                    }
                    in_flight = Some(tokio::spawn(run_tick(self.pipeline.clone())));
                }
            }
        }

        info!("Scheduler stopping");
        if let Some(handle) = in_flight {
            if let Err(e) = handle.await {
                error!(error = %e, "Cycle task failed during shutdown");
            }
        }
    }
}

async fn run_tick(pipeline: Arc<Pipeline>) {
    match pipeline.run_scheduled_cycle().await {
        Ok(_) => {}
        Err(e) => match e.downcast_ref::<SnapshotError>() {
            Some(err) if !err.is_recoverable() => {
                warn!(error = %e, "Scheduled cycle rejected");
            }
            _ => error!(error = %e, "Scheduled cycle failed"),
        },
    }
}

/// `qcsnap schedule`: run cycles every `window_minutes` until Ctrl-C.
pub async fn run_schedule(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config).await?);
    let scheduler = Scheduler::new(pipeline.clone());

    println!(
        "Scheduling snapshot cycles every {}s. Press Ctrl-C to stop.",
        scheduler.period().as_secs()
    );
    scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await;

    pipeline.pool().close().await;
    Ok(())
}
