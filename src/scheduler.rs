//! # Trigger Scheduler
//!
//! Background driver that runs one trigger sweep per tick until shutdown.
//! Deployments without a long-running process call the cron endpoint
//! instead; both paths go through [`TriggerProcessor::run_sweep`].

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::SchedulerConfig;
use crate::processor::TriggerProcessor;

/// Retention cleanup runs at most this often from the background loop.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct TriggerScheduler {
    processor: TriggerProcessor,
    tick_interval: Duration,
}

impl TriggerScheduler {
    pub fn new(processor: TriggerProcessor, config: &SchedulerConfig) -> Self {
        Self {
            processor,
            tick_interval: Duration::from_secs(config.tick_interval_seconds),
        }
    }

    /// Override the tick interval (primarily for tests).
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Runs sweeps until `shutdown` fires. A sweep in progress is finished
    /// before the loop observes the cancellation.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(tick_interval_secs = self.tick_interval.as_secs(), "Starting trigger scheduler");
        let mut last_cleanup: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Trigger scheduler shutdown requested");
                    break;
                }
                _ = sleep(self.tick_interval) => {
                    self.tick().await;

                    if last_cleanup.is_none_or(|at| at.elapsed() >= CLEANUP_INTERVAL) {
                        if let Err(err) = self.processor.cleanup_events().await {
                            error!(error = %err, "Event retention cleanup failed");
                        }
                        last_cleanup = Some(Instant::now());
                    }
                }
            }
        }

        info!("Trigger scheduler stopped");
    }

    async fn tick(&self) {
        match self.processor.run_sweep().await {
            Ok(report) => debug!(
                due = report.triggers_due,
                succeeded = report.triggers_succeeded,
                failed = report.triggers_failed,
                skipped = report.triggers_skipped,
                deactivated = report.triggers_deactivated,
                events_fired = report.events_fired,
                retries = report.retries_attempted,
                "Scheduler tick complete"
            ),
            Err(err) => error!(error = %err, "Scheduler tick failed"),
        }
    }
}
