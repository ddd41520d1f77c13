//! Trigger Processor
//!
//! Orchestrates one sweep: picks due triggers, polls their sources, persists
//! the new events with the advanced cursor, attempts delivery of each event
//! once, and folds the poll outcome into the trigger's health. A separate
//! retry pass re-delivers events whose backoff has elapsed.
//!
//! Failures are caught at the trigger boundary (recorded on the trigger) or
//! the event boundary (recorded on the event); a sweep only fails when the
//! due-trigger query itself fails.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Duration;
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod health;

use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::credentials::CredentialProvider;
use crate::delivery::{WebhookDeliverer, build_envelope, next_transition};
use crate::error::TriggerError;
use crate::models::trigger;
use crate::models::trigger_event::{self, EventStatus};
use crate::repositories::{
    ConnectionRepository, NewTriggerEvent, TriggerEventRepository, TriggerRepository,
};
use crate::sources::{self, GoogleApiClient, TriggerSource};
use crate::telemetry::{
    TRIGGER_AUTO_DISABLED_TOTAL, TRIGGER_EVENTS_FIRED_TOTAL, TRIGGER_POLL_FAILURES_TOTAL,
    TRIGGER_SWEEP_DURATION_MS, TRIGGERS_POLLED_TOTAL,
};
use health::{TriggerHealth, TriggerOutcome, apply_outcome};

/// Events re-delivered per retry pass at most.
const RETRY_SWEEP_LIMIT: u64 = 500;

/// Tunables taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub max_consecutive_errors: i32,
    pub retry_sweep_enabled: bool,
    pub stale_pending_after: Duration,
    pub event_retention: Duration,
}

impl ProcessorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::seconds(
                i64::try_from(config.scheduler.poll_interval_seconds).unwrap_or(i64::MAX),
            ),
            batch_size: config.scheduler.batch_size.max(1),
            max_consecutive_errors: config.scheduler.max_consecutive_errors,
            retry_sweep_enabled: config.scheduler.retry_sweep_enabled,
            stale_pending_after: Duration::seconds(
                i64::try_from(config.delivery.stale_pending_after_seconds).unwrap_or(i64::MAX),
            ),
            event_retention: Duration::days(i64::from(config.retention.event_retention_days)),
        }
    }
}

/// What happened to one trigger in a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerRun {
    /// Another task of this instance is already processing the trigger.
    Skipped,
    Completed {
        outcome: TriggerOutcome,
        deactivated: bool,
    },
}

/// Summary of one sweep, returned by the cron endpoint and logged by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub triggers_due: usize,
    pub triggers_succeeded: usize,
    pub triggers_failed: usize,
    pub triggers_skipped: usize,
    pub triggers_deactivated: usize,
    pub events_fired: usize,
    pub retries_attempted: usize,
    pub retries_delivered: usize,
    pub retries_rescheduled: usize,
    pub retries_failed: usize,
    pub retry_errors: usize,
    pub duration_ms: u64,
}

#[derive(Clone)]
pub struct TriggerProcessor {
    triggers: TriggerRepository,
    events: TriggerEventRepository,
    credentials: Arc<dyn CredentialProvider>,
    sources: Arc<GoogleApiClient>,
    deliverer: Arc<WebhookDeliverer>,
    clock: Arc<dyn Clock>,
    settings: ProcessorSettings,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl TriggerProcessor {
    /// Builds a processor reading credentials from stored connections and
    /// time from the system clock.
    pub fn new(db: DatabaseConnection, config: &AppConfig) -> Result<Self, TriggerError> {
        Ok(Self {
            triggers: TriggerRepository::new(db.clone()),
            events: TriggerEventRepository::new(db.clone()),
            credentials: Arc::new(ConnectionRepository::new(db)),
            sources: Arc::new(GoogleApiClient::new(&config.sources)?),
            deliverer: Arc::new(WebhookDeliverer::new(&config.delivery)?),
            clock: Arc::new(SystemClock),
            settings: ProcessorSettings::from_config(config),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn triggers(&self) -> &TriggerRepository {
        &self.triggers
    }

    pub fn events(&self) -> &TriggerEventRepository {
        &self.events
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Full sweep: due triggers, then (when enabled) the retry pass.
    pub async fn run_sweep(&self) -> Result<SweepReport, TriggerError> {
        let started = Instant::now();

        let mut report = self.process_due_triggers().await?;
        if self.settings.retry_sweep_enabled {
            let retries = self.retry_due_events().await?;
            report.retries_attempted = retries.retries_attempted;
            report.retries_delivered = retries.retries_delivered;
            report.retries_rescheduled = retries.retries_rescheduled;
            report.retries_failed = retries.retries_failed;
            report.retry_errors = retries.retry_errors;
        }

        let elapsed = started.elapsed();
        report.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        histogram!(TRIGGER_SWEEP_DURATION_MS).record(elapsed.as_secs_f64() * 1000.0);

        info!(
            triggers_due = report.triggers_due,
            triggers_failed = report.triggers_failed,
            events_fired = report.events_fired,
            retries_attempted = report.retries_attempted,
            duration_ms = report.duration_ms,
            "Trigger sweep finished"
        );

        Ok(report)
    }

    /// Processes every due trigger in batches of `batch_size`. Each batch is
    /// awaited fully before the next starts.
    pub async fn process_due_triggers(&self) -> Result<SweepReport, TriggerError> {
        let due = self
            .triggers
            .find_due(self.clock.now(), self.settings.poll_interval)
            .await?;

        let mut report = SweepReport {
            triggers_due: due.len(),
            ..SweepReport::default()
        };

        for batch in due.chunks(self.settings.batch_size) {
            let mut tasks = JoinSet::new();
            for trigger in batch.iter().cloned() {
                let processor = self.clone();
                let trigger_id = trigger.id;
                tasks.spawn(async move { (trigger_id, processor.process_trigger(trigger).await) });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, Ok(TriggerRun::Skipped))) => report.triggers_skipped += 1,
                    Ok((_, Ok(TriggerRun::Completed { outcome, deactivated }))) => {
                        match outcome {
                            TriggerOutcome::Polled { events_fired } => {
                                report.triggers_succeeded += 1;
                                report.events_fired += events_fired;
                            }
                            TriggerOutcome::Failed { .. } => report.triggers_failed += 1,
                        }
                        if deactivated {
                            report.triggers_deactivated += 1;
                        }
                    }
                    Ok((trigger_id, Err(err))) => {
                        report.triggers_failed += 1;
                        error!(trigger_id = %trigger_id, error = %err, "Failed to record trigger run");
                    }
                    Err(join_err) => {
                        report.triggers_failed += 1;
                        error!(error = %join_err, "Trigger task panicked");
                    }
                }
            }
        }

        Ok(report)
    }

    /// Polls one trigger and records the outcome on it.
    ///
    /// Errors only when the trigger row itself cannot be updated; source and
    /// configuration failures are folded into the trigger's health.
    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id, trigger_type = %trigger.trigger_type))]
    pub async fn process_trigger(&self, trigger: trigger::Model) -> Result<TriggerRun, TriggerError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, trigger.id) else {
            debug!("Trigger already in flight on this instance, skipping");
            return Ok(TriggerRun::Skipped);
        };

        let now = self.clock.now();
        self.triggers.mark_checked(trigger.id, now).await?;

        let outcome = match self.poll_and_fire(&trigger).await {
            Ok(events_fired) => {
                counter!(TRIGGERS_POLLED_TOTAL).increment(1);
                if events_fired > 0 {
                    counter!(TRIGGER_EVENTS_FIRED_TOTAL).increment(events_fired as u64);
                }
                TriggerOutcome::Polled { events_fired }
            }
            Err(err) => {
                counter!(TRIGGER_POLL_FAILURES_TOTAL).increment(1);
                warn!(error = %err, error_count = trigger.error_count + 1, "Trigger poll failed");
                TriggerOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };

        let current = TriggerHealth::from(&trigger);
        let next = apply_outcome(
            &current,
            &outcome,
            self.clock.now(),
            self.settings.max_consecutive_errors,
        );
        let mut deactivated = false;

        if next != current {
            let applied = self
                .triggers
                .apply_health(trigger.id, trigger.error_count, &next, self.clock.now())
                .await?;
            if !applied {
                warn!("Trigger error count changed concurrently; health update skipped");
            } else if current.is_active && !next.is_active {
                deactivated = true;
                counter!(TRIGGER_AUTO_DISABLED_TOTAL).increment(1);
                warn!(
                    error_count = next.error_count,
                    last_error = ?next.last_error,
                    "Trigger disabled after repeated failures"
                );
            }
        }

        Ok(TriggerRun::Completed {
            outcome,
            deactivated,
        })
    }

    /// Poll, persist and deliver. Returns the number of events fired.
    async fn poll_and_fire(&self, trigger: &trigger::Model) -> Result<usize, TriggerError> {
        let source = TriggerSource::parse(&trigger.trigger_type, &trigger.config)?;
        let stored = self.triggers.get_state(trigger.id).await?;
        let token = self.credentials.bearer_token(trigger.connection_id).await?;

        // Cursor times are taken before the fetch.
        let poll_started = self.clock.now();
        let poll = sources::check_for_events(
            &self.sources,
            &source,
            &token,
            stored.as_ref().map(|stored| &stored.state),
            poll_started,
        )
        .await?;

        if poll.events.is_empty()
            && stored
                .as_ref()
                .is_some_and(|stored| stored.state == poll.state)
        {
            debug!("No new items and cursor unchanged");
            return Ok(0);
        }

        let fired_at = self.clock.now();
        let new_events: Vec<NewTriggerEvent> = poll
            .events
            .into_iter()
            .map(|raw| {
                let id = Uuid::new_v4();
                let payload = build_envelope(trigger, id, &raw, fired_at);
                NewTriggerEvent::snapshot(trigger, id, raw, payload)
            })
            .collect();

        let created = self
            .events
            .record_poll(
                trigger.id,
                stored.as_ref().map(|stored| stored.version),
                &poll.state,
                new_events,
                fired_at,
            )
            .await?;

        for event in &created {
            self.deliver_event(event).await?;
        }

        if !created.is_empty() {
            info!(events_fired = created.len(), "Trigger fired events");
        }

        Ok(created.len())
    }

    /// One delivery attempt for a non-terminal event, recorded on the event.
    #[instrument(skip(self, event), fields(event_id = %event.id, attempt = event.attempt_count + 1))]
    pub async fn deliver_event(
        &self,
        event: &trigger_event::Model,
    ) -> Result<EventStatus, TriggerError> {
        match event.status() {
            Some(status) if status.is_terminal() => {
                return Err(TriggerError::TerminalEvent {
                    event_id: event.id,
                    status: status.to_string(),
                });
            }
            Some(_) => {}
            None => {
                return Err(TriggerError::misconfigured(format!(
                    "event {} has unknown status '{}'",
                    event.id, event.status
                )));
            }
        }

        let result = self.deliverer.deliver(event).await;
        let now = self.clock.now();
        let transition = next_transition(
            event.attempt_count + 1,
            event.max_attempts,
            result.success,
            now,
        );

        let applied = self
            .events
            .record_attempt(
                event,
                &transition,
                &result.to_response(),
                Some(result.summary()),
                now,
            )
            .await?;

        if !applied {
            debug!("Event attempt already recorded by another worker");
        }

        match transition.status() {
            EventStatus::Failed => warn!(
                status_code = ?result.status_code,
                "Event delivery failed permanently"
            ),
            status => debug!(status = %status, status_code = ?result.status_code, "Event delivery attempted"),
        }

        Ok(transition.status())
    }

    /// Re-delivers retrying events whose backoff elapsed and pending events
    /// left behind longer than the stale window.
    pub async fn retry_due_events(&self) -> Result<SweepReport, TriggerError> {
        let now = self.clock.now();
        let due = self
            .events
            .find_due_for_retry(now, now - self.settings.stale_pending_after, RETRY_SWEEP_LIMIT)
            .await?;

        let mut report = SweepReport {
            retries_attempted: due.len(),
            ..SweepReport::default()
        };

        for batch in due.chunks(self.settings.batch_size) {
            let mut tasks = JoinSet::new();
            for event in batch.iter().cloned() {
                let processor = self.clone();
                tasks.spawn(async move {
                    let event_id = event.id;
                    (event_id, processor.deliver_event(&event).await)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, Ok(EventStatus::Delivered))) => report.retries_delivered += 1,
                    Ok((_, Ok(EventStatus::Failed))) => report.retries_failed += 1,
                    Ok((_, Ok(_))) => report.retries_rescheduled += 1,
                    Ok((event_id, Err(err))) => {
                        report.retry_errors += 1;
                        error!(event_id = %event_id, error = %err, "Retry delivery could not be recorded");
                    }
                    Err(join_err) => {
                        report.retry_errors += 1;
                        error!(error = %join_err, "Retry task panicked");
                    }
                }
            }
        }

        Ok(report)
    }

    /// Re-attempts a pending or retrying event now.
    pub async fn redeliver(&self, event_id: Uuid) -> Result<EventStatus, TriggerError> {
        let event = self.events.get(event_id).await?;
        self.deliver_event(&event).await
    }

    /// Deletes delivered and failed events older than the retention window.
    pub async fn cleanup_events(&self) -> Result<u64, TriggerError> {
        let cutoff = self.clock.now() - self.settings.event_retention;
        let deleted = self.events.delete_terminal_before(cutoff).await?;
        info!(deleted, cutoff = %cutoff, "Old trigger events removed");
        Ok(deleted)
    }
}

/// Marks a trigger as being processed by this instance until dropped.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<Uuid>>>, id: Uuid) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(id);
        inserted.then(|| Self {
            set: Arc::clone(set),
            id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .remove(&self.id);
    }
}
