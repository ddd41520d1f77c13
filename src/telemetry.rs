//! Global subscriber setup and metric descriptions.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

pub const TRIGGERS_POLLED_TOTAL: &str = "triggers_polled_total";
pub const TRIGGER_POLL_FAILURES_TOTAL: &str = "trigger_poll_failures_total";
pub const TRIGGER_EVENTS_FIRED_TOTAL: &str = "trigger_events_fired_total";
pub const TRIGGER_AUTO_DISABLED_TOTAL: &str = "trigger_auto_disabled_total";
pub const WEBHOOK_DELIVERIES_TOTAL: &str = "webhook_deliveries_total";
pub const WEBHOOK_DELIVERY_DURATION_MS: &str = "webhook_delivery_duration_ms";
pub const TRIGGER_SWEEP_DURATION_MS: &str = "trigger_sweep_duration_ms";

/// Errors that can occur while initializing global telemetry.
#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize global tracing exactly once, wiring `log::` macros into the tracing pipeline.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        // Another LogTracer already registered is fine.
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!(
                "Warning: Failed to install log tracer bridge: {}. `log::` macros will not emit structured tracing events.",
                err
            );
        }
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!(
            "Warning: Failed to set global tracing subscriber: {}. Default subscriber remains in effect.",
            err
        );
    }

    describe_metrics();

    Ok(())
}

/// Registers descriptions for every metric the engine emits with whatever
/// recorder is installed.
pub fn describe_metrics() {
    describe_counter!(
        TRIGGERS_POLLED_TOTAL,
        Unit::Count,
        "Triggers polled successfully"
    );
    describe_counter!(
        TRIGGER_POLL_FAILURES_TOTAL,
        Unit::Count,
        "Trigger polls that failed before any event was recorded"
    );
    describe_counter!(
        TRIGGER_EVENTS_FIRED_TOTAL,
        Unit::Count,
        "Events detected and persisted for delivery"
    );
    describe_counter!(
        TRIGGER_AUTO_DISABLED_TOTAL,
        Unit::Count,
        "Triggers deactivated after repeated failures"
    );
    describe_counter!(
        WEBHOOK_DELIVERIES_TOTAL,
        Unit::Count,
        "Webhook delivery attempts by outcome"
    );
    describe_histogram!(
        WEBHOOK_DELIVERY_DURATION_MS,
        Unit::Milliseconds,
        "Wall time of a single webhook request"
    );
    describe_histogram!(
        TRIGGER_SWEEP_DURATION_MS,
        Unit::Milliseconds,
        "Wall time of a full trigger sweep"
    );
}
