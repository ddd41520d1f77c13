//! Trigger health transition.
//!
//! All changes to `error_count`, `last_error`, `last_triggered_at` and the
//! automatic deactivation go through [`apply_outcome`], applied once per poll.

use chrono::{DateTime, Utc};

use crate::models::trigger;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerHealth {
    pub error_count: i32,
    pub last_error: Option<String>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl From<&trigger::Model> for TriggerHealth {
    fn from(model: &trigger::Model) -> Self {
        Self {
            error_count: model.error_count,
            last_error: model.last_error.clone(),
            last_triggered_at: model.last_triggered_at.map(|ts| ts.with_timezone(&Utc)),
            is_active: model.is_active,
        }
    }
}

/// Result of one poll as far as trigger health is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Polled { events_fired: usize },
    Failed { error: String },
}

/// Computes the next health values. A success clears the failure streak; a
/// failure extends it and deactivates the trigger once it reaches `threshold`.
pub fn apply_outcome(
    current: &TriggerHealth,
    outcome: &TriggerOutcome,
    now: DateTime<Utc>,
    threshold: i32,
) -> TriggerHealth {
    match outcome {
        TriggerOutcome::Polled { events_fired } => TriggerHealth {
            error_count: 0,
            last_error: current.last_error.clone(),
            last_triggered_at: if *events_fired > 0 {
                Some(now)
            } else {
                current.last_triggered_at
            },
            is_active: current.is_active,
        },
        TriggerOutcome::Failed { error } => {
            let error_count = current.error_count.saturating_add(1);
            TriggerHealth {
                error_count,
                last_error: Some(error.clone()),
                last_triggered_at: current.last_triggered_at,
                is_active: current.is_active && error_count < threshold,
            }
        }
    }
}
