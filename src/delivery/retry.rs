//! Per-event retry policy.
//!
//! Backoff is a fixed table indexed by the attempt that just failed, not a
//! formula. Lookups past the end of the table reuse the last entry.

use chrono::{DateTime, Duration, Utc};

use crate::models::trigger_event::EventStatus;

/// Delay before the next attempt, indexed by failed attempt number (1-based).
pub const RETRY_BACKOFF_SECONDS: [i64; 2] = [60, 300];

/// Attempts allowed per event; the last failure is terminal.
pub const MAX_DELIVERY_ATTEMPTS: i32 = 3;

/// Backoff after failed attempt `attempt`.
pub fn retry_delay(attempt: i32) -> Duration {
    let last = RETRY_BACKOFF_SECONDS.len() - 1;
    let index = usize::try_from(attempt.saturating_sub(1))
        .unwrap_or(0)
        .min(last);
    Duration::seconds(RETRY_BACKOFF_SECONDS[index])
}

/// Where an event goes after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryTransition {
    Delivered { at: DateTime<Utc> },
    Retrying { next_retry_at: DateTime<Utc> },
    Failed { at: DateTime<Utc> },
}

impl DeliveryTransition {
    pub fn status(&self) -> EventStatus {
        match self {
            DeliveryTransition::Delivered { .. } => EventStatus::Delivered,
            DeliveryTransition::Retrying { .. } => EventStatus::Retrying,
            DeliveryTransition::Failed { .. } => EventStatus::Failed,
        }
    }

    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        match self {
            DeliveryTransition::Retrying { next_retry_at } => Some(*next_retry_at),
            _ => None,
        }
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        match self {
            DeliveryTransition::Delivered { at } => Some(*at),
            _ => None,
        }
    }

    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            DeliveryTransition::Failed { at } => Some(*at),
            _ => None,
        }
    }
}

/// Transition after attempt number `attempt` (already counted) finished.
pub fn next_transition(
    attempt: i32,
    max_attempts: i32,
    success: bool,
    now: DateTime<Utc>,
) -> DeliveryTransition {
    if success {
        DeliveryTransition::Delivered { at: now }
    } else if attempt >= max_attempts {
        DeliveryTransition::Failed { at: now }
    } else {
        DeliveryTransition::Retrying {
            next_retry_at: now + retry_delay(attempt),
        }
    }
}
