//! Webhook delivery and the per-event retry policy.

pub mod retry;
pub mod webhook;

pub use retry::{DeliveryTransition, MAX_DELIVERY_ATTEMPTS, RETRY_BACKOFF_SECONDS, next_transition};
pub use webhook::{DeliveryResult, WebhookDeliverer, build_envelope};
