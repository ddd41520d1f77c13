//! Sends one webhook request for one event and classifies the response.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use metrics::{counter, histogram};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, Method};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::DeliveryConfig;
use crate::error::TriggerError;
use crate::models::trigger::{self, WebhookMethod};
use crate::models::trigger_event::{self, WebhookResponse};
use crate::sources::google::{self, truncate};
use crate::telemetry::{WEBHOOK_DELIVERIES_TOTAL, WEBHOOK_DELIVERY_DURATION_MS};

pub const EVENT_ID_HEADER: &str = "x-syncline-event-id";
pub const EVENT_TYPE_HEADER: &str = "x-syncline-event-type";
pub const TRIGGER_ID_HEADER: &str = "x-syncline-trigger-id";

const RESPONSE_BODY_LIMIT: usize = 4096;

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_body: Value,
    pub response_headers: BTreeMap<String, String>,
    pub error: Option<String>,
    pub duration: Duration,
}

impl DeliveryResult {
    fn failed(error: String, duration: Duration) -> Self {
        Self {
            success: false,
            status_code: None,
            response_body: Value::Null,
            response_headers: BTreeMap::new(),
            error: Some(error),
            duration,
        }
    }

    /// Shape stored on the event row.
    pub fn to_response(&self) -> WebhookResponse {
        WebhookResponse {
            status_code: self.status_code,
            body: self.response_body.clone(),
            headers: self.response_headers.clone(),
            error: self.error.clone(),
            duration_ms: u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Short human-readable summary for `status_message`.
    pub fn summary(&self) -> String {
        match (self.status_code, &self.error) {
            (Some(code), _) if self.success => format!("delivered with HTTP {code}"),
            (_, Some(error)) => error.clone(),
            (Some(code), None) => format!("webhook returned HTTP {code}"),
            (None, None) => "no response".to_string(),
        }
    }
}

/// Webhook delivery unit. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WebhookDeliverer {
    http: Client,
    timeout: Duration,
}

impl WebhookDeliverer {
    pub fn new(config: &DeliveryConfig) -> Result<Self, TriggerError> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, timeout })
    }

    /// Sends the event's snapshot payload to its snapshot target. Never
    /// errors: transport failures and timeouts come back as unsuccessful results.
    #[instrument(skip(self, event), fields(event_id = %event.id, trigger_id = %event.trigger_id))]
    pub async fn deliver(&self, event: &trigger_event::Model) -> DeliveryResult {
        let started = Instant::now();

        let method = match event.webhook_method.parse::<WebhookMethod>() {
            Ok(WebhookMethod::Post) => Method::POST,
            Ok(WebhookMethod::Put) => Method::PUT,
            Err(err) => return self.finish(DeliveryResult::failed(err, started.elapsed())),
        };

        let headers = build_headers(event);
        let sent = self
            .http
            .request(method, &event.webhook_url)
            .headers(headers)
            .json(&event.webhook_payload)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                let message = if err.is_timeout() {
                    format!("request timed out after {}s", self.timeout.as_secs())
                } else {
                    format!("network error: {err}")
                };
                return self.finish(DeliveryResult::failed(message, started.elapsed()));
            }
        };

        let status = response.status();
        let response_headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        let (response_body, error) = match response.text().await {
            Ok(text) => (parse_body(&text), None),
            Err(err) if err.is_timeout() => (
                Value::Null,
                Some(format!(
                    "response body timed out after {}s",
                    self.timeout.as_secs()
                )),
            ),
            Err(err) => (Value::Null, Some(format!("failed to read response body: {err}"))),
        };

        // Any 2xx is delivered, even when the body cannot be read.
        self.finish(DeliveryResult {
            success: status.is_success(),
            status_code: Some(status.as_u16()),
            response_body,
            response_headers,
            error,
            duration: started.elapsed(),
        })
    }

    fn finish(&self, result: DeliveryResult) -> DeliveryResult {
        let outcome = match (result.success, result.status_code) {
            (true, _) => "success",
            (false, Some(_)) => "http_error",
            (false, None) => "network_error",
        };
        counter!(WEBHOOK_DELIVERIES_TOTAL, "outcome" => outcome).increment(1);
        histogram!(WEBHOOK_DELIVERY_DURATION_MS).record(result.duration.as_secs_f64() * 1000.0);

        if result.success {
            if let Some(error) = &result.error {
                debug!(error = %error, "Webhook accepted but response body was unreadable");
            }
        } else {
            warn!(
                status_code = ?result.status_code,
                error = ?result.error,
                "Webhook delivery attempt failed"
            );
        }
        result
    }
}

/// Default headers, then the snapshot's custom headers on top.
fn build_headers(event: &trigger_event::Model) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(google::USER_AGENT));
    for (name, value) in [
        (EVENT_ID_HEADER, event.id.to_string()),
        (EVENT_TYPE_HEADER, event.event_type.clone()),
        (TRIGGER_ID_HEADER, event.trigger_id.to_string()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }

    for (name, value) in event.header_map() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid custom webhook header"),
        }
    }

    headers
}

fn parse_body(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(truncate(text, RESPONSE_BODY_LIMIT)))
}

/// Request body for an event: `{id, trigger: {id, name, type}, event, timestamp}`.
pub fn build_envelope(
    trigger: &trigger::Model,
    event_id: Uuid,
    raw_event: &Value,
    now: DateTime<Utc>,
) -> Value {
    json!({
        "id": event_id,
        "trigger": {
            "id": trigger.id,
            "name": trigger.name,
            "type": trigger.trigger_type,
        },
        "event": raw_event,
        "timestamp": now.to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}
