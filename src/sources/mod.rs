//! Source handlers.
//!
//! A trigger's `(trigger_type, config)` pair is parsed into a closed
//! [`TriggerSource`], and [`check_for_events`] dispatches on it. Every handler
//! follows the same append-diff shape: fetch the current collection, compare
//! it with the previous cursor, return the delta as raw domain events plus the
//! advanced cursor. Handlers never write state themselves; the processor
//! persists the returned cursor together with the events.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::error::TriggerError;
use crate::models::trigger_state::TriggerState;

pub mod calendar;
pub mod drive;
pub mod google;
pub mod sheets;

pub use google::GoogleApiClient;

pub const GOOGLE_SHEETS_NEW_ROW: &str = "google_sheets.new_row";
pub const GOOGLE_CALENDAR_NEW_EVENT: &str = "google_calendar.new_event";
pub const GOOGLE_DRIVE_NEW_FILE: &str = "google_drive.new_file";

/// How far back time-cursored sources look on their first poll.
pub const INITIAL_LOOKBACK_HOURS: i64 = 24;

/// Upstream failures while polling a source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {details}")]
    Network { details: String },
    #[error("upstream request timed out")]
    Timeout,
    #[error("malformed upstream response: {details}")]
    MalformedResponse { details: String },
    #[error("upstream rejected the credential")]
    Unauthorized,
    #[error("upstream rate limited the request (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },
    #[error("source client misconfigured: {details}")]
    Configuration { details: String },
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout
        } else {
            SourceError::Network {
                details: err.to_string(),
            }
        }
    }
}

/// Field equality filters applied to each candidate item.
pub type Filters = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    /// Emit rows already present on the first poll instead of only recording a baseline.
    #[serde(default)]
    pub emit_existing: bool,
    #[serde(default)]
    pub filters: Filters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarConfig {
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
    #[serde(default)]
    pub filters: Filters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveConfig {
    #[serde(default)]
    pub folder_id: Option<String>,
    /// Substring matched against the file MIME type
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filters: Filters,
}

fn default_sheet_name() -> String {
    "Sheet1".to_string()
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

/// A monitored source with its typed configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSource {
    GoogleSheetsNewRow(SheetsConfig),
    GoogleCalendarNewEvent(CalendarConfig),
    GoogleDriveNewFile(DriveConfig),
}

impl TriggerSource {
    /// Parses a stored trigger definition. Unknown types and invalid configs
    /// are configuration errors for that trigger.
    pub fn parse(trigger_type: &str, config: &Value) -> Result<Self, TriggerError> {
        let source = match trigger_type {
            GOOGLE_SHEETS_NEW_ROW => {
                let config: SheetsConfig = parse_config(trigger_type, config)?;
                if config.spreadsheet_id.trim().is_empty() {
                    return Err(TriggerError::misconfigured(
                        "spreadsheetId must not be empty",
                    ));
                }
                TriggerSource::GoogleSheetsNewRow(config)
            }
            GOOGLE_CALENDAR_NEW_EVENT => {
                TriggerSource::GoogleCalendarNewEvent(parse_config(trigger_type, config)?)
            }
            GOOGLE_DRIVE_NEW_FILE => {
                TriggerSource::GoogleDriveNewFile(parse_config(trigger_type, config)?)
            }
            other => {
                return Err(TriggerError::misconfigured(format!(
                    "unknown trigger type '{other}'"
                )));
            }
        };
        Ok(source)
    }

    pub fn trigger_type(&self) -> &'static str {
        match self {
            TriggerSource::GoogleSheetsNewRow(_) => GOOGLE_SHEETS_NEW_ROW,
            TriggerSource::GoogleCalendarNewEvent(_) => GOOGLE_CALENDAR_NEW_EVENT,
            TriggerSource::GoogleDriveNewFile(_) => GOOGLE_DRIVE_NEW_FILE,
        }
    }
}

fn parse_config<T: serde::de::DeserializeOwned>(
    trigger_type: &str,
    config: &Value,
) -> Result<T, TriggerError> {
    serde_json::from_value(config.clone()).map_err(|err| {
        TriggerError::misconfigured(format!("invalid config for {trigger_type}: {err}"))
    })
}

/// Result of one poll: events in source order and the cursor to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePoll {
    pub events: Vec<Value>,
    pub state: TriggerState,
}

/// Polls `source` and diffs against `previous`.
///
/// `now` is the poll start instant; time cursors advance to it so items
/// created while the fetch is in flight are seen on the next poll.
pub async fn check_for_events(
    client: &GoogleApiClient,
    source: &TriggerSource,
    access_token: &str,
    previous: Option<&TriggerState>,
    now: DateTime<Utc>,
) -> Result<SourcePoll, SourceError> {
    match source {
        TriggerSource::GoogleSheetsNewRow(config) => {
            sheets::check(client, config, access_token, previous).await
        }
        TriggerSource::GoogleCalendarNewEvent(config) => {
            calendar::check(client, config, access_token, previous, now).await
        }
        TriggerSource::GoogleDriveNewFile(config) => {
            drive::check(client, config, access_token, previous, now).await
        }
    }
}

/// Cursor for time-based sources: the stored timestamp, or the initial lookback window.
pub(crate) fn time_cursor(previous: Option<&TriggerState>, now: DateTime<Utc>) -> DateTime<Utc> {
    previous
        .and_then(|state| state.last_timestamp)
        .unwrap_or_else(|| now - Duration::hours(INITIAL_LOOKBACK_HOURS))
}

/// Where a time cursor moves after a fetch. A complete fetch advances to
/// `now`. A fetch cut short by the page cap advances only to the newest
/// `created_field` it actually saw past `cursor`, so items on unfetched pages
/// stay ahead of the cursor for the next poll.
pub(crate) fn high_water_mark(
    cursor: DateTime<Utc>,
    now: DateTime<Utc>,
    truncated: bool,
    items: &[Value],
    created_field: &str,
) -> DateTime<Utc> {
    if !truncated {
        return now;
    }
    let newest_seen = items
        .iter()
        .filter_map(|item| parse_timestamp(item.get(created_field)))
        .filter(|created| *created > cursor && *created <= now)
        .max();
    match newest_seen {
        Some(seen) => {
            warn!(cursor = %seen, "Page limit reached; cursor held at newest item seen");
            seen
        }
        None => {
            warn!(cursor = %cursor, "Page limit reached without newer items; cursor unchanged");
            cursor
        }
    }
}

/// True when every filter names a field present in `fields` with an equal value.
pub fn matches_filters(filters: &Filters, fields: &Map<String, Value>) -> bool {
    filters.iter().all(|(field, expected)| {
        fields
            .get(field)
            .is_some_and(|actual| value_as_text(actual) == *expected)
    })
}

pub(crate) fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parses an RFC 3339 timestamp field of an upstream item.
pub(crate) fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .map(|ts| ts.with_timezone(&Utc))
}
