//! New-event detection for Google Calendar.
//!
//! The API cannot filter on creation time, so the fetch uses `updatedMin`
//! (a superset) and the diff keeps only events created after the cursor.
//! Pages are requested in `updated` order so a capped fetch sees the oldest
//! changes first.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};

use super::{
    CalendarConfig, GoogleApiClient, SourceError, SourcePoll, high_water_mark, matches_filters,
    parse_timestamp, time_cursor,
};
use crate::models::trigger_state::{StateData, TriggerState};

pub const EVENT_TYPE: &str = "new-event";

/// Upper bound on pages followed in one poll.
const MAX_PAGES: usize = 10;

const EVENT_FIELDS: &[&str] = &[
    "id",
    "summary",
    "description",
    "location",
    "start",
    "end",
    "created",
    "htmlLink",
    "organizer",
    "attendees",
    "status",
];

pub(crate) async fn check(
    client: &GoogleApiClient,
    config: &CalendarConfig,
    access_token: &str,
    previous: Option<&TriggerState>,
    now: DateTime<Utc>,
) -> Result<SourcePoll, SourceError> {
    let cursor = time_cursor(previous, now);
    let updated_min = cursor.to_rfc3339_opts(SecondsFormat::Millis, true);
    let page_size = client.page_size().to_string();

    let mut items = Vec::new();
    let mut page_token: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let mut url = client.calendar_url(&["calendar", "v3", "calendars", &config.calendar_id, "events"])?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("updatedMin", &updated_min)
                .append_pair("singleEvents", "true")
                .append_pair("showDeleted", "false")
                .append_pair("orderBy", "updated")
                .append_pair("maxResults", &page_size);
            if let Some(token) = &page_token {
                query.append_pair("pageToken", token);
            }
        }

        let body = client.get_json(url, access_token).await?;
        match body.get("items") {
            None | Some(Value::Null) => {}
            Some(Value::Array(page)) => items.extend(page.iter().cloned()),
            Some(other) => {
                return Err(SourceError::MalformedResponse {
                    details: format!("expected 'items' to be an array, got {other}"),
                });
            }
        }

        page_token = body
            .get("nextPageToken")
            .and_then(Value::as_str)
            .map(str::to_string);
        if page_token.is_none() {
            break;
        }
    }

    let truncated = page_token.is_some();
    let high_water = high_water_mark(cursor, now, truncated, &items, "created");
    Ok(diff_events(config, items, previous, cursor, high_water))
}

/// Keeps events created in `(cursor, high_water]`, oldest first, and moves
/// the cursor to `high_water`.
pub fn diff_events(
    config: &CalendarConfig,
    items: Vec<Value>,
    previous: Option<&TriggerState>,
    cursor: DateTime<Utc>,
    high_water: DateTime<Utc>,
) -> SourcePoll {
    let mut fresh: Vec<(DateTime<Utc>, Map<String, Value>)> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(object) => Some(object),
            _ => None,
        })
        .filter(|object| object.get("status").and_then(Value::as_str) != Some("cancelled"))
        .filter_map(|object| {
            let created = parse_timestamp(object.get("created"))?;
            (created > cursor && created <= high_water).then_some((created, object))
        })
        .filter(|(_, object)| matches_filters(&config.filters, object))
        .collect();

    fresh.sort_by_key(|(created, _)| *created);

    let newest_id = fresh
        .last()
        .and_then(|(_, object)| object.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let events = fresh
        .into_iter()
        .map(|(_, object)| {
            let event: Map<String, Value> = EVENT_FIELDS
                .iter()
                .map(|field| {
                    let value = object.get(*field).cloned().unwrap_or(Value::Null);
                    (field.to_string(), value)
                })
                .collect();
            json!({
                "type": EVENT_TYPE,
                "calendarId": config.calendar_id,
                "event": event,
            })
        })
        .collect();

    let last_event_id = newest_id
        .clone()
        .or_else(|| previous.and_then(|state| state.last_item_id.clone()));

    let state = TriggerState {
        last_item_id: last_event_id.clone(),
        last_timestamp: Some(high_water),
        last_row_count: None,
        state_data: Some(StateData::CalendarEvents {
            calendar_id: config.calendar_id.clone(),
            last_event_id,
        }),
    };

    SourcePoll { events, state }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::Filters;
    use chrono::Duration;

    fn config() -> CalendarConfig {
        CalendarConfig {
            calendar_id: "primary".to_string(),
            filters: Filters::new(),
        }
    }

    fn item(id: &str, created: DateTime<Utc>) -> Value {
        json!({
            "id": id,
            "summary": format!("Meeting {id}"),
            "created": created.to_rfc3339(),
            "status": "confirmed",
        })
    }

    #[test]
    fn keeps_only_events_created_after_cursor_in_order() {
        let now = Utc::now();
        let cursor = now - Duration::minutes(10);
        let items = vec![
            item("late", now - Duration::minutes(1)),
            item("old", now - Duration::hours(2)),
            item("early", now - Duration::minutes(9)),
            item("boundary", cursor),
        ];

        let poll = diff_events(&config(), items, None, cursor, now);

        let ids: Vec<&str> = poll
            .events
            .iter()
            .map(|event| event["event"]["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert_eq!(poll.events[0]["type"], "new-event");
        assert_eq!(poll.events[0]["calendarId"], "primary");
        assert_eq!(poll.state.last_timestamp, Some(now));
        assert_eq!(poll.state.last_item_id.as_deref(), Some("late"));
    }

    #[test]
    fn cancelled_events_are_skipped() {
        let now = Utc::now();
        let cursor = now - Duration::minutes(10);
        let mut cancelled = item("gone", now);
        cancelled["status"] = json!("cancelled");

        let poll = diff_events(&config(), vec![cancelled], None, cursor, now);

        assert!(poll.events.is_empty());
        assert_eq!(poll.state.last_timestamp, Some(now));
    }

    #[test]
    fn no_new_events_keeps_previous_item_id() {
        let now = Utc::now();
        let previous = TriggerState {
            last_item_id: Some("evt-1".to_string()),
            last_timestamp: Some(now - Duration::minutes(5)),
            ..TriggerState::default()
        };

        let poll = diff_events(
            &config(),
            Vec::new(),
            Some(&previous),
            now - Duration::minutes(5),
            now,
        );

        assert!(poll.events.is_empty());
        assert_eq!(poll.state.last_item_id.as_deref(), Some("evt-1"));
    }
}
