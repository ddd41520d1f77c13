//! New-file detection for Google Drive.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};

use super::{
    DriveConfig, GoogleApiClient, SourceError, SourcePoll, high_water_mark, matches_filters,
    parse_timestamp, time_cursor,
};
use crate::models::trigger_state::{StateData, TriggerState};

pub const EVENT_TYPE: &str = "new-file";

const MAX_PAGES: usize = 10;

const FILE_FIELDS: &[&str] = &[
    "id",
    "name",
    "mimeType",
    "createdTime",
    "modifiedTime",
    "webViewLink",
    "parents",
    "size",
];

pub(crate) async fn check(
    client: &GoogleApiClient,
    config: &DriveConfig,
    access_token: &str,
    previous: Option<&TriggerState>,
    now: DateTime<Utc>,
) -> Result<SourcePoll, SourceError> {
    let cursor = time_cursor(previous, now);
    let query = build_query(config, cursor);
    let fields = format!("nextPageToken, files({})", FILE_FIELDS.join(","));
    let page_size = client.page_size().to_string();

    let mut files = Vec::new();
    let mut page_token: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let mut url = client.drive_url(&["drive", "v3", "files"])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", &query)
                .append_pair("orderBy", "createdTime")
                .append_pair("pageSize", &page_size)
                .append_pair("fields", &fields);
            if let Some(token) = &page_token {
                pairs.append_pair("pageToken", token);
            }
        }

        let body = client.get_json(url, access_token).await?;
        match body.get("files") {
            None | Some(Value::Null) => {}
            Some(Value::Array(page)) => files.extend(page.iter().cloned()),
            Some(other) => {
                return Err(SourceError::MalformedResponse {
                    details: format!("expected 'files' to be an array, got {other}"),
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
    let high_water = high_water_mark(cursor, now, truncated, &files, "createdTime");
    Ok(diff_files(config, files, previous, cursor, high_water))
}

/// Builds the Drive search expression for files created after `cursor`.
pub fn build_query(config: &DriveConfig, cursor: DateTime<Utc>) -> String {
    let mut clauses = vec![
        format!(
            "createdTime > '{}'",
            cursor.to_rfc3339_opts(SecondsFormat::Millis, true)
        ),
        "trashed = false".to_string(),
    ];
    if let Some(folder) = config.folder_id.as_deref().filter(|f| !f.is_empty()) {
        clauses.push(format!("'{}' in parents", escape(folder)));
    }
    if let Some(mime) = config.mime_type.as_deref().filter(|m| !m.is_empty()) {
        clauses.push(format!("mimeType contains '{}'", escape(mime)));
    }
    clauses.join(" and ")
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Keeps files created in `(cursor, high_water]`, oldest first, and moves
/// the cursor to `high_water`.
pub fn diff_files(
    config: &DriveConfig,
    files: Vec<Value>,
    previous: Option<&TriggerState>,
    cursor: DateTime<Utc>,
    high_water: DateTime<Utc>,
) -> SourcePoll {
    let mut fresh: Vec<(DateTime<Utc>, Map<String, Value>)> = files
        .into_iter()
        .filter_map(|file| match file {
            Value::Object(object) => Some(object),
            _ => None,
        })
        .filter_map(|object| {
            let created = parse_timestamp(object.get("createdTime"))?;
            (created > cursor && created <= high_water).then_some((created, object))
        })
        .filter(|(_, object)| matches_filters(&config.filters, object))
        .collect();

    fresh.sort_by_key(|(created, _)| *created);

    let newest = fresh.last().map(|(_, object)| {
        (
            object.get("id").and_then(Value::as_str).map(str::to_string),
            object.get("name").and_then(Value::as_str).map(str::to_string),
        )
    });

    let events = fresh
        .into_iter()
        .map(|(_, object)| {
            let file: Map<String, Value> = FILE_FIELDS
                .iter()
                .map(|field| {
                    let value = object.get(*field).cloned().unwrap_or(Value::Null);
                    (field.to_string(), value)
                })
                .collect();
            json!({
                "type": EVENT_TYPE,
                "file": file,
            })
        })
        .collect();

    let previous_name = previous.and_then(|state| match &state.state_data {
        Some(StateData::DriveFiles { last_file_name, .. }) => last_file_name.clone(),
        _ => None,
    });
    let (last_item_id, last_file_name) = match newest {
        Some((id, name)) => (id, name),
        None => (
            previous.and_then(|state| state.last_item_id.clone()),
            previous_name,
        ),
    };

    let state = TriggerState {
        last_item_id,
        last_timestamp: Some(high_water),
        last_row_count: None,
        state_data: Some(StateData::DriveFiles {
            folder_id: config.folder_id.clone(),
            last_file_name,
        }),
    };

    SourcePoll { events, state }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::Filters;
    use chrono::{Duration, TimeZone};

    fn config() -> DriveConfig {
        DriveConfig {
            folder_id: None,
            mime_type: None,
            filters: Filters::new(),
        }
    }

    #[test]
    fn query_includes_optional_folder_and_mime_filters() {
        let cursor = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let config = DriveConfig {
            folder_id: Some("folder-1".to_string()),
            mime_type: Some("pdf".to_string()),
            ..config()
        };

        assert_eq!(
            build_query(&config, cursor),
            "createdTime > '2025-01-02T03:04:05.000Z' and trashed = false \
             and 'folder-1' in parents and mimeType contains 'pdf'"
        );
    }

    #[test]
    fn query_escapes_quotes() {
        let cursor = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let config = DriveConfig {
            folder_id: Some("it's".to_string()),
            ..config()
        };

        assert!(build_query(&config, cursor).contains("'it\\'s' in parents"));
    }

    #[test]
    fn emits_new_files_oldest_first_and_tracks_newest() {
        let now = Utc::now();
        let cursor = now - Duration::minutes(10);
        let files = vec![
            json!({"id": "b", "name": "b.pdf", "createdTime": (now - Duration::minutes(1)).to_rfc3339()}),
            json!({"id": "a", "name": "a.pdf", "createdTime": (now - Duration::minutes(5)).to_rfc3339()}),
            json!({"id": "old", "name": "old.pdf", "createdTime": (now - Duration::hours(1)).to_rfc3339()}),
        ];

        let poll = diff_files(&config(), files, None, cursor, now);

        assert_eq!(poll.events.len(), 2);
        assert_eq!(poll.events[0]["type"], "new-file");
        assert_eq!(poll.events[0]["file"]["id"], "a");
        assert_eq!(poll.events[1]["file"]["id"], "b");
        assert_eq!(poll.state.last_item_id.as_deref(), Some("b"));
        assert_eq!(
            poll.state.state_data,
            Some(StateData::DriveFiles {
                folder_id: None,
                last_file_name: Some("b.pdf".to_string()),
            })
        );
        assert_eq!(poll.state.last_timestamp, Some(now));
    }
}
