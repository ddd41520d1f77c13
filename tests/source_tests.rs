//! Source handlers against a wiremock stand-in for the Google APIs.

mod test_utils;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use triggers::models::trigger_state::{StateData, TriggerState};
use triggers::sources::{
    GoogleApiClient, SourceError, TriggerSource, check_for_events, drive::build_query,
};
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use test_utils::*;

const CALENDAR_PATH: &str = "/calendar/v3/calendars/primary/events";
const DRIVE_PATH: &str = "/drive/v3/files";

fn client(server: &MockServer) -> GoogleApiClient {
    GoogleApiClient::new(&test_config(server).sources).unwrap()
}

fn calendar_source() -> TriggerSource {
    TriggerSource::parse("google_calendar.new_event", &json!({})).unwrap()
}

fn drive_source() -> TriggerSource {
    TriggerSource::parse(
        "google_drive.new_file",
        &json!({"folderId": "folder-1", "mimeType": "pdf"}),
    )
    .unwrap()
}

#[tokio::test]
async fn calendar_first_poll_looks_back_a_day_and_skips_cancelled() {
    let server = MockServer::start().await;
    let now = start_time();
    Mock::given(method("GET"))
        .and(path(CALENDAR_PATH))
        .and(header("authorization", "Bearer test-access-token"))
        .and(query_param("updatedMin", "2025-06-01T09:00:00.000Z"))
        .and(query_param("singleEvents", "true"))
        .and(query_param("showDeleted", "false"))
        .and(query_param("maxResults", "250"))
        .and(query_param("orderBy", "updated"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": "evt-new", "summary": "Standup", "created": "2025-06-02T08:00:00Z", "status": "confirmed"},
                {"id": "evt-old", "summary": "Edited", "created": "2025-05-20T08:00:00Z", "status": "confirmed"},
                {"id": "evt-gone", "summary": "Cancelled", "created": "2025-06-02T07:00:00Z", "status": "cancelled"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let poll = check_for_events(&client(&server), &calendar_source(), ACCESS_TOKEN, None, now)
        .await
        .unwrap();

    assert_eq!(poll.events.len(), 1);
    assert_eq!(poll.events[0]["type"], "new-event");
    assert_eq!(poll.events[0]["calendarId"], "primary");
    assert_eq!(poll.events[0]["event"]["id"], "evt-new");
    assert_eq!(poll.state.last_timestamp, Some(now));
    assert_eq!(poll.state.last_item_id.as_deref(), Some("evt-new"));
}

#[tokio::test]
async fn calendar_follows_page_tokens_and_orders_by_creation() {
    let server = MockServer::start().await;
    let now = start_time();
    let previous = TriggerState {
        last_timestamp: Some(now - Duration::minutes(5)),
        last_item_id: Some("evt-0".to_string()),
        ..TriggerState::default()
    };
    Mock::given(method("GET"))
        .and(path(CALENDAR_PATH))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": "evt-1", "created": "2025-06-02T08:56:00Z"}
            ]
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CALENDAR_PATH))
        .and(query_param("updatedMin", "2025-06-02T08:55:00.000Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": "evt-2", "created": "2025-06-02T08:58:00Z"}
            ],
            "nextPageToken": "page-2"
        })))
        .mount(&server)
        .await;

    let poll = check_for_events(
        &client(&server),
        &calendar_source(),
        ACCESS_TOKEN,
        Some(&previous),
        now,
    )
    .await
    .unwrap();

    let ids: Vec<_> = poll
        .events
        .iter()
        .map(|event| event["event"]["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["evt-1", "evt-2"]);
    assert_eq!(
        poll.state.state_data,
        Some(StateData::CalendarEvents {
            calendar_id: "primary".to_string(),
            last_event_id: Some("evt-2".to_string()),
        })
    );
}

#[tokio::test]
async fn drive_query_carries_cursor_folder_and_mime_filter() {
    let server = MockServer::start().await;
    let now = start_time();
    let cursor = Utc.with_ymd_and_hms(2025, 6, 2, 8, 55, 0).unwrap();
    let previous = TriggerState {
        last_timestamp: Some(cursor),
        ..TriggerState::default()
    };
    let TriggerSource::GoogleDriveNewFile(drive_config) = drive_source() else {
        unreachable!();
    };
    let expected_query = build_query(&drive_config, cursor);
    assert_eq!(
        expected_query,
        "createdTime > '2025-06-02T08:55:00.000Z' and trashed = false and 'folder-1' in parents and mimeType contains 'pdf'"
    );

    Mock::given(method("GET"))
        .and(path(DRIVE_PATH))
        .and(query_param("q", expected_query.as_str()))
        .and(query_param("orderBy", "createdTime"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [
                {"id": "file-2", "name": "b.pdf", "mimeType": "application/pdf", "createdTime": "2025-06-02T08:59:00Z"},
                {"id": "file-1", "name": "a.pdf", "mimeType": "application/pdf", "createdTime": "2025-06-02T08:57:00Z"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let poll = check_for_events(
        &client(&server),
        &drive_source(),
        ACCESS_TOKEN,
        Some(&previous),
        now,
    )
    .await
    .unwrap();

    assert_eq!(poll.events.len(), 2);
    assert_eq!(poll.events[0]["type"], "new-file");
    assert_eq!(poll.events[0]["file"]["id"], "file-1");
    assert_eq!(poll.events[1]["file"]["name"], "b.pdf");
    assert_eq!(poll.state.last_item_id.as_deref(), Some("file-2"));
    assert_eq!(poll.state.last_timestamp, Some(now));
}

#[tokio::test]
async fn drive_page_cap_holds_cursor_at_last_file_seen() {
    let server = MockServer::start().await;
    let now = start_time();
    let cursor = Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap();
    let previous = TriggerState {
        last_timestamp: Some(cursor),
        ..TriggerState::default()
    };
    let TriggerSource::GoogleDriveNewFile(drive_config) = drive_source() else {
        unreachable!();
    };
    let first_query = build_query(&drive_config, cursor);

    // Eleven chained pages; the poll stops after ten.
    for page in 0..11 {
        let file = if page < 10 {
            json!({
                "id": format!("f{page}"),
                "name": format!("f{page}.pdf"),
                "createdTime": (cursor + Duration::minutes(10 + page)).to_rfc3339(),
            })
        } else {
            json!({
                "id": "late",
                "name": "late.pdf",
                "createdTime": (now - Duration::minutes(1)).to_rfc3339(),
            })
        };
        let mut body = json!({ "files": [file] });
        if page < 10 {
            body["nextPageToken"] = json!(format!("page-{}", page + 1));
        }
        let mock = Mock::given(method("GET"))
            .and(path(DRIVE_PATH))
            .and(query_param("q", first_query.as_str()));
        let mock = if page == 0 {
            mock.and(query_param_is_missing("pageToken"))
        } else {
            mock.and(query_param("pageToken", format!("page-{page}").as_str()))
        };
        mock.respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
    }

    let client = client(&server);
    let first = check_for_events(&client, &drive_source(), ACCESS_TOKEN, Some(&previous), now)
        .await
        .unwrap();

    let ids: Vec<_> = first
        .events
        .iter()
        .map(|event| event["file"]["id"].as_str().unwrap().to_string())
        .collect();
    let expected: Vec<String> = (0..10).map(|page| format!("f{page}")).collect();
    assert_eq!(ids, expected);
    let held = cursor + Duration::minutes(19);
    assert_eq!(first.state.last_timestamp, Some(held));
    assert_eq!(first.state.last_item_id.as_deref(), Some("f9"));

    let second_query = build_query(&drive_config, held);
    Mock::given(method("GET"))
        .and(path(DRIVE_PATH))
        .and(query_param("q", second_query.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [
                {"id": "late", "name": "late.pdf", "createdTime": (now - Duration::minutes(1)).to_rfc3339()}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let later = now + Duration::minutes(5);
    let second = check_for_events(&client, &drive_source(), ACCESS_TOKEN, Some(&first.state), later)
        .await
        .unwrap();

    assert_eq!(second.events.len(), 1);
    assert_eq!(second.events[0]["file"]["id"], "late");
    assert_eq!(second.state.last_timestamp, Some(later));
}

#[tokio::test]
async fn sheets_first_poll_records_baseline() {
    let server = MockServer::start().await;
    let rows: [&[&str]; 3] = [&["Name"], &["Ada"], &["Grace"]];
    Mock::given(method("GET"))
        .and(path(SHEET_VALUES_PATH))
        .and(query_param("majorDimension", "ROWS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sheet_values(&rows)))
        .mount(&server)
        .await;
    let source = TriggerSource::parse(
        "google_sheets.new_row",
        &json!({"spreadsheetId": SPREADSHEET_ID}),
    )
    .unwrap();

    let poll = check_for_events(&client(&server), &source, ACCESS_TOKEN, None, start_time())
        .await
        .unwrap();

    assert!(poll.events.is_empty());
    assert_eq!(poll.state.last_row_count, Some(3));
}

#[tokio::test]
async fn rejected_credential_maps_to_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CALENDAR_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = check_for_events(&client(&server), &calendar_source(), ACCESS_TOKEN, None, start_time())
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::Unauthorized));
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DRIVE_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
        .mount(&server)
        .await;

    let err = check_for_events(&client(&server), &drive_source(), ACCESS_TOKEN, None, start_time())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SourceError::RateLimited {
            retry_after: Some(30)
        }
    ));
}

#[tokio::test]
async fn server_error_body_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CALENDAR_PATH))
        .respond_with(ResponseTemplate::new(502).set_body_string("x".repeat(1000)))
        .mount(&server)
        .await;

    let err = check_for_events(&client(&server), &calendar_source(), ACCESS_TOKEN, None, start_time())
        .await
        .unwrap_err();

    match err {
        SourceError::Http { status, body } => {
            assert_eq!(status, 502);
            assert!(body.chars().count() <= 201);
        }
        other => panic!("expected HTTP error, got {other:?}"),
    }
}

#[tokio::test]
async fn non_json_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SHEET_VALUES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;
    let source = TriggerSource::parse(
        "google_sheets.new_row",
        &json!({"spreadsheetId": SPREADSHEET_ID}),
    )
    .unwrap();

    let err = check_for_events(&client(&server), &source, ACCESS_TOKEN, None, start_time())
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::MalformedResponse { .. }));
}
