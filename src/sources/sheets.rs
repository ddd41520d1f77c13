//! New-row detection for Google Sheets.
//!
//! The cursor is the number of rows (header included) seen on the last poll.
//! Row numbers in emitted events are positions in the fetched range, so the
//! first data row below the header is row 1.

use serde_json::{Map, Value, json};

use super::{GoogleApiClient, SheetsConfig, SourceError, SourcePoll, matches_filters, value_as_text};
use crate::models::trigger_state::{StateData, TriggerState};

pub const EVENT_TYPE: &str = "new-row";

pub(crate) async fn check(
    client: &GoogleApiClient,
    config: &SheetsConfig,
    access_token: &str,
    previous: Option<&TriggerState>,
) -> Result<SourcePoll, SourceError> {
    let mut url = client.sheets_url(&[
        "v4",
        "spreadsheets",
        &config.spreadsheet_id,
        "values",
        &config.sheet_name,
    ])?;
    url.query_pairs_mut().append_pair("majorDimension", "ROWS");

    let body = client.get_json(url, access_token).await?;
    let rows = parse_rows(&body)?;

    Ok(diff_rows(config, &rows, previous))
}

/// Extracts the `values` grid. An empty sheet has no `values` key.
fn parse_rows(body: &Value) -> Result<Vec<Vec<Value>>, SourceError> {
    match body.get("values") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(rows)) => rows
            .iter()
            .map(|row| match row {
                Value::Array(cells) => Ok(cells.clone()),
                other => Err(SourceError::MalformedResponse {
                    details: format!("expected a row array, got {other}"),
                }),
            })
            .collect(),
        Some(other) => Err(SourceError::MalformedResponse {
            details: format!("expected 'values' to be an array, got {other}"),
        }),
    }
}

/// Emits every row past the stored row count and advances the cursor to the
/// observed count.
pub fn diff_rows(
    config: &SheetsConfig,
    rows: &[Vec<Value>],
    previous: Option<&TriggerState>,
) -> SourcePoll {
    let total = rows.len() as u64;
    let headers: Vec<String> = rows
        .first()
        .map(|header| header.iter().map(value_as_text).collect())
        .unwrap_or_default();

    let cursor = previous.and_then(|state| state.last_row_count);
    let first_new = match cursor {
        Some(seen) => seen.max(1),
        // First poll records a baseline unless asked to replay existing rows.
        None if config.emit_existing => 1,
        None => total,
    };

    let mut events = Vec::new();
    if total > first_new {
        for (index, cells) in rows.iter().enumerate().skip(first_new as usize) {
            let row = row_object(&headers, cells);
            if !matches_filters(&config.filters, &row) {
                continue;
            }
            events.push(json!({
                "type": EVENT_TYPE,
                "spreadsheetId": config.spreadsheet_id,
                "sheetName": config.sheet_name,
                "rowNumber": index,
                "row": row,
            }));
        }
    }

    let state = TriggerState {
        last_item_id: None,
        last_timestamp: None,
        last_row_count: Some(total),
        state_data: Some(StateData::SheetRows { headers }),
    };

    SourcePoll { events, state }
}

fn row_object(headers: &[String], cells: &[Value]) -> Map<String, Value> {
    let width = headers.len().max(cells.len());
    (0..width)
        .map(|column| {
            let name = headers
                .get(column)
                .filter(|name| !name.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("column_{}", column + 1));
            let value = cells.get(column).map(value_as_text).unwrap_or_default();
            (name, Value::String(value))
        })
        .collect()
}
