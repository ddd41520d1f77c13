//! Shared fixtures: an in-memory SQLite database with migrations applied,
//! seeded connections and triggers, and a config whose Google API bases
//! point at a wiremock server.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::{Value, json};
use triggers::clock::ManualClock;
use triggers::config::{AppConfig, SourcesConfig};
use triggers::models::trigger::{NewTrigger, WebhookMethod};
use triggers::models::{connection, trigger};
use triggers::processor::TriggerProcessor;
use triggers::repositories::{ConnectionRepository, TriggerRepository};
use uuid::Uuid;
use wiremock::MockServer;

pub const ACCESS_TOKEN: &str = "test-access-token";
pub const SPREADSHEET_ID: &str = "sheet-1";
pub const SHEET_VALUES_PATH: &str = "/v4/spreadsheets/sheet-1/values/Sheet1";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Fixed starting instant for manual clocks.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
}

/// Test profile config with every Google API base pointing at `server`.
pub fn test_config(server: &MockServer) -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        database_url: "sqlite::memory:".to_string(),
        operator_tokens: vec!["operator-token".to_string()],
        sources: SourcesConfig {
            google_sheets_api_base: server.uri(),
            google_calendar_api_base: server.uri(),
            google_drive_api_base: server.uri(),
            ..SourcesConfig::default()
        },
        ..AppConfig::default()
    }
}

/// A processor on `db` reading time from `clock`.
pub fn test_processor(
    db: &DatabaseConnection,
    config: &AppConfig,
    clock: &ManualClock,
) -> TriggerProcessor {
    TriggerProcessor::new(db.clone(), config)
        .unwrap()
        .with_clock(Arc::new(clock.clone()))
}

pub async fn create_connection(db: &DatabaseConnection) -> Result<connection::Model> {
    let repo = ConnectionRepository::new(db.clone());
    Ok(repo
        .create(Uuid::new_v4(), "google", Some(ACCESS_TOKEN.to_string()))
        .await?)
}

pub fn new_trigger(
    connection: &connection::Model,
    trigger_type: &str,
    config: Value,
    webhook_url: String,
) -> NewTrigger {
    NewTrigger {
        user_id: connection.user_id,
        workspace_id: Uuid::new_v4(),
        project_id: Uuid::new_v4(),
        connection_id: connection.id,
        integration: trigger_type
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string(),
        name: "Test trigger".to_string(),
        trigger_type: trigger_type.to_string(),
        config,
        webhook_url,
        webhook_method: WebhookMethod::Post,
        webhook_headers: BTreeMap::new(),
        is_active: true,
    }
}

/// Creates a connection and a new-row trigger on [`SPREADSHEET_ID`].
pub async fn create_sheet_trigger(
    db: &DatabaseConnection,
    webhook_url: String,
) -> Result<trigger::Model> {
    let connection = create_connection(db).await?;
    let repo = TriggerRepository::new(db.clone());
    Ok(repo
        .create(new_trigger(
            &connection,
            "google_sheets.new_row",
            json!({"spreadsheetId": SPREADSHEET_ID}),
            webhook_url,
        ))
        .await?)
}

/// Sheets `values.get` response body for `rows`.
pub fn sheet_values(rows: &[&[&str]]) -> Value {
    json!({
        "range": "Sheet1!A1:Z1000",
        "majorDimension": "ROWS",
        "values": rows,
    })
}
