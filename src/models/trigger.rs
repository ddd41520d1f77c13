//! Trigger entity model
//!
//! A trigger is a standing subscription to one monitored source. It carries
//! the webhook target that fired events are snapshotted from, and the health
//! counters the processor maintains.

use std::{collections::BTreeMap, fmt, str::FromStr};

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "triggers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub project_id: Uuid,

    /// Connection whose credential is used to poll the source
    pub connection_id: Uuid,

    /// Integration slug, e.g. `google_sheets`
    pub integration: String,

    pub name: String,

    /// Discriminates the source handler, e.g. `google_sheets.new_row`
    pub trigger_type: String,

    /// Source-specific parameters
    #[sea_orm(column_type = "JsonBinary")]
    pub config: JsonValue,

    pub is_active: bool,

    pub webhook_url: String,

    /// `POST` or `PUT`
    pub webhook_method: String,

    /// Custom headers as a JSON object of strings
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub webhook_headers: Option<JsonValue>,

    pub last_checked_at: Option<DateTimeWithTimeZone>,
    pub last_triggered_at: Option<DateTimeWithTimeZone>,

    /// Consecutive trigger-level failures since the last success
    pub error_count: i32,

    pub last_error: Option<String>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::connection::Entity",
        from = "Column::ConnectionId",
        to = "super::connection::Column::Id",
        on_delete = "Cascade"
    )]
    Connection,
    #[sea_orm(has_one = "super::trigger_state::Entity")]
    State,
    #[sea_orm(has_many = "super::trigger_event::Entity")]
    Events,
}

impl Related<super::connection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Connection.def()
    }
}

impl Related<super::trigger_state::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::State.def()
    }
}

impl Related<super::trigger_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Events.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Custom webhook headers as a string map. Non-string values are skipped.
    pub fn header_map(&self) -> BTreeMap<String, String> {
        headers_from_json(self.webhook_headers.as_ref())
    }
}

/// Reads a JSON object of string values into an ordered map.
pub fn headers_from_json(value: Option<&JsonValue>) -> BTreeMap<String, String> {
    value
        .and_then(JsonValue::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(name, value)| value.as_str().map(|v| (name.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// HTTP method used for webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum WebhookMethod {
    Post,
    Put,
}

impl WebhookMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookMethod::Post => "POST",
            WebhookMethod::Put => "PUT",
        }
    }
}

impl fmt::Display for WebhookMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "POST" => Ok(WebhookMethod::Post),
            "PUT" => Ok(WebhookMethod::Put),
            other => Err(format!("webhook method must be POST or PUT, got '{other}'")),
        }
    }
}

/// Input for creating a trigger.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewTrigger {
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub project_id: Uuid,
    pub connection_id: Uuid,
    pub integration: String,
    pub name: String,
    pub trigger_type: String,
    pub config: JsonValue,
    pub webhook_url: String,
    #[serde(default = "default_webhook_method")]
    pub webhook_method: WebhookMethod,
    #[serde(default)]
    pub webhook_headers: BTreeMap<String, String>,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
}

/// Partial update of a trigger's definition. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriggerUpdate {
    pub name: Option<String>,
    pub config: Option<JsonValue>,
    pub webhook_url: Option<String>,
    pub webhook_method: Option<WebhookMethod>,
    pub webhook_headers: Option<BTreeMap<String, String>>,
}

fn default_webhook_method() -> WebhookMethod {
    WebhookMethod::Post
}

fn default_is_active() -> bool {
    true
}
