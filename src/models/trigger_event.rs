//! Trigger event entity model
//!
//! One detected occurrence and its webhook delivery record. The webhook
//! target columns are copied from the trigger when the event fires.

use std::{collections::BTreeMap, fmt};

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "trigger_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub trigger_id: Uuid,

    /// Trigger type at fire time
    pub event_type: String,

    /// Raw domain event produced by the source handler
    #[sea_orm(column_type = "JsonBinary")]
    pub event_data: JsonValue,

    /// `pending`, `retrying`, `delivered` or `failed`
    pub status: String,

    pub status_message: Option<String>,

    pub webhook_url: String,
    pub webhook_method: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub webhook_headers: Option<JsonValue>,

    /// Envelope sent as the request body
    #[sea_orm(column_type = "JsonBinary")]
    pub webhook_payload: JsonValue,

    /// Last response observed, see [`WebhookResponse`]
    #[sea_orm(column_type = "JsonBinary")]
    pub webhook_response: Option<JsonValue>,

    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub delivered_at: Option<DateTimeWithTimeZone>,
    pub failed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::trigger::Entity",
        from = "Column::TriggerId",
        to = "super::trigger::Column::Id",
        on_delete = "Cascade"
    )]
    Trigger,
}

impl Related<super::trigger::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Trigger.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn status(&self) -> Option<EventStatus> {
        EventStatus::parse(&self.status)
    }

    pub fn header_map(&self) -> BTreeMap<String, String> {
        super::trigger::headers_from_json(self.webhook_headers.as_ref())
    }
}

/// Delivery status of a trigger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Retrying,
    Delivered,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Retrying => "retrying",
            EventStatus::Delivered => "delivered",
            EventStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(EventStatus::Pending),
            "retrying" => Some(EventStatus::Retrying),
            "delivered" => Some(EventStatus::Delivered),
            "failed" => Some(EventStatus::Failed),
            _ => None,
        }
    }

    /// Delivered and failed events are never touched again except by retention cleanup.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Delivered | EventStatus::Failed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed webhook response, stored for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub status_code: Option<u16>,
    pub body: JsonValue,
    pub headers: BTreeMap<String, String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}
