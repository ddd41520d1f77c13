//! Trigger state entity model
//!
//! One row per trigger holding the incremental cursor. `version` is bumped
//! on every save so overlapping writers can detect each other.

use chrono::{DateTime, Utc};
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "trigger_states")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub trigger_id: Uuid,

    pub last_item_id: Option<String>,
    pub last_timestamp: Option<DateTimeWithTimeZone>,
    pub last_row_count: Option<i64>,

    #[sea_orm(column_type = "JsonBinary")]
    pub state_data: Option<JsonValue>,

    pub version: i64,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
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

/// Source-specific bookkeeping kept next to the cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateData {
    SheetRows {
        headers: Vec<String>,
    },
    CalendarEvents {
        calendar_id: String,
        last_event_id: Option<String>,
    },
    DriveFiles {
        folder_id: Option<String>,
        last_file_name: Option<String>,
    },
}

/// The cursor a source handler reads before a poll and returns after it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerState {
    pub last_item_id: Option<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub last_row_count: Option<u64>,
    pub state_data: Option<StateData>,
}

/// A persisted cursor together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredState {
    pub state: TriggerState,
    pub version: i64,
}

impl From<&Model> for StoredState {
    fn from(model: &Model) -> Self {
        // Unreadable bookkeeping is dropped rather than failing the poll.
        let state_data = model
            .state_data
            .clone()
            .and_then(|value| serde_json::from_value(value).ok());

        Self {
            state: TriggerState {
                last_item_id: model.last_item_id.clone(),
                last_timestamp: model.last_timestamp.map(|ts| ts.with_timezone(&Utc)),
                last_row_count: model
                    .last_row_count
                    .map(|count| u64::try_from(count).unwrap_or(0)),
                state_data,
            },
            version: model.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_data_is_tagged_by_kind() {
        let data = StateData::SheetRows {
            headers: vec!["Name".to_string(), "Email".to_string()],
        };

        assert_eq!(
            serde_json::to_value(&data).unwrap(),
            json!({"kind": "sheet_rows", "headers": ["Name", "Email"]})
        );
    }

    #[test]
    fn stored_state_tolerates_unknown_state_data() {
        let now = Utc::now().fixed_offset();
        let model = Model {
            trigger_id: Uuid::new_v4(),
            last_item_id: None,
            last_timestamp: Some(now),
            last_row_count: Some(4),
            state_data: Some(json!({"kind": "something_else"})),
            version: 7,
            created_at: now,
            updated_at: now,
        };

        let stored = StoredState::from(&model);
        assert_eq!(stored.version, 7);
        assert_eq!(stored.state.last_row_count, Some(4));
        assert_eq!(stored.state.state_data, None);
    }
}
