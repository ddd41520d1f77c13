//! # Trigger Repository
//!
//! Trigger definitions, their health columns, and the per-trigger cursor.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::{Expr, NullOrdering, Order};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::TriggerError;
use crate::models::trigger::{self, ActiveModel, Entity as Trigger, Model, NewTrigger, TriggerUpdate};
use crate::models::trigger_state::{self, Entity as TriggerStateRecord, StoredState, TriggerState};
use crate::processor::health::TriggerHealth;
use crate::sources::TriggerSource;

#[derive(Clone)]
pub struct TriggerRepository {
    db: DatabaseConnection,
}

impl TriggerRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Validates and stores a new trigger.
    pub async fn create(&self, new: NewTrigger) -> Result<Model, TriggerError> {
        validate_name(&new.name)?;
        validate_webhook_url(&new.webhook_url)?;
        validate_source(&new.trigger_type, &new.config)?;

        let now = Utc::now().fixed_offset();
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(new.user_id),
            workspace_id: Set(new.workspace_id),
            project_id: Set(new.project_id),
            connection_id: Set(new.connection_id),
            integration: Set(new.integration),
            name: Set(new.name),
            trigger_type: Set(new.trigger_type),
            config: Set(new.config),
            is_active: Set(new.is_active),
            webhook_url: Set(new.webhook_url),
            webhook_method: Set(new.webhook_method.as_str().to_string()),
            webhook_headers: Set(headers_to_json(&new.webhook_headers)?),
            last_checked_at: Set(None),
            last_triggered_at: Set(None),
            error_count: Set(0),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = model.insert(&self.db).await?;
        tracing::info!(
            trigger_id = %created.id,
            trigger_type = %created.trigger_type,
            "Trigger created"
        );
        Ok(created)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, TriggerError> {
        Ok(Trigger::find_by_id(id).one(&self.db).await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Model, TriggerError> {
        self.find_by_id(id).await?.ok_or(TriggerError::NotFound {
            entity: "trigger",
            id,
        })
    }

    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Model>, TriggerError> {
        Ok(Trigger::find()
            .filter(trigger::Column::UserId.eq(user_id))
            .order_by_asc(trigger::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    /// Applies a partial update. Changing the source config is an explicit
    /// reconfiguration and discards the stored cursor.
    pub async fn update_definition(
        &self,
        id: Uuid,
        update: TriggerUpdate,
    ) -> Result<Model, TriggerError> {
        let existing = self.get(id).await?;
        let config_changed = update
            .config
            .as_ref()
            .is_some_and(|config| *config != existing.config);

        if let Some(name) = &update.name {
            validate_name(name)?;
        }
        if let Some(url) = &update.webhook_url {
            validate_webhook_url(url)?;
        }
        if let Some(config) = &update.config {
            validate_source(&existing.trigger_type, config)?;
        }

        let mut model: ActiveModel = existing.into();
        if let Some(name) = update.name {
            model.name = Set(name);
        }
        if let Some(config) = update.config {
            model.config = Set(config);
        }
        if let Some(url) = update.webhook_url {
            model.webhook_url = Set(url);
        }
        if let Some(method) = update.webhook_method {
            model.webhook_method = Set(method.as_str().to_string());
        }
        if let Some(headers) = update.webhook_headers {
            model.webhook_headers = Set(headers_to_json(&headers)?);
        }
        model.updated_at = Set(Utc::now().fixed_offset());

        let txn = self.db.begin().await?;
        let updated = model.update(&txn).await?;
        if config_changed {
            TriggerStateRecord::delete_by_id(id).exec(&txn).await?;
            tracing::info!(trigger_id = %id, "Trigger reconfigured, cursor reset");
        }
        txn.commit().await?;

        Ok(updated)
    }

    /// Pauses or resumes a trigger. Resuming clears the failure streak so an
    /// auto-disabled trigger gets a full error budget again.
    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<Model, TriggerError> {
        let existing = self.get(id).await?;
        let reactivating = active && !existing.is_active;

        let mut model: ActiveModel = existing.into();
        model.is_active = Set(active);
        if reactivating {
            model.error_count = Set(0);
        }
        model.updated_at = Set(Utc::now().fixed_offset());

        Ok(model.update(&self.db).await?)
    }

    /// Deletes a trigger; its cursor and events go with it.
    pub async fn delete(&self, id: Uuid) -> Result<(), TriggerError> {
        let txn = self.db.begin().await?;
        // Children go first so backends without enforced cascades stay consistent.
        crate::models::TriggerEvent::delete_many()
            .filter(crate::models::trigger_event::Column::TriggerId.eq(id))
            .exec(&txn)
            .await?;
        TriggerStateRecord::delete_by_id(id).exec(&txn).await?;
        let result = Trigger::delete_by_id(id).exec(&txn).await?;
        if result.rows_affected == 0 {
            return Err(TriggerError::NotFound {
                entity: "trigger",
                id,
            });
        }
        txn.commit().await?;
        Ok(())
    }

    pub async fn find_active(&self) -> Result<Vec<Model>, TriggerError> {
        Ok(Trigger::find()
            .filter(trigger::Column::IsActive.eq(true))
            .order_by_asc(trigger::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    /// Active triggers never checked, or last checked at least `interval` ago.
    /// Never-checked triggers come first.
    pub async fn find_due(
        &self,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Vec<Model>, TriggerError> {
        let threshold = (now - interval).fixed_offset();
        Ok(Trigger::find()
            .filter(trigger::Column::IsActive.eq(true))
            .filter(
                trigger::Column::LastCheckedAt
                    .is_null()
                    .or(trigger::Column::LastCheckedAt.lte(threshold)),
            )
            .order_by_with_nulls(
                trigger::Column::LastCheckedAt,
                Order::Asc,
                NullOrdering::First,
            )
            .order_by_asc(trigger::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    pub async fn mark_checked(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), TriggerError> {
        let now = now.fixed_offset();
        Trigger::update_many()
            .col_expr(trigger::Column::LastCheckedAt, Expr::value(now))
            .col_expr(trigger::Column::UpdatedAt, Expr::value(now))
            .filter(trigger::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Writes a health transition computed from `observed_error_count`.
    /// Returns false when another writer changed the count in between.
    /// Only ever clears `is_active`; pausing and resuming stay with the owner.
    pub async fn apply_health(
        &self,
        id: Uuid,
        observed_error_count: i32,
        health: &TriggerHealth,
        now: DateTime<Utc>,
    ) -> Result<bool, TriggerError> {
        let mut update = Trigger::update_many()
            .col_expr(trigger::Column::ErrorCount, Expr::value(health.error_count))
            .col_expr(
                trigger::Column::LastError,
                Expr::value(health.last_error.clone()),
            )
            .col_expr(
                trigger::Column::LastTriggeredAt,
                Expr::value(health.last_triggered_at.map(|ts| ts.fixed_offset())),
            )
            .col_expr(trigger::Column::UpdatedAt, Expr::value(now.fixed_offset()));
        if !health.is_active {
            update = update.col_expr(trigger::Column::IsActive, Expr::value(false));
        }

        let result = update
            .filter(trigger::Column::Id.eq(id))
            .filter(trigger::Column::ErrorCount.eq(observed_error_count))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    pub async fn get_state(&self, trigger_id: Uuid) -> Result<Option<StoredState>, TriggerError> {
        Ok(TriggerStateRecord::find_by_id(trigger_id)
            .one(&self.db)
            .await?
            .as_ref()
            .map(StoredState::from))
    }

    /// Persists a cursor read at `expected_version` (`None` when absent).
    pub async fn save_state(
        &self,
        trigger_id: Uuid,
        expected_version: Option<i64>,
        state: &TriggerState,
        now: DateTime<Utc>,
    ) -> Result<i64, TriggerError> {
        write_state(&self.db, trigger_id, expected_version, state, now).await
    }
}

/// Version-checked cursor write usable inside a transaction. Returns the new
/// version, or [`TriggerError::StateConflict`] when another writer got there first.
pub(crate) async fn write_state<C: ConnectionTrait>(
    conn: &C,
    trigger_id: Uuid,
    expected_version: Option<i64>,
    state: &TriggerState,
    now: DateTime<Utc>,
) -> Result<i64, TriggerError> {
    let now = now.fixed_offset();
    let last_timestamp = state.last_timestamp.map(|ts| ts.fixed_offset());
    let last_row_count = state
        .last_row_count
        .map(|count| i64::try_from(count).unwrap_or(i64::MAX));
    let state_data = state
        .state_data
        .as_ref()
        .map(serde_json::to_value)
        .transpose()?;

    match expected_version {
        None => {
            let model = trigger_state::ActiveModel {
                trigger_id: Set(trigger_id),
                last_item_id: Set(state.last_item_id.clone()),
                last_timestamp: Set(last_timestamp),
                last_row_count: Set(last_row_count),
                state_data: Set(state_data),
                version: Set(1),
                created_at: Set(now),
                updated_at: Set(now),
            };
            match model.insert(conn).await {
                Ok(_) => Ok(1),
                Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                    Err(TriggerError::StateConflict { trigger_id })
                }
                Err(err) => Err(err.into()),
            }
        }
        Some(version) => {
            let result = TriggerStateRecord::update_many()
                .col_expr(
                    trigger_state::Column::LastItemId,
                    Expr::value(state.last_item_id.clone()),
                )
                .col_expr(trigger_state::Column::LastTimestamp, Expr::value(last_timestamp))
                .col_expr(trigger_state::Column::LastRowCount, Expr::value(last_row_count))
                .col_expr(trigger_state::Column::StateData, Expr::value(state_data))
                .col_expr(trigger_state::Column::Version, Expr::value(version + 1))
                .col_expr(trigger_state::Column::UpdatedAt, Expr::value(now))
                .filter(trigger_state::Column::TriggerId.eq(trigger_id))
                .filter(trigger_state::Column::Version.eq(version))
                .exec(conn)
                .await?;

            if result.rows_affected == 0 {
                return Err(TriggerError::StateConflict { trigger_id });
            }
            Ok(version + 1)
        }
    }
}

fn validate_name(name: &str) -> Result<(), TriggerError> {
    if name.trim().is_empty() {
        return Err(TriggerError::invalid_definition("name must not be empty"));
    }
    Ok(())
}

/// Webhook targets must be absolute http(s) URLs.
pub fn validate_webhook_url(value: &str) -> Result<(), TriggerError> {
    let url = url::Url::parse(value).map_err(|err| {
        TriggerError::invalid_definition(format!("invalid webhook URL '{value}': {err}"))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(TriggerError::invalid_definition(format!(
            "webhook URL scheme must be http or https, got '{other}'"
        ))),
    }
}

fn validate_source(trigger_type: &str, config: &JsonValue) -> Result<(), TriggerError> {
    TriggerSource::parse(trigger_type, config)
        .map(|_| ())
        .map_err(|err| TriggerError::invalid_definition(err.to_string()))
}

fn headers_to_json(
    headers: &std::collections::BTreeMap<String, String>,
) -> Result<Option<JsonValue>, TriggerError> {
    if headers.is_empty() {
        return Ok(None);
    }
    for name in headers.keys() {
        if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(TriggerError::invalid_definition(format!(
                "invalid webhook header name '{name}'"
            )));
        }
    }
    Ok(Some(serde_json::to_value(headers)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_url_must_be_http_or_https() {
        assert!(validate_webhook_url("https://hooks.example.com/a").is_ok());
        assert!(validate_webhook_url("http://localhost:8080/hook").is_ok());
        assert!(matches!(
            validate_webhook_url("ftp://example.com/hook"),
            Err(TriggerError::InvalidDefinition { .. })
        ));
        assert!(validate_webhook_url("not a url").is_err());
    }

    #[test]
    fn empty_headers_are_stored_as_null() {
        assert_eq!(headers_to_json(&Default::default()).unwrap(), None);
    }

    #[test]
    fn invalid_header_names_are_rejected() {
        let mut headers = std::collections::BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(headers_to_json(&headers).is_err());
    }
}
