//! # Trigger Event Repository
//!
//! Event rows are created together with the cursor that produced them and
//! then only move forward through the delivery state machine.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::trigger::write_state;
use crate::delivery::retry::{DeliveryTransition, MAX_DELIVERY_ATTEMPTS};
use crate::error::TriggerError;
use crate::models::trigger;
use crate::models::trigger_event::{
    self, ActiveModel, Entity as TriggerEvent, EventStatus, Model, WebhookResponse,
};
use crate::models::trigger_state::TriggerState;

/// An event about to be persisted, carrying the webhook snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTriggerEvent {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub event_type: String,
    pub event_data: JsonValue,
    pub webhook_url: String,
    pub webhook_method: String,
    pub webhook_headers: Option<JsonValue>,
    pub webhook_payload: JsonValue,
}

impl NewTriggerEvent {
    /// Copies the trigger's current webhook target. Later edits to the
    /// trigger do not reach events created from this snapshot.
    pub fn snapshot(
        trigger: &trigger::Model,
        id: Uuid,
        event_data: JsonValue,
        webhook_payload: JsonValue,
    ) -> Self {
        Self {
            id,
            trigger_id: trigger.id,
            event_type: trigger.trigger_type.clone(),
            event_data,
            webhook_url: trigger.webhook_url.clone(),
            webhook_method: trigger.webhook_method.clone(),
            webhook_headers: trigger.webhook_headers.clone(),
            webhook_payload,
        }
    }
}

#[derive(Clone)]
pub struct TriggerEventRepository {
    db: DatabaseConnection,
}

impl TriggerEventRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Saves the advanced cursor and inserts the new pending events in one
    /// transaction. A cursor version conflict rolls back the events too.
    pub async fn record_poll(
        &self,
        trigger_id: Uuid,
        expected_version: Option<i64>,
        state: &TriggerState,
        events: Vec<NewTriggerEvent>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Model>, TriggerError> {
        let txn = self.db.begin().await?;

        write_state(&txn, trigger_id, expected_version, state, now).await?;

        let created_at = now.fixed_offset();
        let mut created = Vec::with_capacity(events.len());
        for event in events {
            let model = ActiveModel {
                id: Set(event.id),
                trigger_id: Set(event.trigger_id),
                event_type: Set(event.event_type),
                event_data: Set(event.event_data),
                status: Set(EventStatus::Pending.as_str().to_string()),
                status_message: Set(None),
                webhook_url: Set(event.webhook_url),
                webhook_method: Set(event.webhook_method),
                webhook_headers: Set(event.webhook_headers),
                webhook_payload: Set(event.webhook_payload),
                webhook_response: Set(None),
                attempt_count: Set(0),
                max_attempts: Set(MAX_DELIVERY_ATTEMPTS),
                next_retry_at: Set(None),
                created_at: Set(created_at),
                updated_at: Set(created_at),
                delivered_at: Set(None),
                failed_at: Set(None),
            };
            created.push(model.insert(&txn).await?);
        }

        txn.commit().await?;
        Ok(created)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, TriggerError> {
        Ok(TriggerEvent::find_by_id(id).one(&self.db).await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Model, TriggerError> {
        self.find_by_id(id).await?.ok_or(TriggerError::NotFound {
            entity: "trigger event",
            id,
        })
    }

    /// Most recent events of a trigger first.
    pub async fn list_by_trigger(
        &self,
        trigger_id: Uuid,
        limit: u64,
    ) -> Result<Vec<Model>, TriggerError> {
        Ok(TriggerEvent::find()
            .filter(trigger_event::Column::TriggerId.eq(trigger_id))
            .order_by_desc(trigger_event::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    pub async fn list_by_status(
        &self,
        status: EventStatus,
        limit: u64,
    ) -> Result<Vec<Model>, TriggerError> {
        Ok(TriggerEvent::find()
            .filter(trigger_event::Column::Status.eq(status.as_str()))
            .order_by_asc(trigger_event::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    /// Records the outcome of one delivery attempt on `event` as read.
    ///
    /// Applies only while the row still has the observed attempt count and a
    /// non-terminal status, so two workers racing on one event record one
    /// attempt. Returns whether the row was updated.
    pub async fn record_attempt(
        &self,
        event: &Model,
        transition: &DeliveryTransition,
        response: &WebhookResponse,
        status_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, TriggerError> {
        let response = serde_json::to_value(response)?;
        let result = TriggerEvent::update_many()
            .col_expr(
                trigger_event::Column::Status,
                Expr::value(transition.status().as_str()),
            )
            .col_expr(trigger_event::Column::StatusMessage, Expr::value(status_message))
            .col_expr(
                trigger_event::Column::AttemptCount,
                Expr::value(event.attempt_count + 1),
            )
            .col_expr(
                trigger_event::Column::NextRetryAt,
                Expr::value(transition.next_retry_at().map(|ts| ts.fixed_offset())),
            )
            .col_expr(
                trigger_event::Column::DeliveredAt,
                Expr::value(transition.delivered_at().map(|ts| ts.fixed_offset())),
            )
            .col_expr(
                trigger_event::Column::FailedAt,
                Expr::value(transition.failed_at().map(|ts| ts.fixed_offset())),
            )
            .col_expr(trigger_event::Column::WebhookResponse, Expr::value(response))
            .col_expr(trigger_event::Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(trigger_event::Column::Id.eq(event.id))
            .filter(trigger_event::Column::AttemptCount.eq(event.attempt_count))
            .filter(trigger_event::Column::Status.is_in([
                EventStatus::Pending.as_str(),
                EventStatus::Retrying.as_str(),
            ]))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Retrying events whose time has come, plus pending events older than
    /// `stale_pending_before` (left behind by an interrupted poll).
    pub async fn find_due_for_retry(
        &self,
        now: DateTime<Utc>,
        stale_pending_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Model>, TriggerError> {
        let retrying = Condition::all()
            .add(trigger_event::Column::Status.eq(EventStatus::Retrying.as_str()))
            .add(trigger_event::Column::NextRetryAt.lte(now.fixed_offset()));
        let stale_pending = Condition::all()
            .add(trigger_event::Column::Status.eq(EventStatus::Pending.as_str()))
            .add(trigger_event::Column::CreatedAt.lte(stale_pending_before.fixed_offset()));

        Ok(TriggerEvent::find()
            .filter(Condition::any().add(retrying).add(stale_pending))
            .order_by_asc(trigger_event::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    /// Deletes delivered and failed events created before `cutoff`.
    pub async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, TriggerError> {
        let result = TriggerEvent::delete_many()
            .filter(trigger_event::Column::Status.is_in([
                EventStatus::Delivered.as_str(),
                EventStatus::Failed.as_str(),
            ]))
            .filter(trigger_event::Column::CreatedAt.lt(cutoff.fixed_offset()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
