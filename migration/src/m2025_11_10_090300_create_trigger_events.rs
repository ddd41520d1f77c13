//! Migration to create the trigger_events table.
//!
//! Each row is one detected occurrence together with its webhook delivery
//! record. Webhook target fields are snapshots taken when the event fired.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TriggerEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TriggerEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TriggerEvents::TriggerId).uuid().not_null())
                    .col(ColumnDef::new(TriggerEvents::EventType).text().not_null())
                    .col(ColumnDef::new(TriggerEvents::EventData).json_binary().not_null())
                    .col(
                        ColumnDef::new(TriggerEvents::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(TriggerEvents::StatusMessage).text().null())
                    .col(ColumnDef::new(TriggerEvents::WebhookUrl).text().not_null())
                    .col(ColumnDef::new(TriggerEvents::WebhookMethod).text().not_null())
                    .col(
                        ColumnDef::new(TriggerEvents::WebhookHeaders)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TriggerEvents::WebhookPayload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TriggerEvents::WebhookResponse)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TriggerEvents::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TriggerEvents::MaxAttempts)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(
                        ColumnDef::new(TriggerEvents::NextRetryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TriggerEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(TriggerEvents::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(TriggerEvents::DeliveredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TriggerEvents::FailedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trigger_events_trigger_id")
                            .from(TriggerEvents::Table, TriggerEvents::TriggerId)
                            .to(Triggers::Table, Triggers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Retry sweep: events by status and retry time
        manager
            .create_index(
                Index::create()
                    .name("idx_trigger_events_status_next_retry")
                    .table(TriggerEvents::Table)
                    .col(TriggerEvents::Status)
                    .col(TriggerEvents::NextRetryAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trigger_events_trigger_created")
                    .table(TriggerEvents::Table)
                    .col(TriggerEvents::TriggerId)
                    .col(TriggerEvents::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_trigger_events_status_next_retry")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_trigger_events_trigger_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(TriggerEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TriggerEvents {
    Table,
    Id,
    TriggerId,
    EventType,
    EventData,
    Status,
    StatusMessage,
    WebhookUrl,
    WebhookMethod,
    WebhookHeaders,
    WebhookPayload,
    WebhookResponse,
    AttemptCount,
    MaxAttempts,
    NextRetryAt,
    CreatedAt,
    UpdatedAt,
    DeliveredAt,
    FailedAt,
}

#[derive(DeriveIden)]
enum Triggers {
    Table,
    Id,
}
