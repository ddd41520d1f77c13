//! Migration to create the triggers table.
//!
//! A trigger is a standing subscription to one monitored source, carrying its
//! webhook delivery target and the health counters maintained by the processor.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Triggers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Triggers::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Triggers::UserId).uuid().not_null())
                    .col(ColumnDef::new(Triggers::WorkspaceId).uuid().not_null())
                    .col(ColumnDef::new(Triggers::ProjectId).uuid().not_null())
                    .col(ColumnDef::new(Triggers::ConnectionId).uuid().not_null())
                    .col(ColumnDef::new(Triggers::Integration).text().not_null())
                    .col(ColumnDef::new(Triggers::Name).text().not_null())
                    .col(ColumnDef::new(Triggers::TriggerType).text().not_null())
                    .col(ColumnDef::new(Triggers::Config).json_binary().not_null())
                    .col(
                        ColumnDef::new(Triggers::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Triggers::WebhookUrl).text().not_null())
                    .col(
                        ColumnDef::new(Triggers::WebhookMethod)
                            .text()
                            .not_null()
                            .default("POST"),
                    )
                    .col(ColumnDef::new(Triggers::WebhookHeaders).json_binary().null())
                    .col(
                        ColumnDef::new(Triggers::LastCheckedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Triggers::LastTriggeredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Triggers::ErrorCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Triggers::LastError).text().null())
                    .col(
                        ColumnDef::new(Triggers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Triggers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_triggers_connection_id")
                            .from(Triggers::Table, Triggers::ConnectionId)
                            .to(Connections::Table, Connections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Due-trigger scan: active triggers ordered by last check
        manager
            .create_index(
                Index::create()
                    .name("idx_triggers_active_last_checked")
                    .table(Triggers::Table)
                    .col(Triggers::IsActive)
                    .col(Triggers::LastCheckedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_triggers_user")
                    .table(Triggers::Table)
                    .col(Triggers::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_triggers_active_last_checked")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_triggers_user").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Triggers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Triggers {
    Table,
    Id,
    UserId,
    WorkspaceId,
    ProjectId,
    ConnectionId,
    Integration,
    Name,
    TriggerType,
    Config,
    IsActive,
    WebhookUrl,
    WebhookMethod,
    WebhookHeaders,
    LastCheckedAt,
    LastTriggeredAt,
    ErrorCount,
    LastError,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Connections {
    Table,
    Id,
}
