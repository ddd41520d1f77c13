//! Migration to create the trigger_states table.
//!
//! One row per trigger holding the incremental cursor. `version` guards the
//! read-compare-overwrite cycle against overlapping sweeps.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TriggerStates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TriggerStates::TriggerId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TriggerStates::LastItemId).text().null())
                    .col(
                        ColumnDef::new(TriggerStates::LastTimestamp)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(TriggerStates::LastRowCount).big_integer().null())
                    .col(ColumnDef::new(TriggerStates::StateData).json_binary().null())
                    .col(
                        ColumnDef::new(TriggerStates::Version)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TriggerStates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(TriggerStates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trigger_states_trigger_id")
                            .from(TriggerStates::Table, TriggerStates::TriggerId)
                            .to(Triggers::Table, Triggers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TriggerStates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TriggerStates {
    Table,
    TriggerId,
    LastItemId,
    LastTimestamp,
    LastRowCount,
    StateData,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Triggers {
    Table,
    Id,
}
