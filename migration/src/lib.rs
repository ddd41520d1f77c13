//! Database migrations for the trigger engine.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_11_10_090000_create_connections;
mod m2025_11_10_090100_create_triggers;
mod m2025_11_10_090200_create_trigger_states;
mod m2025_11_10_090300_create_trigger_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_11_10_090000_create_connections::Migration),
            Box::new(m2025_11_10_090100_create_triggers::Migration),
            Box::new(m2025_11_10_090200_create_trigger_states::Migration),
            Box::new(m2025_11_10_090300_create_trigger_events::Migration),
        ]
    }
}
