//! # Connection Repository
//!
//! Read access to stored provider authorizations, plus the small set of
//! writes the surrounding system (and tests) use to seed them.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use uuid::Uuid;

use crate::error::TriggerError;
use crate::models::connection::{self, ActiveModel, Entity as Connection, Model};

#[derive(Clone)]
pub struct ConnectionRepository {
    db: DatabaseConnection,
}

impl ConnectionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Stores an active connection.
    pub async fn create(
        &self,
        user_id: Uuid,
        provider: &str,
        access_token: Option<String>,
    ) -> Result<Model, TriggerError> {
        let now = Utc::now().fixed_offset();
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            provider: Set(provider.to_string()),
            access_token: Set(access_token),
            status: Set(connection::STATUS_ACTIVE.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Ok(model.insert(&self.db).await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, TriggerError> {
        Ok(Connection::find_by_id(id).one(&self.db).await?)
    }

    /// Replaces the stored token (the refresh flow lives outside this crate).
    pub async fn update_access_token(
        &self,
        id: Uuid,
        access_token: Option<String>,
    ) -> Result<Model, TriggerError> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or(TriggerError::NotFound {
                entity: "connection",
                id,
            })?;

        let mut model: ActiveModel = existing.into();
        model.access_token = Set(access_token);
        model.updated_at = Set(Utc::now().fixed_offset());

        Ok(model.update(&self.db).await?)
    }

    pub async fn set_status(&self, id: Uuid, status: &str) -> Result<Model, TriggerError> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or(TriggerError::NotFound {
                entity: "connection",
                id,
            })?;

        let mut model: ActiveModel = existing.into();
        model.status = Set(status.to_string());
        model.updated_at = Set(Utc::now().fixed_offset());

        Ok(model.update(&self.db).await?)
    }
}
