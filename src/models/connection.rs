//! Connection entity model
//!
//! A stored authorization to an upstream provider. Triggers borrow the
//! connection's access token when polling.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Connection status value for a usable authorization.
pub const STATUS_ACTIVE: &str = "active";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owner of the authorization
    pub user_id: Uuid,

    /// Provider slug, e.g. `google`
    pub provider: String,

    /// Bearer token presented to the provider API
    pub access_token: Option<String>,

    /// `active` or `revoked`
    pub status: String,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::trigger::Entity")]
    Triggers,
}

impl Related<super::trigger::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Triggers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
