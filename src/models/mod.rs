//! # Data Models
//!
//! SeaORM entities for the trigger engine plus the typed views the
//! processor works with.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod connection;
pub mod trigger;
pub mod trigger_event;
pub mod trigger_state;

pub use connection::Entity as Connection;
pub use trigger::Entity as Trigger;
pub use trigger_event::Entity as TriggerEvent;
pub use trigger_state::Entity as TriggerStateRecord;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "syncline-triggers".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
