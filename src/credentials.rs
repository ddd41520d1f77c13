//! Bearer credentials for polling sources.
//!
//! Token acquisition and refresh happen elsewhere; by the time a trigger is
//! polled its connection is expected to hold a valid access token.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::TriggerError;
use crate::models::connection;
use crate::repositories::ConnectionRepository;

/// Yields a currently valid bearer token for a connection.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self, connection_id: Uuid) -> Result<String, TriggerError>;
}

#[async_trait]
impl CredentialProvider for ConnectionRepository {
    async fn bearer_token(&self, connection_id: Uuid) -> Result<String, TriggerError> {
        let connection = self
            .find_by_id(connection_id)
            .await?
            .ok_or_else(|| TriggerError::Credential {
                connection_id,
                details: "connection not found".to_string(),
            })?;

        if connection.status != connection::STATUS_ACTIVE {
            return Err(TriggerError::Credential {
                connection_id,
                details: format!("connection status is '{}'", connection.status),
            });
        }

        connection
            .access_token
            .filter(|token| !token.trim().is_empty())
            .ok_or(TriggerError::Credential {
                connection_id,
                details: "connection has no access token".to_string(),
            })
    }
}

/// Returns the same token for every connection.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self, _connection_id: Uuid) -> Result<String, TriggerError> {
        Ok(self.token.clone())
    }
}
