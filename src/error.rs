//! # Error Handling
//!
//! Error taxonomy for the trigger engine. [`TriggerError`] is what the
//! processor records on a trigger (`last_error`) or surfaces to callers;
//! [`ApiError`] is the problem+json shape returned by the HTTP surface.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::sources::SourceError;

/// Failures raised while processing a trigger or an event.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("source fetch failed: {0}")]
    Source(#[from] SourceError),
    #[error("credential unavailable for connection {connection_id}: {details}")]
    Credential { connection_id: Uuid, details: String },
    #[error("trigger misconfigured: {details}")]
    Misconfigured { details: String },
    #[error("trigger state for {trigger_id} was modified concurrently")]
    StateConflict { trigger_id: Uuid },
    #[error("event {event_id} is in terminal status '{status}'")]
    TerminalEvent { event_id: Uuid, status: String },
    #[error("invalid trigger definition: {details}")]
    InvalidDefinition { details: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl TriggerError {
    pub fn misconfigured<S: Into<String>>(details: S) -> Self {
        Self::Misconfigured {
            details: details.into(),
        }
    }

    pub fn invalid_definition<S: Into<String>>(details: S) -> Self {
        Self::InvalidDefinition {
            details: details.into(),
        }
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<TriggerError> for ApiError {
    fn from(error: TriggerError) -> Self {
        match error {
            TriggerError::NotFound { entity, id } => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("{} {} not found", entity, id),
            ),
            TriggerError::InvalidDefinition { details } => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &details)
            }
            TriggerError::TerminalEvent { .. } | TriggerError::StateConflict { .. } => {
                Self::new(StatusCode::CONFLICT, "CONFLICT", &error.to_string())
            }
            TriggerError::Database(db_err) => {
                tracing::error!(error = ?db_err, "Database error");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database error occurred",
                )
            }
            other => {
                tracing::error!(error = %other, "Internal error");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "An internal error occurred",
                )
            }
        }
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let id = Uuid::new_v4();
        let api_error: ApiError = TriggerError::NotFound {
            entity: "trigger",
            id,
        }
        .into();

        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert_eq!(api_error.code, Box::from("NOT_FOUND"));
        assert!(api_error.message.contains(&id.to_string()));
    }

    #[test]
    fn terminal_event_maps_to_conflict() {
        let api_error: ApiError = TriggerError::TerminalEvent {
            event_id: Uuid::new_v4(),
            status: "delivered".to_string(),
        }
        .into();

        assert_eq!(api_error.status, StatusCode::CONFLICT);
    }

    #[test]
    fn misconfiguration_message_names_the_problem() {
        let error = TriggerError::misconfigured("unknown trigger type 'slack.message'");
        assert_eq!(
            error.to_string(),
            "trigger misconfigured: unknown trigger type 'slack.message'"
        );
    }

    #[test]
    fn unauthorized_uses_default_message() {
        let error = unauthorized(None);
        assert_eq!(error.status, StatusCode::UNAUTHORIZED);
        assert_eq!(error.message, Box::from("Authentication required"));
    }
}
