//! # API Handlers
//!
//! Health probe and the operator-only cron endpoints that drive sweeps from
//! an external scheduler.

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::db;
use crate::error::ApiError;
use crate::models::ServiceInfo;
use crate::processor::SweepReport;
use crate::server::AppState;

/// Health probe response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub service: ServiceInfo,
    /// `ok` when the database answers
    pub database: String,
}

/// Result of a retention cleanup run.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub deleted_events: u64,
}

/// Liveness plus database reachability.
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Database unavailable", body = ApiError)
    ),
    tag = "health"
)]
pub async fn healthz(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    db::health_check(&state.db).await.map_err(|err| {
        tracing::error!(error = %err, "Health check failed");
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Database unavailable",
        )
    })?;

    Ok(Json(HealthResponse {
        service: ServiceInfo::default(),
        database: "ok".to_string(),
    }))
}

/// Runs one sweep over due triggers followed by the retry pass.
#[utoipa::path(
    post,
    path = "/internal/cron/triggers",
    responses(
        (status = 200, description = "Sweep completed", body = SweepReport),
        (status = 401, description = "Missing or invalid operator token", body = ApiError),
        (status = 503, description = "Database unavailable", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "cron"
)]
pub async fn run_trigger_sweep(
    State(state): State<AppState>,
) -> Result<Json<SweepReport>, ApiError> {
    let report = state.processor.run_sweep().await?;
    Ok(Json(report))
}

/// Deletes delivered and failed events past the retention window.
#[utoipa::path(
    post,
    path = "/internal/cron/cleanup",
    responses(
        (status = 200, description = "Cleanup completed", body = CleanupResponse),
        (status = 401, description = "Missing or invalid operator token", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "cron"
)]
pub async fn run_event_cleanup(
    State(state): State<AppState>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let deleted_events = state.processor.cleanup_events().await?;
    Ok(Json(CleanupResponse { deleted_events }))
}
