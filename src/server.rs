//! # Server Configuration
//!
//! Router assembly and the HTTP listener.

use std::sync::Arc;

use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::auth::operator_auth_middleware;
use crate::config::AppConfig;
use crate::handlers;
use crate::processor::TriggerProcessor;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub processor: TriggerProcessor,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let cron = Router::new()
        .route("/internal/cron/triggers", post(handlers::run_trigger_sweep))
        .route("/internal/cron/cleanup", post(handlers::run_event_cleanup))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            operator_auth_middleware,
        ));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/openapi.json", get(openapi_json))
        .merge(cron)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Serves HTTP until `shutdown` fires.
pub async fn run_server(
    config: Arc<AppConfig>,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_app(state);

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::healthz,
        crate::handlers::run_trigger_sweep,
        crate::handlers::run_event_cleanup,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::handlers::CleanupResponse,
            crate::processor::SweepReport,
            crate::error::ApiError,
        )
    ),
    modifiers(&BearerSecurity),
    info(
        title = "Syncline Trigger Engine",
        description = "Trigger polling and webhook delivery",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
