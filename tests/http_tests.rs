//! Router-level tests driven through `tower::ServiceExt::oneshot`.

mod test_utils;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::Value;
use tower::ServiceExt;
use triggers::clock::ManualClock;
use triggers::server::{AppState, create_app};
use wiremock::MockServer;

use test_utils::*;

async fn app() -> (Router, MockServer) {
    let server = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let config = test_config(&server);
    let processor = test_processor(&db, &config, &ManualClock::new(start_time()));
    let state = AppState {
        config: Arc::new(config),
        db,
        processor,
    };
    (create_app(state), server)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn healthz_reports_service_and_database() {
    let (app, _server) = app().await;

    let response = app
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["service"], "syncline-triggers");
    assert_eq!(body["database"], "ok");
}

#[tokio::test]
async fn openapi_document_lists_cron_routes() {
    let (app, _server) = app().await;

    let response = app
        .oneshot(Request::get("/openapi.json").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["paths"].get("/internal/cron/triggers").is_some());
    assert!(body["paths"].get("/internal/cron/cleanup").is_some());
}

#[tokio::test]
async fn cron_sweep_requires_operator_token() {
    let (app, _server) = app().await;

    let response = app
        .oneshot(post("/internal/cron/triggers", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
    let body = json_body(response).await;
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn cron_sweep_rejects_unknown_token() {
    let (app, _server) = app().await;

    let response = app
        .oneshot(post("/internal/cron/triggers", Some("wrong-token")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cron_sweep_returns_report() {
    let (app, _server) = app().await;

    let response = app
        .oneshot(post("/internal/cron/triggers", Some("operator-token")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["triggersDue"], 0);
    assert_eq!(body["retriesAttempted"], 0);
}

#[tokio::test]
async fn cron_cleanup_returns_deleted_count() {
    let (app, _server) = app().await;

    let response = app
        .oneshot(post("/internal/cron/cleanup", Some("operator-token")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["deletedEvents"], 0);
}
