//! # Tests for Handlers

use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    response::Json,
};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::auth::issue_owner_token;
use crate::collaborators::Collaborators;
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::db::{init_pool, run_migrations};
use crate::handlers::root;
use crate::providers::AdapterRegistry;
use crate::server::{AppState, create_app};

const OWNER_SECRET: &str = "handler-test-owner-secret";
const CRON_SECRET: &str = "handler-test-cron-secret";

async fn create_test_state() -> AppState {
    let config = AppConfig {
        database_url: "sqlite::memory:".to_string(),
        cron_secrets: vec![CRON_SECRET.to_string()],
        owner_token_secret: Some(OWNER_SECRET.to_string()),
        ..Default::default()
    };
    let db = init_pool(&config).await.unwrap();
    run_migrations(&db).await.unwrap();

    let collaborators = Collaborators::from_config(&config);
    AppState::new(
        Arc::new(config),
        db,
        CryptoKey::new(vec![7u8; 32]).unwrap(),
        AdapterRegistry::new(),
        collaborators,
    )
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn root_returns_service_info() {
    let Json(info) = root().await;
    assert_eq!(info.service, "poblysh-publisher");
    assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn healthz_reports_ok() {
    let app = create_app(create_test_state().await);
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn responses_echo_the_request_id() {
    let app = create_app(create_test_state().await);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-123");
}

#[tokio::test]
async fn trigger_rejects_forged_owner_token() {
    let app = create_app(create_test_state().await);
    let forged = issue_owner_token("some-other-secret-value", Uuid::new_v4()).unwrap();

    let response = app
        .oneshot(post_json(
            "/pipeline/trigger",
            json!({ "ownerToken": forged, "jobId": Uuid::new_v4() }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "unauthorized");
}

#[tokio::test]
async fn trigger_unknown_job_is_not_found() {
    let app = create_app(create_test_state().await);
    let token = issue_owner_token(OWNER_SECRET, Uuid::new_v4()).unwrap();

    let response = app
        .oneshot(post_json(
            "/pipeline/trigger",
            json!({ "ownerToken": token, "jobId": Uuid::new_v4() }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cron_publish_requires_bearer() {
    let app = create_app(create_test_state().await);

    let denied = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/cron/publish")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let allowed = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/cron/publish")
                .header("Authorization", format!("Bearer {CRON_SECRET}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);

    let summary = body_json(allowed).await;
    assert_eq!(summary["success"], true);
    assert_eq!(summary["processed"], 0);
}

#[tokio::test]
async fn cron_verify_accepts_force_flag() {
    let app = create_app(create_test_state().await);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/cron/verify?force=true")
                .header("Authorization", format!("Bearer {CRON_SECRET}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["processed"], 0);
}

#[tokio::test]
async fn connect_unknown_provider_is_not_found() {
    let app = create_app(create_test_state().await);
    let token = issue_owner_token(OWNER_SECRET, Uuid::new_v4()).unwrap();

    let response = app
        .oneshot(post_json(
            "/connect/medium",
            json!({
                "ownerToken": token,
                "siteId": Uuid::new_v4(),
                "redirectUri": "https://app.example.com/cb"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn connect_unregistered_provider_is_a_configuration_error() {
    let app = create_app(create_test_state().await);
    let token = issue_owner_token(OWNER_SECRET, Uuid::new_v4()).unwrap();

    let response = app
        .oneshot(post_json(
            "/connect/webflow",
            json!({
                "ownerToken": token,
                "siteId": Uuid::new_v4(),
                "redirectUri": "https://app.example.com/cb"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "provider_not_configured");
}

#[tokio::test]
async fn callback_with_unknown_state_is_invalid_state() {
    let app = create_app(create_test_state().await);
    let response = app
        .oneshot(post_json(
            "/connect/wordpress/callback",
            json!({ "code": "abc", "state": "never-issued" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "invalid_state");
}

#[tokio::test]
async fn connection_targets_require_owner_header() {
    let app = create_app(create_test_state().await);
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/connections/{}/targets", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn openapi_document_lists_routes() {
    let app = create_app(create_test_state().await);
    let response = app
        .oneshot(Request::builder().uri("/openapi.json").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;
    assert!(doc["paths"]["/pipeline/trigger"].is_object());
    assert!(doc["paths"]["/connect/{provider}/callback"].is_object());
}
