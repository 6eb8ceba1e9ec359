//! REST API tests

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use keystone_daemon::{DaemonConfig, Server};
use keystone_resolver::InMemoryBus;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn server() -> Server {
    Server::with_bus(DaemonConfig::default(), Arc::new(InMemoryBus::new()))
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let router = server().router();
    let (status, body) = send(&router, Method::GET, "/api/v1/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_put_creates_then_updates() {
    let router = server().router();
    let uri = "/api/v1/entities/namespace/infra/orders";

    let (status, body) = send(
        &router,
        Method::PUT,
        uri,
        Some(json!({ "root_ref": { "name": "main" }, "allowed_scopes": ["infra"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["generation"], 1);

    let (status, body) = send(
        &router,
        Method::PUT,
        uri,
        Some(json!({ "root_ref": { "name": "main" }, "allowed_scopes": ["infra", "team-b"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["generation"], 2);

    let (status, body) = send(&router, Method::GET, uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["generation"], 2);

    let uri = "/api/v1/entities?level=namespaces";
    let (status, body) = send(&router, Method::GET, uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_unchanged_put_keeps_generation() {
    let router = server().router();
    let uri = "/api/v1/entities/root/infra/main";

    let (status, _) = send(&router, Method::PUT, uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&router, Method::PUT, uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["generation"], 1);
}

#[tokio::test]
async fn test_put_rejects_bad_input() {
    let router = server().router();

    let (status, body) = send(
        &router,
        Method::PUT,
        "/api/v1/entities/cluster/infra/main",
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    // Principal without a namespace reference
    let (status, _) = send(
        &router,
        Method::PUT,
        "/api/v1/entities/principal/infra/svc",
        Some(json!({ "bearer_token": true })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &router,
        Method::PUT,
        "/api/v1/entities/namespace/infra/orders",
        Some(json!({ "root_ref": { "name": "" } })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_delete_entity() {
    let router = server().router();
    let uri = "/api/v1/entities/root/infra/main";

    let (status, _) = send(&router, Method::DELETE, uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(&router, Method::PUT, uri, Some(json!({}))).await;
    let (status, _) = send(&router, Method::DELETE, uri, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(&router, Method::GET, uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "deleting");

    // No updates while deletion is pending
    let (status, _) = send(&router, Method::PUT, uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_credential_is_not_found() {
    let router = server().router();
    let (status, _) = send(&router, Method::GET, "/api/v1/credentials/AUNKNOWN", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_counts_entities() {
    let router = server().router();
    send(&router, Method::PUT, "/api/v1/entities/root/infra/main", Some(json!({}))).await;
    send(
        &router,
        Method::PUT,
        "/api/v1/entities/namespace/infra/orders",
        Some(json!({ "root_ref": { "name": "main" } })),
    )
    .await;

    let (status, body) = send(&router, Method::GET, "/api/v1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entities"]["roots"], 1);
    assert_eq!(body["entities"]["namespaces"], 1);
    assert_eq!(body["entities"]["principals"], 0);
    assert_eq!(body["in_flight"], 0);
    assert_eq!(body["resolver"]["transport"], "in-memory");
}

#[tokio::test]
async fn test_events_filter_rejects_malformed_entity() {
    let router = server().router();
    let (status, _) = send(&router, Method::GET, "/api/v1/events?entity=root", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &router,
        Method::GET,
        "/api/v1/events?entity=root/infra/main",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_shutdown_signals_server() {
    let server = server();
    let mut shutdown = server.shutdown_handle().subscribe();
    let router = server.router();

    let (status, _) = send(&router, Method::POST, "/api/v1/shutdown", None).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(*shutdown.borrow_and_update());
}
