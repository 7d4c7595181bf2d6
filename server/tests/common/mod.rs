//! Shared helpers for the HTTP integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tablesync_engine::ManualClock;
use tablesync_server::backend::Backend;
use tablesync_server::config::Config;
use tablesync_server::{app, AppState};
use tower::ServiceExt;

/// Server clock reading when a test app starts.
pub const START: u64 = 10_000;

/// In-memory app driven by a manual clock.
pub fn test_app() -> (Router, Arc<ManualClock>) {
    test_app_with(Config::default())
}

pub fn test_app_with(config: Config) -> (Router, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let backend = Backend::memory(clock.clone(), config.sync_options());
    (app(AppState::new(backend, config)), clock)
}

/// Send one request and decode the JSON response (Null for an empty body).
pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    send_request(app, request).await
}

/// Send a prebuilt request.
pub async fn send_request(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, None).await
}

pub async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn delete(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::DELETE, uri, None).await
}
