//! Tablesync Server - HTTP surface for per-user sync and local tables.
//!
//! Clients keep replicas of named tables and reconcile them through the
//! `/synctable` endpoints using the tablesync-engine conflict rules. Plain,
//! unversioned per-user tables are served under `/localtable`.

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;

use crate::backend::Backend;
use crate::config::Config;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<Backend>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(backend: Backend, config: Config) -> Self {
        Self {
            backend: Arc::new(backend),
            config: Arc::new(config),
        }
    }
}

/// Build the application router with its middleware stack.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
