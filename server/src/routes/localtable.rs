//! Local table routes.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tablesync_engine::FlatRow;

use crate::error::Result;
use crate::handlers;
use crate::AppState;

/// Create local table routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/localtable/{name}/{userid}",
            get(get_all_handler).post(insert_one_handler),
        )
        .route(
            "/localtable/{name}/{userid}/{uniqueid}",
            get(get_one_handler).delete(delete_one_handler),
        )
}

/// GET /localtable/{name}/{userid}
async fn get_all_handler(
    State(state): State<AppState>,
    Path((name, userid)): Path<(String, String)>,
) -> Result<Json<Vec<FlatRow>>> {
    let rows = handlers::local_get_all(&state.backend, &name, &userid).await?;
    Ok(Json(rows))
}

/// GET /localtable/{name}/{userid}/{uniqueid}
async fn get_one_handler(
    State(state): State<AppState>,
    Path((name, userid, unique_id)): Path<(String, String, String)>,
) -> Result<Json<FlatRow>> {
    let row = handlers::local_get_one(&state.backend, &name, &userid, &unique_id).await?;
    Ok(Json(row))
}

/// POST /localtable/{name}/{userid}
async fn insert_one_handler(
    State(state): State<AppState>,
    Path((name, userid)): Path<(String, String)>,
    body: std::result::Result<Json<FlatRow>, JsonRejection>,
) -> Result<(StatusCode, Json<FlatRow>)> {
    let Json(row) = body?;
    let stored = handlers::local_insert_one(&state.backend, &name, &userid, row).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// DELETE /localtable/{name}/{userid}/{uniqueid}
async fn delete_one_handler(
    State(state): State<AppState>,
    Path((name, userid, unique_id)): Path<(String, String, String)>,
) -> Result<StatusCode> {
    handlers::local_delete_one(&state.backend, &name, &userid, &unique_id).await?;
    Ok(StatusCode::OK)
}
