//! Sync table routes.
//!
//! Static first segments (`raw`, `changes`, `sync`, `replace`) take priority
//! over `{name}`, so tables with those names are only reachable through the
//! prefixed endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tablesync_engine::{FlatRow, Mutation, Row, SyncResult};

use crate::error::Result;
use crate::handlers::{self, WriteResponse};
use crate::AppState;

type JsonBody<T> = std::result::Result<Json<T>, JsonRejection>;

/// Create sync table routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/synctable/raw/{name}/{userid}", get(get_raw_handler))
        .route(
            "/synctable/changes/{name}/{userid}",
            post(handle_changes_handler),
        )
        .route(
            "/synctable/changes/{name}/{userid}/{millis}",
            get(get_changes_after_handler),
        )
        .route("/synctable/sync/{name}/{userid}/{millis}", post(sync_handler))
        .route("/synctable/replace/{name}/{userid}", post(replace_all_handler))
        .route(
            "/synctable/{name}/{userid}",
            get(get_all_handler).post(insert_one_handler),
        )
        // {key} is the row id for GET and DELETE, the claimed edit time for POST
        .route(
            "/synctable/{name}/{userid}/{key}",
            get(get_one_handler)
                .delete(delete_one_handler)
                .post(insert_if_recent_handler),
        )
        .route(
            "/synctable/{name}/{userid}/{key}/{millis}",
            delete(delete_if_recent_handler),
        )
}

/// GET /synctable/{name}/{userid} - Live rows.
async fn get_all_handler(
    State(state): State<AppState>,
    Path((name, userid)): Path<(String, String)>,
) -> Result<Json<Vec<Row>>> {
    let rows = handlers::get_all(&state.backend, &name, &userid).await?;
    Ok(Json(rows))
}

/// GET /synctable/{name}/{userid}/{uniqueid} - One live row.
async fn get_one_handler(
    State(state): State<AppState>,
    Path((name, userid, unique_id)): Path<(String, String, String)>,
) -> Result<Json<Row>> {
    let row = handlers::get_one(&state.backend, &name, &userid, &unique_id).await?;
    Ok(Json(row))
}

/// GET /synctable/raw/{name}/{userid} - Live rows at the high-water mark.
async fn get_raw_handler(
    State(state): State<AppState>,
    Path((name, userid)): Path<(String, String)>,
) -> Result<Json<SyncResult>> {
    let result = handlers::get_raw(&state.backend, &name, &userid).await?;
    Ok(Json(result))
}

/// GET /synctable/changes/{name}/{userid}/{millis} - Change log tail.
async fn get_changes_after_handler(
    State(state): State<AppState>,
    Path((name, userid, millis)): Path<(String, String, String)>,
) -> Result<Json<SyncResult>> {
    let result = handlers::get_changes_after(&state.backend, &name, &userid, &millis).await?;
    Ok(Json(result))
}

/// POST /synctable/{name}/{userid} - Unconditional upsert.
async fn insert_one_handler(
    State(state): State<AppState>,
    Path((name, userid)): Path<(String, String)>,
    body: JsonBody<FlatRow>,
) -> Result<(StatusCode, Json<Row>)> {
    let Json(row) = body?;
    let stored = handlers::insert_one(&state.backend, &name, &userid, row).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// DELETE /synctable/{name}/{userid}/{uniqueid} - Unconditional delete.
async fn delete_one_handler(
    State(state): State<AppState>,
    Path((name, userid, unique_id)): Path<(String, String, String)>,
) -> Result<Json<Row>> {
    let tombstone = handlers::delete_one(&state.backend, &name, &userid, &unique_id).await?;
    Ok(Json(tombstone))
}

/// POST /synctable/sync/{name}/{userid}/{millis} - Reconcile a client batch.
async fn sync_handler(
    State(state): State<AppState>,
    Path((name, userid, millis)): Path<(String, String, String)>,
    body: JsonBody<Vec<Mutation>>,
) -> Result<Json<SyncResult>> {
    let Json(batch) = body?;
    let result = handlers::sync_at(&state.backend, &name, &userid, &millis, batch).await?;
    Ok(Json(result))
}

/// POST /synctable/{name}/{userid}/{millis} - Timestamp-gated upsert.
async fn insert_if_recent_handler(
    State(state): State<AppState>,
    Path((name, userid, millis)): Path<(String, String, String)>,
    body: JsonBody<FlatRow>,
) -> Result<Json<WriteResponse>> {
    let Json(row) = body?;
    let response =
        handlers::insert_if_recent(&state.backend, &name, &userid, &millis, row).await?;
    Ok(Json(response))
}

/// DELETE /synctable/{name}/{userid}/{uniqueid}/{millis} - Timestamp-gated delete.
async fn delete_if_recent_handler(
    State(state): State<AppState>,
    Path((name, userid, unique_id, millis)): Path<(String, String, String, String)>,
) -> Result<Json<WriteResponse>> {
    let response =
        handlers::delete_if_recent(&state.backend, &name, &userid, &unique_id, &millis).await?;
    Ok(Json(response))
}

/// POST /synctable/replace/{name}/{userid} - Replace every row of the scope.
async fn replace_all_handler(
    State(state): State<AppState>,
    Path((name, userid)): Path<(String, String)>,
    body: JsonBody<Vec<FlatRow>>,
) -> Result<Json<SyncResult>> {
    let Json(rows) = body?;
    let result = handlers::replace_all(&state.backend, &name, &userid, rows).await?;
    Ok(Json(result))
}

/// POST /synctable/changes/{name}/{userid} - Apply a batch without conflict checks.
async fn handle_changes_handler(
    State(state): State<AppState>,
    Path((name, userid)): Path<(String, String)>,
    body: JsonBody<Vec<Mutation>>,
) -> Result<Json<SyncResult>> {
    let Json(batch) = body?;
    let result = handlers::handle_changes(&state.backend, &name, &userid, batch).await?;
    Ok(Json(result))
}
