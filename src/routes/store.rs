use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{Map, Value};

use crate::{
    error::AppError,
    services::store::{RealtimeStore, StoreWriter},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/store", get(read_root).patch(update_paths))
        .route(
            "/store/*path",
            get(read_path).put(write_path).delete(remove_path),
        )
}

async fn read_root(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let value = state.store.get("").await?;
    Ok(Json(value.unwrap_or(Value::Null)))
}

async fn read_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<Value>, AppError> {
    let value = state.store.get(&path).await?;
    Ok(Json(value.unwrap_or(Value::Null)))
}

async fn write_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(value): Json<Value>,
) -> Result<StatusCode, AppError> {
    state.store.set(&path, value).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<StatusCode, AppError> {
    state.store.remove(&path).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Multi-path write: `{"trips/x": null, "locations/x": null}` lands as one change.
async fn update_paths(
    State(state): State<AppState>,
    Json(entries): Json<Map<String, Value>>,
) -> Result<StatusCode, AppError> {
    let entries = entries
        .into_iter()
        .map(|(path, value)| {
            let value = (!value.is_null()).then_some(value);
            (path, value)
        })
        .collect();
    state.store.update(entries).await?;
    Ok(StatusCode::NO_CONTENT)
}
