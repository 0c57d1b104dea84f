use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    models::geo::Place,
    services::{
        map::MapState,
        reconciler::TripRow,
        trips::{CreatedTrip, NewTrip, TripDraft},
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/trips", get(trips_list).post(trip_create))
        .route("/trips/:id", delete(trip_delete))
        .route("/trips/:id/end", post(trip_end))
        .route("/trips/:id/link", get(trip_link))
        .route("/map", get(map_state))
        .route("/draft", get(draft_show).post(draft_start).delete(draft_cancel))
        .route("/draft/pickup", put(draft_pickup))
        .route("/draft/drop", put(draft_drop))
        .route("/draft/confirm", post(draft_confirm))
}

#[derive(Debug, Default, Deserialize)]
struct Confirmation {
    #[serde(default)]
    confirm: bool,
}

async fn trips_list(State(state): State<AppState>) -> Json<Vec<TripRow>> {
    Json(state.dispatcher.rows().await)
}

async fn trip_create(
    State(state): State<AppState>,
    Json(new_trip): Json<NewTrip>,
) -> Result<(StatusCode, Json<CreatedTrip>), AppError> {
    let created = state.dispatcher.create_trip(new_trip).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn trip_end(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(confirmation): Query<Confirmation>,
) -> Result<StatusCode, AppError> {
    state.dispatcher.end_trip(&id, confirmation.confirm).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn trip_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(confirmation): Query<Confirmation>,
) -> Result<StatusCode, AppError> {
    state.dispatcher.delete_trip(&id, confirmation.confirm).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct TripLink {
    id: String,
    link: String,
}

async fn trip_link(State(state): State<AppState>, Path(id): Path<String>) -> Json<TripLink> {
    let link = state.dispatcher.link(&id);
    Json(TripLink { id, link })
}

async fn map_state(State(state): State<AppState>) -> Json<MapState> {
    Json(state.dispatcher.map().await)
}

#[derive(Deserialize)]
struct DraftForm {
    driver_name: String,
    leader_name: String,
}

async fn draft_show(State(state): State<AppState>) -> Result<Json<TripDraft>, AppError> {
    state
        .dispatcher
        .draft()
        .await
        .map(Json)
        .ok_or(AppError::NotFound)
}

async fn draft_start(
    State(state): State<AppState>,
    Json(form): Json<DraftForm>,
) -> Result<Json<TripDraft>, AppError> {
    let draft = state
        .dispatcher
        .start_draft(&form.driver_name, &form.leader_name)
        .await?;
    Ok(Json(draft))
}

async fn draft_pickup(
    State(state): State<AppState>,
    Json(place): Json<Place>,
) -> Result<Json<TripDraft>, AppError> {
    Ok(Json(state.dispatcher.set_draft_pickup(place).await?))
}

async fn draft_drop(
    State(state): State<AppState>,
    Json(place): Json<Place>,
) -> Result<Json<TripDraft>, AppError> {
    Ok(Json(state.dispatcher.set_draft_drop(place).await?))
}

async fn draft_confirm(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreatedTrip>), AppError> {
    let created = state.dispatcher.confirm_draft().await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn draft_cancel(State(state): State<AppState>) -> StatusCode {
    state.dispatcher.cancel_draft().await;
    StatusCode::NO_CONTENT
}
