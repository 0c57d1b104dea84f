use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::{
    services::{map::MarkerKind, reporter::DriverId},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(dispatcher_page))
        .route("/driver.html", get(driver_page))
}

#[derive(Clone)]
struct TripRowView {
    id: String,
    driver_name: String,
    leader_name: String,
    route: String,
    status: String,
    eta: String,
    link: String,
}

#[derive(Clone)]
struct MarkerView {
    label: String,
    kind: String,
    position: String,
}

#[derive(Template)]
#[template(path = "dispatcher.html")]
struct DispatcherTemplate {
    trips: Vec<TripRowView>,
    markers: Vec<MarkerView>,
    center: String,
    zoom: u8,
    has_draft: bool,
    draft_label: String,
}

async fn dispatcher_page(State(state): State<AppState>) -> impl IntoResponse {
    let rows = state.dispatcher.rows().await;
    let map = state.dispatcher.map().await;
    let draft = state.dispatcher.draft().await;

    let trips = rows
        .into_iter()
        .map(|row| TripRowView {
            eta: row.eta_text(),
            status: row.status.to_string(),
            id: row.id,
            driver_name: row.driver_name,
            leader_name: row.leader_name,
            route: row.route,
            link: row.link,
        })
        .collect();
    let markers = map
        .markers
        .values()
        .map(|marker| MarkerView {
            label: marker.label.to_string(),
            kind: match marker.kind {
                MarkerKind::Driver => "driver",
                MarkerKind::Pickup => "pickup",
                MarkerKind::Drop => "drop",
            }
            .to_string(),
            position: format!("{:.5}, {:.5}", marker.position.lat, marker.position.lng),
        })
        .collect();

    AskamaTemplateResponse::into_response(DispatcherTemplate {
        trips,
        markers,
        center: format!("{:.4}, {:.4}", map.center.lat, map.center.lng),
        zoom: map.zoom,
        has_draft: draft.is_some(),
        draft_label: draft
            .map(|d| format!("{} / {}", d.driver_name, d.leader_name))
            .unwrap_or_default(),
    })
}

#[derive(Template)]
#[template(path = "driver.html")]
struct DriverTemplate {
    has_error: bool,
    message: String,
}

#[derive(Deserialize)]
struct DriverQuery {
    id: Option<String>,
}

async fn driver_page(Query(query): Query<DriverQuery>) -> Response {
    match DriverId::from_query(query.id.as_deref()) {
        Ok(id) => AskamaTemplateResponse::into_response(DriverTemplate {
            has_error: false,
            message: format!("Driver ID: {id}"),
        }),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            AskamaTemplateResponse::into_response(DriverTemplate {
                has_error: true,
                message: err.to_string(),
            }),
        )
            .into_response(),
    }
}
