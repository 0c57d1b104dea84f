pub mod dispatcher;
pub mod pages;
pub mod store;

use axum::Router;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(pages::router())
        .merge(store::router())
        .nest("/api", dispatcher::router())
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
