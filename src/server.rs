use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

/// Builds the reporting `Router`: group listing, pulled windows and the
/// SSE window stream.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/groups", get(handlers::groups::list_groups))
        .route(
            "/api/groups/:name/window",
            get(handlers::groups::get_window),
        )
        .route(
            "/api/groups/:name/stream",
            get(handlers::groups::window_stream),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
