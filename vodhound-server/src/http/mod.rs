//! Axum router configuration

pub mod handlers;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

use handlers::{health, live_sessions, live_start, live_status, live_stop, search_clip};

/// Clip uploads can be a minute of video; the axum default of 2 MiB is
/// too small for them.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    // Local frontends (and plain curl) talk to this API directly.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::ORIGIN])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/api/health", get(health))
        .route("/api/live/status", get(live_status))
        .route("/api/live/start", post(live_start))
        .route("/api/live/stop", post(live_stop))
        .route("/api/live/sessions", get(live_sessions))
        .route(
            "/api/search/clip",
            post(search_clip).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
