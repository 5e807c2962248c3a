//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::handlers::expression::{set_limits, set_offsets};
use crate::handlers::lighting::{set_emission, set_flicker, set_hue, set_lights};
use crate::handlers::render::render;
use crate::handlers::stream::{health, playback_start, stream_info};
use crate::handlers::tv::{control, set_playlist};
use crate::middleware::{request_id, request_logging};
use crate::state::AppState;

/// Maximum accepted upload size (audio clips are short).
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let lighting_routes = Router::new()
        .route("/lighting/hue", post(set_hue))
        .route("/lighting/emission", post(set_emission))
        .route("/lighting/lights", post(set_lights))
        .route("/lighting/flicker", post(set_flicker));

    let expression_routes = Router::new()
        .route("/expression/offsets", post(set_offsets))
        .route("/expression/limits", post(set_limits));

    let tv_routes = Router::new()
        .route("/tv/playlist", post(set_playlist))
        .route("/tv/control", post(control));

    let stream_dir = state.config.encoder.stream_dir.clone();

    Router::new()
        .route("/render", post(render))
        .route("/stream-info", get(stream_info))
        .route("/health", get(health))
        .route("/playback-start", post(playback_start))
        .merge(lighting_routes)
        .merge(expression_routes)
        .merge(tv_routes)
        .nest_service("/streams/live", ServeDir::new(stream_dir))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
