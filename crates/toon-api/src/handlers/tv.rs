//! TV playlist sideband controls.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use toon_compositor::TvItemSpec;
use toon_engine::{TvControl, TvStatus};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct PlaylistPayload {
    pub items: Vec<TvItemSpec>,
}

/// Handle `POST /tv/playlist`.
pub async fn set_playlist(
    State(state): State<AppState>,
    Json(payload): Json<PlaylistPayload>,
) -> ApiResult<Json<TvStatus>> {
    let status = state
        .engine
        .tv_playlist(payload.items)
        .await?
        .map_err(ApiError::internal)?;
    Ok(Json(status))
}

#[derive(Deserialize)]
pub struct ControlPayload {
    pub action: TvControl,
}

/// Handle `POST /tv/control`.
pub async fn control(
    State(state): State<AppState>,
    Json(payload): Json<ControlPayload>,
) -> ApiResult<Json<TvStatus>> {
    Ok(Json(state.engine.tv_control(payload.action).await?))
}
