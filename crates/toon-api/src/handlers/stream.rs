//! Stream status handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use toon_engine::{HealthInfo, StreamInfo};

use crate::error::ApiResult;
use crate::state::AppState;

/// Handle `GET /stream-info`.
pub async fn stream_info(State(state): State<AppState>) -> ApiResult<Json<StreamInfo>> {
    Ok(Json(state.engine.stream_info().await?))
}

/// Handle `GET /health`.
pub async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthInfo>, (StatusCode, Json<HealthInfo>)> {
    match state.engine.health().await {
        Ok(info) if info.streaming => Ok(Json(info)),
        Ok(info) => Err((StatusCode::SERVICE_UNAVAILABLE, Json(info))),
        Err(_) => {
            let settings = state.engine.settings();
            let info = HealthInfo {
                status: "down".to_string(),
                streaming: false,
                lipsync_mode: format!("{:?}", settings.lipsync_mode).to_lowercase(),
                stream_mode: format!("{:?}", settings.stream_mode).to_lowercase(),
            };
            Err((StatusCode::SERVICE_UNAVAILABLE, Json(info)))
        }
    }
}

/// Handle `POST /playback-start` (separate-audio mode sync signal).
pub async fn playback_start(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.engine.playback_start()?;
    Ok(StatusCode::NO_CONTENT)
}
