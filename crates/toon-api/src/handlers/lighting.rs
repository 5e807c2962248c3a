//! Lighting sideband controls.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use toon_compositor::BlendMode;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Serialize)]
pub struct LightingAck {
    pub ok: bool,
}

fn ack() -> Json<LightingAck> {
    Json(LightingAck { ok: true })
}

#[derive(Deserialize)]
pub struct HuePayload {
    pub degrees: f64,
}

/// Handle `POST /lighting/hue`.
pub async fn set_hue(
    State(state): State<AppState>,
    Json(payload): Json<HuePayload>,
) -> ApiResult<Json<LightingAck>> {
    state.engine.set_hue(payload.degrees)?;
    Ok(ack())
}

#[derive(Deserialize)]
pub struct EmissionPayload {
    pub opacity: Option<f32>,
    pub blend: Option<String>,
}

/// Handle `POST /lighting/emission`.
pub async fn set_emission(
    State(state): State<AppState>,
    Json(payload): Json<EmissionPayload>,
) -> ApiResult<Json<LightingAck>> {
    let blend = match &payload.blend {
        Some(name) => Some(
            name.parse::<BlendMode>()
                .map_err(|_| ApiError::bad_request(format!("unknown blend mode: {name}")))?,
        ),
        None => None,
    };
    state.engine.set_emission(payload.opacity, blend)?;
    Ok(ack())
}

#[derive(Deserialize)]
pub struct TogglePayload {
    pub on: bool,
}

/// Handle `POST /lighting/lights`.
pub async fn set_lights(
    State(state): State<AppState>,
    Json(payload): Json<TogglePayload>,
) -> ApiResult<Json<LightingAck>> {
    state.engine.set_lights(payload.on)?;
    Ok(ack())
}

/// Handle `POST /lighting/flicker`.
pub async fn set_flicker(
    State(state): State<AppState>,
    Json(payload): Json<TogglePayload>,
) -> ApiResult<Json<LightingAck>> {
    state.engine.set_flicker(payload.on)?;
    Ok(ack())
}
