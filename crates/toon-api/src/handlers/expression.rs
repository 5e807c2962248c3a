//! Expression sideband controls.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use toon_models::{CharacterSide, ExpressionLimits, ExpressionOffsets};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Serialize)]
pub struct ExpressionAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted: Option<bool>,
}

#[derive(Deserialize)]
pub struct OffsetsPayload {
    pub character: CharacterSide,
    #[serde(flatten)]
    pub offsets: ExpressionOffsets,
}

/// Handle `POST /expression/offsets`.
pub async fn set_offsets(
    State(state): State<AppState>,
    Json(payload): Json<OffsetsPayload>,
) -> ApiResult<Json<ExpressionAck>> {
    state.engine.set_offsets(payload.character, payload.offsets)?;
    Ok(Json(ExpressionAck {
        ok: true,
        persisted: None,
    }))
}

/// Handle `POST /expression/limits`.
///
/// In-memory limits are authoritative immediately; the file write is
/// best-effort and reported back to this call only.
pub async fn set_limits(
    State(state): State<AppState>,
    Json(limits): Json<ExpressionLimits>,
) -> ApiResult<Json<ExpressionAck>> {
    let persisted = state
        .engine
        .set_limits(limits)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(ExpressionAck {
        ok: true,
        persisted: Some(persisted.is_ok()),
    }))
}
