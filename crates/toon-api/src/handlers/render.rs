//! The `/render` ingress.
//!
//! Accepts a multipart form with a spoken audio clip, decodes it to mono
//! f32 at the analyzer rate, optionally runs the external phoneme tool,
//! and hands the clip to the engine for playback or queueing.

use axum::extract::{Multipart, State};
use axum::Json;
use tracing::{debug, warn};
use uuid::Uuid;

use toon_audio::AudioClip;
use toon_media::{decode_audio_f32_mono, phoneme_timeline, run_rhubarb, FfmpegCommand};
use toon_models::{CharacterSide, LipSyncMode, Phoneme};
use toon_engine::{RenderMode, RenderRequest, RenderResponse};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Handle `POST /render`.
pub async fn render(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<RenderResponse>> {
    let mut audio: Option<(Vec<u8>, String)> = None;
    let mut character: Option<CharacterSide> = None;
    let mut message = String::new();
    let mut mode = RenderMode::Router;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                let ext = field
                    .file_name()
                    .and_then(|n| n.rsplit('.').next())
                    .unwrap_or("mp3")
                    .to_ascii_lowercase();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                audio = Some((bytes.to_vec(), ext));
            }
            "character" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                character = Some(
                    value
                        .parse()
                        .map_err(|_| ApiError::bad_request(format!("unknown character: {value}")))?,
                );
            }
            "message" => {
                message = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
            }
            "mode" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                mode = value
                    .parse()
                    .map_err(|_| ApiError::bad_request(format!("unknown mode: {value}")))?;
            }
            other => debug!(field = other, "Ignoring unknown form field"),
        }
    }

    let (bytes, ext) = audio.ok_or_else(|| ApiError::bad_request("missing audio field"))?;
    let character = character.ok_or_else(|| ApiError::bad_request("missing character field"))?;

    tokio::fs::create_dir_all(&state.config.upload_dir)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let temp_path = state
        .config
        .upload_dir
        .join(format!("clip-{}.{ext}", Uuid::new_v4()));
    tokio::fs::write(&temp_path, &bytes)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let sample_rate = state.config.stream.clip_sample_rate;
    let samples = match decode_audio_f32_mono(&temp_path, sample_rate).await {
        Ok(samples) => samples,
        Err(e) => {
            // A bad upload never touches the live stream.
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(ApiError::AudioDecode(e.to_string()));
        }
    };

    let clip = AudioClip::new(samples, sample_rate, character, message);
    let timeline = if state.config.stream.lipsync_mode == LipSyncMode::Rhubarb {
        rhubarb_timeline(&state, &temp_path, clip.duration).await
    } else {
        None
    };

    let response = state
        .engine
        .render(RenderRequest {
            clip,
            timeline,
            mode,
            temp_path: Some(temp_path),
        })
        .await?;

    Ok(Json(response))
}

/// Run the external phoneme tool over the clip; falls back to the
/// realtime analyzer on any failure.
async fn rhubarb_timeline(
    state: &AppState,
    clip_path: &std::path::Path,
    duration: f64,
) -> Option<Vec<Phoneme>> {
    let wav_path = clip_path.with_extension("rhubarb.wav");
    let convert = FfmpegCommand::new()
        .input_file(clip_path.to_string_lossy())
        .output_args(["-ac", "1", "-ar", "16000"])
        .output(wav_path.to_string_lossy())
        .run()
        .await;
    if let Err(e) = convert {
        warn!(error = %e, "WAV conversion for rhubarb failed, using realtime analyzer");
        return None;
    }

    let result = run_rhubarb(&wav_path).await;
    let _ = tokio::fs::remove_file(&wav_path).await;
    match result {
        Ok(cues) => Some(phoneme_timeline(
            &cues,
            state.config.stream.lipsync_fps,
            duration,
        )),
        Err(e) => {
            warn!(error = %e, "rhubarb failed, using realtime analyzer");
            None
        }
    }
}
