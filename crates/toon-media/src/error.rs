//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur in the FFmpeg bridge.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("rhubarb not found in PATH")]
    RhubarbNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("audio decode failed: {0}")]
    AudioDecodeFailed(String),

    #[error("video decode failed: {0}")]
    VideoDecodeFailed(String),

    #[error("invalid media: {0}")]
    InvalidMedia(String),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("encoder is not running")]
    EncoderNotRunning,

    #[error("frame size mismatch: expected {expected} bytes, got {got}")]
    FrameSizeMismatch { expected: usize, got: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an audio decode failure.
    pub fn audio_decode(message: impl Into<String>) -> Self {
        Self::AudioDecodeFailed(message.into())
    }

    /// Create a video decode failure.
    pub fn video_decode(message: impl Into<String>) -> Self {
        Self::VideoDecodeFailed(message.into())
    }
}
