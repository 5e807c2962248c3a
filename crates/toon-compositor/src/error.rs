//! Error types for compositor operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for compositor operations.
pub type CompositorResult<T> = Result<T, CompositorError>;

/// Errors that can occur while loading or compositing layers.
#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("asset missing: {0}")]
    AssetMissing(PathBuf),

    #[error("manifest error: {0}")]
    Manifest(#[from] toon_models::ManifestError),

    #[error("image decode failed for {path}: {message}")]
    ImageDecode { path: PathBuf, message: String },

    #[error("JPEG encode failed: {0}")]
    JpegEncode(String),

    #[error("mask layer missing or fully transparent")]
    NoTvViewport,

    #[error("unknown layer id: {0}")]
    UnknownLayer(String),

    #[error("caption render failed: {0}")]
    CaptionRender(String),

    #[error("media error: {0}")]
    Media(#[from] toon_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompositorError {
    /// Create an image decode error.
    pub fn image_decode(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ImageDecode {
            path: path.into(),
            message: message.into(),
        }
    }
}
