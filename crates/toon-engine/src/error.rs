//! Engine error types.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while building or driving the stream engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("compositor error: {0}")]
    Compositor(#[from] toon_compositor::CompositorError),

    #[error("media error: {0}")]
    Media(#[from] toon_media::MediaError),

    #[error("manifest error: {0}")]
    Manifest(#[from] toon_models::ManifestError),

    #[error("engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
