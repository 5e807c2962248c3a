//! API configuration.

use std::path::PathBuf;

use toon_models::{EncoderSettings, StreamSettings};

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Layer manifest file
    pub manifest_path: PathBuf,
    /// Directory layer paths resolve against
    pub layers_dir: PathBuf,
    /// Optional expression limits file
    pub limits_path: PathBuf,
    /// Directory uploaded clips land in
    pub upload_dir: PathBuf,
    /// Composite worker pool size
    pub composite_threads: usize,
    /// Stream parameters
    pub stream: StreamSettings,
    /// Encoder parameters
    pub encoder: EncoderSettings,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7700,
            manifest_path: PathBuf::from("assets/layers/manifest.json"),
            layers_dir: PathBuf::from("assets/layers"),
            limits_path: PathBuf::from("assets/expression-limits.json"),
            upload_dir: PathBuf::from("uploads"),
            composite_threads: 2,
            stream: StreamSettings::default(),
            encoder: EncoderSettings::default(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("ANIMATION_HOST").unwrap_or(defaults.host),
            port: std::env::var("ANIMATION_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            manifest_path: std::env::var("LAYER_MANIFEST")
                .map(PathBuf::from)
                .unwrap_or(defaults.manifest_path),
            layers_dir: std::env::var("LAYERS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.layers_dir),
            limits_path: std::env::var("EXPRESSION_LIMITS")
                .map(PathBuf::from)
                .unwrap_or(defaults.limits_path),
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            composite_threads: std::env::var("TOON_COMPOSITE_THREADS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.composite_threads),
            stream: StreamSettings::from_env(),
            encoder: EncoderSettings::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.port, 7700);
        assert_eq!(config.stream.stream_fps, 30);
        assert!(config.manifest_path.ends_with("manifest.json"));
    }
}
