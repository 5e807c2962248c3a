//! Application state.

use toon_engine::EngineHandle;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub engine: EngineHandle,
}

impl AppState {
    /// Create new application state around a running engine.
    pub fn new(config: ApiConfig, engine: EngineHandle) -> Self {
        Self { config, engine }
    }
}
