//! HTTP ingress for the ToonStream animation engine.
//!
//! The API is a thin shell over the engine's command channel: `/render`
//! decodes and admits clips, `/stream-info` and `/health` report status,
//! `/playback-start` syncs out-of-band audio, and the `/lighting`,
//! `/expression`, and `/tv` routes mutate sideband state. The HLS
//! playlist and segments are served statically from the stream directory.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
