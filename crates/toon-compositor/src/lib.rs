//! Layered raster compositor for the ToonStream engine.
//!
//! This crate provides:
//! - Layer loading, classification, and derived geometry (`layer_store`)
//! - The versioned precomposited static base (`static_base`)
//! - Pixel blend modes and hue rotation (`blend`)
//! - Expression transforms and their cache (`transforms`)
//! - The four-level frame cache with the committed-base protocol (`scene`)
//! - The TV-region sub-compositor (`tv`)
//! - Caption banner rasterizing (`caption`)

pub mod blend;
pub mod cache;
pub mod caption;
pub mod compose;
pub mod error;
pub mod layer_store;
pub mod scene;
pub mod static_base;
pub mod transforms;
pub mod tv;

pub use blend::{alpha_over, blend_over, hue_rotate, BlendMode};
pub use cache::FrameCache;
pub use caption::{caption_digest, CaptionRenderer};
pub use compose::{encode_jpeg, rgba_to_rgb24, CaptionOverlay};
pub use error::{CompositorError, CompositorResult};
pub use layer_store::{LayerStore, LoadedLayer};
pub use scene::{CacheStats, FrameInputs, SceneCompositor};
pub use static_base::{LightingState, StaticBase};
pub use transforms::{ExpressionLayerCache, TransformedLayer};
pub use tv::{TvCompositor, TvItem, TvItemSpec, TvState};
