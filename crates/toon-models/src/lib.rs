//! Shared data models for the ToonStream animation engine.
//!
//! This crate provides Serde-serializable types for:
//! - Layer manifest entries and the tagged layer role enum
//! - Visual phoneme codes (mouth categories A..H)
//! - Expression offsets, limits, and declarative expression plans
//! - Stream/encoder settings resolved from the environment

pub mod character;
pub mod expression;
pub mod layer;
pub mod limits;
pub mod phoneme;
pub mod plan;
pub mod rect;
pub mod settings;

pub use character::CharacterSide;
pub use expression::{
    quantize_to_step, BrowBias, BrowOffset, BrowSideOffset, ExpressionOffsets, EyeOffset,
    BROW_STEP_PX, EYE_STEP_PX,
};
pub use layer::{LayerInfo, LayerKind, Manifest, ManifestError};
pub use limits::{BrowLimits, CharacterLimits, ExpressionLimits, EyeLimits};
pub use phoneme::Phoneme;
pub use plan::{Action, BrowEmote, ExpressionPlan, EyeLook, MouthShape};
pub use rect::Rect;
pub use settings::{EncoderSettings, LipSyncMode, StreamMode, StreamSettings};
