//! Frame pipeline and stream engine for ToonStream.
//!
//! This crate provides:
//! - The expression evaluator and the text-heuristic plan builder
//! - The per-character blink controller
//! - The per-tick frame pipeline with budget-based composite skipping
//! - The stream engine loop that owns all streaming state and feeds the
//!   continuous encoder

pub mod blink;
pub mod engine;
pub mod error;
pub mod expression;
pub mod pipeline;
pub mod planner;

pub use blink::BlinkController;
pub use engine::{
    CacheStatsInfo, EngineConfig, EngineHandle, HealthInfo, RenderMode, RenderRequest,
    RenderResponse, StreamEngine, StreamInfo, TvControl, TvStatus,
};
pub use error::{EngineError, EngineResult};
pub use expression::{EvaluatedExpression, ExpressionEvaluator};
pub use pipeline::FramePipeline;
pub use planner::plan_from_text;
