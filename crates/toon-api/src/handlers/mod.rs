//! Request handlers.

pub mod expression;
pub mod lighting;
pub mod render;
pub mod stream;
pub mod tv;
