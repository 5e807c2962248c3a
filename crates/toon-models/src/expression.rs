//! Per-character expression offsets.
//!
//! Offsets are always quantized before they reach the compositor: fractional
//! or off-step values would multiply the cache-key space without any visible
//! change on screen. Eyes snap to 4 px, brows to 2 px, brow rotation to 0.1°.

use serde::{Deserialize, Serialize};

/// Quantization step for eye translation, in output pixels.
pub const EYE_STEP_PX: i32 = 4;
/// Quantization step for brow translation, in output pixels.
pub const BROW_STEP_PX: i32 = 2;

/// Snap `value` to the nearest multiple of `step`.
pub fn quantize_to_step(value: i32, step: i32) -> i32 {
    debug_assert!(step > 0);
    let half = step / 2;
    let offset = if value >= 0 { half } else { -half };
    (value + offset) / step * step
}

/// Eye translation from the neutral position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EyeOffset {
    pub x: i32,
    pub y: i32,
}

/// Per-side brow override applied on top of the shared brow offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowSideOffset {
    pub y: i32,
    /// Rotation in deci-degrees (tenths of a degree), positive raising the
    /// outer edge for the left brow.
    pub rotation: i32,
}

/// Static asymmetry bias applied to both sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowBias {
    #[serde(rename = "leftY")]
    pub left_y: i32,
    #[serde(rename = "rightY")]
    pub right_y: i32,
}

/// Eyebrow offsets: shared vertical travel and rotation plus per-side
/// overrides and bias.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowOffset {
    pub y: i32,
    /// Shared rotation in deci-degrees.
    pub rotation: i32,
    #[serde(default)]
    pub left: BrowSideOffset,
    #[serde(default)]
    pub right: BrowSideOffset,
    #[serde(default)]
    pub bias: BrowBias,
}

impl BrowOffset {
    /// Effective vertical travel for one side, including override and bias.
    pub fn side_y(&self, left: bool) -> i32 {
        if left {
            self.y + self.left.y + self.bias.left_y
        } else {
            self.y + self.right.y + self.bias.right_y
        }
    }

    /// Effective rotation for one side, in deci-degrees.
    pub fn side_rotation(&self, left: bool) -> i32 {
        if left {
            self.rotation + self.left.rotation
        } else {
            self.rotation + self.right.rotation
        }
    }
}

/// Full expression state for one character.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionOffsets {
    pub eyes: EyeOffset,
    pub eyebrows: BrowOffset,
}

impl ExpressionOffsets {
    /// Quantize every field to its pixel/rotation step.
    pub fn quantized(&self) -> Self {
        Self {
            eyes: EyeOffset {
                x: quantize_to_step(self.eyes.x, EYE_STEP_PX),
                y: quantize_to_step(self.eyes.y, EYE_STEP_PX),
            },
            eyebrows: BrowOffset {
                y: quantize_to_step(self.eyebrows.y, BROW_STEP_PX),
                rotation: self.eyebrows.rotation,
                left: BrowSideOffset {
                    y: quantize_to_step(self.eyebrows.left.y, BROW_STEP_PX),
                    rotation: self.eyebrows.left.rotation,
                },
                right: BrowSideOffset {
                    y: quantize_to_step(self.eyebrows.right.y, BROW_STEP_PX),
                    rotation: self.eyebrows.right.rotation,
                },
                bias: self.eyebrows.bias,
            },
        }
    }

    /// Digest fragment for cache keys; includes every animated field.
    pub fn digest_fragment(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
            self.eyes.x,
            self.eyes.y,
            self.eyebrows.y,
            self.eyebrows.rotation,
            self.eyebrows.left.y,
            self.eyebrows.left.rotation,
            self.eyebrows.right.y,
            self.eyebrows.right.rotation,
            self.eyebrows.bias.left_y,
            self.eyebrows.bias.right_y,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_to_step() {
        assert_eq!(quantize_to_step(0, 4), 0);
        assert_eq!(quantize_to_step(5, 4), 4);
        assert_eq!(quantize_to_step(6, 4), 8);
        assert_eq!(quantize_to_step(-5, 4), -4);
        assert_eq!(quantize_to_step(-6, 4), -8);
        assert_eq!(quantize_to_step(3, 2), 4);
    }

    #[test]
    fn test_quantized_snaps_all_fields() {
        let offsets = ExpressionOffsets {
            eyes: EyeOffset { x: 7, y: -9 },
            eyebrows: BrowOffset {
                y: 5,
                rotation: 37,
                left: BrowSideOffset { y: 3, rotation: 0 },
                right: BrowSideOffset { y: -3, rotation: 0 },
                bias: BrowBias::default(),
            },
        };
        let q = offsets.quantized();
        assert_eq!(q.eyes.x % EYE_STEP_PX, 0);
        assert_eq!(q.eyes.y % EYE_STEP_PX, 0);
        assert_eq!(q.eyebrows.y % BROW_STEP_PX, 0);
        assert_eq!(q.eyebrows.left.y % BROW_STEP_PX, 0);
        assert_eq!(q.eyebrows.right.y % BROW_STEP_PX, 0);
    }

    #[test]
    fn test_digest_changes_with_offsets() {
        let a = ExpressionOffsets::default();
        let mut b = a;
        b.eyes.x = 4;
        assert_ne!(a.digest_fragment(), b.digest_fragment());
    }

    #[test]
    fn test_side_accessors() {
        let brow = BrowOffset {
            y: 4,
            rotation: 20,
            left: BrowSideOffset { y: 2, rotation: -10 },
            right: BrowSideOffset { y: 0, rotation: 0 },
            bias: BrowBias { left_y: 1, right_y: -1 },
        };
        assert_eq!(brow.side_y(true), 7);
        assert_eq!(brow.side_y(false), 3);
        assert_eq!(brow.side_rotation(true), 10);
        assert_eq!(brow.side_rotation(false), 20);
    }
}
