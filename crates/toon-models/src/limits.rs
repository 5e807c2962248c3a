//! Expression movement limits.
//!
//! Limits bound every offset before quantization. They are loaded from an
//! optional JSON file; absent characters or a missing file fall back to the
//! defaults of ±20 px and ±10°.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::character::CharacterSide;
use crate::expression::ExpressionOffsets;

/// Default translation bound in output pixels.
pub const DEFAULT_RANGE_PX: i32 = 20;
/// Default rotation bound in degrees.
pub const DEFAULT_ROTATION_DEG: f64 = 10.0;

/// Translation bounds for the eye feature.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EyeLimits {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
}

impl Default for EyeLimits {
    fn default() -> Self {
        Self {
            min_x: -DEFAULT_RANGE_PX,
            max_x: DEFAULT_RANGE_PX,
            min_y: -DEFAULT_RANGE_PX,
            max_y: DEFAULT_RANGE_PX,
        }
    }
}

/// Translation and rotation bounds for the eyebrow feature.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowLimits {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
    /// Rotation applied at full upward travel, degrees.
    pub rot_up: f64,
    /// Rotation applied at full downward travel, degrees.
    pub rot_down: f64,
}

impl Default for BrowLimits {
    fn default() -> Self {
        Self {
            min_x: -DEFAULT_RANGE_PX,
            max_x: DEFAULT_RANGE_PX,
            min_y: -DEFAULT_RANGE_PX,
            max_y: DEFAULT_RANGE_PX,
            rot_up: DEFAULT_ROTATION_DEG,
            rot_down: DEFAULT_ROTATION_DEG,
        }
    }
}

/// Limits for one character.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CharacterLimits {
    #[serde(default)]
    pub eyes: EyeLimits,
    #[serde(default)]
    pub eyebrows: BrowLimits,
}

impl CharacterLimits {
    /// Clamp an offset set to these bounds.
    pub fn clamp(&self, offsets: &ExpressionOffsets) -> ExpressionOffsets {
        let mut out = *offsets;
        out.eyes.x = out.eyes.x.clamp(self.eyes.min_x, self.eyes.max_x);
        out.eyes.y = out.eyes.y.clamp(self.eyes.min_y, self.eyes.max_y);
        out.eyebrows.y = out.eyebrows.y.clamp(self.eyebrows.min_y, self.eyebrows.max_y);
        let rot_bound = (self.eyebrows.rot_up.max(self.eyebrows.rot_down) * 10.0).round() as i32;
        out.eyebrows.rotation = out.eyebrows.rotation.clamp(-rot_bound, rot_bound);
        out
    }

    /// Rotation derived from brow travel: `rot_up` at `min_y`, `-rot_down`
    /// at `max_y`, linear in between. Degrees.
    pub fn brow_rotation_for_y(&self, y: i32) -> f64 {
        let b = &self.eyebrows;
        if b.max_y == b.min_y {
            return 0.0;
        }
        let t = (y - b.min_y) as f64 / (b.max_y - b.min_y) as f64;
        b.rot_up + t.clamp(0.0, 1.0) * (-b.rot_down - b.rot_up)
    }
}

/// Per-character expression limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpressionLimits {
    #[serde(flatten)]
    characters: HashMap<CharacterSide, CharacterLimits>,
}

impl ExpressionLimits {
    /// Load limits from a JSON file, returning defaults if the file does
    /// not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read(path).map_err(|e| e.to_string()).and_then(|data| {
            serde_json::from_slice::<ExpressionLimits>(&data).map_err(|e| e.to_string())
        }) {
            Ok(limits) => limits,
            Err(_) => Self::default(),
        }
    }

    /// Limits for one character, falling back to defaults.
    pub fn for_character(&self, character: CharacterSide) -> CharacterLimits {
        self.characters.get(&character).copied().unwrap_or_default()
    }

    /// Replace one character's limits.
    pub fn set_character(&mut self, character: CharacterSide, limits: CharacterLimits) {
        self.characters.insert(character, limits);
    }

    /// Serialize back to the limits file. Best-effort persistence for the
    /// mutator path; in-memory state stays authoritative.
    pub fn persist(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{BrowOffset, EyeOffset};

    #[test]
    fn test_defaults() {
        let limits = ExpressionLimits::default().for_character(CharacterSide::Left);
        assert_eq!(limits.eyes.max_x, 20);
        assert!((limits.eyebrows.rot_up - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clamp() {
        let limits = CharacterLimits::default();
        let clamped = limits.clamp(&ExpressionOffsets {
            eyes: EyeOffset { x: 100, y: -100 },
            eyebrows: BrowOffset {
                y: 50,
                rotation: 900,
                ..Default::default()
            },
        });
        assert_eq!(clamped.eyes.x, 20);
        assert_eq!(clamped.eyes.y, -20);
        assert_eq!(clamped.eyebrows.y, 20);
        assert_eq!(clamped.eyebrows.rotation, 100);
    }

    #[test]
    fn test_brow_rotation_linear() {
        let limits = CharacterLimits::default();
        assert!((limits.brow_rotation_for_y(-20) - 10.0).abs() < 1e-9);
        assert!((limits.brow_rotation_for_y(20) + 10.0).abs() < 1e-9);
        assert!(limits.brow_rotation_for_y(0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_limits_file() {
        let json = r#"{
            "left": {
                "eyes": {"minX": -12, "maxX": 12, "minY": -8, "maxY": 8},
                "eyebrows": {"minX": 0, "maxX": 0, "minY": -14, "maxY": 14,
                             "rotUp": 8.0, "rotDown": 6.0}
            }
        }"#;
        let limits: ExpressionLimits = serde_json::from_str(json).unwrap();
        let left = limits.for_character(CharacterSide::Left);
        assert_eq!(left.eyes.max_x, 12);
        assert!((left.eyebrows.rot_down - 6.0).abs() < f64::EPSILON);
        // Unlisted character falls back to defaults.
        let right = limits.for_character(CharacterSide::Right);
        assert_eq!(right.eyes.max_x, 20);
    }
}
