//! Declarative expression plans.
//!
//! A plan is a timed list of eye/brow/mouth keyframes covering one spoken
//! line. Plans are built heuristically from the line's text and may be
//! hot-swapped while the line plays.

use serde::{Deserialize, Serialize};

use crate::character::CharacterSide;

/// Where the eyes look during an eye action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EyeLook {
    /// Toward the listening character.
    Listener,
    /// Away from the listening character.
    Away,
    Down,
    Up,
    Left,
    Right,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
}

/// Eyebrow gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowEmote {
    Raise,
    Frown,
    Skeptical,
    SkepticalLeft,
    SkepticalRight,
    AsymUpLeft,
    AsymUpRight,
    /// Quick up-down bounce, repeated `count` times.
    Flick,
}

/// Mouth expression shape layered over the phoneme mouth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MouthShape {
    Smile,
    Surprise,
}

fn default_amount() -> f32 {
    1.0
}

/// One timed action within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    Eye {
        /// Start time in milliseconds from line start.
        t: u64,
        /// Character performing the action.
        target: CharacterSide,
        look: EyeLook,
        #[serde(default = "default_amount")]
        amount: f32,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },
    Brow {
        t: u64,
        target: CharacterSide,
        emote: BrowEmote,
        #[serde(default = "default_amount")]
        amount: f32,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        /// Flick repetitions.
        #[serde(default)]
        count: Option<u32>,
    },
    Mouth {
        t: u64,
        target: CharacterSide,
        shape: MouthShape,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },
}

impl Action {
    /// Start time of the action.
    pub fn start_ms(&self) -> u64 {
        match self {
            Action::Eye { t, .. } | Action::Brow { t, .. } | Action::Mouth { t, .. } => *t,
        }
    }

    /// Character performing the action.
    pub fn target(&self) -> CharacterSide {
        match self {
            Action::Eye { target, .. }
            | Action::Brow { target, .. }
            | Action::Mouth { target, .. } => *target,
        }
    }
}

/// A timed list of expression keyframes for one spoken line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionPlan {
    /// The speaking character.
    pub character: CharacterSide,
    /// The character being spoken to.
    pub listener: CharacterSide,
    /// Total plan length; every track returns to neutral here.
    #[serde(rename = "totalMs")]
    pub total_ms: u64,
    pub actions: Vec<Action>,
}

impl ExpressionPlan {
    /// An empty plan of the given length.
    pub fn empty(character: CharacterSide, total_ms: u64) -> Self {
        Self {
            character,
            listener: character.other(),
            total_ms,
            actions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_tagged_serde() {
        let json = r#"{"type": "eye", "t": 250, "target": "left",
                       "look": "up_left", "amount": 0.5, "durationMs": 300}"#;
        let action: Action = serde_json::from_str(json).unwrap();
        match action {
            Action::Eye { t, look, amount, .. } => {
                assert_eq!(t, 250);
                assert_eq!(look, EyeLook::UpLeft);
                assert!((amount - 0.5).abs() < f32::EPSILON);
            }
            _ => panic!("expected eye action"),
        }
    }

    #[test]
    fn test_mouth_shape_screaming_case() {
        let json = r#"{"type": "mouth", "t": 0, "target": "right",
                       "shape": "SURPRISE", "durationMs": 400}"#;
        let action: Action = serde_json::from_str(json).unwrap();
        match action {
            Action::Mouth { shape, .. } => assert_eq!(shape, MouthShape::Surprise),
            _ => panic!("expected mouth action"),
        }
    }

    #[test]
    fn test_amount_defaults_to_one() {
        let json = r#"{"type": "brow", "t": 0, "target": "left",
                       "emote": "raise", "durationMs": 200}"#;
        let action: Action = serde_json::from_str(json).unwrap();
        match action {
            Action::Brow { amount, count, .. } => {
                assert!((amount - 1.0).abs() < f32::EPSILON);
                assert!(count.is_none());
            }
            _ => panic!("expected brow action"),
        }
    }
}
