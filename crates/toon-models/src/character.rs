//! Character identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the two on-screen characters.
///
/// Layers with no character association carry `None` at the `Option` level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterSide {
    Left,
    Right,
}

impl CharacterSide {
    /// The character across the scene from this one.
    pub fn other(self) -> Self {
        match self {
            CharacterSide::Left => CharacterSide::Right,
            CharacterSide::Right => CharacterSide::Left,
        }
    }

    /// Lowercase name used in cache keys and API payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            CharacterSide::Left => "left",
            CharacterSide::Right => "right",
        }
    }

    /// Whether this character faces right-to-left (mirrored rotation signs).
    pub fn faces_left(self) -> bool {
        matches!(self, CharacterSide::Right)
    }
}

impl fmt::Display for CharacterSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CharacterSide {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(CharacterSide::Left),
            "right" => Ok(CharacterSide::Right),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other() {
        assert_eq!(CharacterSide::Left.other(), CharacterSide::Right);
        assert_eq!(CharacterSide::Right.other(), CharacterSide::Left);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Left".parse::<CharacterSide>().unwrap(), CharacterSide::Left);
        assert!("middle".parse::<CharacterSide>().is_err());
    }
}
