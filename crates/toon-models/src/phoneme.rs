//! Visual phoneme codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Visual mouth category produced by the lip-sync analyzer.
///
/// `A` is the closed/rest mouth; `D` is wide open. The external rhubarb
/// tool's `X` (unknown) code maps to `A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phoneme {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
}

impl Phoneme {
    /// All phoneme codes in order.
    pub const ALL: [Phoneme; 8] = [
        Phoneme::A,
        Phoneme::B,
        Phoneme::C,
        Phoneme::D,
        Phoneme::E,
        Phoneme::F,
        Phoneme::G,
        Phoneme::H,
    ];

    /// Phonemes pre-warmed into the character-frame cache for a new speaker.
    pub const PREWARM: [Phoneme; 6] = [
        Phoneme::A,
        Phoneme::B,
        Phoneme::C,
        Phoneme::D,
        Phoneme::E,
        Phoneme::F,
    ];

    /// Mouth-openness priority used when voting across analysis sub-windows.
    pub fn priority(self) -> u8 {
        match self {
            Phoneme::A => 0,
            Phoneme::B => 1,
            Phoneme::F | Phoneme::G => 2,
            Phoneme::E => 3,
            Phoneme::C | Phoneme::H => 4,
            Phoneme::D => 5,
        }
    }

    /// Single-letter code used in cache keys and manifest entries.
    pub fn as_str(self) -> &'static str {
        match self {
            Phoneme::A => "A",
            Phoneme::B => "B",
            Phoneme::C => "C",
            Phoneme::D => "D",
            Phoneme::E => "E",
            Phoneme::F => "F",
            Phoneme::G => "G",
            Phoneme::H => "H",
        }
    }
}

impl Default for Phoneme {
    fn default() -> Self {
        Phoneme::A
    }
}

impl fmt::Display for Phoneme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phoneme {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Phoneme::A),
            "B" => Ok(Phoneme::B),
            "C" => Ok(Phoneme::C),
            "D" => Ok(Phoneme::D),
            "E" => Ok(Phoneme::E),
            "F" => Ok(Phoneme::F),
            "G" => Ok(Phoneme::G),
            "H" => Ok(Phoneme::H),
            // Rest/unknown collapses to the closed mouth.
            "X" => Ok(Phoneme::A),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Phoneme::D.priority() > Phoneme::C.priority());
        assert!(Phoneme::C.priority() > Phoneme::B.priority());
        assert_eq!(Phoneme::A.priority(), 0);
        assert_eq!(Phoneme::H.priority(), Phoneme::C.priority());
    }

    #[test]
    fn test_unknown_maps_to_rest() {
        assert_eq!("X".parse::<Phoneme>().unwrap(), Phoneme::A);
        assert_eq!("x".parse::<Phoneme>().unwrap(), Phoneme::A);
        assert!("Z".parse::<Phoneme>().is_err());
    }

    #[test]
    fn test_roundtrip() {
        for p in Phoneme::ALL {
            assert_eq!(p.as_str().parse::<Phoneme>().unwrap(), p);
        }
    }
}
