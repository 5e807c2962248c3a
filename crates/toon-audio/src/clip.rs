//! Decoded audio clips.

use toon_models::CharacterSide;

/// A fully decoded spoken line: mono f32 samples plus speaker metadata.
///
/// Owned exclusively by `SyncedPlayback` while the line plays and released
/// when it completes.
#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Mono samples in [-1, 1].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Duration in seconds, derived from the sample count.
    pub duration: f64,
    /// The speaking character.
    pub character: CharacterSide,
    /// Caption text shown while the line plays.
    pub caption: String,
}

impl AudioClip {
    /// Create a clip from decoded samples.
    pub fn new(
        samples: Vec<f32>,
        sample_rate: u32,
        character: CharacterSide,
        caption: impl Into<String>,
    ) -> Self {
        let duration = samples.len() as f64 / sample_rate as f64;
        Self {
            samples,
            sample_rate,
            duration,
            character,
            caption: caption.into(),
        }
    }
}
