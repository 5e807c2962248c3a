//! External rhubarb phoneme tool runner.
//!
//! In `LIPSYNC_MODE=rhubarb` the whole clip is analyzed up front by the
//! rhubarb CLI, and the mouth cues are resampled onto the lip-sync frame
//! grid before playback starts.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use toon_models::Phoneme;

use crate::error::{MediaError, MediaResult};

/// One mouth cue from rhubarb: a phoneme held over a time span.
#[derive(Debug, Clone, PartialEq)]
pub struct MouthCue {
    pub start: f64,
    pub end: f64,
    pub phoneme: Phoneme,
}

#[derive(Debug, Deserialize)]
struct RhubarbOutput {
    #[serde(rename = "mouthCues")]
    mouth_cues: Vec<RhubarbCue>,
}

#[derive(Debug, Deserialize)]
struct RhubarbCue {
    start: f64,
    end: f64,
    value: String,
}

/// Run rhubarb over a WAV clip, returning its mouth cues.
pub async fn run_rhubarb(wav_path: impl AsRef<Path>) -> MediaResult<Vec<MouthCue>> {
    let wav_path = wav_path.as_ref();
    if !wav_path.exists() {
        return Err(MediaError::FileNotFound(wav_path.to_path_buf()));
    }

    which::which("rhubarb").map_err(|_| MediaError::RhubarbNotFound)?;

    let output = Command::new("rhubarb")
        .args(["-f", "json", "--machineReadable"])
        .arg(wav_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::ffmpeg_failed(
            "rhubarb failed",
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
            output.status.code(),
        ));
    }

    let parsed: RhubarbOutput = serde_json::from_slice(&output.stdout)?;
    let cues = parsed
        .mouth_cues
        .into_iter()
        .filter_map(|c| {
            // Unknown letters (including rhubarb's X) collapse to rest.
            let phoneme = c.value.parse().unwrap_or(Phoneme::A);
            (c.end > c.start).then_some(MouthCue {
                start: c.start,
                end: c.end,
                phoneme,
            })
        })
        .collect::<Vec<_>>();

    debug!(path = %wav_path.display(), cues = cues.len(), "rhubarb analysis complete");
    Ok(cues)
}

/// Resample mouth cues onto the lip-sync frame grid.
///
/// Frame `f` takes the phoneme of the cue containing time `f / fps`;
/// gaps between cues hold `A`.
pub fn phoneme_timeline(cues: &[MouthCue], fps: u32, duration: f64) -> Vec<Phoneme> {
    let frame_count = (duration * fps as f64).ceil() as usize;
    let mut timeline = vec![Phoneme::A; frame_count];

    for cue in cues {
        let first = (cue.start * fps as f64).floor().max(0.0) as usize;
        let last = ((cue.end * fps as f64).ceil() as usize).min(frame_count);
        for slot in timeline.iter_mut().take(last).skip(first) {
            *slot = cue.phoneme;
        }
    }

    timeline
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_from_cues() {
        let cues = vec![
            MouthCue {
                start: 0.0,
                end: 0.1,
                phoneme: Phoneme::B,
            },
            MouthCue {
                start: 0.2,
                end: 0.3,
                phoneme: Phoneme::D,
            },
        ];
        let timeline = phoneme_timeline(&cues, 30, 0.4);
        assert_eq!(timeline.len(), 12);
        assert_eq!(timeline[0], Phoneme::B);
        assert_eq!(timeline[2], Phoneme::B);
        // Gap holds rest.
        assert_eq!(timeline[4], Phoneme::A);
        assert_eq!(timeline[7], Phoneme::D);
        assert_eq!(timeline[11], Phoneme::A);
    }

    #[test]
    fn test_timeline_empty_cues() {
        let timeline = phoneme_timeline(&[], 30, 1.0);
        assert_eq!(timeline.len(), 30);
        assert!(timeline.iter().all(|&p| p == Phoneme::A));
    }

    #[test]
    fn test_parse_rhubarb_json() {
        let json = r#"{"metadata": {"soundFile": "a.wav", "duration": 1.0},
                       "mouthCues": [
                         {"start": 0.0, "end": 0.5, "value": "X"},
                         {"start": 0.5, "end": 1.0, "value": "C"}]}"#;
        let parsed: RhubarbOutput = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.mouth_cues.len(), 2);
        assert_eq!(parsed.mouth_cues[0].value, "X");
    }
}
