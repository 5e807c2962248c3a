//! Stream and encoder settings.
//!
//! Resolved once at startup from environment variables, in the same way the
//! API config is; the frame loop reads them as plain values thereafter.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Whether clip audio is muxed into the HLS stream or played out-of-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Audio is resampled and written to the encoder in lockstep with video.
    Synced,
    /// Audio plays elsewhere; the analyzer runs on a wall-clock tick.
    Separate,
}

impl FromStr for StreamMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "synced" => Ok(StreamMode::Synced),
            "separate" => Ok(StreamMode::Separate),
            _ => Err(()),
        }
    }
}

/// Which lip-sync backend drives the mouth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LipSyncMode {
    /// The in-process energy analyzer.
    Realtime,
    /// The external rhubarb tool, run once over the whole clip.
    Rhubarb,
}

impl FromStr for LipSyncMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "realtime" => Ok(LipSyncMode::Realtime),
            "rhubarb" => Ok(LipSyncMode::Rhubarb),
            _ => Err(()),
        }
    }
}

/// Fixed stream parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Output video frame rate.
    pub stream_fps: u32,
    /// Independent frame rate of the lip-sync analyzer.
    pub lipsync_fps: u32,
    /// Scale applied to native-resolution layers at load time.
    pub output_scale: f64,
    /// Sample rate clips are decoded to for analysis.
    pub clip_sample_rate: u32,
    /// Sample rate of the encoder's PCM input.
    pub output_sample_rate: u32,
    pub stream_mode: StreamMode,
    pub lipsync_mode: LipSyncMode,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            stream_fps: 30,
            lipsync_fps: 30,
            output_scale: 1.0 / 3.0,
            clip_sample_rate: 16_000,
            output_sample_rate: 44_100,
            stream_mode: StreamMode::Synced,
            lipsync_mode: LipSyncMode::Realtime,
        }
    }
}

impl StreamSettings {
    /// Resolve settings from `STREAM_MODE`, `LIPSYNC_MODE`, `STREAM_FPS`,
    /// and `OUTPUT_SCALE`, keeping defaults where unset.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(mode) = std::env::var("STREAM_MODE") {
            if let Ok(mode) = mode.parse() {
                settings.stream_mode = mode;
            }
        }
        if let Ok(mode) = std::env::var("LIPSYNC_MODE") {
            if let Ok(mode) = mode.parse() {
                settings.lipsync_mode = mode;
            }
        }
        if let Some(fps) = std::env::var("STREAM_FPS").ok().and_then(|v| v.parse().ok()) {
            settings.stream_fps = fps;
        }
        if let Some(scale) = std::env::var("OUTPUT_SCALE").ok().and_then(|v| v.parse().ok()) {
            settings.output_scale = scale;
        }
        settings
    }

    /// Per-frame time budget in milliseconds.
    pub fn frame_budget_ms(&self) -> u64 {
        (1000 / self.stream_fps.max(1)) as u64
    }

    /// Analyzer samples consumed per lip-sync frame.
    pub fn samples_per_lipsync_frame(&self) -> usize {
        (self.clip_sample_rate as f64 / self.lipsync_fps as f64).round() as usize
    }

    /// Output PCM samples per video frame (per channel).
    pub fn samples_per_video_frame(&self) -> usize {
        (self.output_sample_rate / self.stream_fps) as usize
    }

    /// Bytes of S16LE stereo PCM written per video frame.
    pub fn audio_bytes_per_frame(&self) -> usize {
        self.samples_per_video_frame() * 2 * 2
    }
}

/// Continuous HLS encoder parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderSettings {
    /// x264 preset; ultrafast keeps the encode inside the frame budget.
    pub preset: String,
    pub tune: String,
    pub crf: u8,
    pub audio_bitrate: String,
    /// Target HLS segment length in seconds.
    pub segment_seconds: u32,
    /// Number of segments kept in the rolling playlist window.
    pub playlist_size: u32,
    /// Directory the playlist and segments are written to.
    pub stream_dir: PathBuf,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            preset: "ultrafast".to_string(),
            tune: "zerolatency".to_string(),
            crf: 25,
            audio_bitrate: "128k".to_string(),
            segment_seconds: 1,
            playlist_size: 6,
            stream_dir: PathBuf::from("streams/live"),
        }
    }
}

impl EncoderSettings {
    /// Resolve from `STREAM_DIR` and `ENCODER_CRF`, keeping defaults
    /// where unset.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(dir) = std::env::var("STREAM_DIR") {
            settings.stream_dir = PathBuf::from(dir);
        }
        if let Some(crf) = std::env::var("ENCODER_CRF").ok().and_then(|v| v.parse().ok()) {
            settings.crf = crf;
        }
        settings
    }

    /// Path of the rolling playlist.
    pub fn playlist_path(&self) -> PathBuf {
        self.stream_dir.join("stream.m3u8")
    }

    /// Segment filename pattern handed to the muxer.
    pub fn segment_pattern(&self) -> PathBuf {
        self.stream_dir.join("segment_%03d.ts")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_bytes_per_frame() {
        let settings = StreamSettings::default();
        // floor(44100 / 30) * 2 channels * 2 bytes
        assert_eq!(settings.audio_bytes_per_frame(), 1470 * 4);
    }

    #[test]
    fn test_samples_per_lipsync_frame() {
        let settings = StreamSettings::default();
        assert_eq!(settings.samples_per_lipsync_frame(), 533);
    }

    #[test]
    fn test_frame_budget() {
        let settings = StreamSettings::default();
        assert_eq!(settings.frame_budget_ms(), 33);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("synced".parse::<StreamMode>().unwrap(), StreamMode::Synced);
        assert_eq!("SEPARATE".parse::<StreamMode>().unwrap(), StreamMode::Separate);
        assert_eq!("rhubarb".parse::<LipSyncMode>().unwrap(), LipSyncMode::Rhubarb);
        assert!("other".parse::<StreamMode>().is_err());
    }

    #[test]
    fn test_playlist_paths() {
        let settings = EncoderSettings::default();
        assert!(settings.playlist_path().ends_with("stream.m3u8"));
        assert!(settings
            .segment_pattern()
            .to_string_lossy()
            .contains("segment_%03d.ts"));
    }
}
