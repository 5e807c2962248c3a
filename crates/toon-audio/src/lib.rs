//! Real-time lip-sync analysis and synced playback.
//!
//! This crate provides:
//! - The stateful energy analyzer that maps PCM windows to visual phonemes
//! - Self-calibration of analyzer thresholds from the clip's first second
//! - Synced playback: per-frame analysis windows for the compositor and
//!   per-frame S16LE PCM windows for the encoder
//! - The one-shot nearest-sample resampler that prepares the encoder PCM

pub mod clip;
pub mod lipsync;
pub mod playback;
pub mod resample;

pub use clip::AudioClip;
pub use lipsync::{LipSyncAnalyzer, LipSyncThresholds};
pub use playback::{PlaybackProgress, SyncedPlayback};
pub use resample::{resample_to_s16le_stereo, silence_chunk};
