//! FFmpeg CLI bridge for the ToonStream engine.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building for multi-input pipelines
//! - Media probing via ffprobe JSON
//! - Audio decode to mono f32 PCM and video decode to raw RGBA frames
//! - The long-running continuous HLS encoder (raw RGB video on stdin,
//!   S16LE stereo PCM on a FIFO) with a restart watchdog
//! - The external `rhubarb` phoneme tool runner

pub mod command;
pub mod decode;
pub mod encoder;
pub mod error;
pub mod probe;
pub mod rhubarb;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand};
pub use decode::{decode_audio_f32_mono, decode_video_rgba, extract_audio_track, RawFrame};
pub use encoder::ContinuousEncoder;
pub use error::{MediaError, MediaResult};
pub use probe::{probe_media, MediaInfo};
pub use rhubarb::{phoneme_timeline, run_rhubarb, MouthCue};
