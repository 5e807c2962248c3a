//! Synced clip playback.
//!
//! `SyncedPlayback` owns the decoded clip while it plays, feeding the
//! analyzer one frame window at a time for the compositor and handing the
//! encoder per-video-frame slices of the pre-resampled PCM buffer.

use tracing::debug;

use toon_models::{CharacterSide, Phoneme, StreamSettings};

use crate::clip::AudioClip;
use crate::lipsync::LipSyncAnalyzer;
use crate::resample::resample_to_s16le_stereo;

/// Snapshot of the current playback position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackProgress {
    pub playing: bool,
    /// Current video frame within the clip.
    pub frame: u64,
    pub total_frames: u64,
    pub character: Option<CharacterSide>,
}

struct ActiveClip {
    clip: AudioClip,
    analyzer: LipSyncAnalyzer,
    /// Whole-clip phoneme timeline when an external tool analyzed it.
    timeline: Option<Vec<Phoneme>>,
    samples_per_frame: usize,
    /// Next analyzer frame to consume; advanced linearly.
    analyzed_frames: u64,
    last_phoneme: Phoneme,
    wall_clock_ms: f64,
    /// Pre-resampled S16LE stereo PCM for the encoder.
    pcm: Vec<u8>,
    bytes_per_frame: usize,
    video_frame: u64,
    total_video_frames: u64,
    started: bool,
}

/// Playback state machine driving the analyzer and the encoder PCM feed.
pub struct SyncedPlayback {
    settings: StreamSettings,
    active: Option<ActiveClip>,
}

impl SyncedPlayback {
    pub fn new(settings: StreamSettings) -> Self {
        Self {
            settings,
            active: None,
        }
    }

    /// Load a clip: calibrate the analyzer on it and precompute encoder PCM.
    ///
    /// `timeline` carries the whole-clip phoneme track in rhubarb mode.
    pub fn load(&mut self, clip: AudioClip, timeline: Option<Vec<Phoneme>>) {
        let mut analyzer = LipSyncAnalyzer::new();
        analyzer.calibrate(&clip.samples, clip.sample_rate);

        let pcm = resample_to_s16le_stereo(
            &clip.samples,
            clip.sample_rate,
            self.settings.output_sample_rate,
            self.settings.stream_fps,
        );
        let bytes_per_frame = self.settings.audio_bytes_per_frame();
        let total_video_frames = (pcm.len() / bytes_per_frame) as u64;

        debug!(
            character = %clip.character,
            duration = clip.duration,
            video_frames = total_video_frames,
            rhubarb = timeline.is_some(),
            "Clip loaded for playback"
        );

        self.active = Some(ActiveClip {
            samples_per_frame: self.settings.samples_per_lipsync_frame(),
            clip,
            analyzer,
            timeline,
            analyzed_frames: 0,
            last_phoneme: Phoneme::A,
            wall_clock_ms: 0.0,
            pcm,
            bytes_per_frame,
            video_frame: 0,
            total_video_frames,
            started: false,
        });
    }

    /// Begin consuming the clip (the `/playback-start` signal in
    /// separate-audio mode; immediate in synced mode).
    pub fn start(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.started = true;
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_started(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.started)
    }

    /// The speaking character, while a clip is loaded.
    pub fn character(&self) -> Option<CharacterSide> {
        self.active.as_ref().map(|a| a.clip.character)
    }

    /// Caption text of the active clip.
    pub fn caption(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.clip.caption.as_str())
    }

    /// Duration of the active clip in seconds.
    pub fn duration(&self) -> Option<f64> {
        self.active.as_ref().map(|a| a.clip.duration)
    }

    /// Phoneme for lip-sync frame `frame`.
    ///
    /// The analyzer is stateful: frames between the last analyzed position
    /// and `frame` are consumed in order so its history stays linear.
    /// Queries behind the current position return the last emitted phoneme.
    pub fn phoneme_at_frame(&mut self, frame: u64) -> Phoneme {
        let Some(active) = self.active.as_mut() else {
            return Phoneme::A;
        };

        if let Some(timeline) = &active.timeline {
            if timeline.is_empty() {
                return Phoneme::A;
            }
            let idx = (frame as usize).min(timeline.len() - 1);
            active.analyzed_frames = active.analyzed_frames.max(frame + 1);
            active.last_phoneme = timeline[idx];
            return timeline[idx];
        }

        while active.analyzed_frames <= frame {
            let f = active.analyzed_frames as usize;
            let start = f * active.samples_per_frame;
            let end = ((f + 1) * active.samples_per_frame).min(active.clip.samples.len());
            let window: &[f32] = if start < active.clip.samples.len() {
                &active.clip.samples[start..end]
            } else {
                &[]
            };
            active.last_phoneme = active.analyzer.analyze(window);
            active.analyzed_frames += 1;
        }

        active.last_phoneme
    }

    /// Advance the analyzer by elapsed wall-clock time, whole lip-sync
    /// frames only. Used when the stream FPS and analyzer FPS differ and
    /// audio plays out-of-band.
    pub fn tick_wall_clock(&mut self, dt_ms: f64) -> Phoneme {
        let lipsync_fps = self.settings.lipsync_fps as f64;
        let Some(active) = self.active.as_mut() else {
            return Phoneme::A;
        };
        active.wall_clock_ms += dt_ms;
        let target = (active.wall_clock_ms / 1000.0 * lipsync_fps).floor() as u64;
        if target == 0 {
            return active.last_phoneme;
        }
        self.phoneme_at_frame(target - 1)
    }

    /// The next per-video-frame PCM chunk, or `None` when idle/exhausted.
    pub fn next_audio_chunk(&mut self) -> Option<&[u8]> {
        let active = self.active.as_mut()?;
        if !active.started || active.video_frame >= active.total_video_frames {
            return None;
        }
        let start = active.video_frame as usize * active.bytes_per_frame;
        let chunk = &active.pcm[start..start + active.bytes_per_frame];
        active.video_frame += 1;
        Some(chunk)
    }

    /// Whether the encoder-side PCM has been fully consumed.
    pub fn audio_exhausted(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.started && a.video_frame >= a.total_video_frames)
    }

    /// Whether the analyzer has consumed every sample of the clip.
    pub fn analysis_exhausted(&self) -> bool {
        self.active.as_ref().is_some_and(|a| {
            a.started && (a.analyzed_frames as usize * a.samples_per_frame) >= a.clip.samples.len()
        })
    }

    /// Playback position snapshot.
    pub fn progress(&self) -> PlaybackProgress {
        match &self.active {
            Some(active) => PlaybackProgress {
                playing: active.started,
                frame: active.video_frame,
                total_frames: active.total_video_frames,
                character: Some(active.clip.character),
            },
            None => PlaybackProgress {
                playing: false,
                frame: 0,
                total_frames: 0,
                character: None,
            },
        }
    }

    /// Release the active clip, returning it to the caller.
    pub fn clear(&mut self) -> Option<AudioClip> {
        self.active.take().map(|a| a.clip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voiced_clip(seconds: f64) -> AudioClip {
        let rate = 16_000u32;
        let len = (seconds * rate as f64) as usize;
        let samples: Vec<f32> = (0..len)
            .map(|i| 0.6 * (2.0 * std::f32::consts::PI * 200.0 * i as f32 / rate as f32).sin())
            .collect();
        AudioClip::new(samples, rate, CharacterSide::Left, "hello there")
    }

    #[test]
    fn test_idle_playback_is_rest() {
        let mut playback = SyncedPlayback::new(StreamSettings::default());
        assert_eq!(playback.phoneme_at_frame(0), Phoneme::A);
        assert!(playback.next_audio_chunk().is_none());
        assert!(!playback.progress().playing);
    }

    #[test]
    fn test_audio_chunks_cover_whole_clip() {
        let mut playback = SyncedPlayback::new(StreamSettings::default());
        playback.load(voiced_clip(3.0), None);
        playback.start();

        let bytes_per_frame = StreamSettings::default().audio_bytes_per_frame();
        let mut frames = 0u64;
        let mut total = 0usize;
        while let Some(chunk) = playback.next_audio_chunk() {
            assert_eq!(chunk.len(), bytes_per_frame);
            total += chunk.len();
            frames += 1;
        }
        // 3s at 30 fps.
        assert_eq!(frames, 90);
        assert_eq!(total, 90 * bytes_per_frame);
        assert!(playback.audio_exhausted());
    }

    #[test]
    fn test_not_started_yields_no_audio() {
        let mut playback = SyncedPlayback::new(StreamSettings::default());
        playback.load(voiced_clip(1.0), None);
        assert!(playback.next_audio_chunk().is_none());
        playback.start();
        assert!(playback.next_audio_chunk().is_some());
    }

    #[test]
    fn test_phonemes_visit_open_shapes() {
        let mut playback = SyncedPlayback::new(StreamSettings::default());
        playback.load(voiced_clip(2.0), None);
        playback.start();

        let mut seen = std::collections::HashSet::new();
        for f in 0..60 {
            seen.insert(playback.phoneme_at_frame(f));
        }
        assert!(seen.len() >= 2, "phonemes seen: {seen:?}");
        assert!(seen.iter().any(|p| p.priority() > 0));
    }

    #[test]
    fn test_rhubarb_timeline_overrides_analyzer() {
        let mut playback = SyncedPlayback::new(StreamSettings::default());
        let timeline = vec![Phoneme::C; 30];
        playback.load(voiced_clip(1.0), Some(timeline));
        playback.start();
        assert_eq!(playback.phoneme_at_frame(5), Phoneme::C);
        // Past the end holds the final cue.
        assert_eq!(playback.phoneme_at_frame(500), Phoneme::C);
    }

    #[test]
    fn test_wall_clock_advances_whole_frames() {
        let mut playback = SyncedPlayback::new(StreamSettings::default());
        playback.load(voiced_clip(1.0), None);
        playback.start();
        // 10ms is less than one 30fps frame: no advance.
        playback.tick_wall_clock(10.0);
        assert!(!playback.analysis_exhausted());
        // A full second consumes ~30 frames.
        playback.tick_wall_clock(990.0);
        assert!(playback.analysis_exhausted());
    }

    #[test]
    fn test_clear_releases_clip() {
        let mut playback = SyncedPlayback::new(StreamSettings::default());
        playback.load(voiced_clip(1.0), None);
        let clip = playback.clear().unwrap();
        assert_eq!(clip.character, CharacterSide::Left);
        assert!(!playback.is_active());
    }
}
