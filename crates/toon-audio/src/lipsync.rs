//! Energy-based real-time lip-sync analysis.
//!
//! Each per-frame PCM window is split into overlapping sub-windows; every
//! sub-window is classified to a phoneme by cascading energy and
//! zero-crossing rules, and the most open candidate wins the frame.
//! Thresholds adapt to the clip via percentile calibration on its first
//! second of audio.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use toon_models::Phoneme;

/// Sub-windows analyzed per frame window.
const ANALYSIS_MULTIPLIER: usize = 6;
/// Rolling energy history length, in sub-windows.
const ENERGY_HISTORY: usize = 10;
/// Frames a fricative is held against non-fricative candidates.
const F_HOLD_MAX_FRAMES: u32 = 2;
/// Consecutive frames a new phoneme must persist before committing.
const MIN_HOLD_FRAMES: u32 = 1;
/// Samples below this are ignored during calibration.
const CALIBRATION_FLOOR: f32 = 0.001;

/// Adaptive classification thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LipSyncThresholds {
    pub silence: f32,
    pub low_energy: f32,
    pub medium_energy: f32,
    pub high_energy: f32,
    pub fricative_zcr: f32,
}

impl Default for LipSyncThresholds {
    fn default() -> Self {
        Self {
            silence: 0.01,
            low_energy: 0.03,
            medium_energy: 0.07,
            high_energy: 0.12,
            fricative_zcr: 0.30,
        }
    }
}

/// Measurements for one analysis sub-window.
#[derive(Debug, Clone, Copy)]
struct SubWindow {
    rms: f32,
    zcr: f32,
    peak: f32,
}

/// Stateful energy analyzer mapping PCM windows to phonemes.
pub struct LipSyncAnalyzer {
    thresholds: LipSyncThresholds,
    energy_history: VecDeque<f32>,
    last_phoneme: Phoneme,
    /// Candidate phoneme waiting out its hold frames.
    pending: Option<(Phoneme, u32)>,
    f_hold_frames: u32,
}

impl Default for LipSyncAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LipSyncAnalyzer {
    /// Create an analyzer with default thresholds.
    pub fn new() -> Self {
        Self {
            thresholds: LipSyncThresholds::default(),
            energy_history: VecDeque::with_capacity(ENERGY_HISTORY),
            last_phoneme: Phoneme::A,
            pending: None,
            f_hold_frames: 0,
        }
    }

    /// Current thresholds (defaults until calibration runs).
    pub fn thresholds(&self) -> LipSyncThresholds {
        self.thresholds
    }

    /// Clear rolling history and the smoothing state.
    pub fn reset(&mut self) {
        self.energy_history.clear();
        self.last_phoneme = Phoneme::A;
        self.pending = None;
        self.f_hold_frames = 0;
    }

    /// Calibrate thresholds from the first second of a clip.
    ///
    /// Sub-window RMS values above the floor are sorted and the thresholds
    /// set from percentiles. If the second is silent, defaults stay.
    pub fn calibrate(&mut self, samples: &[f32], sample_rate: u32) {
        let first_second = &samples[..samples.len().min(sample_rate as usize)];
        let frame_len = (sample_rate as usize / 30).max(1);
        let win = sub_window_len(frame_len);

        let mut rms_values: Vec<f32> = first_second
            .chunks(win.max(1))
            .map(rms_of)
            .filter(|&r| r > CALIBRATION_FLOOR)
            .collect();

        if rms_values.is_empty() {
            debug!("Calibration found no energy above floor, keeping defaults");
            return;
        }

        rms_values.sort_by(|a, b| a.total_cmp(b));
        let pct = |p: f64| -> f32 {
            let idx = ((rms_values.len() - 1) as f64 * p).round() as usize;
            rms_values[idx]
        };

        self.thresholds = LipSyncThresholds {
            silence: pct(0.10) * 0.5,
            low_energy: pct(0.50) * 0.8,
            medium_energy: pct(0.75) * 0.9,
            high_energy: pct(0.90) * 0.9,
            fricative_zcr: self.thresholds.fricative_zcr,
        };

        debug!(
            silence = self.thresholds.silence,
            low = self.thresholds.low_energy,
            medium = self.thresholds.medium_energy,
            high = self.thresholds.high_energy,
            "Lip-sync thresholds calibrated"
        );
    }

    /// Analyze one per-frame window of mono samples.
    pub fn analyze(&mut self, samples: &[f32]) -> Phoneme {
        if samples.is_empty() {
            return self.smooth(Phoneme::A);
        }

        let win = sub_window_len(samples.len()).max(1);
        let hop = (win / 2).max(1);

        let mut best: Option<(Phoneme, f32)> = None;
        let mut start = 0;
        for _ in 0..ANALYSIS_MULTIPLIER {
            let end = (start + win).min(samples.len());
            if start >= end {
                break;
            }
            let sub = measure(&samples[start..end]);

            self.energy_history.push_back(sub.rms);
            while self.energy_history.len() > ENERGY_HISTORY {
                self.energy_history.pop_front();
            }

            let phoneme = self.classify(&sub);
            let energy_score = (sub.rms / self.thresholds.high_energy).min(1.0);
            let score = phoneme.priority() as f32 + energy_score;
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((phoneme, score));
            }

            start += hop;
        }

        let candidate = best.map(|(p, _)| p).unwrap_or(Phoneme::A);
        self.smooth(candidate)
    }

    /// Cascading classification of one sub-window.
    fn classify(&self, sub: &SubWindow) -> Phoneme {
        let t = &self.thresholds;

        if sub.rms < t.silence {
            // A quiet window with a sharp peak is a soft plosive.
            if sub.peak > 3.0 * t.silence {
                return Phoneme::B;
            }
            return Phoneme::A;
        }
        if sub.rms < t.low_energy {
            return Phoneme::B;
        }
        if sub.zcr > t.fricative_zcr && sub.rms > 0.7 * t.medium_energy {
            return Phoneme::F;
        }
        if sub.rms > 1.3 * t.high_energy {
            return Phoneme::D;
        }
        if sub.rms > t.high_energy && sub.zcr < 0.15 {
            return Phoneme::C;
        }
        if sub.rms > t.medium_energy {
            return if sub.zcr > 0.12 { Phoneme::C } else { Phoneme::E };
        }
        if sub.rms > t.low_energy {
            return Phoneme::B;
        }
        Phoneme::A
    }

    /// Temporal smoothing: fricatives are held briefly, and any switch
    /// needs one confirming frame.
    fn smooth(&mut self, candidate: Phoneme) -> Phoneme {
        if self.last_phoneme == Phoneme::F
            && candidate != Phoneme::F
            && self.f_hold_frames < F_HOLD_MAX_FRAMES
        {
            self.f_hold_frames += 1;
            return Phoneme::F;
        }

        if candidate == self.last_phoneme {
            self.pending = None;
            return candidate;
        }

        match self.pending {
            Some((pending, count)) if pending == candidate => {
                if count >= MIN_HOLD_FRAMES {
                    self.last_phoneme = candidate;
                    self.pending = None;
                    self.f_hold_frames = 0;
                    candidate
                } else {
                    self.pending = Some((pending, count + 1));
                    self.last_phoneme
                }
            }
            _ => {
                self.pending = Some((candidate, 1));
                self.last_phoneme
            }
        }
    }

    /// Rolling average of recent sub-window energy.
    pub fn average_energy(&self) -> f32 {
        if self.energy_history.is_empty() {
            return 0.0;
        }
        self.energy_history.iter().sum::<f32>() / self.energy_history.len() as f32
    }
}

/// Sub-window length for 50% overlap coverage of `frame_len`.
fn sub_window_len(frame_len: usize) -> usize {
    (frame_len * 2) / (ANALYSIS_MULTIPLIER + 1)
}

fn rms_of(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

fn measure(samples: &[f32]) -> SubWindow {
    let rms = rms_of(samples);
    let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    let zcr = crossings as f32 / samples.len().max(1) as f32;
    SubWindow { rms, zcr, peak }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, amplitude: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    /// Drive the analyzer past its smoothing holds.
    fn settled(analyzer: &mut LipSyncAnalyzer, window: &[f32]) -> Phoneme {
        let mut last = Phoneme::A;
        for _ in 0..4 {
            last = analyzer.analyze(window);
        }
        last
    }

    #[test]
    fn test_silence_is_rest() {
        let mut analyzer = LipSyncAnalyzer::new();
        assert_eq!(settled(&mut analyzer, &vec![0.0; 533]), Phoneme::A);
    }

    #[test]
    fn test_loud_vowel_is_open() {
        let mut analyzer = LipSyncAnalyzer::new();
        let window = sine(220.0, 0.8, 16_000, 533);
        let phoneme = settled(&mut analyzer, &window);
        assert!(phoneme.priority() >= Phoneme::C.priority(), "got {phoneme}");
    }

    #[test]
    fn test_switch_requires_hold_frame() {
        let mut analyzer = LipSyncAnalyzer::new();
        let loud = sine(220.0, 0.8, 16_000, 533);
        // First loud frame is still the previous (rest) phoneme.
        assert_eq!(analyzer.analyze(&loud), Phoneme::A);
        // The confirming frame commits.
        assert_ne!(analyzer.analyze(&loud), Phoneme::A);
    }

    #[test]
    fn test_calibration_adapts_thresholds() {
        let mut analyzer = LipSyncAnalyzer::new();
        let clip = sine(220.0, 0.5, 16_000, 16_000);
        analyzer.calibrate(&clip, 16_000);
        let t = analyzer.thresholds();
        assert!(t.silence > 0.0);
        assert!(t.low_energy > t.silence);
        assert!(t.high_energy >= t.medium_energy);
        // A half-amplitude sine has RMS ~0.35, so high lands well above default.
        assert!(t.high_energy > LipSyncThresholds::default().high_energy);
    }

    #[test]
    fn test_calibration_degenerate_keeps_defaults() {
        let mut analyzer = LipSyncAnalyzer::new();
        analyzer.calibrate(&vec![0.0005; 16_000], 16_000);
        assert_eq!(analyzer.thresholds(), LipSyncThresholds::default());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut analyzer = LipSyncAnalyzer::new();
        let loud = sine(220.0, 0.8, 16_000, 533);
        settled(&mut analyzer, &loud);
        analyzer.reset();
        assert_eq!(analyzer.average_energy(), 0.0);
        assert_eq!(settled(&mut analyzer, &vec![0.0; 533]), Phoneme::A);
    }

    #[test]
    fn test_loud_clip_not_mostly_rest() {
        // Energy sanity: a calibrated analyzer over a loud clip must spend
        // most frames off the rest mouth.
        let mut analyzer = LipSyncAnalyzer::new();
        let rate = 16_000u32;
        let clip: Vec<f32> = (0..rate as usize * 2)
            .map(|i| {
                let t = i as f32 / rate as f32;
                // Amplitude-modulated voiced signal.
                (0.3 + 0.5 * (2.0 * std::f32::consts::PI * 2.0 * t).sin().abs())
                    * (2.0 * std::f32::consts::PI * 180.0 * t).sin()
            })
            .collect();
        analyzer.calibrate(&clip, rate);

        let spf = (rate / 30) as usize;
        let mut open_frames = 0;
        let mut total = 0;
        for window in clip.chunks_exact(spf) {
            if analyzer.analyze(window) != Phoneme::A {
                open_frames += 1;
            }
            total += 1;
        }
        assert!(open_frames * 2 >= total, "{open_frames}/{total} open");
    }
}
