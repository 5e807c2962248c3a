//! Per-tick frame orchestration.
//!
//! One call per video frame: pull the phoneme, evaluate expressions,
//! update blinks, tick the TV, and hand the cache hierarchy a fully keyed
//! request. Over-budget composites skip the next few frames, repeating the
//! last buffer while audio and analysis keep advancing.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use toon_audio::SyncedPlayback;
use toon_compositor::{
    CaptionOverlay, CompositorResult, FrameInputs, SceneCompositor, TvCompositor,
};
use toon_models::{
    BrowOffset, BrowSideOffset, CharacterSide, ExpressionLimits, ExpressionOffsets,
    ExpressionPlan, EyeOffset, MouthShape, Phoneme, StreamMode, StreamSettings,
};

use crate::blink::BlinkController;
use crate::expression::{EvaluatedExpression, ExpressionEvaluator};

/// Most composites skipped after one over-budget frame.
const MAX_SKIP_FRAMES: u32 = 3;
/// Expression write-back runs every Nth frame.
const EXPRESSION_WRITE_STRIDE: u64 = 3;
/// Smallest non-zero brow movement written back, in pixels.
const BROW_MIN_STEP: i32 = 2;

/// The per-tick orchestrator.
pub struct FramePipeline {
    settings: StreamSettings,
    blink_left: BlinkController,
    blink_right: BlinkController,
    evaluator: ExpressionEvaluator,
    auto_expressions: bool,
    skip_frames: u32,
    last_jpeg: Option<Arc<Vec<u8>>>,
    last_wall_tick: Option<Instant>,
}

impl FramePipeline {
    pub fn new(settings: StreamSettings) -> Self {
        let fps = settings.stream_fps;
        Self {
            settings,
            blink_left: BlinkController::new(fps),
            blink_right: BlinkController::new(fps),
            evaluator: ExpressionEvaluator::new(),
            auto_expressions: true,
            skip_frames: 0,
            last_jpeg: None,
            last_wall_tick: None,
        }
    }

    /// Load a plan for the line that just started.
    pub fn load_plan(&mut self, plan: &ExpressionPlan, limits: &ExpressionLimits) {
        self.evaluator.load_plan(plan, limits);
    }

    /// Drop the plan when the line completes.
    pub fn reset_plan(&mut self) {
        self.evaluator.reset();
    }

    pub fn set_auto_expressions(&mut self, enabled: bool) {
        self.auto_expressions = enabled;
    }

    /// Composites pending skip, for diagnostics and tests.
    pub fn skip_frames(&self) -> u32 {
        self.skip_frames
    }

    /// Produce the JPEG for stream frame `frame`.
    pub fn tick(
        &mut self,
        frame: u64,
        scene: &mut SceneCompositor,
        tv: &mut TvCompositor,
        playback: &mut SyncedPlayback,
        caption: Option<Arc<CaptionOverlay>>,
    ) -> CompositorResult<Arc<Vec<u8>>> {
        let start = Instant::now();

        // Speaker and phoneme. The analyzer advances even on skip frames
        // so audio and mouth state never drift.
        let progress = playback.progress();
        let speaker = if progress.playing { progress.character } else { None };
        let phoneme = match (speaker, self.settings.stream_mode) {
            (None, _) => Phoneme::A,
            (Some(_), StreamMode::Synced) => {
                let lipsync_frame = progress.frame * self.settings.lipsync_fps as u64
                    / self.settings.stream_fps as u64;
                playback.phoneme_at_frame(lipsync_frame)
            }
            (Some(_), StreamMode::Separate) => {
                let now = Instant::now();
                let dt_ms = self
                    .last_wall_tick
                    .map(|t| now.duration_since(t).as_secs_f64() * 1000.0)
                    .unwrap_or(0.0);
                self.last_wall_tick = Some(now);
                playback.tick_wall_clock(dt_ms)
            }
        };

        // Expression evaluation, throttled, with quantized write-back.
        let mut expression_mouth = None;
        if self.auto_expressions && self.evaluator.is_loaded() && speaker.is_some() {
            let ms = progress.frame * 1000 / self.settings.stream_fps as u64;
            let evaluated = self.evaluator.evaluate_at_ms(ms);
            expression_mouth = speaker
                .and_then(|s| evaluated.get(&s))
                .and_then(|e| e.mouth);
            if frame % EXPRESSION_WRITE_STRIDE == 0 {
                for (character, values) in evaluated {
                    scene.set_offsets(character, offsets_from(&values));
                }
            }
        }

        // Blinks, suppressed for the current speaker.
        let left_blink = self
            .blink_left
            .update(frame, speaker == Some(CharacterSide::Left));
        let right_blink = self
            .blink_right
            .update(frame, speaker == Some(CharacterSide::Right));

        // TV advances once per video tick.
        tv.tick();
        let tv_frame = tv.current_frame();

        // Over-budget recovery: repeat the last buffer, state already moved.
        if self.skip_frames > 0 {
            if let Some(last) = &self.last_jpeg {
                self.skip_frames -= 1;
                return Ok(Arc::clone(last));
            }
            self.skip_frames = 0;
        }

        let (left_phoneme, right_phoneme) = mouth_phonemes(speaker, phoneme, expression_mouth);
        let inputs = FrameInputs {
            left_phoneme,
            right_phoneme,
            left_blink,
            right_blink,
            tv_frame,
            caption,
        };
        let jpeg = scene.render_frame(&inputs)?;
        self.last_jpeg = Some(Arc::clone(&jpeg));

        let elapsed = start.elapsed().as_millis() as u64;
        let budget = self.settings.frame_budget_ms();
        if elapsed > budget {
            let over = (elapsed + budget - 1) / budget - 1;
            self.skip_frames = MAX_SKIP_FRAMES.min(over.max(1) as u32);
            if elapsed * 2 > budget * 3 {
                warn!(frame, elapsed, budget, skip = self.skip_frames, "Composite over budget");
            } else {
                debug!(frame, elapsed, budget, skip = self.skip_frames, "Composite over budget");
            }
        }

        Ok(jpeg)
    }
}

/// Map speaker phoneme and expression mouth onto both characters.
///
/// Expression shapes borrow the reserve mouth slots: a smile shows as `G`
/// and surprise as `H`, but only while the analyzer reports a closed or
/// near-closed mouth so real speech always wins.
fn mouth_phonemes(
    speaker: Option<CharacterSide>,
    phoneme: Phoneme,
    expression_mouth: Option<MouthShape>,
) -> (Phoneme, Phoneme) {
    let effective = match expression_mouth {
        Some(shape) if phoneme <= Phoneme::B => match shape {
            MouthShape::Smile => Phoneme::G,
            MouthShape::Surprise => Phoneme::H,
        },
        _ => phoneme,
    };
    match speaker {
        Some(CharacterSide::Left) => (effective, Phoneme::A),
        Some(CharacterSide::Right) => (Phoneme::A, effective),
        None => (Phoneme::A, Phoneme::A),
    }
}

/// Convert evaluated values into compositor offsets, honoring the minimum
/// brow step so small movements never collapse to zero.
fn offsets_from(values: &EvaluatedExpression) -> ExpressionOffsets {
    ExpressionOffsets {
        eyes: EyeOffset {
            x: values.eye_x,
            y: values.eye_y,
        },
        eyebrows: BrowOffset {
            y: brow_min_step(values.brow_y),
            rotation: 0,
            left: BrowSideOffset {
                y: brow_min_step(values.brow_asym_l),
                rotation: 0,
            },
            right: BrowSideOffset {
                y: brow_min_step(values.brow_asym_r),
                rotation: 0,
            },
            bias: Default::default(),
        },
    }
}

/// Floor non-zero brow movement to +/-2 px.
fn brow_min_step(value: i32) -> i32 {
    if value == 0 {
        0
    } else if value.abs() < BROW_MIN_STEP {
        BROW_MIN_STEP * value.signum()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brow_min_step() {
        assert_eq!(brow_min_step(0), 0);
        assert_eq!(brow_min_step(1), 2);
        assert_eq!(brow_min_step(-1), -2);
        assert_eq!(brow_min_step(7), 7);
    }

    #[test]
    fn test_mouth_phonemes_speaker_sides() {
        assert_eq!(
            mouth_phonemes(Some(CharacterSide::Left), Phoneme::C, None),
            (Phoneme::C, Phoneme::A)
        );
        assert_eq!(
            mouth_phonemes(Some(CharacterSide::Right), Phoneme::D, None),
            (Phoneme::A, Phoneme::D)
        );
        assert_eq!(mouth_phonemes(None, Phoneme::C, None), (Phoneme::A, Phoneme::A));
    }

    #[test]
    fn test_expression_mouth_only_overrides_rest() {
        // Smile shows while the mouth is at rest.
        assert_eq!(
            mouth_phonemes(Some(CharacterSide::Left), Phoneme::A, Some(MouthShape::Smile)),
            (Phoneme::G, Phoneme::A)
        );
        // Real speech beats the expression shape.
        assert_eq!(
            mouth_phonemes(Some(CharacterSide::Left), Phoneme::D, Some(MouthShape::Smile)),
            (Phoneme::D, Phoneme::A)
        );
    }
}
