//! Expression plan evaluation.
//!
//! A loaded plan compiles into piecewise-linear tracks per character (eye
//! x/y, brow travel, per-side brow asymmetry) plus mouth shape intervals.
//! Evaluation at a millisecond offset lerps from the previous keyframe's
//! target toward the current one over its tween, and rounds every numeric
//! output to whole pixels.

use std::collections::HashMap;

use toon_models::{
    Action, BrowEmote, CharacterSide, CharacterLimits, ExpressionLimits, ExpressionPlan, EyeLook,
    MouthShape,
};

/// Tween used when a raise/frown releases back to neutral.
const RELEASE_TWEEN_MS: u64 = 200;
/// Attack tween for raise/frown gestures.
const ATTACK_TWEEN_MS: u64 = 150;
/// Flick up/down phase lengths.
const FLICK_UP_MS: u64 = 120;
const FLICK_DOWN_MS: u64 = 140;
/// Tween for asymmetric brow gestures.
const ASYM_TWEEN_MS: u64 = 80;
/// Tween for the final return to neutral.
const NEUTRAL_TWEEN_MS: u64 = 300;

/// One keyframe on a numeric track.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TrackPoint {
    t: u64,
    target: f64,
    tween_ms: u64,
}

/// One mouth shape interval.
#[derive(Debug, Clone, Copy, PartialEq)]
struct MouthInterval {
    t: u64,
    shape: MouthShape,
    duration_ms: u64,
}

#[derive(Debug, Default, Clone)]
struct CharacterTracks {
    eye_x: Vec<TrackPoint>,
    eye_y: Vec<TrackPoint>,
    brow_y: Vec<TrackPoint>,
    brow_asym_l: Vec<TrackPoint>,
    brow_asym_r: Vec<TrackPoint>,
    mouth: Vec<MouthInterval>,
}

impl CharacterTracks {
    fn numeric_tracks_mut(&mut self) -> [&mut Vec<TrackPoint>; 5] {
        [
            &mut self.eye_x,
            &mut self.eye_y,
            &mut self.brow_y,
            &mut self.brow_asym_l,
            &mut self.brow_asym_r,
        ]
    }
}

/// Evaluated per-character expression values at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluatedExpression {
    pub eye_x: i32,
    pub eye_y: i32,
    pub brow_y: i32,
    pub brow_asym_l: i32,
    pub brow_asym_r: i32,
    pub mouth: Option<MouthShape>,
}

/// Compiles and evaluates expression plans.
#[derive(Default)]
pub struct ExpressionEvaluator {
    tracks: HashMap<CharacterSide, CharacterTracks>,
    total_ms: u64,
}

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a plan is currently loaded.
    pub fn is_loaded(&self) -> bool {
        !self.tracks.is_empty()
    }

    /// Drop the loaded plan.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.total_ms = 0;
    }

    /// Compile a plan into tracks. Replaces any loaded plan, so a refined
    /// plan can hot-swap mid-line.
    pub fn load_plan(&mut self, plan: &ExpressionPlan, limits: &ExpressionLimits) {
        self.tracks.clear();
        self.total_ms = plan.total_ms;
        // Both participants get tracks even when a plan never moves them,
        // so evaluation always reports them back at neutral.
        self.tracks.entry(plan.character).or_default();
        self.tracks.entry(plan.listener).or_default();

        for action in &plan.actions {
            let target = action.target();
            let char_limits = limits.for_character(target);
            let tracks = self.tracks.entry(target).or_default();
            match action {
                Action::Eye {
                    t,
                    look,
                    amount,
                    duration_ms,
                    ..
                } => {
                    let (dx, dy) =
                        resolve_eye_look(*look, target, plan.listener, &char_limits, *amount);
                    tracks.eye_x.push(TrackPoint {
                        t: *t,
                        target: dx,
                        tween_ms: *duration_ms,
                    });
                    tracks.eye_y.push(TrackPoint {
                        t: *t,
                        target: dy,
                        tween_ms: *duration_ms,
                    });
                }
                Action::Brow {
                    t,
                    emote,
                    amount,
                    duration_ms,
                    count,
                    ..
                } => {
                    compile_brow(tracks, &char_limits, *t, *emote, *amount, *duration_ms, *count);
                }
                Action::Mouth {
                    t,
                    shape,
                    duration_ms,
                    ..
                } => {
                    tracks.mouth.push(MouthInterval {
                        t: *t,
                        shape: *shape,
                        duration_ms: *duration_ms,
                    });
                }
            }
        }

        // Every character returns to neutral at the end of the plan.
        let total = plan.total_ms;
        for tracks in self.tracks.values_mut() {
            for track in tracks.numeric_tracks_mut() {
                track.push(TrackPoint {
                    t: total,
                    target: 0.0,
                    tween_ms: NEUTRAL_TWEEN_MS,
                });
                track.sort_by_key(|p| p.t);
            }
            tracks.mouth.sort_by_key(|m| m.t);
        }
    }

    /// Evaluate every known character at `t` milliseconds.
    pub fn evaluate_at_ms(&self, t: u64) -> HashMap<CharacterSide, EvaluatedExpression> {
        self.tracks
            .iter()
            .map(|(character, tracks)| {
                (
                    *character,
                    EvaluatedExpression {
                        eye_x: sample_track(&tracks.eye_x, t),
                        eye_y: sample_track(&tracks.eye_y, t),
                        brow_y: sample_track(&tracks.brow_y, t),
                        brow_asym_l: sample_track(&tracks.brow_asym_l, t),
                        brow_asym_r: sample_track(&tracks.brow_asym_r, t),
                        mouth: sample_mouth(&tracks.mouth, t),
                    },
                )
            })
            .collect()
    }
}

/// Piecewise-linear sample: lerp from the previous point's target toward
/// the active point's target over its tween.
fn sample_track(track: &[TrackPoint], t: u64) -> i32 {
    let idx = match track.iter().rposition(|p| p.t <= t) {
        Some(idx) => idx,
        None => return 0,
    };
    let point = track[idx];
    let prev_target = if idx == 0 { 0.0 } else { track[idx - 1].target };

    let value = if point.tween_ms == 0 {
        point.target
    } else {
        let progress = ((t - point.t) as f64 / point.tween_ms as f64).clamp(0.0, 1.0);
        prev_target + (point.target - prev_target) * progress
    };
    value.round() as i32
}

/// The last interval containing `t` wins.
fn sample_mouth(mouth: &[MouthInterval], t: u64) -> Option<MouthShape> {
    mouth
        .iter()
        .rev()
        .find(|m| t >= m.t && t < m.t + m.duration_ms)
        .map(|m| m.shape)
}

/// Resolve a symbolic eye direction into a pixel offset target.
pub fn resolve_eye_look(
    look: EyeLook,
    character: CharacterSide,
    listener: CharacterSide,
    limits: &CharacterLimits,
    amount: f32,
) -> (f64, f64) {
    let amount = amount.clamp(0.0, 1.0) as f64;
    let eyes = &limits.eyes;
    let left = eyes.min_x as f64 * amount;
    let right = eyes.max_x as f64 * amount;
    let up = eyes.min_y as f64 * amount;
    let down = eyes.max_y as f64 * amount;

    // Looking at the listener means looking across the scene.
    let toward = if listener == character.other() {
        match character {
            CharacterSide::Left => right,
            CharacterSide::Right => left,
        }
    } else {
        0.0
    };
    let away = match character {
        CharacterSide::Left => left,
        CharacterSide::Right => right,
    };

    match look {
        EyeLook::Listener => (toward, 0.0),
        EyeLook::Away => (away, 0.0),
        EyeLook::Up => (0.0, up),
        EyeLook::Down => (0.0, down),
        EyeLook::Left => (left, 0.0),
        EyeLook::Right => (right, 0.0),
        EyeLook::UpLeft => (left, up),
        EyeLook::UpRight => (right, up),
        EyeLook::DownLeft => (left, down),
        EyeLook::DownRight => (right, down),
    }
}

/// Lower one brow action onto the tracks.
fn compile_brow(
    tracks: &mut CharacterTracks,
    limits: &CharacterLimits,
    t: u64,
    emote: BrowEmote,
    amount: f32,
    duration_ms: u64,
    count: Option<u32>,
) {
    let amount = amount.clamp(0.0, 1.0) as f64;
    // Upward travel is negative y.
    let up = limits.eyebrows.min_y as f64 * amount;
    let down = limits.eyebrows.max_y as f64 * amount;

    match emote {
        BrowEmote::Raise => {
            tracks.brow_y.push(TrackPoint {
                t,
                target: up,
                tween_ms: ATTACK_TWEEN_MS,
            });
            tracks.brow_y.push(TrackPoint {
                t: t + duration_ms,
                target: 0.0,
                tween_ms: RELEASE_TWEEN_MS,
            });
        }
        BrowEmote::Frown => {
            tracks.brow_y.push(TrackPoint {
                t,
                target: down,
                tween_ms: ATTACK_TWEEN_MS,
            });
            tracks.brow_y.push(TrackPoint {
                t: t + duration_ms,
                target: 0.0,
                tween_ms: RELEASE_TWEEN_MS,
            });
        }
        BrowEmote::Flick => {
            let count = count.unwrap_or(1).max(1) as u64;
            let phase = FLICK_UP_MS + FLICK_DOWN_MS;
            for i in 0..count {
                let start = t + i * phase;
                tracks.brow_y.push(TrackPoint {
                    t: start,
                    target: up,
                    tween_ms: FLICK_UP_MS,
                });
                tracks.brow_y.push(TrackPoint {
                    t: start + FLICK_UP_MS,
                    target: 0.0,
                    tween_ms: FLICK_DOWN_MS,
                });
            }
        }
        BrowEmote::Skeptical => {
            push_asym(&mut tracks.brow_asym_l, t, up, duration_ms);
            push_asym(&mut tracks.brow_asym_r, t, down / 2.0, duration_ms);
        }
        BrowEmote::SkepticalLeft => {
            push_asym(&mut tracks.brow_asym_l, t, up, duration_ms);
        }
        BrowEmote::SkepticalRight => {
            push_asym(&mut tracks.brow_asym_r, t, up, duration_ms);
        }
        BrowEmote::AsymUpLeft => {
            push_asym(&mut tracks.brow_asym_l, t, up, duration_ms);
        }
        BrowEmote::AsymUpRight => {
            push_asym(&mut tracks.brow_asym_r, t, up, duration_ms);
        }
    }
}

fn push_asym(track: &mut Vec<TrackPoint>, t: u64, target: f64, duration_ms: u64) {
    track.push(TrackPoint {
        t,
        target,
        tween_ms: ASYM_TWEEN_MS,
    });
    track.push(TrackPoint {
        t: t + duration_ms,
        target: 0.0,
        tween_ms: ASYM_TWEEN_MS,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use toon_models::ExpressionPlan;

    fn limits() -> ExpressionLimits {
        ExpressionLimits::default()
    }

    fn plan_with(actions: Vec<Action>) -> ExpressionPlan {
        ExpressionPlan {
            character: CharacterSide::Left,
            listener: CharacterSide::Right,
            total_ms: 3000,
            actions,
        }
    }

    #[test]
    fn test_unloaded_evaluates_empty() {
        let evaluator = ExpressionEvaluator::new();
        assert!(evaluator.evaluate_at_ms(100).is_empty());
    }

    #[test]
    fn test_eye_look_tweens_toward_target() {
        let mut evaluator = ExpressionEvaluator::new();
        evaluator.load_plan(
            &plan_with(vec![Action::Eye {
                t: 0,
                target: CharacterSide::Left,
                look: EyeLook::Listener,
                amount: 1.0,
                duration_ms: 400,
            }]),
            &limits(),
        );

        let start = evaluator.evaluate_at_ms(0)[&CharacterSide::Left];
        let mid = evaluator.evaluate_at_ms(200)[&CharacterSide::Left];
        let done = evaluator.evaluate_at_ms(400)[&CharacterSide::Left];

        // Left character looks right toward the listener: +x, ramping in.
        assert_eq!(start.eye_x, 0);
        assert!(mid.eye_x > 0 && mid.eye_x < 20, "mid {}", mid.eye_x);
        assert_eq!(done.eye_x, 20);
    }

    #[test]
    fn test_returns_to_neutral_at_total() {
        let mut evaluator = ExpressionEvaluator::new();
        evaluator.load_plan(
            &plan_with(vec![Action::Eye {
                t: 0,
                target: CharacterSide::Left,
                look: EyeLook::Up,
                amount: 1.0,
                duration_ms: 200,
            }]),
            &limits(),
        );

        let held = evaluator.evaluate_at_ms(2900)[&CharacterSide::Left];
        assert!(held.eye_y < 0);
        let after = evaluator.evaluate_at_ms(3000 + NEUTRAL_TWEEN_MS)[&CharacterSide::Left];
        assert_eq!(after.eye_y, 0);
    }

    #[test]
    fn test_brow_raise_and_release() {
        let mut evaluator = ExpressionEvaluator::new();
        evaluator.load_plan(
            &plan_with(vec![Action::Brow {
                t: 100,
                target: CharacterSide::Left,
                emote: BrowEmote::Raise,
                amount: 1.0,
                duration_ms: 600,
                count: None,
            }]),
            &limits(),
        );

        // Fully raised after the attack tween: -20 (up).
        let raised = evaluator.evaluate_at_ms(100 + ATTACK_TWEEN_MS)[&CharacterSide::Left];
        assert_eq!(raised.brow_y, -20);
        // Released 200ms after the hold ends.
        let released = evaluator.evaluate_at_ms(700 + RELEASE_TWEEN_MS)[&CharacterSide::Left];
        assert_eq!(released.brow_y, 0);
    }

    #[test]
    fn test_flick_repeats() {
        let mut evaluator = ExpressionEvaluator::new();
        evaluator.load_plan(
            &plan_with(vec![Action::Brow {
                t: 0,
                target: CharacterSide::Left,
                emote: BrowEmote::Flick,
                amount: 1.0,
                duration_ms: 0,
                count: Some(2),
            }]),
            &limits(),
        );

        // Peak of the first flick.
        let peak1 = evaluator.evaluate_at_ms(FLICK_UP_MS)[&CharacterSide::Left];
        assert_eq!(peak1.brow_y, -20);
        // Bottom between flicks.
        let trough = evaluator.evaluate_at_ms(FLICK_UP_MS + FLICK_DOWN_MS)[&CharacterSide::Left];
        assert_eq!(trough.brow_y, 0);
        // Peak of the second flick.
        let peak2 =
            evaluator.evaluate_at_ms(FLICK_UP_MS + FLICK_DOWN_MS + FLICK_UP_MS)[&CharacterSide::Left];
        assert_eq!(peak2.brow_y, -20);
    }

    #[test]
    fn test_skeptical_is_asymmetric() {
        let mut evaluator = ExpressionEvaluator::new();
        evaluator.load_plan(
            &plan_with(vec![Action::Brow {
                t: 0,
                target: CharacterSide::Left,
                emote: BrowEmote::Skeptical,
                amount: 1.0,
                duration_ms: 500,
                count: None,
            }]),
            &limits(),
        );

        let mid = evaluator.evaluate_at_ms(ASYM_TWEEN_MS)[&CharacterSide::Left];
        assert!(mid.brow_asym_l < 0);
        assert!(mid.brow_asym_r > 0);
        assert_ne!(mid.brow_asym_l, mid.brow_asym_r);
    }

    #[test]
    fn test_mouth_interval_containment() {
        let mut evaluator = ExpressionEvaluator::new();
        evaluator.load_plan(
            &plan_with(vec![Action::Mouth {
                t: 500,
                target: CharacterSide::Left,
                shape: MouthShape::Smile,
                duration_ms: 400,
            }]),
            &limits(),
        );

        assert_eq!(evaluator.evaluate_at_ms(400)[&CharacterSide::Left].mouth, None);
        assert_eq!(
            evaluator.evaluate_at_ms(700)[&CharacterSide::Left].mouth,
            Some(MouthShape::Smile)
        );
        assert_eq!(evaluator.evaluate_at_ms(900)[&CharacterSide::Left].mouth, None);
    }

    #[test]
    fn test_outputs_are_integers_everywhere() {
        // Integer outputs hold by construction; sweep for panics and check
        // a few odd sample times.
        let mut evaluator = ExpressionEvaluator::new();
        evaluator.load_plan(
            &plan_with(vec![
                Action::Eye {
                    t: 33,
                    target: CharacterSide::Left,
                    look: EyeLook::DownRight,
                    amount: 0.37,
                    duration_ms: 313,
                },
                Action::Brow {
                    t: 250,
                    target: CharacterSide::Left,
                    emote: BrowEmote::Frown,
                    amount: 0.61,
                    duration_ms: 471,
                    count: None,
                },
            ]),
            &limits(),
        );
        for t in (0..3500).step_by(7) {
            let _ = evaluator.evaluate_at_ms(t);
        }
    }

    #[test]
    fn test_reset_unloads() {
        let mut evaluator = ExpressionEvaluator::new();
        evaluator.load_plan(&plan_with(vec![]), &limits());
        assert!(evaluator.is_loaded());
        evaluator.reset();
        assert!(!evaluator.is_loaded());
    }
}
