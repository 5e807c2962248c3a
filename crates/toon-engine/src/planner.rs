//! Heuristic expression planning from line text.
//!
//! Until a refined plan arrives from elsewhere, the spoken text itself is
//! enough to sketch believable motion: glances at the listener on sentence
//! starts, brow raises on exclamations, skeptical tilts on hedges, smiles
//! on warm words. The plan is deterministic for a given text so replays
//! look identical.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use toon_models::{
    Action, BrowEmote, CharacterSide, ExpressionPlan, EyeLook, MouthShape,
};

/// Words that read as surprise.
const SURPRISE_WORDS: [&str; 6] = ["wow", "what", "really", "amazing", "incredible", "unbelievable"];
/// Words that read as hedging.
const HEDGE_WORDS: [&str; 5] = ["hmm", "maybe", "perhaps", "guess", "suppose"];
/// Words that read as warm/amused.
const WARM_WORDS: [&str; 7] = ["haha", "funny", "great", "love", "nice", "happy", "glad"];

/// Tiny deterministic generator seeded from the text.
struct PlanRng(u64);

impl PlanRng {
    fn new(text: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        Self(hasher.finish() | 1)
    }

    fn next(&mut self) -> u64 {
        // xorshift64
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn chance(&mut self, percent: u64) -> bool {
        self.next() % 100 < percent
    }
}

/// Build an expression plan for one spoken line.
pub fn plan_from_text(
    message: &str,
    speaker: CharacterSide,
    duration_secs: f64,
) -> ExpressionPlan {
    let total_ms = (duration_secs * 1000.0).max(1.0) as u64;
    let mut plan = ExpressionPlan::empty(speaker, total_ms);
    let mut rng = PlanRng::new(message);

    let sentences = split_sentences(message);
    if sentences.is_empty() {
        return plan;
    }

    let total_chars: usize = sentences.iter().map(|s| s.text.len()).sum();
    let mut cursor_ms = 0u64;

    for (idx, sentence) in sentences.iter().enumerate() {
        let share = sentence.text.len() as f64 / total_chars.max(1) as f64;
        let span_ms = (total_ms as f64 * share) as u64;
        let t = cursor_ms.min(total_ms.saturating_sub(1));
        cursor_ms += span_ms;

        // Sentence starts glance at the listener, with an occasional
        // look-away for texture.
        let look = if idx == 0 || rng.chance(70) {
            EyeLook::Listener
        } else {
            EyeLook::Away
        };
        plan.actions.push(Action::Eye {
            t,
            target: speaker,
            look,
            amount: 0.6 + (rng.next() % 40) as f32 / 100.0,
            duration_ms: 300,
        });

        let lower = sentence.text.to_lowercase();
        let hold = span_ms.clamp(300, 900);

        match sentence.terminator {
            Some('!') => {
                plan.actions.push(Action::Brow {
                    t,
                    target: speaker,
                    emote: BrowEmote::Raise,
                    amount: 0.9,
                    duration_ms: hold,
                    count: None,
                });
                if SURPRISE_WORDS.iter().any(|w| lower.contains(w)) {
                    plan.actions.push(Action::Mouth {
                        t,
                        target: speaker,
                        shape: MouthShape::Surprise,
                        duration_ms: hold,
                    });
                }
            }
            Some('?') => {
                let emote = if rng.chance(50) {
                    BrowEmote::Raise
                } else {
                    BrowEmote::Skeptical
                };
                plan.actions.push(Action::Brow {
                    t,
                    target: speaker,
                    emote,
                    amount: 0.7,
                    duration_ms: hold,
                    count: None,
                });
                plan.actions.push(Action::Eye {
                    t: (t + 150).min(total_ms.saturating_sub(1)),
                    target: speaker,
                    look: EyeLook::Up,
                    amount: 0.5,
                    duration_ms: 250,
                });
            }
            _ => {
                if HEDGE_WORDS.iter().any(|w| lower.contains(w)) {
                    plan.actions.push(Action::Brow {
                        t,
                        target: speaker,
                        emote: BrowEmote::Skeptical,
                        amount: 0.6,
                        duration_ms: hold,
                        count: None,
                    });
                } else if rng.chance(30) {
                    plan.actions.push(Action::Brow {
                        t,
                        target: speaker,
                        emote: BrowEmote::Flick,
                        amount: 0.5,
                        duration_ms: 0,
                        count: Some(1),
                    });
                }
            }
        }

        if WARM_WORDS.iter().any(|w| lower.contains(w)) {
            plan.actions.push(Action::Mouth {
                t,
                target: speaker,
                shape: MouthShape::Smile,
                duration_ms: hold,
            });
        }
    }

    // The listener reacts once on longer lines.
    if total_ms > 1500 {
        plan.actions.push(Action::Eye {
            t: total_ms / 3,
            target: speaker.other(),
            look: EyeLook::Listener,
            amount: 0.8,
            duration_ms: 350,
        });
        if rng.chance(40) {
            plan.actions.push(Action::Brow {
                t: total_ms / 2,
                target: speaker.other(),
                emote: BrowEmote::Raise,
                amount: 0.4,
                duration_ms: 500,
                count: None,
            });
        }
    }

    plan.actions.sort_by_key(|a| a.start_ms());
    plan
}

struct Sentence {
    text: String,
    terminator: Option<char>,
}

fn split_sentences(message: &str) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in message.chars() {
        if matches!(c, '.' | '!' | '?') {
            if !current.trim().is_empty() {
                sentences.push(Sentence {
                    text: current.trim().to_string(),
                    terminator: Some(c),
                });
            }
            current.clear();
        } else {
            current.push(c);
        }
    }
    if !current.trim().is_empty() {
        sentences.push(Sentence {
            text: current.trim().to_string(),
            terminator: None,
        });
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_is_deterministic() {
        let a = plan_from_text("Hello there, friend.", CharacterSide::Left, 3.0);
        let b = plan_from_text("Hello there, friend.", CharacterSide::Left, 3.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_exclamation_raises_brow() {
        let plan = plan_from_text("Wow, that is amazing!", CharacterSide::Left, 2.0);
        assert!(plan.actions.iter().any(|a| matches!(
            a,
            Action::Brow {
                emote: BrowEmote::Raise,
                ..
            }
        )));
        assert!(plan.actions.iter().any(|a| matches!(
            a,
            Action::Mouth {
                shape: MouthShape::Surprise,
                ..
            }
        )));
    }

    #[test]
    fn test_warm_words_smile() {
        let plan = plan_from_text("I love this show.", CharacterSide::Right, 2.0);
        assert!(plan.actions.iter().any(|a| matches!(
            a,
            Action::Mouth {
                shape: MouthShape::Smile,
                ..
            }
        )));
    }

    #[test]
    fn test_first_action_glances_at_listener() {
        let plan = plan_from_text("Good evening.", CharacterSide::Left, 1.5);
        let first_eye = plan
            .actions
            .iter()
            .find_map(|a| match a {
                Action::Eye { look, target, .. } => Some((*look, *target)),
                _ => None,
            })
            .unwrap();
        assert_eq!(first_eye, (EyeLook::Listener, CharacterSide::Left));
    }

    #[test]
    fn test_actions_sorted_and_in_range() {
        let plan = plan_from_text(
            "First sentence. Second one? A third, rather longer sentence here!",
            CharacterSide::Left,
            6.0,
        );
        assert!(!plan.actions.is_empty());
        let mut last = 0;
        for action in &plan.actions {
            assert!(action.start_ms() >= last);
            assert!(action.start_ms() < plan.total_ms);
            last = action.start_ms();
        }
    }

    #[test]
    fn test_empty_message_gives_empty_plan() {
        let plan = plan_from_text("   ", CharacterSide::Left, 2.0);
        assert!(plan.actions.is_empty());
        assert_eq!(plan.total_ms, 2000);
    }

    #[test]
    fn test_listener_reacts_on_long_lines() {
        let plan = plan_from_text(
            "This line carries on for quite a while so the other one reacts.",
            CharacterSide::Left,
            4.0,
        );
        assert!(plan
            .actions
            .iter()
            .any(|a| a.target() == CharacterSide::Right));
    }
}
