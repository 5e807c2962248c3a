//! Per-character blink state machine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Frames a blink stays closed.
const BLINK_DURATION_FRAMES: u64 = 4;
/// Inter-blink interval bounds, in seconds.
const MIN_INTERVAL_SECS: u64 = 3;
const MAX_INTERVAL_SECS: u64 = 5;

/// Random-interval blink controller, suppressed while speaking.
pub struct BlinkController {
    fps: u64,
    is_blinking: bool,
    blink_start_frame: u64,
    next_blink_frame: u64,
    rng: StdRng,
}

impl BlinkController {
    /// Create a controller for the given stream frame rate.
    pub fn new(fps: u32) -> Self {
        let mut rng = StdRng::from_os_rng();
        let fps = fps as u64;
        let first = rng.random_range(MIN_INTERVAL_SECS * fps..=MAX_INTERVAL_SECS * fps);
        Self {
            fps,
            is_blinking: false,
            blink_start_frame: 0,
            next_blink_frame: first,
            rng,
        }
    }

    /// Advance one frame; returns whether the eyes are closed.
    ///
    /// A blink never *starts* while the character speaks, but one already
    /// in progress finishes.
    pub fn update(&mut self, frame: u64, is_speaking: bool) -> bool {
        if is_speaking && !self.is_blinking {
            // Defer the next blink to at least a second out.
            self.next_blink_frame = self.next_blink_frame.max(frame + self.fps);
            return false;
        }

        if !self.is_blinking && frame >= self.next_blink_frame {
            self.is_blinking = true;
            self.blink_start_frame = frame;
            return true;
        }

        if self.is_blinking && frame >= self.blink_start_frame + BLINK_DURATION_FRAMES {
            self.is_blinking = false;
            let interval = self
                .rng
                .random_range(MIN_INTERVAL_SECS * self.fps..=MAX_INTERVAL_SECS * self.fps);
            self.next_blink_frame = frame + interval;
            return false;
        }

        self.is_blinking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_starts_while_speaking() {
        let mut blink = BlinkController::new(30);
        for frame in 0..30 * 60 {
            let blinking = blink.update(frame, true);
            assert!(!blinking, "blink started while speaking at frame {frame}");
        }
    }

    #[test]
    fn test_blinks_eventually_and_ends() {
        let mut blink = BlinkController::new(30);
        let mut saw_blink = false;
        let mut open_after = false;
        for frame in 0..30 * 20 {
            if blink.update(frame, false) {
                saw_blink = true;
            } else if saw_blink {
                open_after = true;
                break;
            }
        }
        assert!(saw_blink);
        assert!(open_after);
    }

    #[test]
    fn test_blink_duration_is_bounded() {
        let mut blink = BlinkController::new(30);
        let mut run = 0u64;
        let mut longest = 0u64;
        for frame in 0..30 * 60 {
            if blink.update(frame, false) {
                run += 1;
                longest = longest.max(run);
            } else {
                run = 0;
            }
        }
        assert!(longest > 0);
        assert!(longest <= BLINK_DURATION_FRAMES, "blink ran {longest} frames");
    }

    #[test]
    fn test_interval_within_bounds() {
        let mut blink = BlinkController::new(30);
        let mut blink_starts = Vec::new();
        let mut was_blinking = false;
        for frame in 0..30 * 120 {
            let blinking = blink.update(frame, false);
            if blinking && !was_blinking {
                blink_starts.push(frame);
            }
            was_blinking = blinking;
        }
        assert!(blink_starts.len() >= 2);
        for pair in blink_starts.windows(2) {
            let gap = pair[1] - pair[0];
            // Interval plus the blink itself.
            assert!(
                (3 * 30..=5 * 30 + BLINK_DURATION_FRAMES).contains(&gap),
                "gap {gap}"
            );
        }
    }

    #[test]
    fn test_in_progress_blink_finishes_when_speech_starts() {
        let mut blink = BlinkController::new(30);
        // Force a blink by advancing far past the first interval.
        let mut frame = 0;
        while !blink.update(frame, false) {
            frame += 1;
        }
        // Speech starts mid-blink: the blink still plays out.
        assert!(blink.update(frame + 1, true));
    }
}
