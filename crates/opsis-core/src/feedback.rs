//! Rate limiting of user-facing feedback.
//!
//! Per-frame gate results flicker; the debouncer only lets a signal through
//! when it has been quiet long enough. Repeats of the same signal wait the
//! longer same-value cooldown, a different signal waits the switch cooldown.

use crate::config::CaptureConfig;
use crate::types::DetectionFeedback;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackCooldowns {
    pub same_ms: u64,
    pub switch_ms: u64,
}

impl FeedbackCooldowns {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            same_ms: config.same_feedback_cooldown_ms,
            switch_ms: config.feedback_switch_cooldown_ms,
        }
    }
}

/// The last emitted signal and when it was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedbackState {
    last: Option<(DetectionFeedback, u64)>,
}

impl FeedbackState {
    pub fn last(&self) -> Option<DetectionFeedback> {
        self.last.map(|(feedback, _)| feedback)
    }

    /// Offer `candidate` at `now_ms`. Returns the updated state and the signal
    /// to deliver, if it passes the cooldowns.
    pub fn offer(
        self,
        candidate: DetectionFeedback,
        now_ms: u64,
        cooldowns: FeedbackCooldowns,
    ) -> (Self, Option<DetectionFeedback>) {
        if let Some((last, at)) = self.last {
            let elapsed = now_ms.saturating_sub(at);
            let cooldown = if candidate == last {
                cooldowns.same_ms
            } else {
                cooldowns.switch_ms
            };
            if elapsed < cooldown {
                return (self, None);
            }
        }

        (
            Self {
                last: Some((candidate, now_ms)),
            },
            Some(candidate),
        )
    }
}
