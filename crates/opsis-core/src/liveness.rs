//! Active liveness detection via a single-blink challenge.
//!
//! A static photograph cannot change its eye state. The subject is asked to
//! blink once: eyes must be seen open, then closed, then open again, using
//! the detector's per-eye open probabilities averaged across both eyes.
//!
//! The challenge has a wall-clock deadline measured from the first frame it
//! evaluates. Missing eye probabilities stall the challenge for that frame
//! without failing it.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs and still images on a screen.
//! - **Does not block:** Video replay of a blinking subject, 3D masks with
//!   articulated eyelids, or adversarial displays.

use crate::config::CaptureConfig;
use crate::types::FaceObservation;

/// Which eye state the challenge is waiting for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LivenessStage {
    #[default]
    WaitingOpen,
    WaitingClosed,
    WaitingReopened,
}

/// Liveness progress of one capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LivenessProgress {
    /// Challenge not started yet.
    #[default]
    Pending,
    Running {
        stage: LivenessStage,
        started_ms: u64,
    },
    /// Blink observed. Sticky for the rest of the attempt.
    Passed,
}

impl LivenessProgress {
    /// The eye state awaited next, or `None` once the blink has been seen.
    pub fn stage(&self) -> Option<LivenessStage> {
        match self {
            Self::Running { stage, .. } => Some(*stage),
            Self::Pending => Some(LivenessStage::WaitingOpen),
            Self::Passed => None,
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Outcome of evaluating one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessResult {
    InProgress,
    Passed,
    /// Deadline exceeded; progress has been reset to [`LivenessProgress::Pending`].
    Failed,
}

/// Default deadline for the whole open → closed → open sequence.
const DEFAULT_TIMEOUT_MS: u64 = 6000;

#[derive(Debug, Clone)]
pub struct BlinkChallenge {
    timeout_ms: u64,
    eye_open_threshold: f32,
    eye_closed_threshold: f32,
}

impl Default for BlinkChallenge {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            eye_open_threshold: 0.70,
            eye_closed_threshold: 0.35,
        }
    }
}

impl BlinkChallenge {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            timeout_ms: config.liveness_timeout_ms,
            eye_open_threshold: config.eye_open_threshold,
            eye_closed_threshold: config.eye_closed_threshold,
        }
    }

    /// Advance the challenge with one frame's face.
    pub fn evaluate(
        &self,
        face: &FaceObservation,
        now_ms: u64,
        progress: &mut LivenessProgress,
    ) -> LivenessResult {
        let (stage, started_ms) = match *progress {
            LivenessProgress::Passed => return LivenessResult::Passed,
            LivenessProgress::Pending => (LivenessStage::WaitingOpen, now_ms),
            LivenessProgress::Running { stage, started_ms } => (stage, started_ms),
        };

        if now_ms.saturating_sub(started_ms) > self.timeout_ms {
            tracing::info!(
                elapsed_ms = now_ms.saturating_sub(started_ms),
                ?stage,
                "liveness challenge timed out"
            );
            *progress = LivenessProgress::Pending;
            return LivenessResult::Failed;
        }

        let Some(score) = face.eye_open_score() else {
            *progress = LivenessProgress::Running { stage, started_ms };
            return LivenessResult::InProgress;
        };

        let next = match stage {
            LivenessStage::WaitingOpen if score >= self.eye_open_threshold => {
                LivenessStage::WaitingClosed
            }
            LivenessStage::WaitingClosed if score <= self.eye_closed_threshold => {
                LivenessStage::WaitingReopened
            }
            LivenessStage::WaitingReopened if score >= self.eye_open_threshold => {
                tracing::debug!(score, "blink completed");
                *progress = LivenessProgress::Passed;
                return LivenessResult::Passed;
            }
            unchanged => unchanged,
        };

        *progress = LivenessProgress::Running {
            stage: next,
            started_ms,
        };
        LivenessResult::InProgress
    }
}
