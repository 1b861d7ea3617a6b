//! Mutable state of one capture attempt.

use crate::liveness::{LivenessProgress, LivenessStage};
use crate::types::{AlignedFace, Point};

/// Last observed bounding-box center, for motion speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterSample {
    pub center: Point,
    pub timestamp_ms: u64,
}

/// Where an attempt currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    Idle,
    Stabilizing,
    LivenessInProgress,
    Sampling,
    Complete,
}

/// State owned by a single enrollment or verification attempt.
///
/// Mutated only by the frame pipeline, in frame order. Any reset condition
/// (face lost, several faces, new tracking id) returns it to [`Default`].
#[derive(Debug, Default)]
pub struct CaptureSession {
    pub(crate) tracked_id: Option<i32>,
    pub(crate) stable_since_ms: Option<u64>,
    pub(crate) last_center: Option<CenterSample>,
    pub(crate) liveness: LivenessProgress,
    pub(crate) samples: Vec<AlignedFace>,
    pub(crate) last_sample_ms: Option<u64>,
    pub(crate) complete: bool,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard everything: tracking, timers, liveness progress and samples.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Restart the blink challenge, keeping tracking and samples.
    pub fn reset_liveness(&mut self) {
        self.liveness = LivenessProgress::Pending;
    }

    pub fn tracked_id(&self) -> Option<i32> {
        self.tracked_id
    }

    pub fn stable_since_ms(&self) -> Option<u64> {
        self.stable_since_ms
    }

    pub fn liveness(&self) -> LivenessProgress {
        self.liveness
    }

    /// `None` once liveness has passed.
    pub fn liveness_stage(&self) -> Option<LivenessStage> {
        self.liveness.stage()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn phase(&self) -> AttemptPhase {
        if self.complete {
            AttemptPhase::Complete
        } else if !self.samples.is_empty() || self.liveness.is_passed() {
            AttemptPhase::Sampling
        } else if matches!(self.liveness, LivenessProgress::Running { .. }) {
            AttemptPhase::LivenessInProgress
        } else if self.stable_since_ms.is_some() {
            AttemptPhase::Stabilizing
        } else {
            AttemptPhase::Idle
        }
    }
}
