//! Per-frame orchestration of the capture gates.
//!
//! Order: face count → placement/pose → tracking identity → eye landmarks →
//! motion/dwell → blink liveness → sample throttle → align/blur/collect.
//! The first failing gate decides the frame's feedback.

use crate::collector::{CaptureResult, SampleCollector};
use crate::config::CaptureConfig;
use crate::liveness::{BlinkChallenge, LivenessResult};
use crate::mapping::{CoordinateMapping, ScreenSize};
use crate::quality::{OvalGeometry, QualityGate};
use crate::session::CaptureSession;
use crate::stability::{StabilityStatus, StabilityTracker};
use crate::types::{AlignedFace, DetectionFeedback, FaceObservation, Frame};

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Frame handled; this is the user-facing status for it.
    Feedback(DetectionFeedback),
    /// Target sample count reached; crops in capture order.
    Completed(Vec<AlignedFace>),
    /// The attempt is already complete; frame dropped.
    Ignored,
}

/// Capture state machine for one enrollment or verification attempt.
#[derive(Debug)]
pub struct CapturePipeline {
    screen: ScreenSize,
    oval: OvalGeometry,
    gate: QualityGate,
    min_eye_distance_px: f32,
    stability: StabilityTracker,
    liveness: BlinkChallenge,
    collector: SampleCollector,
    session: CaptureSession,
}

impl CapturePipeline {
    /// Pipeline with the guide oval laid out from `config.oval`.
    pub fn new(config: &CaptureConfig, screen: ScreenSize) -> Self {
        let oval = OvalGeometry::from_screen(screen, &config.oval);
        Self::with_oval(config, screen, oval)
    }

    pub fn with_oval(config: &CaptureConfig, screen: ScreenSize, oval: OvalGeometry) -> Self {
        Self {
            screen,
            oval,
            gate: QualityGate::new(config),
            min_eye_distance_px: config.min_eye_distance_px,
            stability: StabilityTracker::new(config),
            liveness: BlinkChallenge::new(config),
            collector: SampleCollector::new(config),
            session: CaptureSession::new(),
        }
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn oval(&self) -> &OvalGeometry {
        &self.oval
    }

    /// Start a fresh attempt.
    pub fn reset(&mut self) {
        self.session.reset();
    }

    /// Run one frame's detector output through the gates.
    pub fn process(&mut self, frame: &Frame, faces: &[FaceObservation]) -> FrameOutcome {
        let before = self.session.phase();
        let outcome = self.step(frame, faces);
        let after = self.session.phase();
        if before != after {
            tracing::debug!(?before, ?after, sequence = frame.sequence, "attempt phase changed");
        }
        outcome
    }

    fn step(&mut self, frame: &Frame, faces: &[FaceObservation]) -> FrameOutcome {
        if self.session.is_complete() {
            return FrameOutcome::Ignored;
        }
        let now = frame.timestamp_ms;

        let face = match faces {
            [face] => face,
            [] => return self.reset_with(DetectionFeedback::NoFace),
            _ => return self.reset_with(DetectionFeedback::MultipleFaces),
        };

        let (width, height) = frame.image.dimensions();
        let mapping = CoordinateMapping::compute(frame.rotation, width, height, self.screen);
        if let Err(issue) = self.gate.evaluate(face, &mapping, &self.oval) {
            tracing::debug!(?issue, "face rejected by quality gate");
            self.session.stable_since_ms = None;
            return FrameOutcome::Feedback(issue.feedback());
        }

        if let Some(id) = face.tracking_id {
            if self.session.tracked_id != Some(id) {
                tracing::debug!(previous = ?self.session.tracked_id, current = id, "tracking new face");
                self.session.reset();
                self.session.tracked_id = Some(id);
            }
        }

        if !self.has_detectable_eyes(face) {
            return FrameOutcome::Feedback(DetectionFeedback::MoveCloser);
        }

        match self
            .stability
            .update(face.bounding_box.center(), now, &mut self.session)
        {
            StabilityStatus::Moving => return FrameOutcome::Feedback(DetectionFeedback::HoldStill),
            StabilityStatus::Settling => {
                return FrameOutcome::Feedback(DetectionFeedback::FaceDetected)
            }
            StabilityStatus::Stable => {}
        }

        match self.liveness.evaluate(face, now, &mut self.session.liveness) {
            LivenessResult::Passed => {}
            LivenessResult::InProgress => {
                return FrameOutcome::Feedback(DetectionFeedback::PerformLiveness)
            }
            LivenessResult::Failed => {
                self.session.reset_liveness();
                self.session.stable_since_ms = None;
                return FrameOutcome::Feedback(DetectionFeedback::LivenessFailed);
            }
        }

        if !self.collector.should_capture(now, &self.session) {
            return FrameOutcome::Feedback(DetectionFeedback::FaceDetected);
        }

        match self.collector.capture(frame, face, now, &mut self.session) {
            CaptureResult::Completed(samples) => {
                tracing::info!(samples = samples.len(), "capture complete");
                FrameOutcome::Completed(samples)
            }
            CaptureResult::Blurry { .. } => FrameOutcome::Feedback(DetectionFeedback::ImproveFocus),
            CaptureResult::Added { .. } | CaptureResult::Skipped => {
                FrameOutcome::Feedback(DetectionFeedback::FaceDetected)
            }
        }
    }

    fn reset_with(&mut self, feedback: DetectionFeedback) -> FrameOutcome {
        if self.session.tracked_id.is_some() || self.session.stable_since_ms.is_some() {
            tracing::debug!(?feedback, "capture session reset");
        }
        self.session.reset();
        FrameOutcome::Feedback(feedback)
    }

    // Alignment needs both eyes, reasonably far apart.
    fn has_detectable_eyes(&self, face: &FaceObservation) -> bool {
        face.eye_distance()
            .is_some_and(|d| d >= self.min_eye_distance_px)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::{LivenessProgress, LivenessStage};
    use crate::session::AttemptPhase;
    use crate::types::{HeadPose, Point, Rect};
    use image::{Rgb, RgbImage};
    use DetectionFeedback::*;

    fn pipeline() -> CapturePipeline {
        let screen = ScreenSize::new(240.0, 240.0);
        let oval = OvalGeometry {
            center: Point::new(120.0, 120.0),
            radius_x: 60.0,
            radius_y: 80.0,
        };
        CapturePipeline::with_oval(&CaptureConfig::default(), screen, oval)
    }

    fn frame(t: u64) -> Frame {
        Frame {
            image: RgbImage::from_fn(240, 240, |x, y| {
                let v = if (x + y) % 2 == 0 { 80 } else { 160 };
                Rgb([v, v, v])
            }),
            rotation: 0,
            timestamp_ms: t,
            sequence: t,
        }
    }

    fn face(id: i32, eye_open: f32) -> FaceObservation {
        FaceObservation {
            bounding_box: Rect::new(70.0, 70.0, 170.0, 170.0),
            tracking_id: Some(id),
            head_pose: HeadPose::default(),
            left_eye: Some(Point::new(100.0, 100.0)),
            right_eye: Some(Point::new(136.0, 100.0)),
            left_eye_open: Some(eye_open),
            right_eye_open: Some(eye_open),
        }
    }

    /// Drive the pipeline to liveness passed; returns the next free timestamp.
    fn pass_liveness(p: &mut CapturePipeline) -> u64 {
        for t in (0..600).step_by(100) {
            assert_eq!(p.process(&frame(t), &[face(1, 0.9)]), FrameOutcome::Feedback(FaceDetected));
        }
        assert_eq!(p.process(&frame(600), &[face(1, 0.9)]), FrameOutcome::Feedback(PerformLiveness));
        assert_eq!(p.process(&frame(650), &[face(1, 0.1)]), FrameOutcome::Feedback(PerformLiveness));
        assert_eq!(p.session().liveness_stage(), Some(LivenessStage::WaitingReopened));
        700
    }

    #[test]
    fn test_full_attempt_completes_with_target_samples() {
        let mut p = pipeline();
        let t = pass_liveness(&mut p);

        // Blink completes on this frame and the first sample is taken.
        assert_eq!(p.process(&frame(t), &[face(1, 0.9)]), FrameOutcome::Feedback(FaceDetected));
        assert_eq!(p.session().sample_count(), 1);
        assert_eq!(p.session().liveness_stage(), None);

        // Too soon for another sample.
        assert_eq!(p.process(&frame(t + 50), &[face(1, 0.9)]), FrameOutcome::Feedback(FaceDetected));
        assert_eq!(p.session().sample_count(), 1);

        p.process(&frame(t + 100), &[face(1, 0.9)]);
        p.process(&frame(t + 200), &[face(1, 0.9)]);
        match p.process(&frame(t + 300), &[face(1, 0.9)]) {
            FrameOutcome::Completed(samples) => {
                assert_eq!(samples.len(), 4);
                assert!(samples.iter().all(|s| s.image().dimensions() == (112, 112)));
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(p.session().phase(), AttemptPhase::Complete);
        assert_eq!(p.process(&frame(t + 400), &[face(1, 0.9)]), FrameOutcome::Ignored);
        assert_eq!(p.process(&frame(t + 500), &[]), FrameOutcome::Ignored);
    }

    #[test]
    fn test_no_face_and_multiple_faces_reset() {
        let mut p = pipeline();
        pass_liveness(&mut p);
        assert_eq!(p.process(&frame(700), &[]), FrameOutcome::Feedback(NoFace));
        assert_eq!(p.session().phase(), AttemptPhase::Idle);
        assert_eq!(p.session().tracked_id(), None);

        pass_liveness(&mut p);
        assert_eq!(
            p.process(&frame(700), &[face(1, 0.9), face(2, 0.9)]),
            FrameOutcome::Feedback(MultipleFaces)
        );
        assert_eq!(p.session().phase(), AttemptPhase::Idle);
    }

    #[test]
    fn test_tracking_id_change_discards_progress() {
        let mut p = pipeline();
        let t = pass_liveness(&mut p);
        p.process(&frame(t), &[face(1, 0.9)]);
        assert_eq!(p.session().sample_count(), 1);

        assert_eq!(p.process(&frame(t + 100), &[face(2, 0.9)]), FrameOutcome::Feedback(FaceDetected));
        assert_eq!(p.session().tracked_id(), Some(2));
        assert_eq!(p.session().sample_count(), 0);
        assert_eq!(p.session().stable_since_ms(), Some(t + 100));
        assert!(!p.session().liveness().is_passed());
    }

    #[test]
    fn test_missing_tracking_id_keeps_subject() {
        let mut p = pipeline();
        let t = pass_liveness(&mut p);
        let anonymous = FaceObservation {
            tracking_id: None,
            ..face(1, 0.9)
        };
        p.process(&frame(t), &[anonymous]);
        assert_eq!(p.session().tracked_id(), Some(1));
        assert_eq!(p.session().sample_count(), 1);
    }

    #[test]
    fn test_off_center_face_restarts_dwell_only() {
        let mut p = pipeline();
        p.process(&frame(0), &[face(1, 0.9)]);
        let shifted = FaceObservation {
            bounding_box: Rect::new(0.0, 70.0, 100.0, 170.0),
            ..face(1, 0.9)
        };
        assert_eq!(p.process(&frame(100), &[shifted]), FrameOutcome::Feedback(CenterFace));
        assert_eq!(p.session().stable_since_ms(), None);
        assert_eq!(p.session().tracked_id(), Some(1));
    }

    #[test]
    fn test_pose_and_size_feedback() {
        let mut p = pipeline();
        let turned = FaceObservation {
            head_pose: HeadPose { pitch: 0.0, yaw: 25.0, roll: 0.0 },
            ..face(1, 0.9)
        };
        assert_eq!(p.process(&frame(0), &[turned]), FrameOutcome::Feedback(LookStraight));

        let small = FaceObservation {
            bounding_box: Rect::new(100.0, 100.0, 140.0, 140.0),
            ..face(1, 0.9)
        };
        assert_eq!(p.process(&frame(0), &[small]), FrameOutcome::Feedback(MoveCloser));
    }

    #[test]
    fn test_close_eyes_landmarks_ask_to_move_closer() {
        let mut p = pipeline();
        let far = FaceObservation {
            left_eye: Some(Point::new(110.0, 100.0)),
            right_eye: Some(Point::new(130.0, 100.0)),
            ..face(1, 0.9)
        };
        assert_eq!(p.process(&frame(0), &[far]), FrameOutcome::Feedback(MoveCloser));
        assert_eq!(p.session().stable_since_ms(), None);
        assert_eq!(p.session().tracked_id(), Some(1));
    }

    #[test]
    fn test_fast_motion_holds_still() {
        let mut p = pipeline();
        p.process(&frame(0), &[face(1, 0.9)]);
        let jumped = FaceObservation {
            bounding_box: Rect::new(85.0, 70.0, 185.0, 170.0),
            ..face(1, 0.9)
        };
        // 15 px in 5 ms = 3000 px/s
        assert_eq!(p.process(&frame(5), &[jumped]), FrameOutcome::Feedback(HoldStill));
        assert_eq!(p.session().stable_since_ms(), Some(5));
    }

    #[test]
    fn test_liveness_timeout_requires_new_dwell() {
        let mut p = pipeline();
        for t in (0..=600).step_by(100) {
            p.process(&frame(t), &[face(1, 0.5)]);
        }
        assert_eq!(p.session().phase(), AttemptPhase::LivenessInProgress);

        let mut t = 700;
        while t <= 6600 {
            assert_eq!(p.process(&frame(t), &[face(1, 0.5)]), FrameOutcome::Feedback(PerformLiveness));
            t += 100;
        }
        assert_eq!(p.process(&frame(6700), &[face(1, 0.5)]), FrameOutcome::Feedback(LivenessFailed));
        assert_eq!(p.session().stable_since_ms(), None);
        assert_eq!(p.session().liveness_stage(), Some(LivenessStage::WaitingOpen));
        assert_eq!(p.session().liveness(), LivenessProgress::Pending);

        // Dwell restarts before the challenge runs again.
        assert_eq!(p.process(&frame(6800), &[face(1, 0.9)]), FrameOutcome::Feedback(FaceDetected));
        assert_eq!(p.session().phase(), AttemptPhase::Stabilizing);
    }

    #[test]
    fn test_blurry_frame_reports_focus() {
        let mut p = pipeline();
        let t = pass_liveness(&mut p);
        let flat = Frame {
            image: RgbImage::from_pixel(240, 240, Rgb([128, 128, 128])),
            ..frame(t)
        };
        assert_eq!(p.process(&flat, &[face(1, 0.9)]), FrameOutcome::Feedback(ImproveFocus));
        assert_eq!(p.session().sample_count(), 0);
        assert!(p.session().liveness().is_passed());
    }
}
