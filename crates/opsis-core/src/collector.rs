//! Aligned sample collection with blur rejection.

use crate::alignment::{rotate_upright, EyeAligner};
use crate::blur::laplacian_variance;
use crate::config::CaptureConfig;
use crate::session::CaptureSession;
use crate::types::{AlignedFace, FaceObservation, Frame};

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureResult {
    /// No crop could be produced (missing landmarks, eyes too close, or the
    /// session is already complete).
    Skipped,
    /// Crop produced but rejected as blurry.
    Blurry { variance: f64 },
    /// Crop accepted; more are needed.
    Added { count: usize },
    /// Target reached; the full ordered buffer.
    Completed(Vec<AlignedFace>),
}

#[derive(Debug, Clone)]
pub struct SampleCollector {
    sample_interval_ms: u64,
    blur_variance_threshold: f64,
    target_samples: usize,
    aligner: EyeAligner,
}

impl SampleCollector {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            sample_interval_ms: config.sample_interval_ms,
            blur_variance_threshold: config.blur_variance_threshold,
            target_samples: config.target_samples,
            aligner: EyeAligner::new(config),
        }
    }

    /// Whether enough time has passed since the last accepted crop.
    pub fn should_capture(&self, now_ms: u64, session: &CaptureSession) -> bool {
        match session.last_sample_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.sample_interval_ms,
        }
    }

    /// Rotate, align and score one frame, buffering the crop if sharp.
    pub fn capture(
        &self,
        frame: &Frame,
        face: &FaceObservation,
        now_ms: u64,
        session: &mut CaptureSession,
    ) -> CaptureResult {
        if session.complete {
            return CaptureResult::Skipped;
        }
        let (Some(left), Some(right)) = (face.left_eye, face.right_eye) else {
            return CaptureResult::Skipped;
        };

        let upright = rotate_upright(&frame.image, frame.rotation);
        match self.aligner.align(&upright, left, right) {
            Some(crop) => self.accept(crop, now_ms, session),
            None => CaptureResult::Skipped,
        }
    }

    /// Blur-check an aligned crop and append it to the session.
    pub fn accept(&self, crop: AlignedFace, now_ms: u64, session: &mut CaptureSession) -> CaptureResult {
        if session.complete {
            return CaptureResult::Skipped;
        }

        let variance = laplacian_variance(crop.image());
        if variance < self.blur_variance_threshold {
            tracing::debug!(variance, threshold = self.blur_variance_threshold, "blurry sample rejected");
            return CaptureResult::Blurry { variance };
        }

        session.samples.push(crop);
        session.last_sample_ms = Some(now_ms);
        let count = session.samples.len();
        tracing::debug!(count, target = self.target_samples, variance, "sample accepted");

        if count >= self.target_samples {
            session.complete = true;
            return CaptureResult::Completed(session.samples.clone());
        }
        CaptureResult::Added { count }
    }
}
