//! Async capture loop: latest frame → detector → pipeline → debounced feedback.
//!
//! Frames arrive on a `watch` channel, so a slow detector only ever sees the
//! newest frame and older ones are dropped. Detection is awaited before the
//! next frame is taken, so the pipeline has a single writer.

use crate::feedback::{FeedbackCooldowns, FeedbackState};
use crate::pipeline::{CapturePipeline, FrameOutcome};
use crate::types::{AlignedFace, DetectionFeedback, FaceObservation, Frame};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame source closed before capture completed")]
    SourceClosed,
}

/// External face detector.
#[allow(async_fn_in_trait)]
pub trait FaceDetector {
    async fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceObservation>, DetectorError>;
}

/// Run one capture attempt until the pipeline completes.
///
/// The pipeline is reset first. Detector failures drop the frame and the
/// attempt continues. Feedback is rate-limited on frame timestamps and sent
/// best-effort: a dropped receiver does not stop the capture.
pub async fn run_capture<D: FaceDetector>(
    detector: &mut D,
    pipeline: &mut CapturePipeline,
    mut frames: watch::Receiver<Option<Arc<Frame>>>,
    feedback: &mpsc::Sender<DetectionFeedback>,
    cooldowns: FeedbackCooldowns,
) -> Result<Vec<AlignedFace>, CaptureError> {
    pipeline.reset();
    let mut debounce = FeedbackState::default();
    let mut dropped = 0u64;

    loop {
        if frames.changed().await.is_err() {
            tracing::warn!("frame source closed mid-capture");
            return Err(CaptureError::SourceClosed);
        }
        let Some(frame) = frames.borrow_and_update().clone() else {
            continue;
        };

        let faces = match detector.detect(&frame).await {
            Ok(faces) => faces,
            Err(e) => {
                dropped += 1;
                tracing::warn!(error = %e, sequence = frame.sequence, dropped, "detector failed; frame skipped");
                continue;
            }
        };

        match pipeline.process(&frame, &faces) {
            FrameOutcome::Completed(samples) => {
                tracing::info!(samples = samples.len(), dropped, "capture attempt finished");
                return Ok(samples);
            }
            FrameOutcome::Ignored => {}
            FrameOutcome::Feedback(candidate) => {
                let (next, emit) = debounce.offer(candidate, frame.timestamp_ms, cooldowns);
                debounce = next;
                if let Some(signal) = emit {
                    tracing::debug!(%signal, "feedback");
                    if feedback.send(signal).await.is_err() {
                        tracing::debug!("feedback receiver dropped");
                    }
                }
            }
        }
    }
}
