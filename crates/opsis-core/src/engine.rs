//! Dedicated inference thread.
//!
//! ONNX inference is blocking and the session is `!Sync`, so the embedder
//! lives on its own OS thread and async callers talk to it over a channel.

use crate::matcher::{CosineMatcher, MatchResult, Matcher};
use crate::recognizer::{extract_embedding, FaceEmbedder, RecognizerError};
use crate::types::{AlignedFace, Embedding, EnrolledIdentity};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of a verification request.
#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub embedding: Embedding,
    pub result: MatchResult,
}

enum EngineRequest {
    Extract {
        samples: Vec<AlignedFace>,
        reply: oneshot::Sender<Result<Embedding, EngineError>>,
    },
    Verify {
        samples: Vec<AlignedFace>,
        gallery: Vec<EnrolledIdentity>,
        threshold: f32,
        reply: oneshot::Sender<Result<VerifyResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Turn a completed attempt's crops into one normalized embedding.
    pub async fn extract(&self, samples: Vec<AlignedFace>) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                samples,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Extract an embedding and compare it against `gallery`.
    pub async fn verify(
        &self,
        samples: Vec<AlignedFace>,
        gallery: Vec<EnrolledIdentity>,
        threshold: f32,
    ) -> Result<VerifyResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                samples,
                gallery,
                threshold,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread exits once every [`EngineHandle`] has been dropped.
pub fn spawn_engine<E>(mut embedder: E, min_samples: usize) -> Result<EngineHandle, EngineError>
where
    E: FaceEmbedder + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("opsis-engine".into())
        .spawn(move || {
            tracing::info!(min_samples, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { samples, reply } => {
                        let result = extract_embedding(&mut embedder, &samples, min_samples)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Verify {
                        samples,
                        gallery,
                        threshold,
                        reply,
                    } => {
                        let result =
                            run_verify(&mut embedder, &samples, &gallery, threshold, min_samples);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn run_verify<E: FaceEmbedder>(
    embedder: &mut E,
    samples: &[AlignedFace],
    gallery: &[EnrolledIdentity],
    threshold: f32,
    min_samples: usize,
) -> Result<VerifyResult, EngineError> {
    let embedding = extract_embedding(embedder, samples, min_samples)?;
    let result = CosineMatcher.compare(&embedding, gallery, threshold);
    tracing::info!(
        matched = result.matched,
        similarity = result.similarity,
        gallery = gallery.len(),
        "verify: compared query"
    );
    Ok(VerifyResult { embedding, result })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Embeds a crop as its top-left pixel's RGB values.
    struct FirstPixel;

    impl FaceEmbedder for FirstPixel {
        fn embed(&mut self, face: &AlignedFace) -> Result<Vec<f32>, RecognizerError> {
            let p = face.image().get_pixel(0, 0);
            Ok(vec![p[0] as f32, p[1] as f32, p[2] as f32])
        }
    }

    fn samples(rgb: [u8; 3], n: usize) -> Vec<AlignedFace> {
        vec![AlignedFace::new(RgbImage::from_pixel(112, 112, Rgb(rgb))); n]
    }

    #[tokio::test]
    async fn test_extract_returns_unit_vector() {
        let engine = spawn_engine(FirstPixel, 3).unwrap();
        let embedding = engine.extract(samples([30, 40, 0], 4)).await.unwrap();
        assert!((embedding.values[0] - 0.6).abs() < 1e-6);
        assert!((embedding.values[1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_extract_too_few_samples() {
        let engine = spawn_engine(FirstPixel, 3).unwrap();
        let err = engine.extract(samples([30, 40, 0], 2)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Recognizer(RecognizerError::InsufficientSamples { got: 2, required: 3 })
        ));
    }

    #[tokio::test]
    async fn test_verify_matches_enrolled() {
        let engine = spawn_engine(FirstPixel, 3).unwrap();
        let enrolled = engine.extract(samples([30, 40, 0], 4)).await.unwrap();
        let other = engine.extract(samples([0, 0, 50], 4)).await.unwrap();
        let gallery = vec![
            EnrolledIdentity {
                id: "other".into(),
                display_name: "Other".into(),
                embedding: other,
            },
            EnrolledIdentity {
                id: "me".into(),
                display_name: "Me".into(),
                embedding: enrolled,
            },
        ];

        let verified = engine
            .verify(samples([30, 40, 0], 4), gallery.clone(), 0.8)
            .await
            .unwrap();
        assert!(verified.result.matched);
        assert_eq!(verified.result.identity_id.as_deref(), Some("me"));

        let stranger = engine
            .verify(samples([40, 0, 30], 4), gallery, 0.8)
            .await
            .unwrap();
        assert!(!stranger.result.matched);
    }

    #[tokio::test]
    async fn test_handle_is_clone() {
        let engine = spawn_engine(FirstPixel, 3).unwrap();
        let clone = engine.clone();
        drop(engine);
        assert!(clone.extract(samples([1, 0, 0], 3)).await.is_ok());
    }
}
