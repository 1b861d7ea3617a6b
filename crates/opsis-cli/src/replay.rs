//! Recorded-session replay: a directory of frames plus the detector output
//! captured alongside them, played back in real time.
//!
//! Layout:
//!
//! ```text
//! session/
//!   session.jsonl   one object per frame: {"frame", "timestamp_ms", "rotation", "faces"}
//!   000.png ...     the referenced frame images
//! ```

use opsis_core::capture::DetectorError;
use opsis_core::{FaceDetector, FaceObservation, Frame};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const INDEX_FILE: &str = "session.jsonl";

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session.jsonl line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode frame {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("session has no frames")]
    Empty,
    #[error("frame {0} is out of range")]
    OutOfRange(usize),
}

/// One line of `session.jsonl`.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameRecord {
    /// Image file name, relative to the session directory.
    pub frame: String,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub rotation: u32,
    #[serde(default)]
    pub faces: Vec<FaceObservation>,
}

#[derive(Debug, Clone)]
pub struct RecordedSession {
    dir: PathBuf,
    records: Vec<FrameRecord>,
}

impl RecordedSession {
    pub fn load(dir: &Path) -> Result<Self, ReplayError> {
        let path = dir.join(INDEX_FILE);
        let text = std::fs::read_to_string(&path).map_err(|source| ReplayError::Io {
            path: path.clone(),
            source,
        })?;

        let mut records = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line)
                .map_err(|source| ReplayError::Parse { line: i + 1, source })?;
            records.push(record);
        }
        if records.is_empty() {
            return Err(ReplayError::Empty);
        }

        tracing::debug!(dir = %dir.display(), frames = records.len(), "loaded recorded session");
        Ok(Self {
            dir: dir.to_path_buf(),
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    /// A detector that answers with the recorded observations, keyed by
    /// frame sequence number (the record's index).
    pub fn detector(&self) -> ReplayDetector {
        ReplayDetector {
            faces: self
                .records
                .iter()
                .enumerate()
                .map(|(i, r)| (i as u64, r.faces.clone()))
                .collect(),
        }
    }

    /// Decode frame `sequence` from disk.
    pub fn load_frame(&self, sequence: usize) -> Result<Frame, ReplayError> {
        let record = self
            .records
            .get(sequence)
            .ok_or(ReplayError::OutOfRange(sequence))?;
        let path = self.dir.join(&record.frame);
        let image = image::open(&path)
            .map_err(|source| ReplayError::Image {
                path: path.clone(),
                source,
            })?
            .to_rgb8();
        Ok(Frame {
            image,
            rotation: record.rotation,
            timestamp_ms: record.timestamp_ms,
            sequence: sequence as u64,
        })
    }
}

/// Replays recorded detector output.
pub struct ReplayDetector {
    faces: HashMap<u64, Vec<FaceObservation>>,
}

impl FaceDetector for ReplayDetector {
    async fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceObservation>, DetectorError> {
        self.faces.get(&frame.sequence).cloned().ok_or_else(|| {
            DetectorError::Failed(format!("no detections recorded for frame {}", frame.sequence))
        })
    }
}

/// Publish the session's frames on `tx`, paced by their timestamps.
///
/// Stops early once every receiver is gone. Frames that fail to decode are
/// skipped. Returns the number of frames published.
pub fn spawn_playback(
    session: Arc<RecordedSession>,
    tx: watch::Sender<Option<Arc<Frame>>>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now();
        let first_ts = session.records[0].timestamp_ms;
        let mut published = 0;

        for sequence in 0..session.len() {
            let offset = session.records[sequence].timestamp_ms.saturating_sub(first_ts);
            tokio::time::sleep_until(start + Duration::from_millis(offset)).await;

            let loader = Arc::clone(&session);
            let frame = match tokio::task::spawn_blocking(move || loader.load_frame(sequence)).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, sequence, "skipping unreadable frame");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, sequence, "frame decode task failed");
                    continue;
                }
            };

            if tx.send(Some(Arc::new(frame))).is_err() {
                tracing::debug!(sequence, "capture finished; stopping playback");
                break;
            }
            published += 1;
        }
        published
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn session_dir(name: &str, index: &str, frames: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("opsis-replay-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for (i, frame) in frames.iter().enumerate() {
            RgbImage::from_pixel(8, 6, Rgb([i as u8 * 40, 0, 0]))
                .save(dir.join(frame))
                .unwrap();
        }
        std::fs::write(dir.join(INDEX_FILE), index).unwrap();
        dir
    }

    const INDEX: &str = r#"{"frame":"000.png","timestamp_ms":1000,"rotation":90,"faces":[]}

{"frame":"001.png","timestamp_ms":1020,"faces":[{"bounding_box":{"left":1,"top":1,"right":5,"bottom":5},"tracking_id":3,"left_eye_open":0.9,"right_eye_open":0.8}]}
{"frame":"002.png","timestamp_ms":1040}
"#;

    #[test]
    fn test_load_session_index() {
        let dir = session_dir("load", INDEX, &["000.png", "001.png", "002.png"]);
        let session = RecordedSession::load(&dir).unwrap();
        assert_eq!(session.len(), 3);

        let records = session.records();
        assert_eq!(records[0].rotation, 90);
        assert_eq!(records[1].rotation, 0);
        assert_eq!(records[1].faces.len(), 1);
        let face = &records[1].faces[0];
        assert_eq!(face.tracking_id, Some(3));
        assert_eq!(face.left_eye, None);
        assert!((face.eye_open_score().unwrap() - 0.85).abs() < 1e-6);
        assert!(records[2].faces.is_empty());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_load_frame_decodes_image() {
        let dir = session_dir("frame", INDEX, &["000.png", "001.png", "002.png"]);
        let session = RecordedSession::load(&dir).unwrap();
        let frame = session.load_frame(1).unwrap();
        assert_eq!(frame.image.dimensions(), (8, 6));
        assert_eq!(frame.image.get_pixel(0, 0), &Rgb([40, 0, 0]));
        assert_eq!(frame.timestamp_ms, 1020);
        assert_eq!(frame.sequence, 1);
        assert!(matches!(
            session.load_frame(7),
            Err(ReplayError::OutOfRange(7))
        ));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_parse_error_reports_line() {
        let dir = session_dir("bad", "{\"frame\":\"a.png\",\"timestamp_ms\":0}\n{oops}\n", &[]);
        let err = RecordedSession::load(&dir).unwrap_err();
        assert!(matches!(err, ReplayError::Parse { line: 2, .. }));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_empty_session_rejected() {
        let dir = session_dir("empty", "\n\n", &[]);
        assert!(matches!(
            RecordedSession::load(&dir),
            Err(ReplayError::Empty)
        ));
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_replay_detector_by_sequence() {
        let dir = session_dir("detector", INDEX, &["000.png", "001.png", "002.png"]);
        let session = RecordedSession::load(&dir).unwrap();
        let mut detector = session.detector();

        let frame = session.load_frame(1).unwrap();
        assert_eq!(detector.detect(&frame).await.unwrap().len(), 1);

        let unknown = Frame {
            sequence: 99,
            ..frame
        };
        assert!(detector.detect(&unknown).await.is_err());

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_playback_publishes_every_readable_frame() {
        // 002.png is missing and gets skipped.
        let dir = session_dir("playback", INDEX, &["000.png", "001.png"]);
        let session = Arc::new(RecordedSession::load(&dir).unwrap());
        let (tx, mut rx) = watch::channel(None);

        let playback = spawn_playback(session, tx);
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            if let Some(frame) = rx.borrow_and_update().clone() {
                seen.push(frame.sequence);
            }
        }
        assert_eq!(playback.await.unwrap(), 2);
        assert_eq!(seen.last(), Some(&1));

        std::fs::remove_dir_all(dir).ok();
    }
}
