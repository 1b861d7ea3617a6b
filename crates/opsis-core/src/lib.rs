//! opsis-core: face capture quality pipeline and embedding matching.
//!
//! Consumes per-frame face detector output, gates it on placement, pose,
//! motion and a blink liveness challenge, collects eye-aligned 112×112 crops,
//! and turns them into a single L2-normalized embedding that is either
//! enrolled or matched against the enrolled set by cosine similarity.

pub mod alignment;
pub mod blur;
pub mod capture;
pub mod collector;
pub mod config;
pub mod engine;
pub mod feedback;
pub mod flow;
pub mod liveness;
pub mod mapping;
pub mod matcher;
pub mod pipeline;
pub mod quality;
pub mod recognizer;
pub mod session;
pub mod stability;
pub mod types;

pub use capture::{run_capture, FaceDetector};
pub use config::CaptureConfig;
pub use engine::{spawn_engine, EngineHandle};
pub use feedback::FeedbackState;
pub use flow::{FaceFlow, IdentityStore, PendingEnrollment, Verification};
pub use matcher::{CosineMatcher, MatchResult, Matcher};
pub use pipeline::{CapturePipeline, FrameOutcome};
pub use recognizer::{FaceEmbedder, OnnxEmbedder, TensorLayout};
pub use types::{
    AlignedFace, DetectionFeedback, EnrolledIdentity, Embedding, FaceObservation, Frame,
    HeadPose, Point, Rect,
};
