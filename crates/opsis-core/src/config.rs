use serde::{Deserialize, Serialize};

/// Tunables for one capture attempt.
///
/// Every field has a default; a config file only needs to name the values
/// it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Fraction of the oval half-axes the face center may deviate by.
    pub position_tolerance: f32,
    /// Mapped face width must exceed this fraction of the oval half-width.
    pub min_face_size_ratio: f32,
    /// Maximum absolute head pitch, yaw and roll in degrees.
    pub max_rotation_degrees: f32,
    /// Minimum eye-landmark distance (image pixels) for a frame to be usable.
    pub min_eye_distance_px: f32,
    /// Maximum bounding-box center speed in pixels per second.
    pub max_center_speed_px_per_sec: f32,
    /// How long the face must stay in place before liveness starts.
    pub stable_duration_ms: u64,
    /// Deadline for completing the blink challenge.
    pub liveness_timeout_ms: u64,
    /// Mean eye-open probability at or above which eyes count as open.
    pub eye_open_threshold: f32,
    /// Mean eye-open probability at or below which eyes count as closed.
    pub eye_closed_threshold: f32,
    /// Number of aligned crops collected per attempt.
    pub target_samples: usize,
    /// Minimum spacing between two accepted crops.
    pub sample_interval_ms: u64,
    /// Laplacian variance below which a crop is rejected as blurry.
    pub blur_variance_threshold: f64,
    /// Side length of the aligned crop.
    pub face_size: u32,
    /// Minimum eye distance (upright frame pixels) the aligner accepts.
    pub min_eye_distance_for_alignment: f32,
    /// Canonical left-eye position in the aligned crop.
    pub target_left_eye: [f32; 2],
    /// Canonical right-eye position in the aligned crop.
    pub target_right_eye: [f32; 2],
    /// Repeat interval for an unchanged feedback signal.
    pub same_feedback_cooldown_ms: u64,
    /// Minimum time before a different feedback signal replaces the last one.
    pub feedback_switch_cooldown_ms: u64,
    /// Minimum number of crops the embedding stage accepts.
    pub min_embedding_samples: usize,
    /// Cosine similarity at or above which a verification matches.
    pub similarity_threshold: f32,
    /// Placement of the guide oval relative to the screen.
    pub oval: OvalLayout,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            position_tolerance: 0.5,
            min_face_size_ratio: 0.8,
            max_rotation_degrees: 12.0,
            min_eye_distance_px: 25.0,
            max_center_speed_px_per_sec: 2000.0,
            stable_duration_ms: 600,
            liveness_timeout_ms: 6000,
            eye_open_threshold: 0.70,
            eye_closed_threshold: 0.35,
            target_samples: 4,
            sample_interval_ms: 100,
            blur_variance_threshold: 220.0,
            face_size: 112,
            min_eye_distance_for_alignment: 10.0,
            target_left_eye: [38.0, 52.0],
            target_right_eye: [74.0, 52.0],
            same_feedback_cooldown_ms: 400,
            feedback_switch_cooldown_ms: 140,
            min_embedding_samples: 3,
            similarity_threshold: 0.80,
            oval: OvalLayout::default(),
        }
    }
}

/// Guide oval proportions, relative to the screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OvalLayout {
    /// Oval width as a fraction of the screen width.
    pub width_percent: f32,
    /// Oval height divided by oval width.
    pub aspect_ratio: f32,
    /// Gap above the oval as a fraction of the screen height.
    pub top_margin_percent: f32,
}

impl Default for OvalLayout {
    fn default() -> Self {
        Self {
            width_percent: 0.70,
            aspect_ratio: 1.20,
            top_margin_percent: 0.15,
        }
    }
}
