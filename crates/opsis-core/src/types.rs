use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 2-D point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(self, other: Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned rectangle in image pixels (upright orientation).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }
}

/// Head rotation in degrees about the three image axes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    /// Rotation about X (looking up / down).
    pub pitch: f32,
    /// Rotation about Y (looking left / right).
    pub yaw: f32,
    /// Rotation about Z (head tilted towards a shoulder).
    pub roll: f32,
}

/// One face reported by the external detector for one frame.
///
/// Every optional field may be missing depending on the detector's mode;
/// the gates treat a missing field as a soft failure for that frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceObservation {
    pub bounding_box: Rect,
    #[serde(default)]
    pub tracking_id: Option<i32>,
    #[serde(default)]
    pub head_pose: HeadPose,
    #[serde(default)]
    pub left_eye: Option<Point>,
    #[serde(default)]
    pub right_eye: Option<Point>,
    #[serde(default)]
    pub left_eye_open: Option<f32>,
    #[serde(default)]
    pub right_eye_open: Option<f32>,
}

impl FaceObservation {
    /// Distance between the two eye landmarks, if both are present.
    pub fn eye_distance(&self) -> Option<f32> {
        Some(self.left_eye?.distance(self.right_eye?))
    }

    /// Mean of the two eye-open probabilities, if both are present.
    pub fn eye_open_score(&self) -> Option<f32> {
        Some((self.left_eye_open? + self.right_eye_open?) / 2.0)
    }
}

/// A camera frame as handed to the pipeline.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw sensor image, not yet rotated upright.
    pub image: RgbImage,
    /// Clockwise rotation (0/90/180/270) that brings `image` upright.
    pub rotation: u32,
    /// Monotonic capture time in milliseconds.
    pub timestamp_ms: u64,
    /// Producer-assigned sequence number.
    pub sequence: u64,
}

/// A face crop with both eyes on fixed canonical pixel positions.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedFace(RgbImage);

impl AlignedFace {
    pub fn new(image: RgbImage) -> Self {
        Self(image)
    }

    pub fn image(&self) -> &RgbImage {
        &self.0
    }

    pub fn into_image(self) -> RgbImage {
        self.0
    }
}

/// A face embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Dot product; equals cosine similarity when both vectors are unit length.
    pub fn dot(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

/// An enrolled identity as held by the identity store.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledIdentity {
    pub id: String,
    pub display_name: String,
    pub embedding: Embedding,
}

/// User-facing capture status signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionFeedback {
    NoFace,
    MultipleFaces,
    CenterFace,
    LookStraight,
    MoveCloser,
    HoldStill,
    PerformLiveness,
    LivenessFailed,
    FaceDetected,
    ImproveFocus,
}

impl DetectionFeedback {
    pub fn message(&self) -> &'static str {
        match self {
            Self::NoFace => "No face detected",
            Self::MultipleFaces => "Only one person should be in frame",
            Self::CenterFace => "Center your face in the oval",
            Self::LookStraight => "Look straight at the camera",
            Self::MoveCloser => "Move closer",
            Self::HoldStill => "Hold still",
            Self::PerformLiveness => "Blink once",
            Self::LivenessFailed => "Blink not detected, try again",
            Self::FaceDetected => "Face detected",
            Self::ImproveFocus => "Image is blurry, improve lighting or focus",
        }
    }
}

impl fmt::Display for DetectionFeedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}
