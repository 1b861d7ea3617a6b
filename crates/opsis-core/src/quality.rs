//! Per-frame placement and pose acceptance.

use crate::config::{CaptureConfig, OvalLayout};
use crate::mapping::{CoordinateMapping, ScreenSize};
use crate::types::{DetectionFeedback, FaceObservation, HeadPose, Point};

/// The on-screen guide oval the subject places their face in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OvalGeometry {
    pub center: Point,
    pub radius_x: f32,
    pub radius_y: f32,
}

impl OvalGeometry {
    /// Lay the oval out on a screen: horizontally centered, `top_margin_percent`
    /// of the screen height from the top.
    pub fn from_screen(screen: ScreenSize, layout: &OvalLayout) -> Self {
        let width = screen.width * layout.width_percent;
        let height = width * layout.aspect_ratio;
        let top = screen.height * layout.top_margin_percent;
        Self {
            center: Point::new(screen.width / 2.0, top + height / 2.0),
            radius_x: width / 2.0,
            radius_y: height / 2.0,
        }
    }
}

/// Why a face was rejected by the quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityIssue {
    OffCenter,
    TooFar,
    NotFacingCamera,
}

impl QualityIssue {
    pub fn feedback(self) -> DetectionFeedback {
        match self {
            Self::OffCenter => DetectionFeedback::CenterFace,
            Self::TooFar => DetectionFeedback::MoveCloser,
            Self::NotFacingCamera => DetectionFeedback::LookStraight,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QualityGate {
    position_tolerance: f32,
    min_face_size_ratio: f32,
    max_rotation_degrees: f32,
}

impl QualityGate {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            position_tolerance: config.position_tolerance,
            min_face_size_ratio: config.min_face_size_ratio,
            max_rotation_degrees: config.max_rotation_degrees,
        }
    }

    /// Run placement then pose checks on one detected face.
    pub fn evaluate(
        &self,
        face: &FaceObservation,
        mapping: &CoordinateMapping,
        oval: &OvalGeometry,
    ) -> Result<(), QualityIssue> {
        let center = mapping.map_point(face.bounding_box.center());
        let width = mapping.map_length(face.bounding_box.width());
        self.check_placement(center, width, oval)?;

        if !self.is_facing_camera(&face.head_pose) {
            return Err(QualityIssue::NotFacingCamera);
        }
        Ok(())
    }

    /// Screen-space placement: center within tolerance of the oval center,
    /// and wide enough relative to the oval.
    pub fn check_placement(
        &self,
        center: Point,
        width: f32,
        oval: &OvalGeometry,
    ) -> Result<(), QualityIssue> {
        let dx = (center.x - oval.center.x).abs();
        let dy = (center.y - oval.center.y).abs();
        if dx > oval.radius_x * self.position_tolerance
            || dy > oval.radius_y * self.position_tolerance
        {
            return Err(QualityIssue::OffCenter);
        }

        if width <= oval.radius_x * self.min_face_size_ratio {
            return Err(QualityIssue::TooFar);
        }
        Ok(())
    }

    pub fn is_facing_camera(&self, pose: &HeadPose) -> bool {
        pose.pitch.abs() <= self.max_rotation_degrees
            && pose.yaw.abs() <= self.max_rotation_degrees
            && pose.roll.abs() <= self.max_rotation_degrees
    }
}
