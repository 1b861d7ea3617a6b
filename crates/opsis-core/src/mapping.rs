//! Detector image coordinates → on-screen preview coordinates.
//!
//! The preview fills the screen (cover scaling, overflow cropped, centered)
//! and is mirrored horizontally, as a front camera preview is.

use crate::types::Point;

/// Screen (preview surface) size in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenSize {
    pub width: f32,
    pub height: f32,
}

impl ScreenSize {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Per-frame scale and offset from upright image space to screen space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapping {
    pub scale: f32,
    pub translate_x: f32,
    pub translate_y: f32,
    screen_width: f32,
}

impl CoordinateMapping {
    /// Derive the mapping for a raw sensor image of `image_width`×`image_height`
    /// that must be rotated by `rotation` degrees to be upright.
    pub fn compute(rotation: u32, image_width: u32, image_height: u32, screen: ScreenSize) -> Self {
        let (w, h) = if rotation % 180 == 90 {
            (image_height as f32, image_width as f32)
        } else {
            (image_width as f32, image_height as f32)
        };

        let scale = (screen.width / w).max(screen.height / h);

        Self {
            scale,
            translate_x: (screen.width - w * scale) / 2.0,
            translate_y: (screen.height - h * scale) / 2.0,
            screen_width: screen.width,
        }
    }

    /// Map a point from upright image space to mirrored screen space.
    pub fn map_point(&self, raw: Point) -> Point {
        Point::new(
            self.screen_width - (raw.x * self.scale + self.translate_x),
            raw.y * self.scale + self.translate_y,
        )
    }

    /// Map a length (e.g. a face width) to screen pixels.
    pub fn map_length(&self, raw: f32) -> f32 {
        raw * self.scale
    }
}
