//! Face alignment via an eye-anchored similarity transform.
//!
//! The upright frame is translated so the eye midpoint sits at the origin,
//! rotated so the eye line is horizontal, scaled to the canonical eye
//! distance, and translated onto the canonical eye midpoint. Every crop
//! therefore has both eyes at the same pixel coordinates.

use crate::config::CaptureConfig;
use crate::types::{AlignedFace, Point};
use image::{imageops, Rgb, RgbImage};
use std::borrow::Cow;

/// Rotate a raw sensor image clockwise by `rotation` degrees to upright.
pub fn rotate_upright(image: &RgbImage, rotation: u32) -> Cow<'_, RgbImage> {
    match rotation % 360 {
        90 => Cow::Owned(imageops::rotate90(image)),
        180 => Cow::Owned(imageops::rotate180(image)),
        270 => Cow::Owned(imageops::rotate270(image)),
        _ => Cow::Borrowed(image),
    }
}

/// Forward mapping `dst = scale · R(angle) · (src − pivot) + target`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pivot: Point,
    target: Point,
    cos: f32,
    sin: f32,
    scale: f32,
}

impl SimilarityTransform {
    /// Transform taking `left`/`right` eyes onto the level eye pair
    /// `target_left`/`target_right`.
    pub fn from_eyes(left: Point, right: Point, target_left: Point, target_right: Point) -> Self {
        let eye_distance = left.distance(right);
        let target_distance = target_right.x - target_left.x;
        let angle = (right.y - left.y).atan2(right.x - left.x);

        Self {
            pivot: Point::new((left.x + right.x) / 2.0, (left.y + right.y) / 2.0),
            target: Point::new(
                (target_left.x + target_right.x) / 2.0,
                (target_left.y + target_right.y) / 2.0,
            ),
            // Rotating by -angle levels the eye line.
            cos: angle.cos(),
            sin: -angle.sin(),
            scale: target_distance / eye_distance,
        }
    }

    #[cfg(test)]
    fn apply(&self, p: Point) -> Point {
        let x = p.x - self.pivot.x;
        let y = p.y - self.pivot.y;
        Point::new(
            self.scale * (self.cos * x - self.sin * y) + self.target.x,
            self.scale * (self.sin * x + self.cos * y) + self.target.y,
        )
    }

    pub fn invert(&self, p: Point) -> Point {
        let x = (p.x - self.target.x) / self.scale;
        let y = (p.y - self.target.y) / self.scale;
        Point::new(
            self.cos * x + self.sin * y + self.pivot.x,
            -self.sin * x + self.cos * y + self.pivot.y,
        )
    }
}

/// Render `src` through `transform` into a `size`×`size` canvas.
///
/// Bilinear sampling at pixel centers. Source pixels outside the image are
/// black.
fn warp_similarity(src: &RgbImage, transform: &SimilarityTransform, size: u32) -> RgbImage {
    let (w, h) = (src.width() as i64, src.height() as i64);
    let sample = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && x < w && y >= 0 && y < h {
            let Rgb(p) = *src.get_pixel(x as u32, y as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    RgbImage::from_fn(size, size, |ox, oy| {
        let s = transform.invert(Point::new(ox as f32 + 0.5, oy as f32 + 0.5));
        let sx = s.x - 0.5;
        let sy = s.y - 0.5;

        let x0 = sx.floor() as i64;
        let y0 = sy.floor() as i64;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let p00 = sample(x0, y0);
        let p10 = sample(x0 + 1, y0);
        let p01 = sample(x0, y0 + 1);
        let p11 = sample(x0 + 1, y0 + 1);

        let mut out = [0u8; 3];
        for c in 0..3 {
            let v = p00[c] * (1.0 - fx) * (1.0 - fy)
                + p10[c] * fx * (1.0 - fy)
                + p01[c] * (1.0 - fx) * fy
                + p11[c] * fx * fy;
            out[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

/// Produces canonical eye-aligned crops.
#[derive(Debug, Clone)]
pub struct EyeAligner {
    face_size: u32,
    min_eye_distance: f32,
    target_left: Point,
    target_right: Point,
}

impl EyeAligner {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            face_size: config.face_size,
            min_eye_distance: config.min_eye_distance_for_alignment,
            target_left: Point::new(config.target_left_eye[0], config.target_left_eye[1]),
            target_right: Point::new(config.target_right_eye[0], config.target_right_eye[1]),
        }
    }

    /// Align an upright frame on two eye landmarks given in either order.
    ///
    /// Returns `None` when the eyes are closer than the alignment minimum.
    pub fn align(&self, upright: &RgbImage, eye_a: Point, eye_b: Point) -> Option<AlignedFace> {
        let (left, right) = if eye_a.x <= eye_b.x {
            (eye_a, eye_b)
        } else {
            (eye_b, eye_a)
        };

        let eye_distance = left.distance(right);
        if eye_distance < self.min_eye_distance {
            tracing::debug!(eye_distance, min = self.min_eye_distance, "eyes too close to align");
            return None;
        }

        let transform =
            SimilarityTransform::from_eyes(left, right, self.target_left, self.target_right);
        Some(AlignedFace::new(warp_similarity(
            upright,
            &transform,
            self.face_size,
        )))
    }
}
