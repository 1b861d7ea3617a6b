//! Sharpness score: variance of the 4-neighbour Laplacian over luma.

use image::RgbImage;

/// ITU-R BT.601 luma of every pixel, row-major.
fn luma(image: &RgbImage) -> Vec<f64> {
    image
        .pixels()
        .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
        .collect()
}

/// Variance of the discrete Laplacian over interior pixels.
///
/// The one-pixel border is excluded. Images smaller than 3×3 have no
/// interior and score 0.
pub fn laplacian_variance(image: &RgbImage) -> f64 {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w < 3 || h < 3 {
        return 0.0;
    }

    let gray = luma(image);
    let mut laplacian = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = y * w + x;
            laplacian.push(gray[i - w] + gray[i - 1] + gray[i + 1] + gray[i + w] - 4.0 * gray[i]);
        }
    }

    let n = laplacian.len() as f64;
    let mean = laplacian.iter().sum::<f64>() / n;
    laplacian.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
}
