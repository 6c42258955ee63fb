//! Palette reduction.
//!
//! Every strategy returns the same [`Quantized`] shape: a list of palette
//! colors and one zero-based palette index per pixel.

mod kmeans;
mod organic;
mod posterize;

use palette::Srgb;
use rand::Rng;

use crate::options::{Algorithm, GenerationOptions};
use crate::pixels::PixelBuffer;

pub use kmeans::kmeans_quantize;
pub use organic::organic_quantize;
pub use posterize::posterize_quantize;

/// Output of a quantizer.
#[derive(Clone, Debug, PartialEq)]
pub struct Quantized {
    pub centroids: Vec<Srgb<u8>>,
    /// Palette index per pixel, row-major.
    pub labels: Vec<u16>,
}

/// Run the strategy selected in `options` (expected to be normalized).
pub fn quantize<R: Rng>(
    pixels: &PixelBuffer,
    options: &GenerationOptions,
    rng: &mut R,
) -> Quantized {
    match options.algorithm {
        Algorithm::KMeans => kmeans_quantize(
            pixels,
            options.target_colors,
            options.kmeans_iterations,
            options.sample_rate,
            rng,
        ),
        Algorithm::Posterize => posterize_quantize(pixels, options.target_colors),
        Algorithm::Organic => organic_quantize(pixels, options.target_colors, rng),
    }
}

#[inline(always)]
pub(crate) fn dist_sq(a: [u8; 3], b: [f64; 3]) -> f64 {
    let dr = a[0] as f64 - b[0];
    let dg = a[1] as f64 - b[1];
    let db = a[2] as f64 - b[2];
    dr * dr + dg * dg + db * db
}

/// Index of the centroid closest to `rgb`; first one wins ties.
pub(crate) fn nearest(rgb: [u8; 3], centroids: &[Srgb<u8>]) -> u16 {
    let r = rgb[0] as i32;
    let g = rgb[1] as i32;
    let b = rgb[2] as i32;
    let mut best_idx = 0usize;
    let mut best_dist = i32::MAX;
    for (idx, c) in centroids.iter().enumerate() {
        let dr = r - c.red as i32;
        let dg = g - c.green as i32;
        let db = b - c.blue as i32;
        let dist = dr * dr + dg * dg + db * db;
        if dist < best_dist {
            best_dist = dist;
            best_idx = idx;
        }
    }
    best_idx as u16
}

/// Round a float centroid into a palette color.
pub(crate) fn to_srgb(c: [f64; 3]) -> Srgb<u8> {
    let ch = |v: f64| v.clamp(0.0, 255.0).round() as u8;
    Srgb::new(ch(c[0]), ch(c[1]), ch(c[2]))
}
