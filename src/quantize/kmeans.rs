use palette::Srgb;
use rand::Rng;

use super::{Quantized, dist_sq, nearest, to_srgb};
use crate::pixels::PixelBuffer;

/// Pick the pixels k-means trains on.
///
/// Indices are taken at a fixed stride first; slots the stride cannot fill
/// are drawn from `rng`, so only a full sample rate is deterministic.
fn sample_indices<R: Rng>(
    total: usize,
    target_colors: usize,
    sample_rate: f64,
    rng: &mut R,
) -> Vec<usize> {
    let wanted = (target_colors * 4).max((total as f64 * sample_rate.clamp(0.05, 1.0)) as usize);
    let len = wanted.min(total).max(1);
    let step = (total / len).max(1);

    let mut samples: Vec<usize> = (0..total).step_by(step).take(len).collect();
    while samples.len() < len {
        samples.push(rng.random_range(0..total));
    }
    samples
}

/// Sampled k-means in RGB space.
///
/// Centroid `i` is seeded from sample `i % samples`. Each iteration assigns
/// samples to the nearest centroid and moves non-empty centroids to their
/// cluster mean. The rounded centroids are then used to label every pixel,
/// not only the sampled ones.
pub fn kmeans_quantize<R: Rng>(
    pixels: &PixelBuffer,
    target_colors: usize,
    iterations: usize,
    sample_rate: f64,
    rng: &mut R,
) -> Quantized {
    let total = pixels.pixel_count();
    let k = target_colors.max(1);
    if total == 0 {
        return Quantized { centroids: vec![Srgb::new(0, 0, 0)], labels: Vec::new() };
    }

    let samples = sample_indices(total, k, sample_rate, rng);
    let mut centroids: Vec<[f64; 3]> = (0..k)
        .map(|i| {
            let [r, g, b] = pixels.rgb(samples[i % samples.len()]);
            [r as f64, g as f64, b as f64]
        })
        .collect();

    let mut sums = vec![[0f64; 4]; k];
    for _ in 0..iterations.max(1) {
        sums.iter_mut().for_each(|s| *s = [0.0; 4]);
        for &idx in &samples {
            let rgb = pixels.rgb(idx);
            let mut best = 0usize;
            let mut best_dist = f64::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let dist = dist_sq(rgb, *centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            let bucket = &mut sums[best];
            bucket[0] += rgb[0] as f64;
            bucket[1] += rgb[1] as f64;
            bucket[2] += rgb[2] as f64;
            bucket[3] += 1.0;
        }
        for (centroid, bucket) in centroids.iter_mut().zip(&sums) {
            if bucket[3] == 0.0 {
                continue;
            }
            *centroid = [bucket[0] / bucket[3], bucket[1] / bucket[3], bucket[2] / bucket[3]];
        }
    }

    let centroids: Vec<Srgb<u8>> = centroids.into_iter().map(to_srgb).collect();
    let labels = (0..total).map(|i| nearest(pixels.rgb(i), &centroids)).collect();
    Quantized { centroids, labels }
}
