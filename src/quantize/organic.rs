use palette::Srgb;
use rand::Rng;

use super::{Quantized, to_srgb};
use crate::pixels::PixelBuffer;

const SPATIAL_WEIGHT: f64 = 10.0;
const ROUNDS: usize = 4;
const MIN_GRID_STEP: f64 = 4.0;

#[derive(Clone, Copy, Debug)]
struct Seed {
    color: [f64; 3],
    x: f64,
    y: f64,
}

fn seed_at(pixels: &PixelBuffer, x: u32, y: u32) -> Seed {
    let [r, g, b] = pixels.rgb((y * pixels.width() + x) as usize);
    Seed { color: [r as f64, g as f64, b as f64], x: x as f64, y: y as f64 }
}

/// Superpixel-style clustering: each centroid carries a color and a
/// position, and only competes for pixels inside a window around itself.
///
/// Pixels that no window reaches keep label 0.
pub fn organic_quantize<R: Rng>(
    pixels: &PixelBuffer,
    target_colors: usize,
    rng: &mut R,
) -> Quantized {
    let width = pixels.width();
    let height = pixels.height();
    let total = pixels.pixel_count();
    let cluster_count = target_colors.max(1);
    if total == 0 {
        return Quantized { centroids: vec![Srgb::new(0, 0, 0)], labels: Vec::new() };
    }

    let step = (total as f64 / cluster_count as f64).sqrt().max(MIN_GRID_STEP);
    let half_step = step / 2.0;
    let mut seeds: Vec<Seed> = Vec::with_capacity(cluster_count);
    let mut gy = half_step;
    while gy < height as f64 && seeds.len() < cluster_count {
        let mut gx = half_step;
        while gx < width as f64 && seeds.len() < cluster_count {
            let px = (gx.round() as u32).min(width - 1);
            let py = (gy.round() as u32).min(height - 1);
            seeds.push(seed_at(pixels, px, py));
            gx += step;
        }
        gy += step;
    }
    while seeds.len() < cluster_count {
        let px = rng.random_range(0..width);
        let py = rng.random_range(0..height);
        seeds.push(seed_at(pixels, px, py));
    }

    let mut labels: Vec<i32> = vec![-1; total];
    let mut distances: Vec<f64> = vec![f64::INFINITY; total];
    let search_radius = step * 2.0;
    let spatial_norm = SPATIAL_WEIGHT / (step * step);

    for _ in 0..ROUNDS {
        labels.fill(-1);
        distances.fill(f64::INFINITY);

        for (c, seed) in seeds.iter().enumerate() {
            let min_x = (seed.x - search_radius).floor().max(0.0) as u32;
            let max_x = ((seed.x + search_radius).ceil() as u32).min(width - 1);
            let min_y = (seed.y - search_radius).floor().max(0.0) as u32;
            let max_y = ((seed.y + search_radius).ceil() as u32).min(height - 1);
            for y in min_y..=max_y {
                let row = (y * width) as usize;
                let dy = y as f64 - seed.y;
                for x in min_x..=max_x {
                    let idx = row + x as usize;
                    let dx = x as f64 - seed.x;
                    let color_dist = super::dist_sq(pixels.rgb(idx), seed.color);
                    let cost = color_dist + spatial_norm * (dx * dx + dy * dy);
                    if cost < distances[idx] {
                        distances[idx] = cost;
                        labels[idx] = c as i32;
                    }
                }
            }
        }

        // [r, g, b, x, y, n]
        let mut sums = vec![[0f64; 6]; seeds.len()];
        for (idx, &label) in labels.iter().enumerate() {
            if label < 0 {
                continue;
            }
            let [r, g, b] = pixels.rgb(idx);
            let bucket = &mut sums[label as usize];
            bucket[0] += r as f64;
            bucket[1] += g as f64;
            bucket[2] += b as f64;
            bucket[3] += (idx % width as usize) as f64;
            bucket[4] += (idx / width as usize) as f64;
            bucket[5] += 1.0;
        }
        for (seed, bucket) in seeds.iter_mut().zip(&sums) {
            let n = bucket[5];
            if n == 0.0 {
                continue;
            }
            seed.color = [bucket[0] / n, bucket[1] / n, bucket[2] / n];
            seed.x = bucket[3] / n;
            seed.y = bucket[4] / n;
        }
    }

    let centroids: Vec<Srgb<u8>> = seeds.iter().map(|s| to_srgb(s.color)).collect();
    let labels = labels
        .into_iter()
        .map(|l| if l >= 0 && (l as usize) < centroids.len() { l as u16 } else { 0 })
        .collect();
    Quantized { centroids, labels }
}
