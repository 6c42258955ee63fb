use std::collections::HashMap;

use palette::Srgb;

use super::{Quantized, nearest, to_srgb};
use crate::pixels::PixelBuffer;

#[derive(Default)]
struct Bucket {
    key: u32,
    sum: [u64; 3],
    count: u64,
}

/// Snap a channel onto one of `levels` evenly spaced values.
#[inline(always)]
fn quantize_channel(value: u8, levels: u32) -> u32 {
    if levels <= 1 {
        return value as u32;
    }
    let steps = (levels - 1) as f64;
    let scaled = ((value as f64 / 255.0) * steps).round();
    ((scaled / steps) * 255.0).round().clamp(0.0, 255.0) as u32
}

/// Posterize, then keep the `target_colors` most populous buckets.
///
/// Bucket colors are the mean of the true pixel colors that fell into them.
/// Pixels from dropped buckets are re-assigned to the nearest kept color,
/// memoized per bucket key.
pub fn posterize_quantize(pixels: &PixelBuffer, target_colors: usize) -> Quantized {
    let total = pixels.pixel_count();
    let target = target_colors.max(1);
    let levels = ((target as f64).cbrt().round() as u32).max(1);

    let mut keys = Vec::with_capacity(total);
    let mut buckets: Vec<Bucket> = Vec::new();
    let mut bucket_of: HashMap<u32, usize> = HashMap::new();
    for i in 0..total {
        let rgb = pixels.rgb(i);
        let key = (quantize_channel(rgb[0], levels) << 16)
            | (quantize_channel(rgb[1], levels) << 8)
            | quantize_channel(rgb[2], levels);
        keys.push(key);
        let slot = *bucket_of.entry(key).or_insert_with(|| {
            buckets.push(Bucket { key, ..Default::default() });
            buckets.len() - 1
        });
        let bucket = &mut buckets[slot];
        bucket.sum[0] += rgb[0] as u64;
        bucket.sum[1] += rgb[1] as u64;
        bucket.sum[2] += rgb[2] as u64;
        bucket.count += 1;
    }

    // Stable: equally populous buckets keep first-seen order.
    buckets.sort_by(|a, b| b.count.cmp(&a.count));
    buckets.truncate(target);

    let mut centroids: Vec<Srgb<u8>> = buckets
        .iter()
        .map(|b| {
            let n = b.count as f64;
            to_srgb([b.sum[0] as f64 / n, b.sum[1] as f64 / n, b.sum[2] as f64 / n])
        })
        .collect();
    if centroids.is_empty() {
        centroids.push(Srgb::new(0, 0, 0));
    }

    let mut palette_index: HashMap<u32, u16> = buckets
        .iter()
        .enumerate()
        .map(|(idx, b)| (b.key, idx as u16))
        .collect();
    let labels = keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            *palette_index
                .entry(*key)
                .or_insert_with(|| nearest(pixels.rgb(i), &centroids))
        })
        .collect();

    Quantized { centroids, labels }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::test_support::buffer;

    #[test]
    fn channel_levels() {
        assert_eq!(quantize_channel(0, 2), 0);
        assert_eq!(quantize_channel(127, 2), 0);
        assert_eq!(quantize_channel(128, 2), 255);
        assert_eq!(quantize_channel(200, 3), 255);
        assert_eq!(quantize_channel(100, 3), 128);
        assert_eq!(quantize_channel(77, 1), 77);
    }

    #[test]
    fn keeps_most_populous_buckets_and_remaps_the_rest() {
        let mut colors = vec![[10, 10, 10]; 5];
        colors.extend(vec![[240, 240, 240]; 3]);
        colors.push([200, 200, 160]);
        let pixels = buffer(3, 3, &colors);
        let q = posterize_quantize(&pixels, 2);
        // cbrt(2) rounds to 1 level: every distinct color is its own bucket.
        assert_eq!(q.centroids.len(), 2);
        assert_eq!(q.centroids[0], Srgb::new(10, 10, 10));
        assert_eq!(q.centroids[1], Srgb::new(240, 240, 240));
        assert_eq!(q.labels[..5], [0; 5]);
        assert_eq!(q.labels[5..8], [1; 3]);
        // The dropped pixel is nearer to the light bucket.
        assert_eq!(q.labels[8], 1);
    }

    #[test]
    fn bucket_color_is_true_mean() {
        let colors = vec![[0, 0, 0], [20, 20, 20], [250, 250, 250], [230, 230, 230]];
        let pixels = buffer(2, 2, &colors);
        let q = posterize_quantize(&pixels, 8);
        assert_eq!(q.centroids, vec![Srgb::new(10, 10, 10), Srgb::new(240, 240, 240)]);
        assert_eq!(q.labels, vec![0, 0, 1, 1]);
    }
}
