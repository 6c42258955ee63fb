use serde::{Deserialize, Serialize};

use crate::segment::RegionBuilder;

/// Axis-aligned box in pixel-grid coordinates; `max_*` edges are exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn scaled(&self, scale: f64) -> Bounds {
        Bounds {
            min_x: self.min_x * scale,
            min_y: self.min_y * scale,
            max_x: self.max_x * scale,
            max_y: self.max_y * scale,
        }
    }

    /// Positive-area overlap test.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }
}

/// A finished, read-only region.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    id: u32,
    color_id: u16,
    pixel_count: usize,
    cx: f64,
    cy: f64,
    bounds: Bounds,
    #[serde(skip)]
    pixels: Vec<u32>,
}

impl Region {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// One-based palette id; zero never appears.
    pub fn color_id(&self) -> u16 {
        self.color_id
    }

    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    /// Centroid `(cx, cy)`, the mean of member pixel coordinates.
    pub fn centroid(&self) -> (f64, f64) {
        (self.cx, self.cy)
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Row-major member pixel indices.
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }
}

fn freeze(builder: RegionBuilder, width: u32) -> Region {
    let w = width as u64;
    let count = builder.pixels.len();
    let (mut sum_x, mut sum_y) = (0u64, 0u64);
    let (mut min_x, mut min_y) = (u64::MAX, u64::MAX);
    let (mut max_x, mut max_y) = (0u64, 0u64);
    for &idx in &builder.pixels {
        let x = idx as u64 % w;
        let y = idx as u64 / w;
        sum_x += x;
        sum_y += y;
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    let (cx, cy, bounds) = if count > 0 {
        (
            sum_x as f64 / count as f64,
            sum_y as f64 / count as f64,
            Bounds {
                min_x: min_x as f64,
                min_y: min_y as f64,
                max_x: (max_x + 1) as f64,
                max_y: (max_y + 1) as f64,
            },
        )
    } else {
        (0.0, 0.0, Bounds::default())
    };

    Region {
        id: builder.id,
        color_id: builder.label + 1,
        pixel_count: count,
        cx,
        cy,
        bounds,
        pixels: builder.pixels,
    }
}

/// Freeze segmentation output: centroids, bounds, and palette ids shifted
/// to start at 1 so consumers can keep 0 as "no color".
pub fn finalize_regions(builders: Vec<RegionBuilder>, width: u32) -> Vec<Region> {
    builders.into_iter().map(|b| freeze(b, width)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centroid_bounds_and_color_shift() {
        // Pixels (1,0), (2,0), (1,1) in a 4-wide image.
        let builder = RegionBuilder { id: 3, label: 0, pixels: vec![1, 2, 5] };
        let regions = finalize_regions(vec![builder], 4);
        let r = &regions[0];
        assert_eq!(r.id(), 3);
        assert_eq!(r.color_id(), 1);
        assert_eq!(r.pixel_count(), 3);
        let (cx, cy) = r.centroid();
        assert!((cx - 4.0 / 3.0).abs() < 1e-12);
        assert!((cy - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(
            r.bounds(),
            Bounds { min_x: 1.0, min_y: 0.0, max_x: 3.0, max_y: 2.0 }
        );
    }

    #[test]
    fn touching_bounds_do_not_intersect() {
        let a = Bounds { min_x: 0.0, min_y: 0.0, max_x: 4.0, max_y: 4.0 };
        let b = Bounds { min_x: 4.0, min_y: 0.0, max_x: 8.0, max_y: 4.0 };
        assert!(!a.intersects(&b));
        assert!(a.intersects(&a.scaled(0.5)));
    }
}
