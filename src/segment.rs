//! Connected-component extraction and small/slender region merging.

use crate::options::GenerationOptions;

const UNASSIGNED: u32 = u32::MAX;

/// A region while segmentation is still reshaping it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionBuilder {
    pub id: u32,
    /// Zero-based palette index.
    pub label: u16,
    /// Row-major pixel indices, in flood-fill visiting order.
    pub pixels: Vec<u32>,
}

impl RegionBuilder {
    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }
}

/// Regions plus the pixel -> region id map that indexes them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segmentation {
    pub region_map: Vec<u32>,
    pub regions: Vec<RegionBuilder>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MergeSettings {
    pub min_region: usize,
    pub max_merge_passes: usize,
    pub max_perimeter_to_area_ratio: Option<f64>,
}

impl MergeSettings {
    pub fn from_options(options: &GenerationOptions) -> Self {
        Self {
            min_region: options.min_region,
            max_merge_passes: options.max_merge_passes,
            max_perimeter_to_area_ratio: options.max_perimeter_to_area_ratio,
        }
    }
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self::from_options(&GenerationOptions::default())
    }
}

/// Visit the in-bounds 4-neighbours of `idx`.
#[inline(always)]
fn for_each_neighbor(idx: usize, w: usize, h: usize, mut f: impl FnMut(usize)) {
    let x = idx % w;
    let y = idx / w;
    if x > 0 {
        f(idx - 1);
    }
    if x + 1 < w {
        f(idx + 1);
    }
    if y > 0 {
        f(idx - w);
    }
    if y + 1 < h {
        f(idx + w);
    }
}

/// Four-connected labelling of maximal same-label pixel groups.
///
/// Uses an explicit stack so large regions cannot overflow the call stack.
/// Regions are numbered in row-major order of their first pixel.
pub fn flood_fill(width: u32, height: u32, labels: &[u16]) -> Segmentation {
    let w = width as usize;
    let h = height as usize;
    let mut region_map = vec![UNASSIGNED; w * h];
    let mut regions = Vec::new();
    let mut stack: Vec<usize> = Vec::new();

    for start in 0..w * h {
        if region_map[start] != UNASSIGNED {
            continue;
        }
        let id = regions.len() as u32;
        let label = labels[start];
        let mut pixels = Vec::new();
        region_map[start] = id;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            pixels.push(idx as u32);
            for_each_neighbor(idx, w, h, |n| {
                if region_map[n] == UNASSIGNED && labels[n] == label {
                    region_map[n] = id;
                    stack.push(n);
                }
            });
        }
        regions.push(RegionBuilder { id, label, pixels });
    }

    Segmentation { region_map, regions }
}

/// Boundary edge count per region: sides facing the image border or a
/// different region.
pub fn perimeters(width: u32, height: u32, seg: &Segmentation) -> Vec<u32> {
    let w = width as usize;
    let h = height as usize;
    seg.regions
        .iter()
        .map(|region| {
            let mut inner = 0u32;
            for &p in &region.pixels {
                for_each_neighbor(p as usize, w, h, |n| {
                    if seg.region_map[n] == region.id {
                        inner += 1;
                    }
                });
            }
            4 * region.pixels.len() as u32 - inner
        })
        .collect()
}

fn is_candidate(pixel_count: usize, perimeter: u32, threshold: usize, ratio: Option<f64>) -> bool {
    if pixel_count < threshold {
        return true;
    }
    match ratio {
        Some(limit) if pixel_count > 0 => perimeter as f64 / pixel_count as f64 >= limit,
        _ => false,
    }
}

fn find_root(parent: &mut [usize], mut r: usize) -> usize {
    while parent[r] != r {
        parent[r] = parent[parent[r]];
        r = parent[r];
    }
    r
}

/// One round of reassignments. Returns whether any label changed.
///
/// Merged regions are tracked as groups, so a candidate that has already
/// absorbed a neighbour carries it along when it is itself reassigned.
fn merge_pass(
    width: u32,
    height: u32,
    seg: &Segmentation,
    candidates: &[usize],
    labels: &mut [u16],
) -> bool {
    let w = width as usize;
    let h = height as usize;
    let mut parent: Vec<usize> = (0..seg.regions.len()).collect();
    let group_label: Vec<u16> = seg.regions.iter().map(|r| r.label).collect();
    let mut shared = vec![0u32; seg.regions.len()];
    let mut touched: Vec<usize> = Vec::new();
    let mut changed = false;

    for &cand in candidates {
        let group = find_root(&mut parent, cand);
        let own = group_label[group];
        for &p in &seg.regions[cand].pixels {
            for_each_neighbor(p as usize, w, h, |n| {
                let other = find_root(&mut parent, seg.region_map[n] as usize);
                if other != group && group_label[other] != own {
                    if shared[other] == 0 {
                        touched.push(other);
                    }
                    shared[other] += 1;
                }
            });
        }

        let mut best: Option<usize> = None;
        let mut best_edges = 0u32;
        for &other in &touched {
            if shared[other] > best_edges {
                best_edges = shared[other];
                best = Some(other);
            }
            shared[other] = 0;
        }
        touched.clear();

        if let Some(target) = best {
            parent[group] = target;
            changed = true;
        }
    }

    if changed {
        for (label, &region) in labels.iter_mut().zip(&seg.region_map) {
            *label = group_label[find_root(&mut parent, region as usize)];
        }
    }
    changed
}

/// Flood fill, then repeatedly fold undersized or slender regions into the
/// neighbour they share the most edge with.
///
/// The size threshold starts at `min_region` and halves whenever a pass
/// changes nothing, down to a floor of 1; the loop also stops after
/// `max_merge_passes` passes. The returned map always matches a fresh flood
/// fill of the final labels.
pub fn segment_regions(
    width: u32,
    height: u32,
    labels: &[u16],
    settings: &MergeSettings,
) -> Segmentation {
    let mut labels = labels.to_vec();
    let mut threshold = settings.min_region.max(1);
    let max_passes = settings.max_merge_passes.max(1);
    let ratio = settings.max_perimeter_to_area_ratio.filter(|r| r.is_finite() && *r > 0.0);
    let mut passes = 0usize;

    loop {
        let seg = flood_fill(width, height, &labels);
        if passes >= max_passes {
            return seg;
        }
        let perimeter = perimeters(width, height, &seg);
        let candidates: Vec<usize> = seg
            .regions
            .iter()
            .enumerate()
            .filter(|(i, r)| is_candidate(r.pixel_count(), perimeter[*i], threshold, ratio))
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return seg;
        }

        let changed = merge_pass(width, height, &seg, &candidates, &mut labels);
        passes += 1;
        if !changed {
            if threshold <= 1 {
                return seg;
            }
            threshold = (threshold / 2).max(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(min_region: usize, ratio: Option<f64>) -> MergeSettings {
        MergeSettings { min_region, max_merge_passes: 6, max_perimeter_to_area_ratio: ratio }
    }

    #[test]
    fn flood_fill_is_four_connected() {
        // Diagonal touching pixels are separate regions.
        let labels = vec![
            1, 0, //
            0, 1,
        ];
        let seg = flood_fill(2, 2, &labels);
        assert_eq!(seg.regions.len(), 4);
        assert_eq!(seg.region_map, vec![0, 1, 2, 3]);
    }

    #[test]
    fn flood_fill_handles_large_single_region() {
        let labels = vec![0u16; 512 * 512];
        let seg = flood_fill(512, 512, &labels);
        assert_eq!(seg.regions.len(), 1);
        assert_eq!(seg.regions[0].pixel_count(), 512 * 512);
    }

    #[test]
    fn perimeter_counts_border_and_foreign_edges() {
        let labels = vec![
            0, 0, 0, //
            0, 1, 0, //
            0, 0, 0,
        ];
        let seg = flood_fill(3, 3, &labels);
        let p = perimeters(3, 3, &seg);
        assert_eq!(p[1], 4);
        // Ring: 12 outer edges + 4 edges around the centre.
        assert_eq!(p[0], 16);
    }

    #[test]
    fn min_region_one_without_ratio_returns_flood_fill() {
        let labels = vec![0, 1, 2, 1, 1, 0, 2, 2, 2, 0, 1, 0];
        let seg = segment_regions(4, 3, &labels, &settings(1, None));
        assert_eq!(seg, flood_fill(4, 3, &labels));
    }

    #[test]
    fn center_pixel_merges_into_surrounding_label() {
        let labels = vec![
            0, 0, 0, //
            0, 1, 0, //
            0, 0, 0,
        ];
        let seg = segment_regions(3, 3, &labels, &settings(2, None));
        assert_eq!(seg.regions.len(), 1);
        assert_eq!(seg.regions[0].label, 0);
        assert_eq!(seg.regions[0].pixel_count(), 9);
    }

    #[test]
    fn candidate_goes_to_neighbour_with_most_shared_edges() {
        // The single `2` touches `0` on three sides and `1` on one.
        let labels = vec![
            0, 0, 0, 1, //
            0, 2, 1, 1, //
            0, 0, 1, 1,
        ];
        let seg = segment_regions(4, 3, &labels, &settings(2, None));
        assert_eq!(seg.regions.len(), 2);
        assert_eq!(seg.region_map[5], seg.region_map[0]);
    }

    #[test]
    fn slender_regions_merge_even_when_large() {
        // A one-pixel-wide column of label 1 through a block of label 0.
        let mut labels = vec![0u16; 8 * 8];
        for y in 0..8 {
            labels[y * 8 + 3] = 1;
        }
        let kept = segment_regions(8, 8, &labels, &settings(2, None));
        assert_eq!(kept.regions.len(), 3);

        let merged = segment_regions(8, 8, &labels, &settings(2, Some(1.5)));
        assert_eq!(merged.regions.len(), 1);
    }

    #[test]
    fn whole_image_candidate_terminates() {
        let labels = vec![4u16; 6];
        let seg = segment_regions(3, 2, &labels, &settings(100, Some(0.1)));
        assert_eq!(seg.regions.len(), 1);
        assert_eq!(seg.regions[0].label, 4);
    }

    #[test]
    fn converged_result_is_stable() {
        // 4x4 checker blocks with scattered single-pixel noise.
        let labels: Vec<u16> = (0..144u16)
            .map(|i| if i % 13 == 0 { 2 } else { ((i % 12) / 4 + (i / 12) / 4) % 3 })
            .collect();
        let s = settings(4, Some(2.5));
        let first = segment_regions(12, 12, &labels, &s);
        assert_eq!(first.regions.len(), 8);
        let relabelled: Vec<u16> = first
            .region_map
            .iter()
            .map(|&r| first.regions[r as usize].label)
            .collect();
        let second = segment_regions(12, 12, &relabelled, &s);
        assert_eq!(first, second);
    }
}
