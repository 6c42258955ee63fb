//! Pixel-boundary tracing.
//!
//! Each region becomes one or more closed, grid-aligned polygons. Outer
//! boundaries wind clockwise (y grows downward) and holes wind the other
//! way, so both even-odd and nonzero fills render holes correctly.

use std::collections::HashMap;
use std::f64::consts::TAU;

use crate::region::Region;

/// Closed polygon; the closing vertex is not repeated.
pub type Contour = Vec<[u32; 2]>;

#[derive(Clone, Copy, Debug)]
struct Edge {
    a: [u32; 2],
    b: [u32; 2],
}

impl Edge {
    fn dir(&self) -> (i64, i64) {
        (self.b[0] as i64 - self.a[0] as i64, self.b[1] as i64 - self.a[1] as i64)
    }
}

/// Clockwise turn from `incoming` to `outgoing`, in `(0, 2π]`.
/// Going straight on counts as a full turn.
fn clockwise_turn(incoming: (i64, i64), outgoing: (i64, i64)) -> f64 {
    let cross = incoming.0 * outgoing.1 - incoming.1 * outgoing.0;
    let dot = incoming.0 * outgoing.0 + incoming.1 * outgoing.1;
    let angle = (cross as f64).atan2(dot as f64);
    if angle <= 0.0 { angle + TAU } else { angle }
}

fn boundary_edges(region: &Region, region_map: &[u32], width: u32, height: u32) -> Vec<Edge> {
    let id = region.id();
    let w = width as usize;
    let member = |idx: usize| region_map[idx] == id;
    let mut edges = Vec::new();
    for &idx in region.pixels() {
        let idx = idx as usize;
        let x = (idx % w) as u32;
        let y = (idx / w) as u32;
        if y == 0 || !member(idx - w) {
            edges.push(Edge { a: [x, y], b: [x + 1, y] });
        }
        if x + 1 == width || !member(idx + 1) {
            edges.push(Edge { a: [x + 1, y], b: [x + 1, y + 1] });
        }
        if y + 1 == height || !member(idx + w) {
            edges.push(Edge { a: [x + 1, y + 1], b: [x, y + 1] });
        }
        if x == 0 || !member(idx - 1) {
            edges.push(Edge { a: [x, y + 1], b: [x, y] });
        }
    }
    edges
}

/// Drop vertices that sit in the middle of a straight run, including the
/// run that wraps around the start of the polygon.
fn collapse_collinear(points: Contour) -> Contour {
    let n = points.len();
    if n < 3 {
        return points;
    }
    (0..n)
        .filter(|&i| {
            let prev = points[(i + n - 1) % n];
            let cur = points[i];
            let next = points[(i + 1) % n];
            let d1 = (cur[0] as i64 - prev[0] as i64, cur[1] as i64 - prev[1] as i64);
            let d2 = (next[0] as i64 - cur[0] as i64, next[1] as i64 - cur[1] as i64);
            let cross = d1.0 * d2.1 - d1.1 * d2.0;
            let dot = d1.0 * d2.0 + d1.1 * d2.1;
            !(cross == 0 && dot > 0)
        })
        .map(|i| points[i])
        .collect()
}

/// Trace the boundary of `region` into closed polygons.
///
/// Unit edges are emitted on every side of a member pixel that faces the
/// image border or a non-member pixel, then chained: at each vertex the walk
/// takes the unused outgoing edge with the smallest clockwise turn and closes
/// the polygon on returning to its start vertex.
pub fn trace_region(region: &Region, region_map: &[u32], width: u32, height: u32) -> Vec<Contour> {
    let edges = boundary_edges(region, region_map, width, height);
    if edges.is_empty() {
        return Vec::new();
    }
    let mut outgoing: HashMap<[u32; 2], Vec<usize>> = HashMap::new();
    for (i, e) in edges.iter().enumerate() {
        outgoing.entry(e.a).or_default().push(i);
    }

    let limit = edges.len() * 8;
    let mut used = vec![false; edges.len()];
    let mut contours = Vec::new();
    let mut cursor = 0usize;

    loop {
        while cursor < edges.len() && used[cursor] {
            cursor += 1;
        }
        if cursor == edges.len() {
            break;
        }

        let start_vertex = edges[cursor].a;
        let mut points: Contour = vec![start_vertex];
        let mut current = cursor;
        let mut steps = 0usize;
        loop {
            used[current] = true;
            let edge = edges[current];
            if edge.b == start_vertex {
                break;
            }
            points.push(edge.b);

            let incoming = edge.dir();
            let next = outgoing.get(&edge.b).and_then(|candidates| {
                candidates
                    .iter()
                    .copied()
                    .filter(|&c| !used[c])
                    .map(|c| (c, clockwise_turn(incoming, edges[c].dir())))
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(c, _)| c)
            });
            let Some(next) = next else { break };
            current = next;
            steps += 1;
            if steps > limit {
                break;
            }
        }

        if points.len() > 1 {
            contours.push(collapse_collinear(points));
        }
    }
    contours
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::finalize_regions;
    use crate::segment::flood_fill;

    fn regions_of(width: u32, height: u32, labels: &[u16]) -> (Vec<Region>, Vec<u32>) {
        let seg = flood_fill(width, height, labels);
        (finalize_regions(seg.regions, width), seg.region_map)
    }

    /// Shoelace area, positive for clockwise (y-down) winding.
    fn signed_area(contour: &Contour) -> i64 {
        let n = contour.len();
        (0..n)
            .map(|i| {
                let p = contour[i];
                let q = contour[(i + 1) % n];
                p[0] as i64 * q[1] as i64 - q[0] as i64 * p[1] as i64
            })
            .sum::<i64>()
            / 2
    }

    #[test]
    fn turn_ordering() {
        let right = (1, 0);
        assert!(clockwise_turn(right, (0, 1)) < clockwise_turn(right, (0, -1)));
        assert_eq!(clockwise_turn(right, (1, 0)), TAU);
    }

    #[test]
    fn rectangle_traces_to_its_bounding_box() {
        #[rustfmt::skip]
        let labels = vec![
            0, 0, 0, 0, 0,
            0, 1, 1, 1, 0,
            0, 1, 1, 1, 0,
            0, 0, 0, 0, 0,
        ];
        let (regions, map) = regions_of(5, 4, &labels);
        let rect = &regions[1];
        let contours = trace_region(rect, &map, 5, 4);
        assert_eq!(contours, vec![vec![[1, 1], [4, 1], [4, 3], [1, 3]]]);
    }

    #[test]
    fn whole_image_region_uses_image_border() {
        let labels = vec![0u16; 6];
        let (regions, map) = regions_of(3, 2, &labels);
        let contours = trace_region(&regions[0], &map, 3, 2);
        assert_eq!(contours, vec![vec![[0, 0], [3, 0], [3, 2], [0, 2]]]);
    }

    #[test]
    fn ring_yields_outer_boundary_and_hole() {
        #[rustfmt::skip]
        let labels = vec![
            0, 0, 0,
            0, 1, 0,
            0, 0, 0,
        ];
        let (regions, map) = regions_of(3, 3, &labels);
        let contours = trace_region(&regions[0], &map, 3, 3);
        assert_eq!(contours.len(), 2);
        let mut areas: Vec<i64> = contours.iter().map(signed_area).collect();
        areas.sort();
        assert_eq!(areas, vec![-1, 9]);
        assert!(contours.iter().all(|c| c.len() == 4));
    }

    #[test]
    fn signed_areas_sum_to_pixel_count() {
        let (w, h) = (11u32, 9u32);
        let mut seed = 0x2545_f491u32;
        let labels: Vec<u16> = (0..w * h)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                (seed % 3) as u16
            })
            .collect();
        let (regions, map) = regions_of(w, h, &labels);
        for region in &regions {
            let contours = trace_region(region, &map, w, h);
            let area: i64 = contours.iter().map(signed_area).sum();
            assert_eq!(area, region.pixel_count() as i64, "region {}", region.id());
            for contour in &contours {
                let n = contour.len();
                for i in 0..n {
                    let p = contour[i];
                    let q = contour[(i + 1) % n];
                    assert!(p[0] == q[0] || p[1] == q[1], "non axis-aligned step");
                }
            }
        }
    }
}
