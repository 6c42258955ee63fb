//! Vector scene: a flat cubic-command buffer plus a zoom-leveled tile index
//! so a viewer can load geometry for the visible area only.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::contour::{Contour, trace_region};
use crate::error::{Error, Result};
use crate::options::MAX_ZOOM_LEVELS;
use crate::region::{Bounds, Region};

pub const SCENE_FORMAT: &str = "puzzle.scene+tiles";
pub const SCENE_FORMAT_VERSION: u32 = 1;
pub const COMMAND_MOVE: f32 = 0.0;
pub const COMMAND_CURVE: f32 = 1.0;
pub const COMMAND_CLOSE: f32 = 2.0;
/// Floats per command: `[cmd, ax, ay, bx, by, cx, cy, dx, dy]`.
pub const COMMAND_STRIDE: usize = 9;
pub const DEFAULT_ZOOM_LEVELS: u32 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SceneOptions {
    pub zoom_levels: u32,
}

impl SceneOptions {
    pub fn clamped_zoom_levels(&self) -> u32 {
        self.zoom_levels.min(MAX_ZOOM_LEVELS)
    }
}

impl Default for SceneOptions {
    fn default() -> Self {
        Self { zoom_levels: DEFAULT_ZOOM_LEVELS }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoomBounds {
    pub zoom: u32,
    #[serde(flatten)]
    pub bounds: Bounds,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneRegion {
    pub id: u32,
    pub color_id: u16,
    pub bounds: Bounds,
    pub bounds_by_zoom: Vec<ZoomBounds>,
    /// Float offset of the region's first command in the buffer.
    pub path_offset: usize,
    /// Float count, always a multiple of [`COMMAND_STRIDE`].
    pub path_length: usize,
    pub tile_refs: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub id: String,
    pub zoom: u32,
    pub x: u32,
    pub y: u32,
    pub bounds: Bounds,
    pub region_ids: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneMetadata {
    pub format: String,
    pub version: u32,
    pub width: u32,
    pub height: u32,
    pub region_count: usize,
    pub zoom_levels: u32,
    pub regions: Vec<SceneRegion>,
    pub tiles: BTreeMap<u32, Vec<Tile>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorScene {
    pub metadata: SceneMetadata,
    #[serde(skip)]
    pub commands: Vec<f32>,
}

impl VectorScene {
    /// Rebuild a scene from [`VectorScene::metadata_json`] and
    /// [`VectorScene::binary_le_bytes`] output.
    pub fn from_parts(metadata_json: &str, le_bytes: &[u8]) -> Result<Self> {
        let metadata: SceneMetadata = serde_json::from_str(metadata_json)
            .map_err(|e| Error::Scene(format!("unreadable metadata: {e}")))?;
        if metadata.format != SCENE_FORMAT || metadata.version > SCENE_FORMAT_VERSION {
            return Err(Error::Scene(format!(
                "unsupported format {} v{}",
                metadata.format, metadata.version
            )));
        }
        if le_bytes.len() % 4 != 0 {
            return Err(Error::Scene(format!(
                "command buffer of {} bytes is not a whole number of floats",
                le_bytes.len()
            )));
        }
        let commands: Vec<f32> = le_bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        if let Some(region) = metadata
            .regions
            .iter()
            .find(|r| r.path_offset + r.path_length > commands.len())
        {
            return Err(Error::Scene(format!(
                "region {} path ends past the {} float buffer",
                region.id,
                commands.len()
            )));
        }
        Ok(Self { metadata, commands })
    }

    pub fn region(&self, id: u32) -> Option<&SceneRegion> {
        let regions = &self.metadata.regions;
        match regions.get(id as usize) {
            Some(r) if r.id == id => Some(r),
            _ => regions.iter().find(|r| r.id == id),
        }
    }

    /// Regions listed by the tiles at `zoom` whose bounds overlap
    /// `viewport` (image space), each with its command slice.
    ///
    /// `zoom` is clamped to the scene's deepest level. Regions come back
    /// once each, ordered by id; empty paths are left out.
    pub fn visible_regions(&self, zoom: u32, viewport: &Bounds) -> Vec<(&SceneRegion, &[f32])> {
        let zoom = zoom.min(self.metadata.zoom_levels);
        let Some(level) = self.metadata.tiles.get(&zoom) else {
            return Vec::new();
        };
        let ids: BTreeSet<u32> = level
            .iter()
            .filter(|tile| tile.bounds.intersects(viewport))
            .flat_map(|tile| tile.region_ids.iter().copied())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.region(id))
            .filter(|region| region.path_length > 0)
            .map(|region| (region, self.region_commands(region)))
            .collect()
    }

    /// The command buffer as little-endian `f32` bytes.
    pub fn binary_le_bytes(&self) -> Vec<u8> {
        self.commands.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Commands belonging to one region.
    pub fn region_commands(&self, region: &SceneRegion) -> &[f32] {
        let end = (region.path_offset + region.path_length).min(self.commands.len());
        &self.commands[region.path_offset.min(end)..end]
    }

    pub fn metadata_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.metadata)
    }
}

fn push_command(out: &mut Vec<f32>, cmd: f32, coords: [f32; 8]) {
    out.push(cmd);
    out.extend_from_slice(&coords);
}

/// Encode closed polygons as MOVE, one CURVE per edge, then CLOSE.
///
/// A straight edge from `prev` to `p` becomes the cubic `prev, prev, p, p`.
pub fn contours_to_commands(contours: &[Contour]) -> Vec<f32> {
    let mut out = Vec::new();
    for contour in contours {
        if contour.len() < 2 {
            continue;
        }
        let [fx, fy] = contour[0].map(|v| v as f32);
        let start = [fx, fy, fx, fy, fx, fy, fx, fy];
        push_command(&mut out, COMMAND_MOVE, start);
        for pair in contour.windows(2) {
            let [px, py] = pair[0].map(|v| v as f32);
            let [x, y] = pair[1].map(|v| v as f32);
            push_command(&mut out, COMMAND_CURVE, [px, py, px, py, x, y, x, y]);
        }
        push_command(&mut out, COMMAND_CLOSE, start);
    }
    out
}

fn format_number(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_owned();
    }
    let rounded = (value as f64 * 1000.0).round() / 1000.0;
    if rounded.fract() == 0.0 {
        return format!("{}", rounded as i64);
    }
    let s = format!("{rounded:.3}");
    s.trim_end_matches('0').trim_end_matches('.').to_owned()
}

/// SVG path data for a command slice. Unknown commands are skipped.
pub fn commands_to_svg_path(commands: &[f32]) -> String {
    let mut segments: Vec<String> = Vec::new();
    for c in commands.chunks_exact(COMMAND_STRIDE) {
        if c[0] == COMMAND_MOVE {
            segments.push(format!("M{} {}", format_number(c[1]), format_number(c[2])));
        } else if c[0] == COMMAND_CURVE {
            let mut seg = String::from("C");
            for (i, v) in c[3..].iter().enumerate() {
                if i > 0 {
                    seg.push(' ');
                }
                seg.push_str(&format_number(*v));
            }
            segments.push(seg);
        } else if c[0] == COMMAND_CLOSE {
            segments.push("Z".to_owned());
        }
    }
    segments.join(" ")
}

fn tile_bounds(width: u32, height: u32, grid: u32, tx: u32, ty: u32) -> Bounds {
    let tw = width as f64 / grid as f64;
    let th = height as f64 / grid as f64;
    Bounds {
        min_x: tx as f64 * tw,
        min_y: ty as f64 * th,
        max_x: (tx + 1) as f64 * tw,
        max_y: (ty + 1) as f64 * th,
    }
}

/// Inclusive tile range covered by `[min, max)` along one axis.
fn tile_span(min: f64, max: f64, extent: u32, grid: u32) -> (u32, u32) {
    let last = grid as i64 - 1;
    let clamp = |v: f64| if v.is_finite() { (v as i64).clamp(0, last) as u32 } else { 0 };
    let lo = clamp((min / extent as f64 * grid as f64).floor());
    let hi = clamp((max / extent as f64 * grid as f64).ceil() - 1.0);
    (lo, hi.max(lo))
}

fn build_tile_index(
    regions: &mut [SceneRegion],
    width: u32,
    height: u32,
    zoom_levels: u32,
) -> BTreeMap<u32, Vec<Tile>> {
    let mut tiles = BTreeMap::new();
    for z in 0..=zoom_levels {
        let grid = 1u32 << z;
        let mut level: Vec<Tile> = Vec::new();
        let mut slots: HashMap<(u32, u32), usize> = HashMap::new();
        for region in regions.iter_mut() {
            let b = region.bounds;
            let (x0, x1) = tile_span(b.min_x, b.max_x, width, grid);
            let (y0, y1) = tile_span(b.min_y, b.max_y, height, grid);
            for ty in y0..=y1 {
                for tx in x0..=x1 {
                    let slot = *slots.entry((tx, ty)).or_insert_with(|| {
                        level.push(Tile {
                            id: format!("{z}:{tx}:{ty}"),
                            zoom: z,
                            x: tx,
                            y: ty,
                            bounds: tile_bounds(width, height, grid, tx, ty),
                            region_ids: Vec::new(),
                        });
                        level.len() - 1
                    });
                    level[slot].region_ids.push(region.id);
                    region.tile_refs.push(level[slot].id.clone());
                }
            }
        }
        level.sort_by(|a, b| a.id.cmp(&b.id));
        tiles.insert(z, level);
    }
    tiles
}

/// Trace every region, pack the commands into one buffer and index the
/// regions by tile for each zoom level in `0..=zoom_levels`.
pub fn build_vector_scene(
    width: u32,
    height: u32,
    regions: &[Region],
    region_map: &[u32],
    options: &SceneOptions,
) -> VectorScene {
    let zoom_levels = options.clamped_zoom_levels();
    let mut commands = Vec::new();
    let mut scene_regions = Vec::with_capacity(regions.len());

    for region in regions {
        let contours = trace_region(region, region_map, width, height);
        let encoded = contours_to_commands(&contours);
        let bounds = region.bounds();
        let bounds_by_zoom = (0..=zoom_levels)
            .map(|z| ZoomBounds { zoom: z, bounds: bounds.scaled(0.5f64.powi(z as i32)) })
            .collect();
        scene_regions.push(SceneRegion {
            id: region.id(),
            color_id: region.color_id(),
            bounds,
            bounds_by_zoom,
            path_offset: commands.len(),
            path_length: encoded.len(),
            tile_refs: Vec::new(),
        });
        commands.extend_from_slice(&encoded);
    }

    let tiles = build_tile_index(&mut scene_regions, width, height, zoom_levels);
    VectorScene {
        metadata: SceneMetadata {
            format: SCENE_FORMAT.to_owned(),
            version: SCENE_FORMAT_VERSION,
            width,
            height,
            region_count: scene_regions.len(),
            zoom_levels,
            regions: scene_regions,
            tiles,
        },
        commands,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::finalize_regions;
    use crate::segment::flood_fill;

    fn scene_of(width: u32, height: u32, labels: &[u16], zoom_levels: u32) -> VectorScene {
        let seg = flood_fill(width, height, labels);
        let regions = finalize_regions(seg.regions, width);
        build_vector_scene(width, height, &regions, &seg.region_map, &SceneOptions { zoom_levels })
    }

    #[test]
    fn square_encodes_move_curves_close() {
        let contour = vec![[0, 0], [2, 0], [2, 2], [0, 2]];
        let cmds = contours_to_commands(&[contour]);
        assert_eq!(cmds.len(), COMMAND_STRIDE * 5);
        assert_eq!(cmds[0], COMMAND_MOVE);
        assert_eq!(&cmds[9..18], &[COMMAND_CURVE, 0.0, 0.0, 0.0, 0.0, 2.0, 0.0, 2.0, 0.0]);
        assert_eq!(cmds[36], COMMAND_CLOSE);
        assert_eq!(
            commands_to_svg_path(&cmds),
            "M0 0 C0 0 2 0 2 0 C2 0 2 2 2 2 C2 2 0 2 0 2 Z"
        );
    }

    #[test]
    fn curve_coordinates_are_space_separated_and_trimmed() {
        let mut cmds = vec![COMMAND_MOVE, 0.5, 1.0, 0.5, 1.0, 0.5, 1.0, 0.5, 1.0];
        cmds.extend_from_slice(&[COMMAND_CURVE, 0.5, 1.0, 0.5, 1.0, 2.25, 1.0, 2.25, 1.0004]);
        cmds.extend_from_slice(&[7.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(commands_to_svg_path(&cmds), "M0.5 1 C0.5 1 2.25 1 2.25 1");
    }

    #[test]
    fn numbers_trimmed_to_three_decimals() {
        assert_eq!(format_number(1.25), "1.25");
        assert_eq!(format_number(0.1234), "0.123");
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(f32::NAN), "0");
    }

    #[test]
    fn every_region_is_tiled_and_every_tile_overlaps() {
        let (w, h) = (16u32, 12u32);
        let labels: Vec<u16> = (0..w * h)
            .map(|i| (((i % w) / 5 + (i / w) / 4) % 3) as u16)
            .collect();
        let scene = scene_of(w, h, &labels, 3);
        let meta = &scene.metadata;
        assert_eq!(meta.tiles.len(), 4);
        for region in &meta.regions {
            assert!(!region.tile_refs.is_empty());
            assert_eq!(region.bounds_by_zoom.len(), 4);
            assert_eq!(region.path_length % COMMAND_STRIDE, 0);
        }
        for (zoom, level) in &meta.tiles {
            let ids: Vec<&String> = level.iter().map(|t| &t.id).collect();
            let mut sorted = ids.clone();
            sorted.sort();
            assert_eq!(ids, sorted);
            for tile in level {
                assert_eq!(tile.zoom, *zoom);
                for id in &tile.region_ids {
                    let region = &meta.regions[*id as usize];
                    assert!(region.bounds.intersects(&tile.bounds), "tile {}", tile.id);
                    assert!(region.tile_refs.contains(&tile.id));
                }
            }
        }
    }

    #[test]
    fn region_on_tile_edge_is_not_registered_beyond_it() {
        // Left half label 0, right half label 1 on an 8x8 image.
        let labels: Vec<u16> = (0..64).map(|i| if i % 8 < 4 { 0 } else { 1 }).collect();
        let scene = scene_of(8, 8, &labels, 1);
        let left = &scene.metadata.regions[0];
        assert_eq!(left.tile_refs, vec!["0:0:0", "1:0:0", "1:0:1"]);
    }

    #[test]
    fn zoom_levels_are_clamped_and_scaled() {
        assert_eq!(SceneOptions { zoom_levels: 40 }.clamped_zoom_levels(), MAX_ZOOM_LEVELS);
        let scene = scene_of(4, 4, &[0; 16], 3);
        let meta = &scene.metadata;
        assert_eq!(meta.zoom_levels, 3);
        let last = meta.regions[0].bounds_by_zoom.last().map(|z| z.bounds);
        assert_eq!(last.map(|b| b.max_x), Some(0.5));
        assert_eq!(meta.tiles[&3].len(), 64);
    }

    fn ids(visible: &[(&SceneRegion, &[f32])]) -> Vec<u32> {
        visible.iter().map(|(r, _)| r.id).collect()
    }

    #[test]
    fn visible_regions_follow_the_tiles_under_the_viewport() {
        let labels: Vec<u16> = (0..64).map(|i| if i % 8 < 4 { 0 } else { 1 }).collect();
        let scene = scene_of(8, 8, &labels, 2);
        let corner = Bounds { min_x: 0.0, min_y: 0.0, max_x: 1.0, max_y: 1.0 };
        let middle = Bounds { min_x: 3.0, min_y: 3.0, max_x: 5.0, max_y: 5.0 };
        let right = Bounds { min_x: 6.0, min_y: 0.0, max_x: 8.0, max_y: 8.0 };

        assert_eq!(ids(&scene.visible_regions(0, &corner)), vec![0, 1]);
        assert_eq!(ids(&scene.visible_regions(2, &corner)), vec![0]);
        assert_eq!(ids(&scene.visible_regions(2, &middle)), vec![0, 1]);
        assert_eq!(ids(&scene.visible_regions(2, &right)), vec![1]);
        // Deeper than the index goes resolves to the last level.
        assert_eq!(ids(&scene.visible_regions(9, &right)), vec![1]);

        let outside = Bounds { min_x: 20.0, min_y: 20.0, max_x: 30.0, max_y: 30.0 };
        assert!(scene.visible_regions(1, &outside).is_empty());

        for (region, commands) in scene.visible_regions(2, &middle) {
            assert_eq!(commands.len(), region.path_length);
            assert_eq!(commands[0], COMMAND_MOVE);
        }
    }

    #[test]
    fn from_parts_rejects_truncated_buffers() {
        let scene = scene_of(2, 2, &[0, 1, 1, 1], 1);
        let json = scene.metadata_json().unwrap();
        let bytes = scene.binary_le_bytes();
        assert_eq!(VectorScene::from_parts(&json, &bytes).unwrap(), scene);
        assert!(matches!(
            VectorScene::from_parts(&json, &bytes[..bytes.len() - 2]),
            Err(Error::Scene(_))
        ));
        assert!(matches!(
            VectorScene::from_parts(&json, &bytes[..bytes.len() - 36]),
            Err(Error::Scene(_))
        ));
        assert!(matches!(VectorScene::from_parts("{}", &bytes), Err(Error::Scene(_))));
    }

    #[test]
    fn binary_buffer_is_little_endian_f32() {
        let scene = scene_of(2, 1, &[0, 0], 0);
        let bytes = scene.binary_le_bytes();
        assert_eq!(bytes.len(), scene.commands.len() * 4);
        let first = f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!(first, scene.commands[1]);
        let json = scene.metadata_json().unwrap();
        assert!(json.contains("\"format\":\"puzzle.scene+tiles\""));
        assert!(json.contains("\"tileRefs\""));
    }
}
