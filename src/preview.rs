use std::io::Cursor;

use image::{ImageFormat, Rgba, RgbaImage};

use crate::error::Result;
use crate::pipeline::PuzzleData;

/// Repaint the image with each region's palette color.
pub fn render_preview(data: &PuzzleData) -> RgbaImage {
    let colors: Vec<Rgba<u8>> = data
        .regions
        .iter()
        .map(|region| {
            data.palette
                .get(region.color_id() as usize - 1)
                .map(|entry| Rgba([entry.rgb[0], entry.rgb[1], entry.rgb[2], 255]))
                .unwrap_or(Rgba([0, 0, 0, 255]))
        })
        .collect();
    RgbaImage::from_fn(data.width, data.height, |x, y| {
        let idx = (y * data.width + x) as usize;
        data.region_map
            .get(idx)
            .and_then(|&r| colors.get(r as usize))
            .copied()
            .unwrap_or(Rgba([0, 0, 0, 255]))
    })
}

pub fn preview_png(data: &PuzzleData) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    render_preview(data).write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}
