//! The prepared image, re-encoded for storage next to the puzzle.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage, RgbaImage};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::pixels::PixelBuffer;

const QUALITY_STEPS: [u8; 10] = [92, 82, 72, 62, 52, 42, 32, 25, 18, 10];
const SCALE_STEPS: [f64; 7] = [1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4];

/// JPEG encoding of the prepared pixels.
///
/// `data` is left out of the JSON form; callers store it as a separate file
/// or hand it over as a byte array.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceImage {
    pub mime_type: &'static str,
    pub bytes: usize,
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
    /// Encoded width over prepared width.
    pub scale: f64,
    pub quality: u8,
    #[serde(skip)]
    pub data: Vec<u8>,
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(img)?;
    Ok(out)
}

/// Encode `pixels` as JPEG within `max_bytes`.
///
/// Quality steps down first, then the image is shrunk and quality restarts
/// from the top. The first encoding that fits is returned; when none does,
/// the smallest one is. A zero budget encodes once at full size and the
/// highest quality.
pub fn encode_source_image(pixels: &PixelBuffer, max_bytes: usize) -> Result<SourceImage> {
    let rgba = RgbaImage::from_raw(pixels.width(), pixels.height(), pixels.data().to_vec())
        .ok_or(Error::InvalidDimensions { width: pixels.width(), height: pixels.height() })?;
    let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8();

    let (scales, qualities): (&[f64], &[u8]) = if max_bytes == 0 {
        (&SCALE_STEPS[..1], &QUALITY_STEPS[..1])
    } else {
        (&SCALE_STEPS, &QUALITY_STEPS)
    };

    let mut best: Option<SourceImage> = None;
    for &scale in scales {
        let working = if scale < 1.0 {
            let w = ((pixels.width() as f64 * scale).round() as u32).max(1);
            let h = ((pixels.height() as f64 * scale).round() as u32).max(1);
            imageops::resize(&rgb, w, h, FilterType::Triangle)
        } else {
            rgb.clone()
        };
        for &quality in qualities {
            let data = encode_jpeg(&working, quality)?;
            let candidate = SourceImage {
                mime_type: "image/jpeg",
                bytes: data.len(),
                width: working.width(),
                height: working.height(),
                original_width: pixels.original_width(),
                original_height: pixels.original_height(),
                scale: working.width() as f64 / pixels.width() as f64,
                quality,
                data,
            };
            if max_bytes > 0 && candidate.bytes <= max_bytes {
                return Ok(candidate);
            }
            if best.as_ref().is_none_or(|b| candidate.bytes < b.bytes) {
                best = Some(candidate);
            }
        }
    }
    best.ok_or(Error::InvalidDimensions { width: pixels.width(), height: pixels.height() })
}
