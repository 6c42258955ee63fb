use image::{DynamicImage, GenericImageView, imageops::FilterType};

use crate::error::{Error, Result};

/// Smallest side the prepared image is allowed to shrink to.
const MIN_PREPARED_SIDE: u32 = 8;

/// Validated RGBA8 pixel buffer, `width * height * 4` bytes, row-major.
///
/// Also remembers the size of the image it was prepared from, which is
/// larger than `width x height` when decoding downscaled it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    original_width: u32,
    original_height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimensions { width, height });
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or(Error::InvalidDimensions { width, height })?;
        if data.len() != expected {
            return Err(Error::PixelBufferSize { expected, actual: data.len() });
        }
        Ok(Self { width, height, original_width: width, original_height: height, data })
    }

    /// Record the size of the image these pixels were prepared from.
    pub fn with_original_size(mut self, width: u32, height: u32) -> Self {
        self.original_width = width.max(1);
        self.original_height = height.max(1);
        self
    }

    /// Convert a decoded image, shrinking it (never enlarging) so that
    /// neither side exceeds `max_size`. Sides never drop below 8 pixels.
    pub fn from_image(img: &DynamicImage, max_size: Option<u32>) -> Result<Self> {
        let (orig_w, orig_h) = img.dimensions();
        if orig_w == 0 || orig_h == 0 {
            return Err(Error::InvalidDimensions { width: orig_w, height: orig_h });
        }
        let max_side = max_size.unwrap_or(orig_w.max(orig_h)) as f32;
        let scale = (max_side / orig_w as f32).min(max_side / orig_h as f32).min(1.0);

        let rgba8 = if scale < 1.0 {
            let w = ((orig_w as f32 * scale).round() as u32).max(MIN_PREPARED_SIDE);
            let h = ((orig_h as f32 * scale).round() as u32).max(MIN_PREPARED_SIDE);
            image::imageops::resize(img, w, h, FilterType::Triangle)
        } else {
            img.to_rgba8()
        };
        let (w, h) = rgba8.dimensions();
        Ok(Self::new(w, h, rgba8.into_raw())?.with_original_size(orig_w, orig_h))
    }

    /// Decode an encoded image (PNG, JPEG, ...) and prepare it.
    pub fn decode(input: &[u8], max_size: Option<u32>) -> Result<Self> {
        let img = image::load_from_memory(input)?;
        Self::from_image(&img, max_size)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn original_width(&self) -> u32 {
        self.original_width
    }

    pub fn original_height(&self) -> u32 {
        self.original_height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Raw RGBA bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// RGB of pixel `idx`, alpha ignored.
    #[inline(always)]
    pub fn rgb(&self, idx: usize) -> [u8; 3] {
        let base = idx * 4;
        [self.data[base], self.data[base + 1], self.data[base + 2]]
    }
}
