//! Paint-by-number puzzle generation.
//!
//! An image goes through colour quantization, optional label smoothing,
//! region segmentation and finalization, and optionally a tiled vector
//! scene export. [`Pipeline`] runs the stages on a background thread with a
//! synchronous fallback; [`generate_puzzle`] exposes the same run to
//! JavaScript.

pub mod contour;
pub mod error;
pub mod options;
pub mod pipeline;
pub mod pixels;
pub mod preview;
pub mod quantize;
pub mod region;
pub mod scene;
pub mod segment;
pub mod smooth;
pub mod source;
mod wasm;
pub mod worker;

pub use error::{Error, Result};
pub use options::{Algorithm, GenerationOptions};
pub use pipeline::{
    CancelToken, ExecutionMode, JobId, PaletteEntry, Pipeline, Progress, PuzzleData, Stage,
    StageTimings, run_generation,
};
pub use pixels::PixelBuffer;
pub use preview::{preview_png, render_preview};
pub use region::{Bounds, Region};
pub use scene::{SceneOptions, VectorScene, build_vector_scene, commands_to_svg_path};
pub use source::{SourceImage, encode_source_image};
pub use wasm::generate_puzzle;

/// Decode an encoded image and generate a puzzle on the calling thread.
///
/// No progress is reported and nothing can supersede the run.
#[cfg(not(target_arch = "wasm32"))]
pub fn generate_puzzle_bytes(
    input: &[u8],
    options: &GenerationOptions,
    max_size: Option<u32>,
) -> Result<PuzzleData> {
    let pixels = PixelBuffer::decode(input, max_size)?;
    run_generation(JobId(0), &pixels, options, &CancelToken::new(), &mut |_| {})
        .ok_or(Error::Cancelled)
}
