use thiserror::Error;

/// Errors returned by the puzzle generation pipeline.
///
/// Worker transport problems never reach callers of
/// [`crate::Pipeline::generate`]; they are logged and the run falls back to
/// the calling thread.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("pixel buffer size mismatch: expected {expected} bytes, got {actual}")]
    PixelBufferSize { expected: usize, actual: usize },

    #[error("unknown generation algorithm `{0}`")]
    UnknownAlgorithm(String),

    #[error("unable to decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid generation options: {0}")]
    Options(#[from] serde_json::Error),

    #[error("invalid vector scene: {0}")]
    Scene(String),

    #[error("generation worker failed: {0}")]
    Worker(String),

    #[error("generation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
