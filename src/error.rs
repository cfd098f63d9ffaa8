//! Error types for the fallible edges of the engine: image decoding and
//! history snapshot (de)serialization.  Tool preconditions are not errors;
//! those operations return `bool` / `Option` and simply do nothing.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("image encode failed: {0}")]
    Encode(String),
    #[error("invalid image dimensions {width}×{height}")]
    Dimensions { width: u32, height: u32 },
    #[error("malformed image payload: {0}")]
    Payload(String),
}

impl From<image::ImageError> for DecodeError {
    fn from(e: image::ImageError) -> Self {
        DecodeError::Decode(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot image payload: {0}")]
    Image(#[from] DecodeError),
    #[error("history index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },
}
