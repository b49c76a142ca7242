//! Image codec trait and shared types.
//!
//! The [`ImageCodec`] trait is the only place pixels cross the byte boundary:
//! decode bytes to pixels (with an optional long-edge cap for fast analysis
//! thumbnails) and encode pixels to JPEG at a given quality.
//!
//! The production implementation is
//! [`RustCodec`](super::rust_backend::RustCodec). Tests use the recording
//! `MockCodec` below so pipeline logic can be checked without real encoding.

use super::params::Quality;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Trait for image codecs.
pub trait ImageCodec: Sync {
    /// Decode `bytes`, downsampling so the long edge is at most
    /// `max_dimension` when given. Orientation metadata is applied.
    fn decode(&self, bytes: &[u8], max_dimension: Option<u32>)
    -> Result<DynamicImage, BackendError>;

    /// Encode as JPEG at `quality`.
    fn encode_jpeg(&self, image: &DynamicImage, quality: Quality)
    -> Result<Vec<u8>, BackendError>;
}
