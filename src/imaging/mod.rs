//! Image processing, pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** (+ EXIF orientation) | `image::ImageReader` |
//! | **Quarter turns** | `image::imageops::rotate90/180/270` |
//! | **Straighten** | `imageproc::geometric_transformations::rotate_about_center` |
//! | **Crop + resample** | `crop_imm` + Lanczos3 `resize` onto an opaque RGB canvas |
//! | **Encode → JPEG** | `image::codecs::jpeg::JpegEncoder` under a byte budget |
//!
//! The module is split into:
//! - **Calculations**: pure functions for dimension math (unit testable)
//! - **Parameters**: data structures describing image operations
//! - **Backend**: [`ImageCodec`] trait + [`RustCodec`]
//! - **Operations**: high-level functions combining calculations + codec

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageCodec};
pub use calculations::{crop_pixel_bounds, downsample_dimensions};
pub use operations::{EncodedImage, downsample, encode_within_budget, render_variant};
pub use params::{
    EncodeParams, MAX_ENCODE_ATTEMPTS, MAX_STRAIGHTEN_DEGREES, Quality, RenderParams,
    normalised_quarter_turns, normalised_straighten_degrees,
};
pub use rust_backend::{RustCodec, supported_input_extensions};
