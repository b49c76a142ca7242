//! High-level image operations.
//!
//! These functions combine calculations with codec execution: render one
//! variant from the master, and encode it under a byte budget.

use super::backend::{BackendError, ImageCodec};
use super::calculations::{crop_pixel_bounds, downsample_dimensions};
use super::params::{
    EncodeParams, Quality, RenderParams, normalised_quarter_turns, normalised_straighten_degrees,
};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use log::debug;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Output of [`encode_within_budget`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    /// Quality of the returned (last) attempt.
    pub quality: Quality,
    pub attempts: u32,
}

/// Cap the long edge at `max_long_edge`. Never upscales.
pub fn downsample(image: DynamicImage, max_long_edge: u32, filter: FilterType) -> DynamicImage {
    let source = (image.width(), image.height());
    let (w, h) = downsample_dimensions(source, max_long_edge);
    if (w, h) == source {
        image
    } else {
        image.resize_exact(w, h, filter)
    }
}

/// Render one variant from the master.
///
/// Order of operations: quarter turns (dimensions swap for odd turns), then
/// straighten within the same canvas on a black fill, then crop to the
/// integral pixel bounds of `crop_rect`, then resample onto an opaque canvas
/// of exactly `target` pixels.
pub fn render_variant(master: &DynamicImage, params: &RenderParams) -> DynamicImage {
    let rgb = master.to_rgb8();

    let turned = match normalised_quarter_turns(i32::from(params.quarter_turns)) {
        1 => imageops::rotate90(&rgb),
        2 => imageops::rotate180(&rgb),
        3 => imageops::rotate270(&rgb),
        _ => rgb,
    };

    let straightened = match normalised_straighten_degrees(params.straighten_degrees) {
        Some(degrees) => straighten(&turned, degrees),
        None => turned,
    };

    let (x, y, w, h) = crop_pixel_bounds(
        params.crop_rect,
        (straightened.width(), straightened.height()),
    );
    let cropped = imageops::crop_imm(&straightened, x, y, w, h).to_image();

    let target = params.target.normalised();
    debug!(
        "render: {}x{} crop at ({x},{y}) → {}x{}",
        w, h, target.width, target.height
    );
    DynamicImage::ImageRgb8(imageops::resize(
        &cropped,
        target.width,
        target.height,
        FilterType::Lanczos3,
    ))
}

/// Clockwise rotation about the centre, keeping the canvas size.
fn straighten(image: &RgbImage, degrees: f64) -> RgbImage {
    rotate_about_center(
        image,
        degrees.to_radians() as f32,
        Interpolation::Bicubic,
        Rgb([0, 0, 0]),
    )
}

/// Encode as JPEG, stepping quality down until the output fits
/// `params.max_bytes`.
///
/// Terminates after at most `params.max_attempts` encodes. When nothing fits,
/// the last (lowest-quality) attempt is returned. An empty encode is an
/// [`BackendError::Encode`].
pub fn encode_within_budget(
    codec: &dyn ImageCodec,
    image: &DynamicImage,
    params: &EncodeParams,
) -> Result<EncodedImage> {
    let params = params.normalised();
    let mut quality = params.start;
    let mut bytes = encode_non_empty(codec, image, quality)?;
    let mut attempts = 1;

    while bytes.len() > params.max_bytes && quality > params.floor && attempts < params.max_attempts
    {
        quality = Quality::new(
            quality
                .value()
                .saturating_sub(params.step)
                .max(params.floor.value()),
        );
        bytes = encode_non_empty(codec, image, quality)?;
        attempts += 1;
    }

    debug!(
        "encoded {} bytes at q{} after {} attempt(s) (budget {})",
        bytes.len(),
        quality.value(),
        attempts,
        params.max_bytes
    );
    Ok(EncodedImage {
        bytes,
        quality,
        attempts,
    })
}

fn encode_non_empty(
    codec: &dyn ImageCodec,
    image: &DynamicImage,
    quality: Quality,
) -> Result<Vec<u8>> {
    let bytes = codec.encode_jpeg(image, quality)?;
    if bytes.is_empty() {
        return Err(BackendError::Encode(format!(
            "empty output at quality {}",
            quality.value()
        )));
    }
    Ok(bytes)
}
