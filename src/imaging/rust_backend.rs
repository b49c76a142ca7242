//! Pure Rust codec.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Orientation | `ImageDecoder::orientation` + `DynamicImage::apply_orientation` |
//! | Downsample | `image::imageops::resize` with `Lanczos3` filter |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |

use super::backend::{BackendError, ImageCodec};
use super::operations::downsample;
use super::params::Quality;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use std::io::Cursor;
use std::sync::LazyLock;

/// Extensions whose decoders are compiled in.
const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Pure Rust codec using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustCodec;

impl RustCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_err(e: image::ImageError) -> BackendError {
    BackendError::Decode(e.to_string())
}

impl ImageCodec for RustCodec {
    fn decode(
        &self,
        bytes: &[u8],
        max_dimension: Option<u32>,
    ) -> Result<DynamicImage, BackendError> {
        if bytes.is_empty() {
            return Err(BackendError::Decode("empty input".to_string()));
        }
        let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
        let mut decoder = reader.into_decoder().map_err(decode_err)?;
        let orientation = decoder
            .orientation()
            .unwrap_or(Orientation::NoTransforms);
        let mut image = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
        image.apply_orientation(orientation);
        if image.width() == 0 || image.height() == 0 {
            return Err(BackendError::Decode("image has no pixels".to_string()));
        }

        Ok(match max_dimension {
            Some(max) => downsample(image, max, FilterType::Lanczos3),
            None => image,
        })
    }

    fn encode_jpeg(
        &self,
        image: &DynamicImage,
        quality: Quality,
    ) -> Result<Vec<u8>, BackendError> {
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        let mut buf = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut buf, quality.value().clamp(1, 100) as u8);
        rgb.write_with_encoder(encoder)
            .map_err(|e| BackendError::Encode(format!("JPEG encode failed: {e}")))?;
        Ok(buf)
    }
}
