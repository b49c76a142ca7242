//! Shared test utilities.
//!
//! Builders for the value types most tests need (dates, candidates, specs,
//! prepared manifest entries) and synthetic images, so individual test
//! modules stay focused on behaviour.
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let entry = prepared_entry("a", Some(2.0));
//! assert_eq!(entry.render_for(SizeClass::Small), Some("a-small.jpg"));
//! ```

use crate::candidates::Candidate;
use crate::geometry::NormalisedRect;
use crate::manifest::Entry;
use crate::types::{ALGORITHM_VERSION, PerSize, RenderTargets, SizeClass, SmartPhotoSpec, SmartPhotoVariantSpec};
use chrono::{DateTime, TimeZone, Utc};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;

// =========================================================================
// Values
// =========================================================================

/// UTC timestamp at minute precision.
pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .unwrap()
}

/// A 4000x3000 candidate that passes the default rules.
pub fn candidate(id: &str, created_at: DateTime<Utc>) -> Candidate {
    Candidate {
        id: id.to_string(),
        created_at,
        is_favourite: false,
        is_screenshot: false,
        is_hidden: false,
        pixel_width: 4000,
        pixel_height: 3000,
    }
}

/// A complete spec whose files are `<prefix>-master.jpg` and
/// `<prefix>-<size>.jpg`.
pub fn spec_named(prefix: &str) -> SmartPhotoSpec {
    let targets = RenderTargets::default();
    let mut variants = PerSize::default();
    for size in SizeClass::ALL {
        variants.set(
            size,
            Some(SmartPhotoVariantSpec {
                render_file_name: format!("{prefix}-{size}.jpg"),
                crop_rect: NormalisedRect::new(0.1, 0.1, 0.5, 0.5),
                pixel_size: targets.get(size),
                straighten_degrees: None,
                rotation_quarter_turns: 0,
            }),
        );
    }
    SmartPhotoSpec {
        algorithm_version: ALGORITHM_VERSION,
        prepared_at: at(2024, 3, 1, 0, 0),
        master_file_name: format!("{prefix}-master.jpg"),
        variants,
    }
}

/// An entry prepared from [`spec_named`]`(id)`.
pub fn prepared_entry(id: &str, score: Option<f64>) -> Entry {
    let spec = spec_named(id);
    Entry {
        source_file_name: Some(spec.master_file_name.clone()),
        renders: spec.variants.map(|_, v| v.render_file_name.clone()),
        auto_crops: spec.variants.map(|_, v| v.crop_rect),
        prepared_at: Some(spec.prepared_at),
        score,
        ..Entry::new(id)
    }
}

// =========================================================================
// Images
// =========================================================================

/// Smooth diagonal gradient; every crop has distinct pixels.
pub fn gradient_image(width: u32, height: u32) -> DynamicImage {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgb([r, g, r / 2 + g / 2])
    });
    DynamicImage::ImageRgb8(img)
}

/// PNG of a flat grey scene with a checkered subject left of centre.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let (sx, sy) = (width / 5, height / 3);
    let (sw, sh) = ((width / 5).max(1), (height / 3).max(1));
    let img = RgbImage::from_fn(width, height, |x, y| {
        let inside = x >= sx && x < sx + sw && y >= sy && y < sy + sh;
        if inside && (x / 4 + y / 4) % 2 == 0 {
            Rgb([240, 230, 220])
        } else if inside {
            Rgb([20, 30, 40])
        } else {
            Rgb([128, 128, 128])
        }
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub fn write_png(path: &Path, width: u32, height: u32) {
    std::fs::write(path, png_bytes(width, height)).unwrap();
}
