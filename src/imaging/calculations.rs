//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

use crate::geometry::NormalisedRect;

/// Dimensions after capping the long edge at `max_long_edge`.
///
/// Aspect ratio is preserved and neither side drops below 1. Images that
/// already fit (or a cap of 0) are returned unchanged; this never upscales.
///
/// # Examples
/// ```
/// # use smart_photo::imaging::downsample_dimensions;
/// assert_eq!(downsample_dimensions((4000, 3000), 1024), (1024, 768));
/// assert_eq!(downsample_dimensions((800, 600), 1024), (800, 600));
/// ```
pub fn downsample_dimensions(source: (u32, u32), max_long_edge: u32) -> (u32, u32) {
    let (w, h) = source;
    let long = w.max(h);
    if max_long_edge == 0 || long <= max_long_edge {
        return source;
    }
    let scale = max_long_edge as f64 / long as f64;
    if w >= h {
        (max_long_edge, ((h as f64 * scale).round() as u32).max(1))
    } else {
        (((w as f64 * scale).round() as u32).max(1), max_long_edge)
    }
}

/// Integral pixel bounds `(x, y, width, height)` for a normalised crop.
///
/// The origin is floored and the far edge ceiled, then the result is
/// intersected with the image. At least one pixel is always selected as long
/// as the image itself is non-empty.
pub fn crop_pixel_bounds(rect: NormalisedRect, image: (u32, u32)) -> (u32, u32, u32, u32) {
    let (w, h) = image;
    let r = rect.normalised();
    let (x0, x1) = integral_span(r.x, r.max_x(), w);
    let (y0, y1) = integral_span(r.y, r.max_y(), h);
    (x0, y0, x1 - x0, y1 - y0)
}

fn integral_span(start: f64, end: f64, extent: u32) -> (u32, u32) {
    if extent == 0 {
        return (0, 0);
    }
    let e = extent as f64;
    let mut lo = (start * e).floor().clamp(0.0, e) as u32;
    let mut hi = (end * e).ceil().clamp(0.0, e) as u32;
    if hi <= lo {
        if lo >= extent {
            lo = extent - 1;
        }
        hi = lo + 1;
    }
    (lo, hi)
}
