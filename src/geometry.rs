//! Unit-square geometry.
//!
//! Every crop in this crate is a [`NormalisedRect`]: an axis-aligned
//! rectangle in the unit square with its origin at the top-left corner.
//! A rect never owns pixels; pair it with a [`PixelSize`] to make it absolute
//! (see [`crate::imaging::crop_pixel_bounds`]).
//!
//! The functions here are pure and have no I/O, so the cropper, the scorer
//! and the manual re-crop path can all share them.

use serde::{Deserialize, Serialize};

/// Smallest width or height a normalised rect may have.
pub const MIN_SIDE: f64 = 0.0001;

/// Narrowest width [`clamp_width`] will allow.
pub const MIN_CLAMPED_WIDTH: f64 = 0.02;

/// Two aspects closer than this are treated as equal.
pub const ASPECT_EPSILON: f64 = 1e-4;

/// Axis-aligned rectangle in the unit square, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalisedRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for NormalisedRect {
    fn default() -> Self {
        Self::FULL
    }
}

impl NormalisedRect {
    /// The whole image.
    pub const FULL: Self = Self {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clamp into the unit square.
    ///
    /// Width and height are clamped to `[MIN_SIDE, 1]` first, then the origin
    /// is moved (never the size) so the rect fits. Non-finite components are
    /// replaced by the full-image value for that component.
    pub fn normalised(self) -> Self {
        let width = finite_or(self.width, 1.0).clamp(MIN_SIDE, 1.0);
        let height = finite_or(self.height, 1.0).clamp(MIN_SIDE, 1.0);
        Self {
            x: fit_origin(finite_or(self.x, 0.0), width),
            y: fit_origin(finite_or(self.y, 0.0), height),
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    pub fn mid_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn mid_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    /// Whether all four edges lie inside the unit square.
    pub fn is_inside_unit(&self) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.max_x() <= 1.0
            && self.max_y() <= 1.0
            && self.width >= MIN_SIDE
            && self.height >= MIN_SIDE
    }

    /// Smallest rect containing both.
    pub fn union(&self, other: &Self) -> Self {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Self {
            x,
            y,
            width: self.max_x().max(other.max_x()) - x,
            height: self.max_y().max(other.max_y()) - y,
        }
    }

    /// Overlap of the two rects, or `None` if they only touch or are disjoint.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let max_x = self.max_x().min(other.max_x());
        let max_y = self.max_y().min(other.max_y());
        (max_x > x && max_y > y).then(|| Self::new(x, y, max_x - x, max_y - y))
    }

    /// Grow outward by absolute unit amounts. The result is not clamped.
    pub fn expanded(&self, horizontal: f64, top: f64, bottom: f64) -> Self {
        Self {
            x: self.x - horizontal,
            y: self.y - top,
            width: self.width + 2.0 * horizontal,
            height: self.height + top + bottom,
        }
    }

    /// Squared distance from the rect centre to the image centre.
    pub fn centre_distance_sq(&self) -> f64 {
        let dx = self.mid_x() - 0.5;
        let dy = self.mid_y() - 0.5;
        dx * dx + dy * dy
    }

    /// Re-shape about the same centre so `width / height == rect_aspect`.
    ///
    /// `rect_aspect` is the ratio in unit coordinates (target aspect divided
    /// by image aspect). The width goes through [`clamp_width`] so the height
    /// can never exceed the unit square.
    pub fn locked_to_aspect(&self, rect_aspect: f64) -> Self {
        if !rect_aspect.is_finite() || rect_aspect <= 0.0 {
            return self.normalised();
        }
        let width = clamp_width(self.width, rect_aspect);
        let height = width / rect_aspect;
        Self::new(
            self.mid_x() - width / 2.0,
            self.mid_y() - height / 2.0,
            width,
            height,
        )
        .normalised()
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}

/// Clamp an origin so `origin + side <= 1` holds exactly in floating point.
fn fit_origin(origin: f64, side: f64) -> f64 {
    let mut clamped = origin.clamp(0.0, 1.0 - side);
    if clamped + side > 1.0 {
        clamped = (1.0 - side - f64::EPSILON).max(0.0);
    }
    clamped
}

/// Integer pixel dimensions, both at least 1 once normalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn normalised(self) -> Self {
        Self {
            width: self.width.max(1),
            height: self.height.max(1),
        }
    }

    pub fn aspect(&self) -> f64 {
        aspect(i64::from(self.width), i64::from(self.height))
    }

    pub fn long_edge(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// `max(1, w) / max(1, h)`; zero and negative dimensions count as 1.
pub fn aspect(width: i64, height: i64) -> f64 {
    width.max(1) as f64 / height.max(1) as f64
}

/// Bound a width so a rect of `rect_aspect` (width over height, in unit
/// coordinates) stays inside the unit square.
///
/// The upper bound is `min(1, rect_aspect)`; the lower bound is
/// [`MIN_CLAMPED_WIDTH`], or the upper bound when that is smaller.
pub fn clamp_width(width: f64, rect_aspect: f64) -> f64 {
    let max = if rect_aspect.is_finite() && rect_aspect > 0.0 {
        rect_aspect.min(1.0)
    } else {
        1.0
    };
    let min = MIN_CLAMPED_WIDTH.min(max);
    if width.is_finite() {
        width.clamp(min, max)
    } else {
        max
    }
}

/// Grow `rect` about its own centre until `(width * image_aspect) / height`
/// equals `target_aspect`.
///
/// Only one side ever grows, the other is untouched, so anything inside the
/// input rect stays inside the output. The result is not clamped to the unit
/// square; callers normalise afterwards. A rect already within
/// [`ASPECT_EPSILON`] of the target is returned as-is.
pub fn expand_to_match_aspect(
    rect: NormalisedRect,
    target_aspect: f64,
    image_aspect: f64,
) -> NormalisedRect {
    if rect.height <= 0.0
        || !target_aspect.is_finite()
        || target_aspect <= 0.0
        || !image_aspect.is_finite()
        || image_aspect <= 0.0
    {
        return rect;
    }

    let current = rect.width * image_aspect / rect.height;
    if (current - target_aspect).abs() < ASPECT_EPSILON {
        return rect;
    }

    if current < target_aspect {
        // Too narrow: widen.
        let width = target_aspect * rect.height / image_aspect;
        NormalisedRect {
            x: rect.mid_x() - width / 2.0,
            width,
            ..rect
        }
    } else {
        let height = rect.width * image_aspect / target_aspect;
        NormalisedRect {
            y: rect.mid_y() - height / 2.0,
            height,
            ..rect
        }
    }
}
