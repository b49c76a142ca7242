//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the pipeline (which decides what renders to create) and
//! the [`operations`](super::operations) module (which does the pixel work).
//!
//! ## Types
//!
//! - [`Quality`]: JPEG quality (1–100, default 90). Clamped on construction.
//! - [`EncodeParams`]: byte-budgeted encode loop: start quality, floor, step, budget.
//! - [`RenderParams`]: one variant render: crop, straighten, quarter turns, target size.

use crate::geometry::{NormalisedRect, PixelSize};

/// Hard cap on encode attempts per image, including the first.
pub const MAX_ENCODE_ATTEMPTS: u32 = 6;

/// Straighten angles beyond this are clamped.
pub const MAX_STRAIGHTEN_DEGREES: f64 = 45.0;

/// Angles smaller than this are treated as no straighten at all.
const STRAIGHTEN_EPSILON: f64 = 0.0001;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Byte-budgeted JPEG encode.
///
/// Encoding starts at `start`. While the output is larger than `max_bytes`,
/// quality is above `floor` and attempts remain, quality drops by `step`
/// (never below `floor`) and the image is re-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParams {
    pub start: Quality,
    pub floor: Quality,
    pub step: u32,
    pub max_bytes: usize,
    pub max_attempts: u32,
}

impl EncodeParams {
    pub fn new(start: Quality, max_bytes: usize) -> Self {
        Self {
            start,
            floor: Quality::new(65),
            step: 5,
            max_bytes,
            max_attempts: MAX_ENCODE_ATTEMPTS,
        }
    }

    /// Start within 10..=95, floor no higher than start, step at least 1,
    /// attempts within 1..=[`MAX_ENCODE_ATTEMPTS`].
    pub fn normalised(&self) -> Self {
        let start = Quality::new(self.start.value().clamp(10, 95));
        Self {
            start,
            floor: Quality::new(self.floor.value().min(start.value())),
            step: self.step.max(1),
            max_bytes: self.max_bytes,
            max_attempts: self.max_attempts.clamp(1, MAX_ENCODE_ATTEMPTS),
        }
    }
}

/// Everything needed to render one variant from the master.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
    pub crop_rect: NormalisedRect,
    pub straighten_degrees: Option<f64>,
    pub quarter_turns: u8,
    pub target: PixelSize,
}

impl RenderParams {
    pub fn new(crop_rect: NormalisedRect, target: PixelSize) -> Self {
        Self {
            crop_rect,
            straighten_degrees: None,
            quarter_turns: 0,
            target,
        }
    }
}

/// Clamp to ±[`MAX_STRAIGHTEN_DEGREES`]; near-zero or non-finite becomes `None`.
pub fn normalised_straighten_degrees(degrees: Option<f64>) -> Option<f64> {
    let d = degrees.filter(|d| d.is_finite())?;
    let clamped = d.clamp(-MAX_STRAIGHTEN_DEGREES, MAX_STRAIGHTEN_DEGREES);
    (clamped.abs() >= STRAIGHTEN_EPSILON).then_some(clamped)
}

/// Any integer number of clockwise quarter turns, reduced to 0..=3.
pub fn normalised_quarter_turns(turns: i32) -> u8 {
    turns.rem_euclid(4) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_90() {
        assert_eq!(Quality::default().value(), 90);
    }

    #[test]
    fn encode_params_defaults() {
        let p = EncodeParams::new(Quality::new(85), 1000);
        assert_eq!(p.floor.value(), 65);
        assert_eq!(p.step, 5);
        assert_eq!(p.max_attempts, MAX_ENCODE_ATTEMPTS);
    }

    #[test]
    fn encode_params_normalised_bounds() {
        let p = EncodeParams {
            start: Quality::new(100),
            floor: Quality::new(99),
            step: 0,
            max_bytes: 1,
            max_attempts: 50,
        }
        .normalised();
        assert_eq!(p.start.value(), 95);
        assert_eq!(p.floor.value(), 95);
        assert_eq!(p.step, 1);
        assert_eq!(p.max_attempts, MAX_ENCODE_ATTEMPTS);
    }

    #[test]
    fn straighten_snaps_and_clamps() {
        assert_eq!(normalised_straighten_degrees(None), None);
        assert_eq!(normalised_straighten_degrees(Some(0.00005)), None);
        assert_eq!(normalised_straighten_degrees(Some(-0.00005)), None);
        assert_eq!(normalised_straighten_degrees(Some(f64::NAN)), None);
        assert_eq!(normalised_straighten_degrees(Some(3.5)), Some(3.5));
        assert_eq!(normalised_straighten_degrees(Some(60.0)), Some(45.0));
        assert_eq!(normalised_straighten_degrees(Some(-90.0)), Some(-45.0));
    }

    #[test]
    fn quarter_turns_wrap() {
        assert_eq!(normalised_quarter_turns(0), 0);
        assert_eq!(normalised_quarter_turns(5), 1);
        assert_eq!(normalised_quarter_turns(-1), 3);
        assert_eq!(normalised_quarter_turns(-8), 0);
    }
}
