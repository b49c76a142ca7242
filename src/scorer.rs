//! Photographic quality scoring.
//!
//! [`QualityScorer::score`] rates a candidate photo from its raw bytes and
//! the variants prepared for it. The result is a pure function of its inputs:
//! no state is kept between calls.
//!
//! ```text
//! score = subject bonus            faces ≤ +2.4, animals ≤ +1.6
//!       + sharpness × 1.6          sharpness = min(1, mean |∇luma| / 18)
//!       − blurry / dark / bright / flat penalties
//!       − zoom penalty per prepared variant (by crop area)
//! clamped to [-10, 10]
//! ```
//!
//! Every constant lives in [`ScorerConfig`] (`[scoring]` in `config.toml`).

use crate::focus::{FocusKind, SubjectDetector};
use crate::imaging::ImageCodec;
use crate::types::SmartPhotoSpec;
use image::GrayImage;
use log::debug;
use serde::{Deserialize, Serialize};

pub const MIN_SCORE: f64 = -10.0;
pub const MAX_SCORE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScorerConfig {
    pub thumbnail_long_edge: u32,
    pub face_bonus: f64,
    pub face_bonus_cap: f64,
    pub animal_bonus: f64,
    pub animal_bonus_cap: f64,
    pub sharpness_normaliser: f64,
    pub sharpness_weight: f64,
    pub blurry_below: f64,
    pub blurry_penalty: f64,
    pub dark_level: u8,
    pub bright_level: u8,
    pub exposure_fraction: f64,
    pub exposure_penalty: f64,
    pub contrast_normaliser: f64,
    pub flat_below: f64,
    pub flat_penalty: f64,
    pub extreme_zoom_area: f64,
    pub extreme_zoom_penalty: f64,
    pub zoom_area: f64,
    pub zoom_penalty: f64,
    pub tight_area: f64,
    pub tight_penalty: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            thumbnail_long_edge: 512,
            face_bonus: 1.0,
            face_bonus_cap: 2.4,
            animal_bonus: 0.8,
            animal_bonus_cap: 1.6,
            sharpness_normaliser: 18.0,
            sharpness_weight: 1.6,
            blurry_below: 0.12,
            blurry_penalty: 0.8,
            dark_level: 20,
            bright_level: 235,
            exposure_fraction: 0.65,
            exposure_penalty: 1.4,
            contrast_normaliser: 64.0,
            flat_below: 0.08,
            flat_penalty: 0.6,
            extreme_zoom_area: 0.14,
            extreme_zoom_penalty: 1.4,
            zoom_area: 0.22,
            zoom_penalty: 0.9,
            tight_area: 0.30,
            tight_penalty: 0.4,
        }
    }
}

impl ScorerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.extreme_zoom_area <= self.zoom_area && self.zoom_area <= self.tight_area) {
            return Err(
                "scoring: extreme_zoom_area <= zoom_area <= tight_area must hold".to_string(),
            );
        }
        if self.sharpness_normaliser <= 0.0 || self.contrast_normaliser <= 0.0 {
            return Err("scoring: normalisers must be positive".to_string());
        }
        if self.thumbnail_long_edge < 16 {
            return Err("scoring.thumbnail_long_edge must be at least 16".to_string());
        }
        Ok(())
    }

    /// Penalty and flag word for a crop of `area`, if it is too tight.
    fn zoom_penalty_for(&self, area: f64) -> Option<(f64, &'static str)> {
        if area < self.extreme_zoom_area {
            Some((self.extreme_zoom_penalty, "extreme zoom"))
        } else if area < self.zoom_area {
            Some((self.zoom_penalty, "zoom"))
        } else if area < self.tight_area {
            Some((self.tight_penalty, "tight"))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScoreResult {
    pub score: f64,
    pub flags: Vec<String>,
}

/// Grey-level statistics of an analysis thumbnail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LumaStats {
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub dark_fraction: f64,
    pub bright_fraction: f64,
    /// Mean absolute horizontal and vertical neighbour difference.
    pub gradient_mean: f64,
}

impl LumaStats {
    /// `None` for an empty image.
    pub fn analyse(luma: &GrayImage, dark_level: u8, bright_level: u8) -> Option<Self> {
        let (w, h) = luma.dimensions();
        let n = u64::from(w) * u64::from(h);
        if n == 0 {
            return None;
        }

        let (mut sum, mut sum_sq, mut dark, mut bright) = (0.0f64, 0.0f64, 0u64, 0u64);
        for p in luma.pixels() {
            let v = p.0[0];
            let f = f64::from(v);
            sum += f;
            sum_sq += f * f;
            if v < dark_level {
                dark += 1;
            }
            if v > bright_level {
                bright += 1;
            }
        }
        let count = n as f64;
        let mean = sum / count;
        let variance = (sum_sq / count - mean * mean).max(0.0);

        let mut gradient_mean = 0.0;
        if w > 1 && h > 1 {
            let mut total = 0.0;
            for y in 0..h {
                for x in 0..w {
                    let v = f64::from(luma.get_pixel(x, y).0[0]);
                    if x + 1 < w {
                        total += (v - f64::from(luma.get_pixel(x + 1, y).0[0])).abs();
                    }
                    if y + 1 < h {
                        total += (v - f64::from(luma.get_pixel(x, y + 1).0[0])).abs();
                    }
                }
            }
            let pairs = u64::from(w - 1) * u64::from(h) + u64::from(w) * u64::from(h - 1);
            gradient_mean = total / pairs as f64;
        }

        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            dark_fraction: dark as f64 / count,
            bright_fraction: bright as f64 / count,
            gradient_mean,
        })
    }
}

/// Accumulates score contributions and de-duplicated flags.
#[derive(Default)]
struct Tally {
    score: f64,
    flags: Vec<String>,
}

impl Tally {
    fn flag(&mut self, flag: impl Into<String>) {
        let flag = flag.into();
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    fn finish(self) -> QualityScoreResult {
        QualityScoreResult {
            score: if self.score.is_finite() {
                self.score.clamp(MIN_SCORE, MAX_SCORE)
            } else {
                0.0
            },
            flags: self.flags,
        }
    }
}

pub struct QualityScorer<'a> {
    codec: &'a dyn ImageCodec,
    detector: &'a dyn SubjectDetector,
    config: &'a ScorerConfig,
}

impl<'a> QualityScorer<'a> {
    pub fn new(
        codec: &'a dyn ImageCodec,
        detector: &'a dyn SubjectDetector,
        config: &'a ScorerConfig,
    ) -> Self {
        Self {
            codec,
            detector,
            config,
        }
    }

    /// Score a candidate. Never fails: an undecodable source scores 0 with
    /// the flag `"decode failed"`.
    pub fn score(
        &self,
        asset_id: &str,
        image_bytes: &[u8],
        prepared: Option<&SmartPhotoSpec>,
    ) -> QualityScoreResult {
        let c = self.config;
        let mut tally = Tally::default();

        let thumb = match self
            .codec
            .decode(image_bytes, Some(c.thumbnail_long_edge))
        {
            Ok(img) => img,
            Err(e) => {
                debug!("score {asset_id}: decode failed: {e}");
                tally.flag("decode failed");
                return QualityScoreResult {
                    score: 0.0,
                    flags: tally.flags,
                };
            }
        };

        match self.detector.detect(&thumb) {
            Ok(detections) => {
                let count = |kind| detections.iter().filter(|d| d.kind == kind).count();
                let faces = count(FocusKind::Face);
                let animals = count(FocusKind::Animal);
                if faces > 0 {
                    tally.score += (faces as f64 * c.face_bonus).min(c.face_bonus_cap);
                    tally.flag(format!("faces {faces}"));
                }
                if animals > 0 {
                    tally.score += (animals as f64 * c.animal_bonus).min(c.animal_bonus_cap);
                    tally.flag(format!("animals {animals}"));
                }
            }
            Err(e) => {
                debug!("score {asset_id}: detection failed: {e}");
                tally.flag("vision failed");
            }
        }

        if let Some(stats) = LumaStats::analyse(&thumb.to_luma8(), c.dark_level, c.bright_level) {
            let sharpness = (stats.gradient_mean / c.sharpness_normaliser).min(1.0);
            let contrast = (stats.std_dev / c.contrast_normaliser).min(1.0);
            tally.score += sharpness * c.sharpness_weight;
            if sharpness < c.blurry_below {
                tally.score -= c.blurry_penalty;
                tally.flag("blurry");
            }
            if stats.dark_fraction > c.exposure_fraction {
                tally.score -= c.exposure_penalty;
                tally.flag("too dark");
            }
            if stats.bright_fraction > c.exposure_fraction {
                tally.score -= c.exposure_penalty;
                tally.flag("too bright");
            }
            if contrast < c.flat_below {
                tally.score -= c.flat_penalty;
                tally.flag("flat");
            }
        }

        if let Some(spec) = prepared {
            for (size, variant) in spec.variants.iter() {
                let area = variant.crop_rect.normalised().area();
                if let Some((penalty, word)) = c.zoom_penalty_for(area) {
                    tally.score -= penalty;
                    tally.flag(format!("{word} {}", size.label()));
                }
            }
        }

        let result = tally.finish();
        debug!(
            "score {asset_id}: {:.2} [{}]",
            result.score,
            result.flags.join(", ")
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::focus::tests::ScriptedDetector;
    use crate::focus::{Detection, NoDetector};
    use crate::geometry::{NormalisedRect, PixelSize};
    use crate::imaging::backend::tests::MockCodec;
    use crate::types::{PerSize, SizeClass, SmartPhotoVariantSpec};
    use chrono::{TimeZone, Utc};
    use image::{DynamicImage, Luma};

    fn checker(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(w, h, |x, y| {
            Luma([if (x / 2 + y / 2) % 2 == 0 { 30 } else { 220 }])
        }))
    }

    fn flat(v: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([v])))
    }

    fn spec_with_areas(areas: &[(SizeClass, f64)]) -> SmartPhotoSpec {
        let mut variants = PerSize::default();
        for &(size, area) in areas {
            let side = area.sqrt();
            variants.set(
                size,
                Some(SmartPhotoVariantSpec {
                    render_file_name: format!("{size}.jpg"),
                    crop_rect: NormalisedRect::new(0.0, 0.0, side, side),
                    pixel_size: PixelSize::new(10, 10),
                    straighten_degrees: None,
                    rotation_quarter_turns: 0,
                }),
            );
        }
        SmartPhotoSpec {
            algorithm_version: 1,
            prepared_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            master_file_name: "m.jpg".to_string(),
            variants,
        }
    }

    // =========================================================================
    // LumaStats
    // =========================================================================

    #[test]
    fn luma_stats_flat_image() {
        let s =LumaStats::analyse(&GrayImage::from_pixel(4, 4, Luma([10])), 20, 235).unwrap();
        assert_eq!(s.mean, 10.0);
        assert_eq!(s.std_dev, 0.0);
        assert_eq!(s.dark_fraction, 1.0);
        assert_eq!(s.gradient_mean, 0.0);
    }

    #[test]
    fn luma_stats_gradient_counts_both_directions() {
        // 2x2: [0, 100; 0, 100] → horizontal diffs 100, 100; vertical 0, 0.
        let img = GrayImage::from_fn(2, 2, |x, _| Luma([if x == 0 { 0 } else { 100 }]));
        let s = LumaStats::analyse(&img, 20, 235).unwrap();
        assert_eq!(s.gradient_mean, 50.0);
        assert_eq!(s.std_dev, 50.0);
    }

    #[test]
    fn luma_stats_single_row_has_no_gradient() {
        let img = GrayImage::from_fn(5, 1, |x, _| Luma([(x * 50) as u8]));
        assert_eq!(LumaStats::analyse(&img, 20, 235).unwrap().gradient_mean, 0.0);
        assert!(LumaStats::analyse(&GrayImage::new(0, 0), 20, 235).is_none());
    }

    // =========================================================================
    // score
    // =========================================================================

    #[test]
    fn undecodable_scores_zero() {
        let codec = MockCodec::undecodable();
        let config = ScorerConfig::default();
        let r = QualityScorer::new(&codec, &NoDetector, &config).score("a", b"x", None);
        assert_eq!(r.score, 0.0);
        assert_eq!(r.flags, vec!["decode failed"]);
    }

    #[test]
    fn sharp_busy_image_scores_well() {
        let codec = MockCodec::with_image(checker(64, 64));
        let config = ScorerConfig::default();
        let r = QualityScorer::new(&codec, &NoDetector, &config).score("a", b"x", None);
        assert!(r.flags.is_empty(), "{:?}", r.flags);
        assert!((r.score - 1.6).abs() < 1e-9);
    }

    #[test]
    fn flat_dark_image_is_penalised() {
        let codec = MockCodec::with_image(flat(5));
        let config = ScorerConfig::default();
        let r = QualityScorer::new(&codec, &NoDetector, &config).score("a", b"x", None);
        assert_eq!(r.flags, vec!["blurry", "too dark", "flat"]);
        assert!((r.score - (-0.8 - 1.4 - 0.6)).abs() < 1e-9);
    }

    #[test]
    fn bright_image_flagged() {
        let codec = MockCodec::with_image(flat(250));
        let config = ScorerConfig::default();
        let r = QualityScorer::new(&codec, &NoDetector, &config).score("a", b"x", None);
        assert!(r.flags.contains(&"too bright".to_string()));
    }

    #[test]
    fn subject_bonuses_are_capped() {
        let codec = MockCodec::with_image(checker(64, 64));
        let face = Detection::new(FocusKind::Face, NormalisedRect::new(0.1, 0.1, 0.1, 0.1));
        let dog = Detection::new(FocusKind::Animal, NormalisedRect::new(0.5, 0.5, 0.2, 0.2));
        let detector = ScriptedDetector::top_left(vec![face; 5].into_iter().chain([dog]).collect());
        let config = ScorerConfig::default();
        let r = QualityScorer::new(&codec, &detector, &config).score("a", b"x", None);
        assert_eq!(r.flags, vec!["faces 5", "animals 1"]);
        assert!((r.score - (1.6 + 2.4 + 0.8)).abs() < 1e-9);
    }

    #[test]
    fn detector_failure_is_flagged_not_fatal() {
        let codec = MockCodec::with_image(checker(64, 64));
        let config = ScorerConfig::default();
        let r = QualityScorer::new(&codec, &ScriptedDetector::failing(), &config)
            .score("a", b"x", None);
        assert_eq!(r.flags, vec!["vision failed"]);
        assert!((r.score - 1.6).abs() < 1e-9);
    }

    #[test]
    fn zoom_penalties_per_variant() {
        let codec = MockCodec::with_image(checker(64, 64));
        let config = ScorerConfig::default();
        let spec = spec_with_areas(&[
            (SizeClass::Small, 0.10),
            (SizeClass::Medium, 0.20),
            (SizeClass::Large, 0.25),
        ]);
        let r = QualityScorer::new(&codec, &NoDetector, &config).score("a", b"x", Some(&spec));
        assert_eq!(r.flags, vec!["extreme zoom S", "zoom M", "tight L"]);
        assert!((r.score - (1.6 - 1.4 - 0.9 - 0.4)).abs() < 1e-9);
    }

    #[test]
    fn roomy_crops_are_not_penalised() {
        let codec = MockCodec::with_image(checker(64, 64));
        let config = ScorerConfig::default();
        let spec = spec_with_areas(&[(SizeClass::Small, 0.5)]);
        let r = QualityScorer::new(&codec, &NoDetector, &config).score("a", b"x", Some(&spec));
        assert!(r.flags.is_empty());
    }

    #[test]
    fn score_always_clamped() {
        let config = ScorerConfig {
            face_bonus: 50.0,
            face_bonus_cap: 50.0,
            ..ScorerConfig::default()
        };
        let codec = MockCodec::with_image(checker(32, 32));
        let face = Detection::new(FocusKind::Face, NormalisedRect::new(0.1, 0.1, 0.1, 0.1));
        let detector = ScriptedDetector::top_left(vec![face]);
        let r = QualityScorer::new(&codec, &detector, &config).score("a", b"x", None);
        assert_eq!(r.score, MAX_SCORE);

        let harsh = ScorerConfig {
            exposure_penalty: 40.0,
            ..ScorerConfig::default()
        };
        let codec = MockCodec::with_image(flat(0));
        let r = QualityScorer::new(&codec, &NoDetector, &harsh).score("a", b"x", None);
        assert_eq!(r.score, MIN_SCORE);
    }

    #[test]
    fn scoring_is_deterministic() {
        let codec = MockCodec::with_image(checker(48, 40));
        let config = ScorerConfig::default();
        let scorer = QualityScorer::new(&codec, &NoDetector, &config);
        let spec = spec_with_areas(&[(SizeClass::Medium, 0.2)]);
        assert_eq!(
            scorer.score("a", b"x", Some(&spec)),
            scorer.score("a", b"x", Some(&spec))
        );
    }
}
