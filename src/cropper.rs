//! Subject-aware cropping.
//!
//! [`crop_rect`] turns weighted focus boxes into one normalised crop of a
//! target aspect:
//!
//! ```text
//! select boxes (strategy) → union → pad → expand to aspect → clamp
//!                        → breathing room → clamp → size guard
//! ```
//!
//! With nothing selected, or when the result is too small to render well,
//! the crop is [`centred_aspect_crop`].

use crate::focus::{FocusBox, FocusKind};
use crate::geometry::{NormalisedRect, expand_to_match_aspect};
use crate::types::SizeClass;

/// Aspects outside this range are clamped.
pub const MIN_TARGET_ASPECT: f64 = 0.1;
pub const MAX_TARGET_ASPECT: f64 = 10.0;

const SIDE_PADDING: f64 = 0.06;
const FACE_TOP_PADDING: f64 = 0.06;
const TOP_PADDING: f64 = 0.03;
const BOTTOM_PADDING: f64 = 0.05;
const BREATHING_ROOM: f64 = 0.02;

/// Crops narrower or shorter than this fall back to the centred crop.
pub const MIN_CROP_SIDE: f64 = 0.15;

/// Which focus boxes a crop must include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropStrategy {
    SingleBestSubject,
    IncludeUpToSubjects(usize),
    IncludeAllSubjects,
}

impl CropStrategy {
    /// Fixed per-size policy: tight for small tiles, fuller scenes for large.
    pub fn for_size(size: SizeClass) -> Self {
        match size {
            SizeClass::Small => CropStrategy::SingleBestSubject,
            SizeClass::Medium => CropStrategy::IncludeUpToSubjects(2),
            SizeClass::Large => CropStrategy::IncludeAllSubjects,
        }
    }

    fn take(self, count: usize) -> usize {
        match self {
            CropStrategy::SingleBestSubject => count.min(1),
            CropStrategy::IncludeUpToSubjects(n) => count.min(n.max(1)),
            CropStrategy::IncludeAllSubjects => count,
        }
    }
}

fn safe_aspect(aspect: f64) -> f64 {
    if aspect.is_finite() && aspect > 0.0 {
        aspect
    } else {
        1.0
    }
}

fn clamped_aspect(aspect: f64) -> f64 {
    safe_aspect(aspect).clamp(MIN_TARGET_ASPECT, MAX_TARGET_ASPECT)
}

/// Largest centred crop of `target_aspect` on an image of `image_aspect`.
///
/// A wider image keeps full height and trims width; a taller one keeps full
/// width and trims height.
pub fn centred_aspect_crop(target_aspect: f64, image_aspect: f64) -> NormalisedRect {
    let target = clamped_aspect(target_aspect);
    let image = clamped_aspect(image_aspect);
    if image >= target {
        let width = target / image;
        NormalisedRect::new((1.0 - width) / 2.0, 0.0, width, 1.0).normalised()
    } else {
        let height = image / target;
        NormalisedRect::new(0.0, (1.0 - height) / 2.0, 1.0, height).normalised()
    }
}

/// Compute the crop for one output.
pub fn crop_rect(
    target_aspect: f64,
    image_aspect: f64,
    focus_boxes: &[FocusBox],
    strategy: CropStrategy,
) -> NormalisedRect {
    let target = clamped_aspect(target_aspect);
    let image = safe_aspect(image_aspect);

    let mut ranked: Vec<&FocusBox> = focus_boxes.iter().collect();
    ranked.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    ranked.truncate(strategy.take(ranked.len()));

    let Some((first, rest)) = ranked.split_first() else {
        return centred_aspect_crop(target, image);
    };

    let union = rest
        .iter()
        .fold(first.rect.normalised(), |acc, b| acc.union(&b.rect.normalised()));
    let has_face = ranked.iter().any(|b| b.kind == FocusKind::Face);
    let top = if has_face { FACE_TOP_PADDING } else { TOP_PADDING };

    let padded = union.expanded(SIDE_PADDING, top, BOTTOM_PADDING);
    let fitted = expand_to_match_aspect(padded, target, image).normalised();
    let roomy = fitted
        .expanded(BREATHING_ROOM, BREATHING_ROOM, BREATHING_ROOM)
        .normalised();

    if roomy.width < MIN_CROP_SIDE || roomy.height < MIN_CROP_SIDE {
        return centred_aspect_crop(target, image);
    }
    roomy
}

/// One crop per size, each with its fixed strategy.
pub fn crop_rects_for_targets(
    targets: &crate::types::RenderTargets,
    image_aspect: f64,
    focus_boxes: &[FocusBox],
) -> Vec<(SizeClass, NormalisedRect)> {
    SizeClass::ALL
        .into_iter()
        .map(|size| {
            let target_aspect = targets.get(size).aspect();
            (
                size,
                crop_rect(
                    target_aspect,
                    image_aspect,
                    focus_boxes,
                    CropStrategy::for_size(size),
                ),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f64, y: f64, w: f64, h: f64, weight: f64) -> FocusBox {
        FocusBox {
            rect: NormalisedRect::new(x, y, w, h),
            kind: FocusKind::Face,
            weight,
        }
    }

    fn saliency(x: f64, y: f64, w: f64, h: f64, weight: f64) -> FocusBox {
        FocusBox {
            kind: FocusKind::Saliency,
            ..face(x, y, w, h, weight)
        }
    }

    fn contains(outer: &NormalisedRect, inner: &NormalisedRect) -> bool {
        outer.x <= inner.x + 1e-9
            && outer.y <= inner.y + 1e-9
            && outer.max_x() >= inner.max_x() - 1e-9
            && outer.max_y() >= inner.max_y() - 1e-9
    }

    // =========================================================================
    // centred_aspect_crop
    // =========================================================================

    #[test]
    fn centred_crop_on_wider_image_trims_width() {
        let r = centred_aspect_crop(1.0, 2.0);
        assert_eq!(r, NormalisedRect::new(0.25, 0.0, 0.5, 1.0));
    }

    #[test]
    fn centred_crop_on_taller_image_trims_height() {
        let r = centred_aspect_crop(2.0, 1.0);
        assert_eq!(r, NormalisedRect::new(0.0, 0.25, 1.0, 0.5));
    }

    #[test]
    fn centred_crop_clamps_extreme_target() {
        assert_eq!(centred_aspect_crop(100.0, 1.0), centred_aspect_crop(10.0, 1.0));
        assert_eq!(centred_aspect_crop(0.0, 1.0), centred_aspect_crop(1.0, 1.0));
    }

    #[test]
    fn centred_crop_clamps_extreme_image() {
        assert_eq!(centred_aspect_crop(1.0, 50.0), centred_aspect_crop(1.0, 10.0));
        assert!((centred_aspect_crop(1.0, 50.0).width - 0.1).abs() < 1e-12);
        assert_eq!(centred_aspect_crop(1.0, 0.01), centred_aspect_crop(1.0, 0.1));
    }

    // =========================================================================
    // crop_rect
    // =========================================================================

    #[test]
    fn empty_boxes_fall_back_exactly() {
        for (target, image) in [(1.0, 1.5), (2.14, 0.75), (0.46, 1.777), (1.0, 1.0)] {
            for strategy in [
                CropStrategy::SingleBestSubject,
                CropStrategy::IncludeUpToSubjects(2),
                CropStrategy::IncludeAllSubjects,
            ] {
                assert_eq!(
                    crop_rect(target, image, &[], strategy),
                    centred_aspect_crop(target, image)
                );
            }
        }
    }

    #[test]
    fn crop_contains_subject_and_matches_aspect() {
        let subject = face(0.6, 0.3, 0.1, 0.15, 3.1);
        let r = crop_rect(1.0, 1.5, &[subject], CropStrategy::SingleBestSubject);
        assert!(contains(&r, &subject.rect), "{r:?}");
        assert!(r.is_inside_unit());
        // Breathing room is uniform, so the aspect is close but not exact.
        let rendered_aspect = r.width * 1.5 / r.height;
        assert!((rendered_aspect - 1.0).abs() < 0.1, "{rendered_aspect}");
    }

    #[test]
    fn face_gets_more_headroom_than_saliency() {
        let f = crop_rect(
            1.0,
            1.0,
            &[face(0.4, 0.4, 0.2, 0.2, 3.0)],
            CropStrategy::SingleBestSubject,
        );
        let s = crop_rect(
            1.0,
            1.0,
            &[saliency(0.4, 0.4, 0.2, 0.2, 1.0)],
            CropStrategy::SingleBestSubject,
        );
        assert!(f.y < s.y);
    }

    #[test]
    fn single_strategy_ignores_second_subject() {
        let best = face(0.1, 0.1, 0.15, 0.15, 3.2);
        let other = face(0.7, 0.7, 0.15, 0.15, 3.1);
        let single = crop_rect(1.0, 1.0, &[other, best], CropStrategy::SingleBestSubject);
        assert!(contains(&single, &best.rect));
        assert!(!contains(&single, &other.rect));

        let all = crop_rect(1.0, 1.0, &[other, best], CropStrategy::IncludeAllSubjects);
        assert!(contains(&all, &best.rect));
        assert!(contains(&all, &other.rect));
    }

    #[test]
    fn up_to_two_takes_two_heaviest() {
        let a = face(0.05, 0.05, 0.1, 0.1, 3.3);
        let b = face(0.3, 0.05, 0.1, 0.1, 3.2);
        let c = saliency(0.8, 0.8, 0.1, 0.1, 1.0);
        let r = crop_rect(1.0, 1.0, &[c, b, a], CropStrategy::IncludeUpToSubjects(2));
        assert!(contains(&r, &a.rect) && contains(&r, &b.rect));
        assert!(!contains(&r, &c.rect));
    }

    #[test]
    fn too_short_result_uses_centred_crop() {
        // Very wide target on a tiny saliency box: aspect expansion only grows
        // the width, so the height stays under the guard.
        let sub = saliency(0.5, 0.5, 0.001, 0.001, 1.0);
        let r = crop_rect(10.0, 1.0, &[sub], CropStrategy::SingleBestSubject);
        assert_eq!(r, centred_aspect_crop(10.0, 1.0));
    }

    #[test]
    fn crops_for_targets_cover_all_sizes() {
        let targets = crate::types::RenderTargets::default();
        let crops = crop_rects_for_targets(&targets, 1.5, &[face(0.4, 0.3, 0.1, 0.1, 3.0)]);
        assert_eq!(crops.len(), 3);
        for (size, r) in crops {
            let aspect = r.width * 1.5 / r.height;
            let target = targets.get(size).aspect();
            assert!((aspect - target).abs() / target < 0.1, "{size}: {aspect}");
        }
    }
}
