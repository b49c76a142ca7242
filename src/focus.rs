//! Focus detector adapter.
//!
//! Subject detectors report regions in their own coordinate convention.
//! This module is the only place that knows about those differences: it turns
//! raw [`Detection`]s into weighted, top-left-origin [`FocusBox`]es that the
//! cropper can consume.
//!
//! ## Weighting
//!
//! | Kind | Weight |
//! |---|---|
//! | face | 3.0 + area × 2.0 |
//! | human | 2.7 + area × 1.8 |
//! | animal | 2.4 + area × 1.5 |
//! | saliency | 1.0 + area × 1.0 |
//!
//! The constants live in [`FocusWeights`] and can be overridden through
//! `[focus]` in `config.toml`.
//!
//! ## Ordering
//!
//! Boxes come out sorted by weight, descending. Boxes of one kind whose areas
//! are within 1% of each other are a tie: they are ordered by distance to the
//! image centre (closest first) and weighted with the same area, so the
//! order is reproducible regardless of detector output order.

use crate::geometry::NormalisedRect;
use crate::imaging::downsample;
use image::DynamicImage;
use image::imageops::FilterType;
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Boxes smaller than this (after clipping) are dropped.
pub const MIN_FOCUS_AREA: f64 = 1e-5;

/// Relative area difference under which two boxes count as tied.
pub const AREA_TIE_TOLERANCE: f64 = 0.01;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Subject detection failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusKind {
    Face,
    Human,
    Animal,
    Saliency,
}

impl FocusKind {
    const ALL: [FocusKind; 4] = [
        FocusKind::Face,
        FocusKind::Human,
        FocusKind::Animal,
        FocusKind::Saliency,
    ];
}

/// A weighted region of interest, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusBox {
    pub rect: NormalisedRect,
    pub kind: FocusKind,
    pub weight: f64,
}

/// Where a detector puts `y = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateOrigin {
    TopLeft,
    BottomLeft,
}

/// Raw detector output in the detector's own convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub rect: NormalisedRect,
    pub kind: FocusKind,
}

impl Detection {
    pub fn new(kind: FocusKind, rect: NormalisedRect) -> Self {
        Self { rect, kind }
    }
}

/// Subject detection capability.
///
/// Implementations document their [`CoordinateOrigin`]; rects are normalised
/// to the analysed image.
pub trait SubjectDetector: Sync {
    fn origin(&self) -> CoordinateOrigin;

    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, DetectorError>;
}

/// `base + area × per_area` for one kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KindWeight {
    pub base: f64,
    pub per_area: f64,
}

impl KindWeight {
    pub const fn new(base: f64, per_area: f64) -> Self {
        Self { base, per_area }
    }

    pub fn weight(&self, area: f64) -> f64 {
        self.base + area * self.per_area
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FocusWeights {
    pub face: KindWeight,
    pub human: KindWeight,
    pub animal: KindWeight,
    pub saliency: KindWeight,
}

impl Default for FocusWeights {
    fn default() -> Self {
        Self {
            face: KindWeight::new(3.0, 2.0),
            human: KindWeight::new(2.7, 1.8),
            animal: KindWeight::new(2.4, 1.5),
            saliency: KindWeight::new(1.0, 1.0),
        }
    }
}

impl FocusWeights {
    pub fn for_kind(&self, kind: FocusKind) -> KindWeight {
        match kind {
            FocusKind::Face => self.face,
            FocusKind::Human => self.human,
            FocusKind::Animal => self.animal,
            FocusKind::Saliency => self.saliency,
        }
    }
}

/// Flip a rect into the top-left convention (`y' = 1 − y − height`).
pub fn to_top_left(rect: NormalisedRect, origin: CoordinateOrigin) -> NormalisedRect {
    match origin {
        CoordinateOrigin::TopLeft => rect,
        CoordinateOrigin::BottomLeft => NormalisedRect {
            y: 1.0 - rect.y - rect.height,
            ..rect
        },
    }
}

/// Convert, clip, weight and order raw detections.
pub fn focus_boxes_from_detections(
    detections: &[Detection],
    origin: CoordinateOrigin,
    weights: &FocusWeights,
) -> Vec<FocusBox> {
    let mut boxes = Vec::new();

    for kind in FocusKind::ALL {
        let mut rects: Vec<NormalisedRect> = detections
            .iter()
            .filter(|d| d.kind == kind)
            .filter_map(|d| clip_to_unit(to_top_left(d.rect, origin)))
            .collect();
        rects.sort_by(|a, b| b.area().total_cmp(&a.area()));

        let weight = weights.for_kind(kind);
        for cluster in tie_clusters(&rects) {
            let shared_area = cluster[0].area();
            let mut ordered = cluster.to_vec();
            ordered.sort_by(|a, b| centre_then_position(a, b));
            boxes.extend(ordered.into_iter().map(|rect| FocusBox {
                rect,
                kind,
                weight: weight.weight(shared_area),
            }));
        }
    }

    // Stable: ties keep kind order, then the cluster order above.
    boxes.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    boxes
}

/// Downsample for analysis, run the detector and adapt its output.
pub fn detect_focus_boxes(
    detector: &dyn SubjectDetector,
    image: &DynamicImage,
    analysis_long_edge: u32,
    weights: &FocusWeights,
) -> Result<Vec<FocusBox>, DetectorError> {
    let analysis = downsample(image.clone(), analysis_long_edge, FilterType::Triangle);
    let detections = detector.detect(&analysis)?;
    let boxes = focus_boxes_from_detections(&detections, detector.origin(), weights);
    debug!(
        "focus: {} detection(s) → {} box(es) on {}x{}",
        detections.len(),
        boxes.len(),
        analysis.width(),
        analysis.height()
    );
    Ok(boxes)
}

/// Intersect with the unit square; drop degenerate and outside rects.
fn clip_to_unit(rect: NormalisedRect) -> Option<NormalisedRect> {
    let finite = [rect.x, rect.y, rect.width, rect.height]
        .iter()
        .all(|v| v.is_finite());
    if !finite || rect.width <= 0.0 || rect.height <= 0.0 {
        return None;
    }
    rect.intersection(&NormalisedRect::FULL)
        .filter(|r| r.area() >= MIN_FOCUS_AREA)
}

/// Split an area-descending list into runs within [`AREA_TIE_TOLERANCE`] of
/// each run's largest member.
fn tie_clusters(sorted: &[NormalisedRect]) -> Vec<&[NormalisedRect]> {
    let mut clusters = Vec::new();
    let mut start = 0;
    while start < sorted.len() {
        let lead = sorted[start].area();
        let mut end = start + 1;
        while end < sorted.len() && lead - sorted[end].area() <= lead * AREA_TIE_TOLERANCE {
            end += 1;
        }
        clusters.push(&sorted[start..end]);
        start = end;
    }
    clusters
}

fn centre_then_position(a: &NormalisedRect, b: &NormalisedRect) -> Ordering {
    a.centre_distance_sq()
        .total_cmp(&b.centre_distance_sq())
        .then(b.area().total_cmp(&a.area()))
        .then(a.y.total_cmp(&b.y))
        .then(a.x.total_cmp(&b.x))
}

/// Detector that never finds anything; framing falls back to centred crops.
pub struct NoDetector;

impl SubjectDetector for NoDetector {
    fn origin(&self) -> CoordinateOrigin {
        CoordinateOrigin::TopLeft
    }

    fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, DetectorError> {
        Ok(Vec::new())
    }
}

/// Built-in saliency detector based on local detail.
///
/// The luma image is split into a `grid × grid` lattice; each cell scores the
/// mean absolute neighbour difference of its pixels. Cells scoring at least
/// `threshold` of the best cell form the salient region, reported as one
/// saliency box. Flat images (best cell below `min_energy`) yield nothing.
///
/// Reports boxes bottom-left-origin.
#[derive(Debug, Clone, Copy)]
pub struct DetailSaliencyDetector {
    pub grid: u32,
    pub threshold: f64,
    pub min_energy: f64,
}

impl Default for DetailSaliencyDetector {
    fn default() -> Self {
        Self {
            grid: 8,
            threshold: 0.5,
            min_energy: 2.0,
        }
    }
}

impl SubjectDetector for DetailSaliencyDetector {
    fn origin(&self) -> CoordinateOrigin {
        CoordinateOrigin::BottomLeft
    }

    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, DetectorError> {
        let luma = image.to_luma8();
        let (w, h) = luma.dimensions();
        let grid = self.grid.max(1);
        if w < grid * 2 || h < grid * 2 {
            return Ok(Vec::new());
        }

        let mut energy = vec![0.0f64; (grid * grid) as usize];
        let mut counts = vec![0u32; energy.len()];
        for y in 0..h - 1 {
            for x in 0..w - 1 {
                let p = f64::from(luma.get_pixel(x, y).0[0]);
                let right = f64::from(luma.get_pixel(x + 1, y).0[0]);
                let down = f64::from(luma.get_pixel(x, y + 1).0[0]);
                let cell = ((y * grid / h) * grid + x * grid / w) as usize;
                energy[cell] += (p - right).abs() + (p - down).abs();
                counts[cell] += 1;
            }
        }
        for (e, &n) in energy.iter_mut().zip(&counts) {
            if n > 0 {
                *e /= f64::from(n);
            }
        }

        let best = energy.iter().copied().fold(0.0, f64::max);
        if best < self.min_energy {
            return Ok(Vec::new());
        }

        let cut = best * self.threshold;
        let hot: Vec<(u32, u32)> = (0..grid)
            .flat_map(|gy| (0..grid).map(move |gx| (gx, gy)))
            .filter(|&(gx, gy)| energy[(gy * grid + gx) as usize] >= cut)
            .collect();
        let (min_x, max_x, min_y, max_y) = hot.iter().fold(
            (grid, 0, grid, 0),
            |(lx, hx, ly, hy), &(gx, gy)| (lx.min(gx), hx.max(gx), ly.min(gy), hy.max(gy)),
        );

        let cell = 1.0 / f64::from(grid);
        let top_left = NormalisedRect::new(
            f64::from(min_x) * cell,
            f64::from(min_y) * cell,
            f64::from(max_x - min_x + 1) * cell,
            f64::from(max_y - min_y + 1) * cell,
        );
        Ok(vec![Detection::new(
            FocusKind::Saliency,
            // Same flip in reverse: report in this detector's convention.
            to_top_left(top_left, CoordinateOrigin::BottomLeft),
        )])
    }
}
