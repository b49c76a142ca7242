//! Shared types persisted between preparation, re-crop and the shuffle engine.
//!
//! [`SmartPhotoSpec`] is the persisted record for "this single photo, three
//! sizes". It references render files in the byte store by name only.

use crate::geometry::{NormalisedRect, PixelSize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version stamped on every spec produced by automatic framing.
pub const ALGORITHM_VERSION: u32 = 1;

/// Longest file name accepted by the byte store.
pub const MAX_FILE_NAME_LEN: usize = 256;

/// The three output render sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub const ALL: [SizeClass; 3] = [SizeClass::Small, SizeClass::Medium, SizeClass::Large];

    /// One-letter tag used in score flags.
    pub fn label(self) -> &'static str {
        match self {
            SizeClass::Small => "S",
            SizeClass::Medium => "M",
            SizeClass::Large => "L",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SizeClass::Small => "small",
            SizeClass::Medium => "medium",
            SizeClass::Large => "large",
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SizeClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "small" => Ok(SizeClass::Small),
            "m" | "medium" => Ok(SizeClass::Medium),
            "l" | "large" => Ok(SizeClass::Large),
            other => Err(format!("unknown size '{other}' (expected small, medium or large)")),
        }
    }
}

/// One optional value per [`SizeClass`].
///
/// Collapses the small/medium/large triplets (renders, crops, manual
/// overrides) into one generic accessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerSize<T> {
    #[serde(default = "none", skip_serializing_if = "Option::is_none")]
    pub small: Option<T>,
    #[serde(default = "none", skip_serializing_if = "Option::is_none")]
    pub medium: Option<T>,
    #[serde(default = "none", skip_serializing_if = "Option::is_none")]
    pub large: Option<T>,
}

fn none<T>() -> Option<T> {
    None
}

impl<T> Default for PerSize<T> {
    fn default() -> Self {
        Self {
            small: None,
            medium: None,
            large: None,
        }
    }
}

impl<T> PerSize<T> {
    pub fn get(&self, size: SizeClass) -> Option<&T> {
        match size {
            SizeClass::Small => self.small.as_ref(),
            SizeClass::Medium => self.medium.as_ref(),
            SizeClass::Large => self.large.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, size: SizeClass) -> &mut Option<T> {
        match size {
            SizeClass::Small => &mut self.small,
            SizeClass::Medium => &mut self.medium,
            SizeClass::Large => &mut self.large,
        }
    }

    /// Replace the value for `size`, returning the previous one.
    pub fn set(&mut self, size: SizeClass, value: Option<T>) -> Option<T> {
        std::mem::replace(self.slot_mut(size), value)
    }

    pub fn take(&mut self, size: SizeClass) -> Option<T> {
        self.slot_mut(size).take()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SizeClass, &T)> {
        SizeClass::ALL
            .into_iter()
            .filter_map(move |size| self.get(size).map(|v| (size, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn is_complete(&self) -> bool {
        SizeClass::ALL.iter().all(|&s| self.get(s).is_some())
    }

    pub fn map<U>(&self, mut f: impl FnMut(SizeClass, &T) -> U) -> PerSize<U> {
        let mut out = PerSize::default();
        for (size, value) in self.iter() {
            out.set(size, Some(f(size, value)));
        }
        out
    }
}

/// Output pixel sizes, resolved once by the caller and passed into every
/// pipeline call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderTargets {
    pub small: PixelSize,
    pub medium: PixelSize,
    pub large: PixelSize,
}

impl Default for RenderTargets {
    /// Home-screen tile sizes of a 3x phone display.
    fn default() -> Self {
        Self {
            small: PixelSize::new(510, 510),
            medium: PixelSize::new(1092, 510),
            large: PixelSize::new(1092, 1146),
        }
    }
}

impl RenderTargets {
    pub fn get(&self, size: SizeClass) -> PixelSize {
        match size {
            SizeClass::Small => self.small,
            SizeClass::Medium => self.medium,
            SizeClass::Large => self.large,
        }
        .normalised()
    }
}

/// One output render of a prepared photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartPhotoVariantSpec {
    pub render_file_name: String,
    pub crop_rect: NormalisedRect,
    pub pixel_size: PixelSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub straighten_degrees: Option<f64>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub rotation_quarter_turns: u8,
}

fn is_zero(turns: &u8) -> bool {
    *turns == 0
}

impl SmartPhotoVariantSpec {
    pub fn normalised(&self) -> Self {
        Self {
            render_file_name: sanitise_file_name(&self.render_file_name),
            crop_rect: self.crop_rect.normalised(),
            pixel_size: self.pixel_size.normalised(),
            straighten_degrees: crate::imaging::normalised_straighten_degrees(
                self.straighten_degrees,
            ),
            rotation_quarter_turns: crate::imaging::normalised_quarter_turns(i32::from(
                self.rotation_quarter_turns,
            )),
        }
    }
}

/// Persisted record of a prepared photo: the kept master plus one variant
/// per size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartPhotoSpec {
    pub algorithm_version: u32,
    pub prepared_at: DateTime<Utc>,
    pub master_file_name: String,
    #[serde(flatten)]
    pub variants: PerSize<SmartPhotoVariantSpec>,
}

impl SmartPhotoSpec {
    pub fn variant(&self, size: SizeClass) -> Option<&SmartPhotoVariantSpec> {
        self.variants.get(size)
    }

    pub fn normalised(&self) -> Self {
        Self {
            algorithm_version: self.algorithm_version.max(1),
            prepared_at: self.prepared_at,
            master_file_name: sanitise_file_name(&self.master_file_name),
            variants: self.variants.map(|_, v| v.normalised()),
        }
    }

    /// Master first, then each render that has a non-empty name.
    pub fn all_file_names(&self) -> Vec<String> {
        std::iter::once(self.master_file_name.as_str())
            .chain(self.variants.iter().map(|(_, v)| v.render_file_name.as_str()))
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Names in `old` that no longer appear in `kept`, blank names and
/// duplicates removed, in first-seen order.
///
/// A replacement that reuses a name never reports it as obsolete.
pub fn obsolete_file_names<'a>(
    old: impl IntoIterator<Item = &'a str>,
    kept: &[String],
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in old.into_iter().map(str::trim).filter(|n| !n.is_empty()) {
        if !kept.iter().any(|k| k.trim() == name) && !out.iter().any(|o| o == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// Reduce a file name to a single trimmed path component of bounded length.
///
/// Returns an empty string when nothing usable remains.
pub fn sanitise_file_name(name: &str) -> String {
    let last = name
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if last == "." || last == ".." {
        return String::new();
    }
    last.chars().take(MAX_FILE_NAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn variant(name: &str) -> SmartPhotoVariantSpec {
        SmartPhotoVariantSpec {
            render_file_name: name.to_string(),
            crop_rect: NormalisedRect::new(0.1, 0.1, 0.5, 0.5),
            pixel_size: PixelSize::new(100, 100),
            straighten_degrees: None,
            rotation_quarter_turns: 0,
        }
    }

    #[test]
    fn size_class_parse_and_labels() {
        assert_eq!("S".parse::<SizeClass>().unwrap(), SizeClass::Small);
        assert_eq!("medium".parse::<SizeClass>().unwrap(), SizeClass::Medium);
        assert!("xl".parse::<SizeClass>().is_err());
        assert_eq!(SizeClass::Large.label(), "L");
    }

    #[test]
    fn per_size_set_returns_previous() {
        let mut p: PerSize<u32> = PerSize::default();
        assert!(p.is_empty());
        assert_eq!(p.set(SizeClass::Medium, Some(3)), None);
        assert_eq!(p.set(SizeClass::Medium, Some(4)), Some(3));
        assert_eq!(p.get(SizeClass::Medium), Some(&4));
        assert!(!p.is_complete());
        let sizes: Vec<_> = p.iter().map(|(s, _)| s).collect();
        assert_eq!(sizes, vec![SizeClass::Medium]);
    }

    #[test]
    fn per_size_serializes_only_present_slots() {
        let mut p: PerSize<u32> = PerSize::default();
        p.set(SizeClass::Large, Some(7));
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"large":7}"#);
        let back: PerSize<u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn spec_json_round_trip_with_flattened_variants() {
        let mut variants = PerSize::default();
        variants.set(SizeClass::Small, Some(variant("s.jpg")));
        variants.set(
            SizeClass::Large,
            Some(SmartPhotoVariantSpec {
                straighten_degrees: Some(2.5),
                rotation_quarter_turns: 1,
                ..variant("l.jpg")
            }),
        );
        let spec = SmartPhotoSpec {
            algorithm_version: ALGORITHM_VERSION,
            prepared_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            master_file_name: "m.jpg".to_string(),
            variants,
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert!(json.get("small").is_some());
        assert!(json.get("medium").is_none());
        let back: SmartPhotoSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
        assert_eq!(back.all_file_names(), vec!["m.jpg", "s.jpg", "l.jpg"]);
    }

    #[test]
    fn sanitise_file_name_keeps_last_component() {
        assert_eq!(sanitise_file_name("  a/b/c.jpg "), "c.jpg");
        assert_eq!(sanitise_file_name("..\\x.jpg"), "x.jpg");
        assert_eq!(sanitise_file_name("../"), "");
        assert_eq!(sanitise_file_name(".."), "");
        assert_eq!(sanitise_file_name(&"a".repeat(300)).len(), MAX_FILE_NAME_LEN);
    }

    #[test]
    fn obsolete_names_skip_reused_and_blank() {
        let kept = vec!["b.jpg".to_string(), "c.jpg".to_string()];
        let old = ["a.jpg", " b.jpg ", "", "a.jpg", "d.jpg"];
        assert_eq!(obsolete_file_names(old, &kept), vec!["a.jpg", "d.jpg"]);
        assert!(obsolete_file_names(["c.jpg"], &kept).is_empty());
    }

    #[test]
    fn spec_normalised_repairs_fields() {
        let mut variants = PerSize::default();
        variants.set(
            SizeClass::Small,
            Some(SmartPhotoVariantSpec {
                crop_rect: NormalisedRect::new(0.9, 0.9, 0.5, 0.5),
                pixel_size: PixelSize::new(0, 10),
                straighten_degrees: Some(0.00001),
                rotation_quarter_turns: 6,
                ..variant("dir/s.jpg")
            }),
        );
        let spec = SmartPhotoSpec {
            algorithm_version: 0,
            prepared_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            master_file_name: "/tmp/m.jpg".to_string(),
            variants,
        }
        .normalised();
        let v = spec.variant(SizeClass::Small).unwrap();
        assert_eq!(spec.master_file_name, "m.jpg");
        assert_eq!(v.render_file_name, "s.jpg");
        assert_eq!(v.pixel_size, PixelSize::new(1, 10));
        assert_eq!(v.straighten_degrees, None);
        assert_eq!(v.rotation_quarter_turns, 2);
        assert!(v.crop_rect.is_inside_unit());
    }
}
