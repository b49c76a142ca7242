//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Prepared photo
//!
//! ```text
//! Prepared 2024-03-01 08:00 UTC (algorithm v1)
//!     Master: smart-master-3f2a….jpg
//!     small 510x510 → smart-small-9c01….jpg
//!         Crop: x 0.167 y 0.000 w 0.667 h 1.000
//! ```
//!
//! ## Pool status
//!
//! ```text
//! album:Holidays (3 photos)
//!     Rotation: every 60 min, next 2024-03-01 09:00 UTC
//!     Progress: 2 prepared, 1 failed, 0 pending
//!   ▶ 001 Holidays/beach.jpg  2.40  [faces 1]
//!     002 Holidays/dunes.jpg  0.90
//!     003 Holidays/blurry.jpg  failed
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions do
//! no I/O.

use crate::geometry::NormalisedRect;
use crate::manifest::{Entry, ShuffleManifest};
use crate::scorer::QualityScoreResult;
use crate::shuffle::BatchOutcome;
use crate::types::SmartPhotoSpec;
use chrono::{DateTime, Utc};

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn format_rect(r: &NormalisedRect) -> String {
    format!(
        "x {:.3} y {:.3} w {:.3} h {:.3}",
        r.x, r.y, r.width, r.height
    )
}

fn format_flags(flags: &[String]) -> String {
    if flags.is_empty() {
        String::new()
    } else {
        format!("  [{}]", flags.join(", "))
    }
}

fn entry_status(entry: &Entry) -> String {
    if entry.is_prepared() {
        format!("{:.2}{}", entry.score_value(), format_flags(&entry.flags))
    } else if entry.is_failed() {
        "failed".to_string()
    } else {
        "pending".to_string()
    }
}

// ============================================================================
// Single photo
// ============================================================================

pub fn format_spec(spec: &SmartPhotoSpec) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Prepared {} (algorithm v{})",
            format_time(spec.prepared_at),
            spec.algorithm_version
        ),
        format!("{}Master: {}", indent(1), spec.master_file_name),
    ];
    for (size, v) in spec.variants.iter() {
        lines.push(format!(
            "{}{} {}x{} \u{2192} {}",
            indent(1),
            size,
            v.pixel_size.width,
            v.pixel_size.height,
            v.render_file_name
        ));
        lines.push(format!("{}Crop: {}", indent(2), format_rect(&v.crop_rect)));
        if let Some(deg) = v.straighten_degrees {
            lines.push(format!("{}Straighten: {deg:.1}\u{b0}", indent(2)));
        }
        if v.rotation_quarter_turns != 0 {
            lines.push(format!(
                "{}Quarter turns: {}",
                indent(2),
                v.rotation_quarter_turns
            ));
        }
    }
    lines
}

pub fn print_spec(spec: &SmartPhotoSpec) {
    for line in format_spec(spec) {
        println!("{}", line);
    }
}

pub fn format_score(result: &QualityScoreResult) -> Vec<String> {
    let flags = if result.flags.is_empty() {
        "none".to_string()
    } else {
        result.flags.join(", ")
    };
    vec![
        format!("Score: {:.2}", result.score),
        format!("{}Flags: {}", indent(1), flags),
    ]
}

pub fn print_score(result: &QualityScoreResult) {
    for line in format_score(result) {
        println!("{}", line);
    }
}

// ============================================================================
// Shuffle pools
// ============================================================================

/// Pool header, rotation, progress, then one line per entry with the entry
/// on screen at `now` marked.
pub fn format_manifest(manifest: &ShuffleManifest, now: DateTime<Utc>) -> Vec<String> {
    let progress = manifest.progress();
    let mut lines = vec![format!(
        "{} ({} photos)",
        manifest.source_id, progress.total
    )];

    let rotation = if manifest.rotation_interval_minutes <= 0 {
        "manual".to_string()
    } else {
        match manifest.next_change_date_from(now) {
            Some(next) => format!(
                "every {} min, next {}",
                manifest.rotation_interval_minutes,
                format_time(next)
            ),
            None => format!("every {} min", manifest.rotation_interval_minutes),
        }
    };
    lines.push(format!("{}Rotation: {}", indent(1), rotation));
    lines.push(format!(
        "{}Progress: {} prepared, {} failed, {} pending",
        indent(1),
        progress.prepared,
        progress.failed,
        progress.pending
    ));

    let showing = manifest.entry_for_render(now).map(|e| e.id.as_str());
    for (i, entry) in manifest.entries.iter().enumerate() {
        let marker = if showing == Some(entry.id.as_str()) {
            "  \u{25b6} "
        } else {
            "    "
        };
        lines.push(format!(
            "{marker}{} {}  {}",
            format_index(i + 1),
            entry.id,
            entry_status(entry)
        ));
    }
    lines
}

pub fn print_manifest(manifest: &ShuffleManifest, now: DateTime<Utc>) {
    for line in format_manifest(manifest, now) {
        println!("{}", line);
    }
}

pub fn format_batch(manifest: &ShuffleManifest, outcome: &BatchOutcome) -> Vec<String> {
    let mut lines = vec![manifest.source_id.clone()];
    for id in &outcome.prepared_now {
        lines.push(format!("{}prepared {id}", indent(1)));
    }
    for id in &outcome.failed_now {
        lines.push(format!("{}failed {id}", indent(1)));
    }
    if outcome.cancelled {
        lines.push(format!("{}cancelled", indent(1)));
    }
    let progress = manifest.progress();
    lines.push(format!(
        "Prepared {} of {} ({} failed, {} pending)",
        progress.prepared, progress.total, progress.failed, progress.pending
    ));
    lines
}

pub fn print_batch(manifest: &ShuffleManifest, outcome: &BatchOutcome) {
    for line in format_batch(manifest, outcome) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Entry;
    use crate::test_helpers::{at, prepared_entry, spec_named};
    use crate::types::SizeClass;

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn format_index_pads_to_three() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(100), "100");
    }

    #[test]
    fn rect_uses_three_decimals() {
        assert_eq!(
            format_rect(&NormalisedRect::new(0.25, 0.0, 0.5, 1.0)),
            "x 0.250 y 0.000 w 0.500 h 1.000"
        );
    }

    // =========================================================================
    // Single photo
    // =========================================================================

    #[test]
    fn spec_lists_master_and_variants() {
        let mut spec = spec_named("p");
        if let Some(v) = spec.variants.slot_mut(SizeClass::Large).as_mut() {
            v.straighten_degrees = Some(2.5);
            v.rotation_quarter_turns = 1;
        }
        let lines = format_spec(&spec);
        assert_eq!(lines[0], "Prepared 2024-03-01 00:00 UTC (algorithm v1)");
        assert_eq!(lines[1], "    Master: p-master.jpg");
        assert_eq!(lines[2], "    small 510x510 \u{2192} p-small.jpg");
        assert_eq!(lines[3], "        Crop: x 0.100 y 0.100 w 0.500 h 0.500");
        assert!(lines.contains(&"        Straighten: 2.5\u{b0}".to_string()));
        assert!(lines.contains(&"        Quarter turns: 1".to_string()));
    }

    #[test]
    fn score_without_flags() {
        let lines = format_score(&QualityScoreResult {
            score: 1.6,
            flags: Vec::new(),
        });
        assert_eq!(lines, vec!["Score: 1.60", "    Flags: none"]);
    }

    // =========================================================================
    // Shuffle pools
    // =========================================================================

    fn pool() -> ShuffleManifest {
        let mut failed = Entry::new("c");
        failed.flags = vec!["failed".to_string()];
        let mut best = prepared_entry("a", Some(2.4));
        best.flags = vec!["faces 1".to_string()];
        ShuffleManifest {
            entries: vec![best, prepared_entry("b", None), failed, Entry::new("d")],
            ..ShuffleManifest::new("album:Trip", Vec::new(), 60, at(2024, 3, 1, 8, 0))
        }
    }

    #[test]
    fn manifest_status_marks_current_entry() {
        let lines = format_manifest(&pool(), at(2024, 3, 1, 8, 30));
        assert_eq!(
            lines,
            vec![
                "album:Trip (4 photos)",
                "    Rotation: every 60 min, next 2024-03-01 09:00 UTC",
                "    Progress: 2 prepared, 1 failed, 1 pending",
                "  \u{25b6} 001 a  2.40  [faces 1]",
                "    002 b  0.00",
                "    003 c  failed",
                "    004 d  pending",
            ]
        );
    }

    #[test]
    fn manifest_status_follows_rotation() {
        let lines = format_manifest(&pool(), at(2024, 3, 1, 9, 5));
        assert_eq!(lines[1], "    Rotation: every 60 min, next 2024-03-01 10:00 UTC");
        assert_eq!(lines[4], "  \u{25b6} 002 b  0.00");
    }

    #[test]
    fn manual_rotation_has_no_schedule() {
        let mut m = pool();
        m.rotation_interval_minutes = 0;
        assert_eq!(format_manifest(&m, at(2024, 3, 1, 8, 0))[1], "    Rotation: manual");
    }

    #[test]
    fn batch_summary() {
        let outcome = BatchOutcome {
            prepared_now: vec!["a".into()],
            failed_now: vec!["c".into()],
            cancelled: true,
            changed: true,
            ..BatchOutcome::default()
        };
        assert_eq!(
            format_batch(&pool(), &outcome),
            vec![
                "album:Trip",
                "    prepared a",
                "    failed c",
                "    cancelled",
                "Prepared 2 of 4 (1 failed, 1 pending)",
            ]
        );
    }
}
