//! Shuffle manifest: the persisted state of one rotating photo pool.
//!
//! A [`ShuffleManifest`] owns its entries. Entries reference render files in
//! the byte store by name only; whenever an edit replaces or drops a
//! reference, [`ShuffleManifest::apply`] reports the old names as
//! `obsolete_files` so the caller can delete them after persisting the new
//! manifest.
//!
//! ## Entry lifecycle
//!
//! ```text
//! unprepared ──prepare ok──▶ prepared
//!     │
//!     └──prepare error──▶ failed ──ClearFailure──▶ unprepared
//! ```
//!
//! `failed` is sticky: batch passes skip failed entries until the flag is
//! cleared.
//!
//! ## Rotation
//!
//! `next_change_date` anchors time-based rotation. Once `now` reaches the
//! anchor, one step has elapsed, plus one more per full interval after it.
//! Rotation only ever moves between prepared entries.

use crate::geometry::NormalisedRect;
use crate::scorer::QualityScoreResult;
use crate::store::{ByteStore, StoreError};
use crate::types::{PerSize, SizeClass, SmartPhotoSpec, SmartPhotoVariantSpec, obsolete_file_names};
use chrono::{DateTime, TimeDelta, Timelike, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

pub const MANIFEST_VERSION: u32 = 1;

/// Flag marking an entry whose last preparation attempt failed.
pub const FAILED_FLAG: &str = "failed";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Entry not found: {0}")]
    EntryNotFound(String),
    #[error("No prepared entries")]
    NoPreparedEntries,
    #[error("Prepared photo for {0} is missing renders")]
    IncompleteRenders(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Stable asset id supplied by the photo source.
    pub id: String,
    /// Stored master used for manual re-renders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_name: Option<String>,
    /// Automatic render file names.
    #[serde(default, skip_serializing_if = "PerSize::is_empty")]
    pub renders: PerSize<String>,
    #[serde(default, skip_serializing_if = "PerSize::is_empty")]
    pub auto_crops: PerSize<NormalisedRect>,
    /// Manual per-size renders; preferred over automatic ones.
    #[serde(default, skip_serializing_if = "PerSize::is_empty")]
    pub manual: PerSize<SmartPhotoVariantSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepared_at: Option<DateTime<Utc>>,
    /// Higher is better. `None` until scored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub flags: Vec<String>,
}

fn non_blank(name: &str) -> Option<&str> {
    let t = name.trim();
    (!t.is_empty()).then_some(t)
}

impl Entry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_file_name: None,
            renders: PerSize::default(),
            auto_crops: PerSize::default(),
            manual: PerSize::default(),
            prepared_at: None,
            score: None,
            flags: Vec::new(),
        }
    }

    /// All three automatic renders are present.
    pub fn is_prepared(&self) -> bool {
        SizeClass::ALL
            .iter()
            .all(|&s| self.renders.get(s).and_then(|n| non_blank(n)).is_some())
    }

    pub fn is_failed(&self) -> bool {
        self.flags.iter().any(|f| f == FAILED_FLAG)
    }

    /// Score used for ordering; unscored counts as 0.
    pub fn score_value(&self) -> f64 {
        self.score.filter(|s| s.is_finite()).unwrap_or(0.0)
    }

    /// File to display for `size`: the manual render if set, else the
    /// automatic one.
    pub fn render_for(&self, size: SizeClass) -> Option<&str> {
        self.manual
            .get(size)
            .and_then(|m| non_blank(&m.render_file_name))
            .or_else(|| self.renders.get(size).and_then(|n| non_blank(n)))
    }

    /// Every store file this entry references.
    pub fn file_names(&self) -> Vec<String> {
        self.source_file_name
            .iter()
            .map(String::as_str)
            .chain(self.renders.iter().map(|(_, n)| n.as_str()))
            .chain(self.manual.iter().map(|(_, m)| m.render_file_name.as_str()))
            .filter_map(non_blank)
            .map(str::to_string)
            .collect()
    }
}

/// Union of two flag lists: trimmed, blanks dropped, sorted, unique.
pub fn merge_flags(existing: &[String], adding: &[String]) -> Vec<String> {
    let mut set: Vec<String> = existing
        .iter()
        .chain(adding)
        .filter_map(|f| non_blank(f))
        .map(str::to_string)
        .collect();
    set.sort();
    set.dedup();
    set
}

/// `now + minutes`, truncated to the whole minute. `None` when rotation is off.
pub fn scheduled_next_change_date(now: DateTime<Utc>, minutes: i64) -> Option<DateTime<Utc>> {
    if minutes <= 0 {
        return None;
    }
    let next = now.checked_add_signed(TimeDelta::try_minutes(minutes)?)?;
    Some(
        next.with_second(0)
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(next),
    )
}

/// Counts shown by `shuffle status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub total: usize,
    pub prepared: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Persisted state of one rotating pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShuffleManifest {
    pub version: u32,
    /// Opaque pool identifier (album id or memories query).
    pub source_id: String,
    pub entries: Vec<Entry>,
    pub current_index: usize,
    /// Rotation interval; `<= 0` disables scheduled rotation.
    pub rotation_interval_minutes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_change_date: Option<DateTime<Utc>>,
}

/// A pure manifest edit.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    /// Record a successful preparation and its score.
    MarkPrepared {
        id: String,
        spec: SmartPhotoSpec,
        score: QualityScoreResult,
    },
    MarkFailed {
        id: String,
    },
    /// Manual retry: make a failed entry eligible for batch passes again.
    ClearFailure {
        id: String,
    },
    SetManualOverride {
        id: String,
        size: SizeClass,
        variant: SmartPhotoVariantSpec,
    },
    ClearManualOverride {
        id: String,
        size: SizeClass,
    },
    SetRotationInterval {
        minutes: i64,
        now: DateTime<Utc>,
    },
    AdvanceToNextPrepared {
        now: DateTime<Utc>,
    },
    CatchUpRotation {
        now: DateTime<Utc>,
    },
    /// Replace the pool with `ids`, keeping existing entries that recur.
    Rebuild {
        ids: Vec<String>,
        now: DateTime<Utc>,
    },
    Resort,
}

/// Result of [`ShuffleManifest::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub manifest: ShuffleManifest,
    /// Store files no longer referenced. Delete only after saving `manifest`.
    pub obsolete_files: Vec<String>,
}

impl ShuffleManifest {
    /// New manifest over `ids` (blank and repeated ids dropped), current
    /// index 0, first change scheduled from `now`.
    pub fn new(
        source_id: impl Into<String>,
        ids: impl IntoIterator<Item = String>,
        rotation_interval_minutes: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION,
            source_id: source_id.into(),
            entries: unique_ids(ids).into_iter().map(Entry::new).collect(),
            current_index: 0,
            rotation_interval_minutes,
            next_change_date: scheduled_next_change_date(now, rotation_interval_minutes),
        }
    }

    pub fn entry(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut Entry, ManifestError> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| ManifestError::EntryNotFound(id.to_string()))
    }

    /// `current_index` clamped into range (0 for an empty manifest).
    pub fn clamped_current_index(&self) -> usize {
        self.current_index.min(self.entries.len().saturating_sub(1))
    }

    pub fn current_entry(&self) -> Option<&Entry> {
        self.entries.get(self.clamped_current_index())
    }

    pub fn progress(&self) -> Progress {
        let total = self.entries.len();
        let prepared = self.entries.iter().filter(|e| e.is_prepared()).count();
        let failed = self
            .entries
            .iter()
            .filter(|e| !e.is_prepared() && e.is_failed())
            .count();
        Progress {
            total,
            prepared,
            failed,
            pending: total - prepared - failed,
        }
    }

    /// Every store file some entry still references.
    pub fn referenced_file_names(&self) -> HashSet<String> {
        self.entries.iter().flat_map(Entry::file_names).collect()
    }

    /// Whether a batch pass would find anything to prepare.
    pub fn has_pending(&self) -> bool {
        self.progress().pending > 0
    }

    // =========================================================================
    // Rotation
    // =========================================================================

    fn interval(&self) -> Option<TimeDelta> {
        if self.rotation_interval_minutes <= 0 {
            return None;
        }
        TimeDelta::try_minutes(self.rotation_interval_minutes)
    }

    /// Rotation steps due at `now`; 0 when rotation is off or not yet due.
    pub fn rotation_steps_elapsed(&self, now: DateTime<Utc>) -> usize {
        let (Some(interval), Some(anchor)) = (self.interval(), self.next_change_date) else {
            return 0;
        };
        if now < anchor {
            return 0;
        }
        let elapsed = (now - anchor).num_milliseconds();
        let step = interval.num_milliseconds().max(1);
        usize::try_from(elapsed / step + 1).unwrap_or(usize::MAX)
    }

    /// The anchor if it is still ahead of `now`, else the first scheduled
    /// change after `now`.
    pub fn next_change_date_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let interval = self.interval()?;
        let anchor = self.next_change_date?;
        if now < anchor {
            return Some(anchor);
        }
        let steps = i32::try_from(self.rotation_steps_elapsed(now)).ok()?;
        anchor.checked_add_signed(interval.checked_mul(steps)?)
    }

    fn prepared_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_prepared())
            .map(|(i, _)| i)
            .collect()
    }

    /// Index into `entries` of the prepared entry to show after `steps`.
    fn rotated_index(&self, prepared: &[usize], steps: usize) -> Option<usize> {
        if prepared.is_empty() {
            return None;
        }
        let base = self.clamped_current_index();
        let pos = prepared.iter().position(|&i| i == base).unwrap_or(0);
        Some(prepared[(pos + steps % prepared.len()) % prepared.len()])
    }

    /// The entry to display at `now`, accounting for rotation that has not
    /// been persisted yet.
    pub fn entry_for_render(&self, now: DateTime<Utc>) -> Option<&Entry> {
        let idx = self.rotated_index(&self.prepared_indices(), self.rotation_steps_elapsed(now))?;
        self.entries.get(idx)
    }

    /// Persist the rotation due at `now`. Returns whether anything changed.
    pub fn catch_up_rotation(&mut self, now: DateTime<Utc>) -> bool {
        let steps = self.rotation_steps_elapsed(now);
        if steps == 0 {
            return false;
        }
        if let Some(idx) = self.rotated_index(&self.prepared_indices(), steps) {
            self.current_index = idx;
        }
        self.next_change_date = self.next_change_date_from(now);
        debug!(
            "{}: caught up {steps} rotation step(s), current {}",
            self.source_id, self.current_index
        );
        true
    }

    /// Move to the next prepared entry after the current one, wrapping.
    pub fn advance_to_next_prepared(&mut self, now: DateTime<Utc>) -> Result<(), ManifestError> {
        self.catch_up_rotation(now);
        let total = self.entries.len();
        let next = (1..=total)
            .map(|step| (self.current_index + step) % total)
            .find(|&i| self.entries[i].is_prepared())
            .ok_or(ManifestError::NoPreparedEntries)?;
        self.current_index = next;
        if self.rotation_interval_minutes > 0 {
            self.next_change_date = scheduled_next_change_date(now, self.rotation_interval_minutes);
        }
        Ok(())
    }

    pub fn set_rotation_interval(&mut self, minutes: i64, now: DateTime<Utc>) {
        self.catch_up_rotation(now);
        self.rotation_interval_minutes = minutes;
        self.next_change_date = scheduled_next_change_date(now, minutes);
    }

    // =========================================================================
    // Ordering and rebuild
    // =========================================================================

    /// Prepared entries by score (desc), prepared date (desc), id (asc);
    /// then unprepared entries in their existing order. The entry at
    /// `current_index` stays current.
    pub fn resort_prepared_entries_by_score_keeping_current_stable(&mut self) {
        let current_id = self.current_entry().map(|e| e.id.clone());

        let (mut prepared, unprepared): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(Entry::is_prepared);
        prepared.sort_by(compare_prepared);
        self.entries = prepared;
        self.entries.extend(unprepared);

        self.relocate_current(current_id.as_deref());
    }

    fn relocate_current(&mut self, id: Option<&str>) {
        self.current_index = id
            .and_then(|id| self.entries.iter().position(|e| e.id == id))
            .unwrap_or_else(|| self.clamped_current_index());
    }

    /// Replace the entry list with `ids`, reusing existing entries by id.
    /// Returns the files of entries that were dropped.
    pub fn rebuild_preserving_prepared(&mut self, ids: Vec<String>, now: DateTime<Utc>) -> Vec<String> {
        let current_id = self.current_entry().map(|e| e.id.clone());
        let mut existing: HashMap<String, Entry> = std::mem::take(&mut self.entries)
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        self.entries = unique_ids(ids)
            .into_iter()
            .map(|id| existing.remove(&id).unwrap_or_else(|| Entry::new(id)))
            .collect();

        let mut dropped: Vec<Entry> = existing.into_values().collect();
        dropped.sort_by(|a, b| a.id.cmp(&b.id));
        let dropped_files: Vec<String> = dropped.iter().flat_map(Entry::file_names).collect();
        let kept: Vec<String> = self.referenced_file_names().into_iter().collect();
        let obsolete = obsolete_file_names(dropped_files.iter().map(String::as_str), &kept);

        self.current_index = current_id
            .and_then(|id| self.entries.iter().position(|e| e.id == id))
            .unwrap_or(0);
        self.next_change_date = scheduled_next_change_date(now, self.rotation_interval_minutes);
        debug!(
            "{}: rebuilt with {} entries, {} dropped",
            self.source_id,
            self.entries.len(),
            dropped.len()
        );
        obsolete
    }

    // =========================================================================
    // Edits
    // =========================================================================

    /// Apply one edit, returning the new manifest and any file names the
    /// edit stopped referencing.
    pub fn apply(mut self, edit: Edit) -> Result<Applied, ManifestError> {
        let mut obsolete = Vec::new();
        match edit {
            Edit::MarkPrepared { id, spec, score } => {
                let entry = self.entry_mut(&id)?;
                obsolete = mark_prepared(entry, &spec, &score)?;
            }
            Edit::MarkFailed { id } => {
                let entry = self.entry_mut(&id)?;
                entry.flags = merge_flags(&entry.flags, &[FAILED_FLAG.to_string()]);
            }
            Edit::ClearFailure { id } => {
                self.entry_mut(&id)?.flags.retain(|f| f != FAILED_FLAG);
            }
            Edit::SetManualOverride { id, size, variant } => {
                let entry = self.entry_mut(&id)?;
                let kept = vec![variant.render_file_name.clone()];
                if let Some(old) = entry.manual.set(size, Some(variant)) {
                    obsolete = obsolete_file_names([old.render_file_name.as_str()], &kept);
                }
            }
            Edit::ClearManualOverride { id, size } => {
                if let Some(old) = self.entry_mut(&id)?.manual.take(size) {
                    obsolete = obsolete_file_names([old.render_file_name.as_str()], &[]);
                }
            }
            Edit::SetRotationInterval { minutes, now } => self.set_rotation_interval(minutes, now),
            Edit::AdvanceToNextPrepared { now } => self.advance_to_next_prepared(now)?,
            Edit::CatchUpRotation { now } => {
                self.catch_up_rotation(now);
            }
            Edit::Rebuild { ids, now } => obsolete = self.rebuild_preserving_prepared(ids, now),
            Edit::Resort => self.resort_prepared_entries_by_score_keeping_current_stable(),
        }
        // Identical photos share content-addressed files.
        let referenced = self.referenced_file_names();
        obsolete.retain(|name| !referenced.contains(name));
        Ok(Applied {
            manifest: self,
            obsolete_files: obsolete,
        })
    }
}

fn compare_prepared(a: &Entry, b: &Entry) -> Ordering {
    b.score_value()
        .total_cmp(&a.score_value())
        .then_with(|| b.prepared_at.cmp(&a.prepared_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn unique_ids(ids: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

/// Copy a prepared spec into `entry`. Returns the files it replaced.
fn mark_prepared(
    entry: &mut Entry,
    spec: &SmartPhotoSpec,
    score: &QualityScoreResult,
) -> Result<Vec<String>, ManifestError> {
    let spec = spec.normalised();
    if !spec.variants.is_complete()
        || spec.variants.iter().any(|(_, v)| v.render_file_name.is_empty())
    {
        return Err(ManifestError::IncompleteRenders(entry.id.clone()));
    }

    let old_auto: Vec<String> = entry
        .source_file_name
        .iter()
        .cloned()
        .chain(entry.renders.iter().map(|(_, n)| n.clone()))
        .collect();

    entry.renders = spec.variants.map(|_, v| v.render_file_name.clone());
    entry.auto_crops = spec.variants.map(|_, v| v.crop_rect);
    entry.source_file_name = Some(spec.master_file_name.clone());
    entry.prepared_at = Some(spec.prepared_at);
    entry.score = Some(score.score);
    entry.flags = merge_flags(&entry.flags, &score.flags);
    entry.flags.retain(|f| f != FAILED_FLAG);

    let kept = spec.all_file_names();
    Ok(obsolete_file_names(old_auto.iter().map(String::as_str), &kept))
}

/// Load a manifest from the store.
pub fn load_manifest(store: &dyn ByteStore, name: &str) -> Result<ShuffleManifest, ManifestError> {
    let bytes = store.read(name)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Save a manifest to the store as pretty JSON.
pub fn save_manifest(
    store: &dyn ByteStore,
    name: &str,
    manifest: &ShuffleManifest,
) -> Result<(), ManifestError> {
    let json = serde_json::to_vec_pretty(manifest)?;
    store.write(name, &json)?;
    Ok(())
}
