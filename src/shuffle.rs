//! Shuffle engine: builds pool manifests and prepares their entries.
//!
//! ```text
//! AssetSource ──candidates──▶ rules / ordering / thinning ──▶ ShuffleManifest
//!                                                                  │
//!      ┌────────────────────── prepare_next_batch ─────────────────┘
//!      ▼
//! image_data ──▶ Pipeline::prepare ──▶ QualityScorer ──▶ Edit::MarkPrepared
//! ```
//!
//! Entries of one manifest are prepared strictly in order. Independent
//! manifests can be prepared in parallel with [`ShuffleEngine::prepare_many`].
//! A failing entry is flagged and skipped; the rest of the batch continues.

use crate::candidates::{
    MemoriesMode, clamp_per_year, interleave_buckets, order_for_album, sort_for_memories,
    thin_for_anti_repeat,
};
use crate::config::Settings;
use crate::focus::SubjectDetector;
use crate::imaging::ImageCodec;
use crate::manifest::{Applied, Edit, ManifestError, ShuffleManifest};
use crate::pipeline::{Pipeline, PipelineError};
use crate::scorer::{QualityScoreResult, QualityScorer};
use crate::source::{AssetSource, SourceError};
use crate::store::ByteStore;
use crate::types::SmartPhotoSpec;
use chrono::{DateTime, Datelike, Utc};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Upper bound on entries prepared per batch pass.
pub const MAX_BATCH_SIZE: usize = 50;

const ALBUM_PREFIX: &str = "album:";

#[derive(Error, Debug)]
pub enum ShuffleError {
    #[error("No candidates: {0}")]
    NoCandidates(String),
    #[error("Not an album pool: {0}")]
    NotAnAlbum(String),
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
}

/// What one batch pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub prepared_now: Vec<String>,
    pub failed_now: Vec<String>,
    /// Whether the returned manifest differs from the input.
    pub changed: bool,
    pub cancelled: bool,
    /// Store files no longer referenced. Delete only after saving the
    /// manifest.
    pub obsolete_files: Vec<String>,
}

pub struct ShuffleEngine<'a> {
    source: &'a dyn AssetSource,
    pipeline: Pipeline<'a>,
    scorer: QualityScorer<'a>,
    settings: &'a Settings,
}

impl<'a> ShuffleEngine<'a> {
    pub fn new(
        source: &'a dyn AssetSource,
        codec: &'a dyn ImageCodec,
        store: &'a dyn ByteStore,
        detector: &'a dyn SubjectDetector,
        settings: &'a Settings,
    ) -> Self {
        Self {
            source,
            pipeline: Pipeline::new(codec, store, detector, settings),
            scorer: QualityScorer::new(codec, detector, &settings.scoring),
            settings,
        }
    }

    pub fn pipeline(&self) -> &Pipeline<'a> {
        &self.pipeline
    }

    // =========================================================================
    // Pool construction
    // =========================================================================

    /// Ids of an album's admitted photos, in the configured order.
    fn album_ids(&self, album_id: &str) -> Result<Vec<String>, ShuffleError> {
        let rules = self.settings.shuffle.rules.normalised();
        let admitted = rules.filter(self.source.album_candidates(album_id)?);
        let ids: Vec<String> = order_for_album(admitted, rules.sort_order)
            .into_iter()
            .map(|c| c.id)
            .collect();
        if ids.is_empty() {
            return Err(ShuffleError::NoCandidates(format!("album {album_id}")));
        }
        Ok(ids)
    }

    pub fn build_album_manifest(
        &self,
        album_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ShuffleManifest, ShuffleError> {
        let ids = self.album_ids(album_id)?;
        info!("album {album_id}: {} photo(s) in pool", ids.len());
        Ok(ShuffleManifest::new(
            format!("{ALBUM_PREFIX}{album_id}"),
            ids,
            self.settings.shuffle.rotation_minutes,
            now,
        ))
    }

    /// Re-query the album and rebuild, keeping prepared entries that recur.
    pub fn rebuild_album_manifest(
        &self,
        manifest: ShuffleManifest,
        now: DateTime<Utc>,
    ) -> Result<Applied, ShuffleError> {
        let album_id = manifest
            .source_id
            .strip_prefix(ALBUM_PREFIX)
            .ok_or_else(|| ShuffleError::NotAnAlbum(manifest.source_id.clone()))?
            .to_string();
        let ids = self.album_ids(&album_id)?;
        Ok(manifest.apply(Edit::Rebuild { ids, now })?)
    }

    /// Photos taken on this day (or week) in past years, newest year first,
    /// interleaved across years.
    pub fn build_memories_manifest(
        &self,
        mode: MemoriesMode,
        now: DateTime<Utc>,
    ) -> Result<ShuffleManifest, ShuffleError> {
        let limits = &self.settings.shuffle.memories;
        let rules = self.settings.shuffle.rules.normalised();
        let per_year = clamp_per_year(limits.per_year_limit);

        let current = now.year();
        let years_back = i32::try_from(limits.years_back.clamp(1, 50)).unwrap_or(50);
        let oldest = match self.source.earliest_capture_year() {
            Some(earliest) => (current - years_back).max(earliest),
            None => current - years_back,
        };

        let mut buckets: Vec<Vec<String>> = Vec::new();
        for year in (oldest..=current).rev() {
            let Some((start, end)) = mode.date_window(year, now) else {
                debug!("memories: {year} has no {}", now.format("%m-%d"));
                continue;
            };
            let mut found = rules.filter(self.source.candidates_between(start, end)?);
            sort_for_memories(&mut found);
            found.truncate(per_year);
            let kept = thin_for_anti_repeat(&found, mode, per_year);
            debug!("memories: {year}: {} found, {} kept", found.len(), kept.len());
            if !kept.is_empty() {
                buckets.push(kept.into_iter().map(|c| c.id).collect());
            }
        }

        let ids = interleave_buckets(&buckets, limits.max_entries.clamp(1, 2000));
        if ids.is_empty() {
            return Err(ShuffleError::NoCandidates(mode.source_id(now)));
        }
        info!(
            "memories {mode}: {} photo(s) from {} year(s)",
            ids.len(),
            buckets.len()
        );
        Ok(ShuffleManifest::new(
            mode.source_id(now),
            ids,
            limits.rotation_minutes,
            now,
        ))
    }

    // =========================================================================
    // Batch preparation
    // =========================================================================

    fn prepare_entry(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<(SmartPhotoSpec, QualityScoreResult), ShuffleError> {
        let bytes = self.source.image_data(id)?;
        let spec = self.pipeline.prepare(&bytes, now)?;
        let score = self.scorer.score(id, &bytes, Some(&spec));
        Ok((spec, score))
    }

    /// Prepare up to `batch_size` pending entries.
    ///
    /// Never fails as a whole: each entry either becomes prepared or is
    /// flagged failed. `cancel` is checked before every entry, so a
    /// cancelled pass still returns a consistent manifest.
    pub fn prepare_next_batch(
        &self,
        manifest: ShuffleManifest,
        batch_size: usize,
        now: DateTime<Utc>,
        cancel: Option<&AtomicBool>,
    ) -> (ShuffleManifest, BatchOutcome) {
        let mut manifest = manifest;
        let mut outcome = BatchOutcome {
            changed: manifest.catch_up_rotation(now),
            ..BatchOutcome::default()
        };
        let wanted = batch_size.min(MAX_BATCH_SIZE);

        let pending: Vec<String> = manifest
            .entries
            .iter()
            .filter(|e| !e.is_prepared() && !e.is_failed())
            .map(|e| e.id.clone())
            .collect();

        for id in pending {
            if outcome.prepared_now.len() >= wanted {
                break;
            }
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                outcome.cancelled = true;
                break;
            }

            let applied = self.prepare_entry(&id, now).and_then(|(spec, score)| {
                let written = spec.all_file_names();
                manifest
                    .clone()
                    .apply(Edit::MarkPrepared {
                        id: id.clone(),
                        spec,
                        score,
                    })
                    .map_err(|e| {
                        self.discard_unreferenced(&manifest, &written);
                        ShuffleError::from(e)
                    })
            });

            match applied {
                Ok(applied) => {
                    manifest = applied.manifest;
                    outcome.obsolete_files.extend(applied.obsolete_files);
                    outcome.prepared_now.push(id);
                }
                Err(e) => {
                    warn!("{}: failed to prepare {id}: {e}", manifest.source_id);
                    // The id came from this manifest, so the edit cannot miss.
                    if let Ok(applied) = manifest.clone().apply(Edit::MarkFailed { id: id.clone() }) {
                        manifest = applied.manifest;
                    }
                    outcome.failed_now.push(id);
                }
            }
        }

        if !outcome.prepared_now.is_empty() || !outcome.failed_now.is_empty() {
            manifest.resort_prepared_entries_by_score_keeping_current_stable();
            outcome.changed = true;
        }
        info!(
            "{}: prepared {}, failed {}{}",
            manifest.source_id,
            outcome.prepared_now.len(),
            outcome.failed_now.len(),
            if outcome.cancelled { " (cancelled)" } else { "" }
        );
        (manifest, outcome)
    }

    /// Batch-prepare independent manifests in parallel, using the
    /// configured batch size.
    pub fn prepare_many(
        &self,
        manifests: Vec<ShuffleManifest>,
        now: DateTime<Utc>,
        cancel: Option<&AtomicBool>,
    ) -> Vec<(ShuffleManifest, BatchOutcome)> {
        let batch_size = self.settings.shuffle.batch_size;
        manifests
            .into_par_iter()
            .map(|m| self.prepare_next_batch(m, batch_size, now, cancel))
            .collect()
    }

    /// Remove freshly written files that the manifest does not reference.
    fn discard_unreferenced(&self, manifest: &ShuffleManifest, written: &[String]) {
        let referenced = manifest.referenced_file_names();
        let orphans: Vec<String> = written
            .iter()
            .filter(|n| !referenced.contains(*n))
            .cloned()
            .collect();
        if let Err(e) = self.pipeline.discard(&orphans) {
            warn!("could not remove orphaned renders: {e}");
        }
    }
}
