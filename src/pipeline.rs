//! Single-photo operations: prepare, re-crop, regenerate, manual override.
//!
//! ```text
//! bytes ──decode (≤3072)──▶ master ──▶ focus boxes ──▶ crop per size
//!                             │                            │
//!                             ▼                            ▼
//!                      encode master               render + encode
//!                             └──────── write all ─────────┘
//! ```
//!
//! Every render file is content-addressed (`smart-<label>-<sha256 prefix>.jpg`).
//! Operations that replace files return the old names separately; the
//! caller deletes them with [`Pipeline::discard`] only after persisting the
//! updated spec or manifest.

use crate::config::{RenderConfig, Settings};
use crate::cropper::crop_rects_for_targets;
use crate::focus::{FocusWeights, SubjectDetector, detect_focus_boxes};
use crate::geometry::{NormalisedRect, PixelSize, aspect};
use crate::imaging::{
    BackendError, EncodeParams, ImageCodec, RenderParams, encode_within_budget,
    normalised_quarter_turns, normalised_straighten_degrees, render_variant,
};
use crate::store::{ByteStore, StoreError};
use crate::types::{
    ALGORITHM_VERSION, PerSize, SizeClass, SmartPhotoSpec, SmartPhotoVariantSpec,
    obsolete_file_names,
};
use chrono::{DateTime, Utc};
use image::DynamicImage;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Image processing failed: {0}")]
    Imaging(#[from] BackendError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Missing dependent data: {0}")]
    MissingDependentData(String),
}

/// A manual edit of one variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariantEdit {
    pub crop_rect: NormalisedRect,
    pub straighten_degrees: Option<f64>,
    /// Clockwise quarter turns, any integer.
    pub quarter_turns: i32,
}

impl VariantEdit {
    pub fn crop(crop_rect: NormalisedRect) -> Self {
        Self {
            crop_rect,
            straighten_degrees: None,
            quarter_turns: 0,
        }
    }
}

/// A replaced value plus the store files it no longer references.
#[derive(Debug, Clone, PartialEq)]
pub struct Replaced<T> {
    pub value: T,
    pub obsolete_files: Vec<String>,
}

/// `smart-<label>-<first 16 hex chars of sha256>.jpg`
pub fn content_file_name(label: &str, bytes: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(bytes));
    format!("smart-{label}-{}.jpg", &digest[..16])
}

/// A file waiting to be written.
struct Pending {
    name: String,
    bytes: Vec<u8>,
}

pub struct Pipeline<'a> {
    codec: &'a dyn ImageCodec,
    store: &'a dyn ByteStore,
    detector: &'a dyn SubjectDetector,
    render: RenderConfig,
    weights: FocusWeights,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        codec: &'a dyn ImageCodec,
        store: &'a dyn ByteStore,
        detector: &'a dyn SubjectDetector,
        settings: &Settings,
    ) -> Self {
        Self {
            codec,
            store,
            detector,
            render: settings.render.clone(),
            weights: settings.focus,
        }
    }

    /// Full preparation from source bytes.
    ///
    /// Detector failures degrade to centred crops; decode, encode and store
    /// failures are returned. On a failed write, files this call created are
    /// removed again.
    pub fn prepare(
        &self,
        image_bytes: &[u8],
        now: DateTime<Utc>,
    ) -> Result<SmartPhotoSpec, PipelineError> {
        let master = self
            .codec
            .decode(image_bytes, Some(self.render.master_long_edge))?;
        let encoded = self.encode(&master, &self.render.master_encode_params())?;
        let master_name = content_file_name("master", &encoded);

        let (variants, mut pending) = self.auto_variants(&master)?;
        pending.insert(
            0,
            Pending {
                name: master_name.clone(),
                bytes: encoded,
            },
        );
        self.write_all(&pending)?;

        debug!(
            "prepared {}x{} master as {master_name} with {} render(s)",
            master.width(),
            master.height(),
            pending.len() - 1
        );
        Ok(SmartPhotoSpec {
            algorithm_version: ALGORITHM_VERSION,
            prepared_at: now,
            master_file_name: master_name,
            variants,
        })
    }

    /// Re-run automatic framing from the stored master, replacing
    /// `prepared_at` and every variant.
    pub fn regenerate(
        &self,
        spec: Option<&SmartPhotoSpec>,
        now: DateTime<Utc>,
    ) -> Result<Replaced<SmartPhotoSpec>, PipelineError> {
        let spec = spec.ok_or_else(|| missing("no prepared photo to regenerate"))?;
        let master = self.load_master(&spec.master_file_name)?;

        let (variants, pending) = self.auto_variants(&master)?;
        self.write_all(&pending)?;

        let value = SmartPhotoSpec {
            algorithm_version: ALGORITHM_VERSION,
            prepared_at: now,
            master_file_name: spec.master_file_name.clone(),
            variants,
        };
        let old: Vec<&str> = spec
            .variants
            .iter()
            .map(|(_, v)| v.render_file_name.as_str())
            .collect();
        let obsolete_files = obsolete_file_names(old, &value.all_file_names());
        Ok(Replaced {
            value,
            obsolete_files,
        })
    }

    /// Re-render one variant with a manual crop, straighten and turn.
    ///
    /// The crop is locked to the variant's aspect and its pixel size is kept.
    pub fn recrop(
        &self,
        spec: Option<&SmartPhotoSpec>,
        size: SizeClass,
        edit: &VariantEdit,
    ) -> Result<Replaced<SmartPhotoSpec>, PipelineError> {
        let spec = spec.ok_or_else(|| missing("no prepared photo to re-crop"))?;
        let current = spec
            .variant(size)
            .ok_or_else(|| missing(&format!("prepared photo has no {size} variant")))?;
        let master = self.load_master(&spec.master_file_name)?;

        let (variant, file) = self.render_edit(&master, size, current.pixel_size, edit)?;
        self.write_all(std::slice::from_ref(&file))?;

        let mut value = spec.clone();
        value.variants.set(size, Some(variant));
        let obsolete_files =
            obsolete_file_names([current.render_file_name.as_str()], &value.all_file_names());
        Ok(Replaced {
            value,
            obsolete_files,
        })
    }

    /// Render a manual per-size override for a shuffle entry from its
    /// stored master.
    pub fn render_manual_override(
        &self,
        master_file_name: &str,
        size: SizeClass,
        edit: &VariantEdit,
    ) -> Result<SmartPhotoVariantSpec, PipelineError> {
        let master = self.load_master(master_file_name)?;
        let target = self.render.targets.get(size);
        let (variant, file) = self.render_edit(&master, size, target, edit)?;
        self.write_all(std::slice::from_ref(&file))?;
        Ok(variant)
    }

    /// Delete files; names that are already gone are ignored.
    pub fn discard(&self, names: &[String]) -> Result<(), PipelineError> {
        for name in names {
            match self.store.delete(name) {
                Ok(()) => debug!("discarded {name}"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn encode(&self, image: &DynamicImage, params: &EncodeParams) -> Result<Vec<u8>, BackendError> {
        Ok(encode_within_budget(self.codec, image, params)?.bytes)
    }

    fn load_master(&self, name: &str) -> Result<DynamicImage, PipelineError> {
        let bytes = self.store.read(name).map_err(|e| {
            if e.is_not_found() {
                missing(&format!("master file {name} is missing"))
            } else {
                e.into()
            }
        })?;
        Ok(self.codec.decode(&bytes, None)?)
    }

    fn auto_variants(
        &self,
        master: &DynamicImage,
    ) -> Result<(PerSize<SmartPhotoVariantSpec>, Vec<Pending>), PipelineError> {
        let boxes = match detect_focus_boxes(
            self.detector,
            master,
            self.render.analysis_long_edge,
            &self.weights,
        ) {
            Ok(boxes) => boxes,
            Err(e) => {
                warn!("subject detection failed, using centred crops: {e}");
                Vec::new()
            }
        };

        let image_aspect = aspect(i64::from(master.width()), i64::from(master.height()));
        let mut variants = PerSize::default();
        let mut pending = Vec::new();
        for (size, crop_rect) in crop_rects_for_targets(&self.render.targets, image_aspect, &boxes) {
            let target = self.render.targets.get(size);
            let rendered = render_variant(master, &RenderParams::new(crop_rect, target));
            let bytes = self.encode(&rendered, &self.render.encode_params(size))?;
            let name = content_file_name(size.name(), &bytes);
            variants.set(
                size,
                Some(SmartPhotoVariantSpec {
                    render_file_name: name.clone(),
                    crop_rect,
                    pixel_size: target,
                    straighten_degrees: None,
                    rotation_quarter_turns: 0,
                }),
            );
            pending.push(Pending { name, bytes });
        }
        Ok((variants, pending))
    }

    fn render_edit(
        &self,
        master: &DynamicImage,
        size: SizeClass,
        pixel_size: PixelSize,
        edit: &VariantEdit,
    ) -> Result<(SmartPhotoVariantSpec, Pending), PipelineError> {
        let pixel_size = pixel_size.normalised();
        let quarter_turns = normalised_quarter_turns(edit.quarter_turns);
        let straighten_degrees = normalised_straighten_degrees(edit.straighten_degrees);

        let (w, h) = (i64::from(master.width()), i64::from(master.height()));
        let turned_aspect = if quarter_turns % 2 == 1 {
            aspect(h, w)
        } else {
            aspect(w, h)
        };
        let crop_rect = edit
            .crop_rect
            .normalised()
            .locked_to_aspect(pixel_size.aspect() / turned_aspect);

        let params = RenderParams {
            crop_rect,
            straighten_degrees,
            quarter_turns,
            target: pixel_size,
        };
        let rendered = render_variant(master, &params);
        let bytes = self.encode(&rendered, &self.render.encode_params(size))?;
        let name = content_file_name(&format!("{}-manual", size.name()), &bytes);
        Ok((
            SmartPhotoVariantSpec {
                render_file_name: name.clone(),
                crop_rect,
                pixel_size,
                straighten_degrees,
                rotation_quarter_turns: quarter_turns,
            },
            Pending { name, bytes },
        ))
    }

    /// Write every file; on failure remove the ones this call created.
    fn write_all(&self, files: &[Pending]) -> Result<(), PipelineError> {
        let mut created: Vec<String> = Vec::new();
        for file in files {
            let existed = self.store.exists(&file.name);
            if let Err(e) = self.store.write(&file.name, &file.bytes) {
                if let Err(cleanup) = self.discard(&created) {
                    warn!("could not remove partial output: {cleanup}");
                }
                return Err(e.into());
            }
            if !existed {
                created.push(file.name.clone());
            }
        }
        Ok(())
    }
}

fn missing(what: &str) -> PipelineError {
    PipelineError::MissingDependentData(what.to_string())
}

/// Load a spec JSON from the store.
pub fn load_spec(store: &dyn ByteStore, name: &str) -> Result<SmartPhotoSpec, PipelineError> {
    let bytes = store.read(name)?;
    let spec: SmartPhotoSpec = serde_json::from_slice(&bytes)?;
    Ok(spec.normalised())
}

/// Save a spec to the store as pretty JSON.
pub fn save_spec(store: &dyn ByteStore, name: &str, spec: &SmartPhotoSpec) -> Result<(), PipelineError> {
    store.write(name, &serde_json::to_vec_pretty(spec)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::focus::tests::ScriptedDetector;
    use crate::focus::{Detection, FocusKind, NoDetector};
    use crate::imaging::backend::tests::{MockCodec, RecordedOp};
    use crate::store::MemoryStore;
    use crate::test_helpers::{at, gradient_image};
    use std::sync::Mutex;

    fn settings() -> Settings {
        Settings::default()
    }

    fn codec() -> MockCodec {
        MockCodec::with_image(gradient_image(600, 400))
    }

    /// Store whose writes fail after the first `fail_after`.
    struct FlakyStore {
        inner: MemoryStore,
        fail_after: usize,
        writes: Mutex<usize>,
    }

    impl FlakyStore {
        fn failing_after(fail_after: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_after,
                writes: Mutex::new(0),
            }
        }
    }

    impl ByteStore for FlakyStore {
        fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
            let mut writes = self.writes.lock().unwrap();
            *writes += 1;
            if *writes > self.fail_after {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.inner.write(name, bytes)
        }
        fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
            self.inner.read(name)
        }
        fn delete(&self, name: &str) -> Result<(), StoreError> {
            self.inner.delete(name)
        }
        fn exists(&self, name: &str) -> bool {
            self.inner.exists(name)
        }
    }

    // =========================================================================
    // prepare
    // =========================================================================

    #[test]
    fn prepare_writes_master_and_three_renders() {
        let codec = codec();
        let store = MemoryStore::new();
        let s = settings();
        let spec = Pipeline::new(&codec, &store, &NoDetector, &s)
            .prepare(b"source", at(2024, 5, 1, 8, 0))
            .unwrap();

        assert_eq!(spec.algorithm_version, ALGORITHM_VERSION);
        assert_eq!(spec.prepared_at, at(2024, 5, 1, 8, 0));
        assert!(spec.variants.is_complete());
        assert!(spec.master_file_name.starts_with("smart-master-"));
        let mut names = spec.all_file_names();
        names.sort();
        assert_eq!(store.names(), names);

        for size in SizeClass::ALL {
            let v = spec.variant(size).unwrap();
            assert_eq!(v.pixel_size, s.render.targets.get(size));
            assert!(v.render_file_name.starts_with(&format!("smart-{size}-")));
            assert!(v.crop_rect.is_inside_unit());
        }
    }

    #[test]
    fn prepare_decodes_master_capped() {
        let codec = codec();
        let store = MemoryStore::new();
        Pipeline::new(&codec, &store, &NoDetector, &settings())
            .prepare(b"abc", at(2024, 1, 1, 0, 0))
            .unwrap();
        assert_eq!(
            codec.get_operations()[0],
            RecordedOp::Decode {
                len: 3,
                max_dimension: Some(3072)
            }
        );
        // Master encoded first at its own start quality.
        assert_eq!(codec.encoded_qualities()[0], 88);
        assert_eq!(codec.encoded_qualities()[1], 85);
    }

    #[test]
    fn prepare_follows_subject() {
        let codec = codec();
        let store = MemoryStore::new();
        let subject = NormalisedRect::new(0.05, 0.1, 0.15, 0.2);
        let detector = ScriptedDetector::top_left(vec![Detection::new(FocusKind::Face, subject)]);
        let spec = Pipeline::new(&codec, &store, &detector, &settings())
            .prepare(b"x", at(2024, 1, 1, 0, 0))
            .unwrap();
        let small = spec.variant(SizeClass::Small).unwrap().crop_rect;
        assert!(small.x <= subject.x && small.max_x() >= subject.max_x());
        assert!(small.mid_x() < 0.5);
    }

    #[test]
    fn detector_failure_falls_back_to_centred_crop() {
        let codec = codec();
        let store = MemoryStore::new();
        let spec = Pipeline::new(&codec, &store, &ScriptedDetector::failing(), &settings())
            .prepare(b"x", at(2024, 1, 1, 0, 0))
            .unwrap();
        let small = spec.variant(SizeClass::Small).unwrap().crop_rect;
        assert_eq!(small, crate::cropper::centred_aspect_crop(1.0, 1.5));
    }

    #[test]
    fn decode_failure_is_surfaced() {
        let codec = MockCodec::undecodable();
        let store = MemoryStore::new();
        let err = Pipeline::new(&codec, &store, &NoDetector, &settings())
            .prepare(b"junk", at(2024, 1, 1, 0, 0))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Imaging(BackendError::Decode(_))));
        assert!(store.names().is_empty());
    }

    #[test]
    fn encode_failure_writes_nothing() {
        let mut codec = codec();
        codec.fail_encode = true;
        let store = MemoryStore::new();
        let err = Pipeline::new(&codec, &store, &NoDetector, &settings())
            .prepare(b"x", at(2024, 1, 1, 0, 0))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Imaging(BackendError::Encode(_))));
        assert!(store.names().is_empty());
    }

    #[test]
    fn failed_write_rolls_back_created_files() {
        let codec = codec();
        let store = FlakyStore::failing_after(2);
        let err = Pipeline::new(&codec, &store, &NoDetector, &settings())
            .prepare(b"x", at(2024, 1, 1, 0, 0))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Store(_)));
        assert!(store.inner.names().is_empty());
    }

    // =========================================================================
    // recrop / regenerate / overrides
    // =========================================================================

    fn prepared(store: &MemoryStore, codec: &MockCodec) -> SmartPhotoSpec {
        Pipeline::new(codec, store, &NoDetector, &settings())
            .prepare(b"x", at(2024, 1, 1, 0, 0))
            .unwrap()
    }

    #[test]
    fn recrop_replaces_one_variant() {
        let codec = codec();
        let store = MemoryStore::new();
        let spec = prepared(&store, &codec);
        let pipeline = Pipeline::new(&codec, &store, &NoDetector, &settings());

        let edit = VariantEdit {
            crop_rect: NormalisedRect::new(0.1, 0.1, 0.4, 0.9),
            straighten_degrees: Some(3.0),
            quarter_turns: 0,
        };
        let out = pipeline.recrop(Some(&spec), SizeClass::Medium, &edit).unwrap();
        let old = spec.variant(SizeClass::Medium).unwrap();
        let new = out.value.variant(SizeClass::Medium).unwrap();

        assert_eq!(new.pixel_size, old.pixel_size);
        assert_eq!(new.straighten_degrees, Some(3.0));
        assert!(new.render_file_name.starts_with("smart-medium-manual-"));
        // Locked to the 1092x510 aspect on a 3:2 image.
        let rendered_aspect = new.crop_rect.width * 1.5 / new.crop_rect.height;
        assert!((rendered_aspect - old.pixel_size.aspect()).abs() < 1e-6);
        assert_eq!(out.obsolete_files, vec![old.render_file_name.clone()]);
        assert_eq!(out.value.variant(SizeClass::Small), spec.variant(SizeClass::Small));
        assert!(store.exists(&new.render_file_name));
        // Old render is still there until the caller discards it.
        assert!(store.exists(&old.render_file_name));

        pipeline.discard(&out.obsolete_files).unwrap();
        assert!(!store.exists(&old.render_file_name));
    }

    #[test]
    fn recrop_with_quarter_turn_uses_turned_aspect() {
        let codec = codec();
        let store = MemoryStore::new();
        let spec = prepared(&store, &codec);
        let pipeline = Pipeline::new(&codec, &store, &NoDetector, &settings());
        let edit = VariantEdit {
            quarter_turns: -3,
            ..VariantEdit::crop(NormalisedRect::FULL)
        };
        let out = pipeline.recrop(Some(&spec), SizeClass::Small, &edit).unwrap();
        let v = out.value.variant(SizeClass::Small).unwrap();
        assert_eq!(v.rotation_quarter_turns, 1);
        // Turned image is 2:3; a square crop is full width, two thirds height.
        assert!((v.crop_rect.width - 1.0).abs() < 1e-9);
        assert!((v.crop_rect.height - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn recrop_needs_spec_variant_and_master() {
        let codec = codec();
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(&codec, &store, &NoDetector, &settings());
        let edit = VariantEdit::crop(NormalisedRect::FULL);

        assert!(matches!(
            pipeline.recrop(None, SizeClass::Small, &edit),
            Err(PipelineError::MissingDependentData(_))
        ));

        let mut spec = prepared(&store, &codec);
        spec.variants.take(SizeClass::Large);
        assert!(matches!(
            pipeline.recrop(Some(&spec), SizeClass::Large, &edit),
            Err(PipelineError::MissingDependentData(_))
        ));

        store.delete(&spec.master_file_name).unwrap();
        assert!(matches!(
            pipeline.recrop(Some(&spec), SizeClass::Small, &edit),
            Err(PipelineError::MissingDependentData(_))
        ));
    }

    #[test]
    fn regenerate_keeps_master_and_replaces_variants() {
        let codec = codec();
        let store = MemoryStore::new();
        let spec = prepared(&store, &codec);
        let detector = ScriptedDetector::top_left(vec![Detection::new(
            FocusKind::Face,
            NormalisedRect::new(0.7, 0.1, 0.1, 0.1),
        )]);
        let out = Pipeline::new(&codec, &store, &detector, &settings())
            .regenerate(Some(&spec), at(2024, 2, 1, 0, 0))
            .unwrap();
        assert_eq!(out.value.master_file_name, spec.master_file_name);
        assert_eq!(out.value.prepared_at, at(2024, 2, 1, 0, 0));
        assert!(!out.obsolete_files.contains(&spec.master_file_name));
        assert!(out
            .obsolete_files
            .contains(&spec.variant(SizeClass::Small).unwrap().render_file_name));
        for name in out.value.all_file_names() {
            assert!(store.exists(&name), "{name}");
        }
    }

    #[test]
    fn regenerate_without_spec_is_missing_data() {
        let codec = codec();
        let store = MemoryStore::new();
        assert!(matches!(
            Pipeline::new(&codec, &store, &NoDetector, &settings())
                .regenerate(None, at(2024, 1, 1, 0, 0)),
            Err(PipelineError::MissingDependentData(_))
        ));
    }

    #[test]
    fn manual_override_renders_at_target_size() {
        let codec = codec();
        let store = MemoryStore::new();
        let spec = prepared(&store, &codec);
        let s = settings();
        let variant = Pipeline::new(&codec, &store, &NoDetector, &s)
            .render_manual_override(
                &spec.master_file_name,
                SizeClass::Large,
                &VariantEdit::crop(NormalisedRect::new(0.2, 0.2, 0.3, 0.3)),
            )
            .unwrap();
        assert_eq!(variant.pixel_size, s.render.targets.large);
        assert!(store.exists(&variant.render_file_name));
    }

    #[test]
    fn discard_ignores_missing_files() {
        let codec = codec();
        let store = MemoryStore::new();
        store.write("a.jpg", b"x").unwrap();
        Pipeline::new(&codec, &store, &NoDetector, &settings())
            .discard(&["a.jpg".to_string(), "gone.jpg".to_string()])
            .unwrap();
        assert!(store.names().is_empty());
    }

    // =========================================================================
    // Spec persistence
    // =========================================================================

    #[test]
    fn spec_save_and_load() {
        let codec = codec();
        let store = MemoryStore::new();
        let spec = prepared(&store, &codec);
        save_spec(&store, "photo.json", &spec).unwrap();
        assert_eq!(load_spec(&store, "photo.json").unwrap(), spec);
        assert!(matches!(
            load_spec(&store, "nope.json"),
            Err(PipelineError::Store(e)) if e.is_not_found()
        ));
    }

    #[test]
    fn content_names_are_stable() {
        assert_eq!(content_file_name("small", b"abc"), content_file_name("small", b"abc"));
        assert_ne!(content_file_name("small", b"abc"), content_file_name("small", b"abd"));
        assert_eq!(content_file_name("large", b"abc").len(), "smart-large-.jpg".len() + 16);
    }
}
