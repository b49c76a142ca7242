//! Asset sources: where pool candidates and their bytes come from.
//!
//! [`DirAssetSource`] serves a plain directory tree:
//!
//! ```text
//! library/
//! ├── Holidays/              # album "Holidays"
//! │   ├── beach.jpg          # asset id "Holidays/beach.jpg"
//! │   └── Screenshot 1.png   # is_screenshot
//! └── loose.jpg              # in no album, still found by date queries
//! ```
//!
//! Capture time is the file modification time.

use crate::candidates::Candidate;
use chrono::{DateTime, Datelike, Utc};
use log::debug;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Asset not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Asset source unavailable: {0}")]
    Unavailable(String),
}

/// Photo library capability.
pub trait AssetSource: Sync {
    /// Every image in an album, in source order.
    fn album_candidates(&self, album_id: &str) -> Result<Vec<Candidate>, SourceError>;

    /// Images captured in `[start, end)`.
    fn candidates_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, SourceError>;

    /// Year of the oldest capture, if the source knows it.
    fn earliest_capture_year(&self) -> Option<i32> {
        None
    }

    /// Raw image bytes.
    fn image_data(&self, asset_id: &str) -> Result<Vec<u8>, SourceError>;
}

/// Directory-backed source. Albums are subdirectories of the root.
pub struct DirAssetSource {
    root: PathBuf,
    extensions: &'static [&'static str],
}

impl DirAssetSource {
    /// `extensions` are lowercase and without the dot.
    pub fn new(root: impl Into<PathBuf>, extensions: &'static [&'static str]) -> Result<Self, SourceError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SourceError::Unavailable(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root, extensions })
    }

    fn is_image(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        self.extensions.contains(&ext.as_str())
    }

    /// Asset id for `path`: its path relative to the root, `/`-separated.
    fn asset_id(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    /// Resolve an id back to a path, refusing anything that leaves the root.
    fn path_for(&self, id: &str) -> Result<PathBuf, SourceError> {
        let rel = Path::new(id.trim());
        let confined = !rel.as_os_str().is_empty()
            && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !confined {
            return Err(SourceError::NotFound(id.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn scan(&self, dir: &Path) -> Vec<Candidate> {
        // Dot-directories (the default store among them) are not library content.
        let mut out: Vec<Candidate> = WalkDir::new(dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden_dir(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && self.is_image(e.path()))
            .filter_map(|e| self.candidate(e.path()))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        debug!("source: {} candidate(s) under {}", out.len(), dir.display());
        out
    }

    fn candidate(&self, path: &Path) -> Option<Candidate> {
        let id = self.asset_id(path)?;
        let meta = fs::metadata(path).ok()?;
        let created_at: DateTime<Utc> = meta.modified().ok()?.into();
        let (pixel_width, pixel_height) = match image::image_dimensions(path) {
            Ok(dims) => dims,
            Err(e) => {
                debug!("source: skipping {id}: {e}");
                return None;
            }
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        Some(Candidate {
            id,
            created_at,
            is_favourite: false,
            is_screenshot: name.starts_with("screenshot"),
            is_hidden: name.starts_with('.'),
            pixel_width,
            pixel_height,
        })
    }
}

fn is_hidden_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name().to_string_lossy().starts_with('.')
}

impl AssetSource for DirAssetSource {
    fn album_candidates(&self, album_id: &str) -> Result<Vec<Candidate>, SourceError> {
        let dir = self.path_for(album_id)?;
        if !dir.is_dir() {
            return Err(SourceError::NotFound(album_id.to_string()));
        }
        Ok(self.scan(&dir))
    }

    fn candidates_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, SourceError> {
        Ok(self
            .scan(&self.root)
            .into_iter()
            .filter(|c| c.created_at >= start && c.created_at < end)
            .collect())
    }

    fn earliest_capture_year(&self) -> Option<i32> {
        self.scan(&self.root)
            .iter()
            .map(|c| c.created_at.year())
            .min()
    }

    fn image_data(&self, asset_id: &str) -> Result<Vec<u8>, SourceError> {
        let path = self.path_for(asset_id)?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SourceError::NotFound(asset_id.to_string()),
            _ => SourceError::Io(e),
        })
    }
}
