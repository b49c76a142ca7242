//! Named blob storage shared by specs, manifests and renders.
//!
//! The core only ever deals in file names. A [`ByteStore`] maps those names
//! to bytes; [`DirStore`] keeps them in one flat directory and
//! [`MemoryStore`] keeps them in memory for tests and embedding.

use crate::types::sanitise_file_name;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid file name: {0:?}")]
    InvalidName(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Flat namespace of named blobs.
pub trait ByteStore: Sync {
    /// Durably store `bytes` under `name`, replacing any previous content.
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError>;

    fn read(&self, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Remove `name`. Missing names are [`StoreError::NotFound`].
    fn delete(&self, name: &str) -> Result<(), StoreError>;

    fn exists(&self, name: &str) -> bool;
}

fn checked_name(name: &str) -> Result<String, StoreError> {
    let clean = sanitise_file_name(name);
    if clean.is_empty() {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(clean)
}

/// Directory-backed store. Writes go to a temporary file first and are
/// renamed into place.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        Ok(self.root.join(checked_name(name)?))
    }
}

fn not_found_or_io(e: io::Error, name: &str) -> StoreError {
    if e.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound(name.to_string())
    } else {
        StoreError::Io(e)
    }
}

impl ByteStore for DirStore {
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        let tmp = path.with_file_name(format!(
            ".{}.tmp-{}",
            checked_name(name)?,
            std::process::id()
        ));
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(name)?;
        fs::read(&path).map_err(|e| not_found_or_io(e, name))
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        fs::remove_file(&path).map_err(|e| not_found_or_io(e, name))
    }

    fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_ok_and(|p| p.is_file())
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted names currently stored.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        // Every mutation is a single map call, so a poisoned map is still consistent.
        self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ByteStore for MemoryStore {
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let name = checked_name(name)?;
        self.lock().insert(name, bytes.to_vec());
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let key = checked_name(name)?;
        self.lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        let key = checked_name(name)?;
        self.lock()
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn exists(&self, name: &str) -> bool {
        checked_name(name).is_ok_and(|key| self.lock().contains_key(&key))
    }
}
