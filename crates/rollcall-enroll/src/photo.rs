//! Photo blob storage boundary.
//!
//! Submitted photos land in a staging namespace, unattributed to any
//! identity. On approval they are relocated into the identity's permanent
//! namespace; on rejection they are purged. Refs are opaque relative
//! paths like `staging/<uuid>.jpg` or `people/<identity>/<uuid>.jpg`.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Namespace for photos not yet attributed to an identity.
pub const STAGING_NAMESPACE: &str = "staging";

#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("photo io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid photo ref: {0}")]
    InvalidRef(String),
    #[error("photo not found: {0}")]
    NotFound(String),
}

pub trait PhotoStore {
    /// Park bytes in the staging namespace, returning their ref.
    fn stage(&self, bytes: &[u8]) -> Result<String, PhotoError>;
    /// Read back the bytes behind a ref.
    fn load(&self, photo_ref: &str) -> Result<Vec<u8>, PhotoError>;
    /// Move a photo into another namespace, returning the new ref. The
    /// old ref is invalid afterwards.
    fn relocate(&self, photo_ref: &str, namespace: &str) -> Result<String, PhotoError>;
    /// Remove a photo. Deleting a missing ref is not an error.
    fn delete(&self, photo_ref: &str) -> Result<(), PhotoError>;
}

/// Filesystem-backed photo store rooted at one directory, one
/// subdirectory per namespace.
pub struct FsPhotoStore {
    root: PathBuf,
}

impl FsPhotoStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Reject refs that are absolute or climb out of the root.
    fn resolve(&self, photo_ref: &str) -> Result<PathBuf, PhotoError> {
        let rel = Path::new(photo_ref);
        let safe = rel.components().all(|c| matches!(c, Component::Normal(_)));
        if photo_ref.is_empty() || !safe {
            return Err(PhotoError::InvalidRef(photo_ref.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

impl PhotoStore for FsPhotoStore {
    fn stage(&self, bytes: &[u8]) -> Result<String, PhotoError> {
        let photo_ref = format!("{STAGING_NAMESPACE}/{}.jpg", Uuid::new_v4());
        let path = self.resolve(&photo_ref)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        tracing::debug!(photo_ref, bytes = bytes.len(), "photo staged");
        Ok(photo_ref)
    }

    fn load(&self, photo_ref: &str) -> Result<Vec<u8>, PhotoError> {
        let path = self.resolve(photo_ref)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PhotoError::NotFound(photo_ref.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn relocate(&self, photo_ref: &str, namespace: &str) -> Result<String, PhotoError> {
        let from = self.resolve(photo_ref)?;
        let file_name = from
            .file_name()
            .ok_or_else(|| PhotoError::InvalidRef(photo_ref.to_string()))?
            .to_string_lossy()
            .into_owned();
        let new_ref = format!("{namespace}/{file_name}");
        let to = self.resolve(&new_ref)?;
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&from, &to)?;
        tracing::debug!(from = photo_ref, to = %new_ref, "photo relocated");
        Ok(new_ref)
    }

    fn delete(&self, photo_ref: &str) -> Result<(), PhotoError> {
        let path = self.resolve(photo_ref)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory photo store for tests.
#[derive(Default)]
pub struct MemoryPhotoStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryPhotoStore {
    pub fn contains(&self, photo_ref: &str) -> bool {
        self.files.lock().expect("photo store lock poisoned").contains_key(photo_ref)
    }

    pub fn refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.files.lock().expect("photo store lock poisoned").keys().cloned().collect();
        refs.sort();
        refs
    }

    pub fn len(&self) -> usize {
        self.files.lock().expect("photo store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PhotoStore for MemoryPhotoStore {
    fn stage(&self, bytes: &[u8]) -> Result<String, PhotoError> {
        let photo_ref = format!("{STAGING_NAMESPACE}/{}.jpg", Uuid::new_v4());
        self.files
            .lock()
            .expect("photo store lock poisoned")
            .insert(photo_ref.clone(), bytes.to_vec());
        Ok(photo_ref)
    }

    fn load(&self, photo_ref: &str) -> Result<Vec<u8>, PhotoError> {
        self.files
            .lock()
            .expect("photo store lock poisoned")
            .get(photo_ref)
            .cloned()
            .ok_or_else(|| PhotoError::NotFound(photo_ref.to_string()))
    }

    fn relocate(&self, photo_ref: &str, namespace: &str) -> Result<String, PhotoError> {
        let mut files = self.files.lock().expect("photo store lock poisoned");
        let bytes = files
            .remove(photo_ref)
            .ok_or_else(|| PhotoError::NotFound(photo_ref.to_string()))?;
        let file_name = photo_ref.rsplit('/').next().unwrap_or(photo_ref);
        let new_ref = format!("{namespace}/{file_name}");
        files.insert(new_ref.clone(), bytes);
        Ok(new_ref)
    }

    fn delete(&self, photo_ref: &str) -> Result<(), PhotoError> {
        self.files.lock().expect("photo store lock poisoned").remove(photo_ref);
        Ok(())
    }
}
