//! Local filesystem storage backend
//!
//! Files live under a configured base path. Writes go through a temp file
//! in the same directory followed by a rename, so a crashed or cancelled
//! upload never leaves a half-written document behind.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Capabilities, StorageError};

/// Local filesystem backend
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn node(&self, path: &str) -> LocalNode {
        LocalNode {
            base_path: self.base_path.clone(),
            rel_path: path.trim_start_matches('/').to_string(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            read: true,
            write: true,
            delete: true,
            versioning: false,
            version_listing: false,
            version_access: false,
            presigned_urls: false,
        }
    }
}

/// Handle to a single file under a local storage root
pub struct LocalNode {
    base_path: PathBuf,
    rel_path: String,
}

impl LocalNode {
    pub fn basename(&self) -> String {
        Path::new(&self.rel_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn capabilities(&self) -> Capabilities {
        LocalStorage::new(&self.base_path).capabilities()
    }

    /// Absolute path of this node, rejecting traversal outside the root
    fn resolve(&self) -> Result<PathBuf, StorageError> {
        let rel = Path::new(&self.rel_path);
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(StorageError::InvalidPath(self.rel_path.clone())),
            }
        }
        if self.rel_path.is_empty() {
            return Err(StorageError::InvalidPath(self.rel_path.clone()));
        }
        Ok(self.base_path.join(rel))
    }

    pub async fn exists(&self) -> Result<bool, StorageError> {
        let path = self.resolve()?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    pub async fn size(&self) -> Result<u64, StorageError> {
        let path = self.resolve()?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.map_not_found(e))?;
        Ok(meta.len())
    }

    pub async fn mtime(&self) -> Result<DateTime<Utc>, StorageError> {
        let path = self.resolve()?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.map_not_found(e))?;
        let modified = meta.modified()?;
        Ok(DateTime::<Utc>::from(modified))
    }

    pub async fn read_bytes(&self) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve()?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| self.map_not_found(e))
    }

    /// Atomic replace: write a sibling temp file, then rename over the
    /// target.
    pub async fn write_bytes(&self, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve()?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_name = format!(".{}.{}.tmp", self.basename(), Uuid::new_v4());
        let tmp_path = path.with_file_name(tmp_name);

        tokio::fs::write(&tmp_path, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    fn map_not_found(&self, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(self.rel_path.clone())
        } else {
            StorageError::Io(e)
        }
    }
}
