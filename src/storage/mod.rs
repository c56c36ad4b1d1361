//! Storage abstraction layer
//!
//! A `Storage` is a configured backend for one `(tenant, storage_name)` row;
//! a `StorageNode` is a handle to a single file inside it with uniform
//! read/write/metadata/versioning operations. The protocol layer only ever
//! talks to nodes, never to backend configuration.
//!
//! `local` is the built-in backend. The cloud protocols (`s3`, `gcs`,
//! `azure`, `webdav`) are accepted in storage rows but their factories
//! refuse until a backend implementation is linked in, so provisioning can
//! run ahead of rollout.

pub mod local;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{StorageProtocol, StorageRecord};

pub use local::LocalStorage;

/// Storage layer error
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("file not found: {0}")]
    NotFound(String),

    /// Path escapes the storage root or is otherwise malformed
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The backend does not advertise the requested capability
    #[error("operation not supported by this backend: {0}")]
    UnsupportedCapability(&'static str),

    /// Recognized protocol without a linked backend implementation
    #[error("storage protocol '{0}' is not available in this build")]
    UnsupportedProtocol(StorageProtocol),

    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Operations a backend supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
    pub versioning: bool,
    pub version_listing: bool,
    pub version_access: bool,
    pub presigned_urls: bool,
}

/// One entry of a node's version history, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVersion {
    pub version_id: String,
    pub mtime: DateTime<Utc>,
    pub size: u64,
}

/// A configured storage backend
pub enum Storage {
    Local(LocalStorage),
}

impl Storage {
    /// Obtain a node handle for a path within this storage
    pub fn node(&self, path: &str) -> StorageNode {
        match self {
            Storage::Local(storage) => StorageNode::Local(storage.node(path)),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Storage::Local(storage) => storage.capabilities(),
        }
    }
}

/// A handle to a single file in a backend
pub enum StorageNode {
    Local(local::LocalNode),
}

impl StorageNode {
    /// Final path segment
    pub fn basename(&self) -> String {
        match self {
            StorageNode::Local(node) => node.basename(),
        }
    }

    /// MIME type derived from the file extension
    pub fn mimetype(&self) -> &'static str {
        mimetype_for(&self.basename())
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            StorageNode::Local(node) => node.capabilities(),
        }
    }

    pub async fn exists(&self) -> Result<bool, StorageError> {
        match self {
            StorageNode::Local(node) => node.exists().await,
        }
    }

    /// File size in bytes; `NotFound` when the file is missing
    pub async fn size(&self) -> Result<u64, StorageError> {
        match self {
            StorageNode::Local(node) => node.size().await,
        }
    }

    pub async fn mtime(&self) -> Result<DateTime<Utc>, StorageError> {
        match self {
            StorageNode::Local(node) => node.mtime().await,
        }
    }

    pub async fn read_bytes(&self) -> Result<Vec<u8>, StorageError> {
        match self {
            StorageNode::Local(node) => node.read_bytes().await,
        }
    }

    /// Replace the file content atomically. On versioned backends this
    /// creates a new version.
    pub async fn write_bytes(&self, bytes: &[u8]) -> Result<(), StorageError> {
        match self {
            StorageNode::Local(node) => node.write_bytes(bytes).await,
        }
    }

    /// Version history, newest first; empty when the backend has no
    /// versioning
    pub async fn versions(&self) -> Result<Vec<FileVersion>, StorageError> {
        if !self.capabilities().versioning {
            return Ok(Vec::new());
        }
        match self {
            StorageNode::Local(_) => Ok(Vec::new()),
        }
    }

    pub async fn version_count(&self) -> Result<usize, StorageError> {
        Ok(self.versions().await?.len())
    }
}

/// Create a storage backend from its definition row.
pub fn open_storage(record: &StorageRecord) -> Result<Storage, StorageError> {
    match record.protocol {
        StorageProtocol::Local => {
            let base_path = record
                .config
                .get("base_path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    StorageError::InvalidConfig(format!(
                        "local storage '{}' is missing base_path",
                        record.name
                    ))
                })?;
            Ok(Storage::Local(LocalStorage::new(base_path)))
        }
        protocol => Err(StorageError::UnsupportedProtocol(protocol)),
    }
}

/// MIME type by extension. Office formats first, then the common rest.
fn mimetype_for(basename: &str) -> &'static str {
    let ext = basename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "odt" => "application/vnd.oasis.opendocument.text",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(protocol: StorageProtocol, config: serde_json::Value) -> StorageRecord {
        StorageRecord {
            tenant_id: "acme".to_string(),
            name: "docs".to_string(),
            protocol,
            config,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_local_storage() {
        let storage = open_storage(&record(
            StorageProtocol::Local,
            json!({"base_path": "/data/files"}),
        ))
        .unwrap();
        assert!(storage.capabilities().read);
        assert!(storage.capabilities().write);
        assert!(!storage.capabilities().versioning);
    }

    #[test]
    fn test_open_local_without_base_path_fails() {
        let result = open_storage(&record(StorageProtocol::Local, json!({})));
        assert!(matches!(result, Err(StorageError::InvalidConfig(_))));
    }

    #[test]
    fn test_open_unlinked_protocol_fails() {
        let result = open_storage(&record(
            StorageProtocol::S3,
            json!({"bucket": "my-bucket"}),
        ));
        assert!(matches!(
            result,
            Err(StorageError::UnsupportedProtocol(StorageProtocol::S3))
        ));
    }

    #[test]
    fn test_mimetype_by_extension() {
        assert_eq!(
            mimetype_for("report.xlsx"),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
        assert_eq!(mimetype_for("notes.TXT"), "text/plain");
        assert_eq!(mimetype_for("blob"), "application/octet-stream");
        assert_eq!(mimetype_for("archive.bin"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_versions_empty_without_versioning() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::Local(LocalStorage::new(dir.path()));
        let node = storage.node("a.txt");

        assert!(node.versions().await.unwrap().is_empty());
        assert_eq!(node.version_count().await.unwrap(), 0);
    }
}
