//! Storage backend model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage backend protocol.
///
/// `local` is built in; the cloud protocols are accepted at provisioning
/// time so rows can be migrated in ahead of the backend being linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageProtocol {
    /// Local filesystem (default)
    #[default]
    Local,
    /// Amazon S3 and compatible object stores
    S3,
    /// Google Cloud Storage
    Gcs,
    /// Azure Blob Storage
    Azure,
    /// WebDAV remote
    Webdav,
}

impl std::fmt::Display for StorageProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StorageProtocol::Local => "local",
            StorageProtocol::S3 => "s3",
            StorageProtocol::Gcs => "gcs",
            StorageProtocol::Azure => "azure",
            StorageProtocol::Webdav => "webdav",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for StorageProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(StorageProtocol::Local),
            "s3" => Ok(StorageProtocol::S3),
            "gcs" => Ok(StorageProtocol::Gcs),
            "azure" => Ok(StorageProtocol::Azure),
            "webdav" => Ok(StorageProtocol::Webdav),
            other => Err(format!("unknown storage protocol: {}", other)),
        }
    }
}

/// Storage backend definition, keyed by `(tenant_id, name)`.
///
/// `config` is an opaque protocol-specific blob (for `local`:
/// `{"base_path": "/data/files"}`). Credential encryption happens outside
/// this service; the blob is stored as given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRecord {
    pub tenant_id: String,
    /// Storage name unique within the tenant (e.g. "docs", "attachments")
    pub name: String,
    pub protocol: StorageProtocol,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
