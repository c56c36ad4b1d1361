//! Command log model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the append-only audit trail.
///
/// Every observable session and WOPI operation produces exactly one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandLogEntry {
    /// Auto-increment primary key (0 before insertion)
    pub id: i64,
    pub tenant_id: String,
    pub account: Option<String>,
    pub user: Option<String>,
    /// Operation name, e.g. "session.create" or "wopi.put_file"
    pub command: String,
    /// Operation-specific details
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
