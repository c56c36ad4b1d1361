//! Audit log service
//!
//! One append-only row per observable session and WOPI operation. Audit
//! writes sit on the request hot path but must never fail it: a write
//! failure degrades to a warning.

use std::sync::Arc;

use chrono::Utc;

use crate::db::repositories::CommandLogRepository;
use crate::models::CommandLogEntry;

/// Append-only operation recorder
pub struct AuditLog {
    repo: Arc<dyn CommandLogRepository>,
}

impl AuditLog {
    pub fn new(repo: Arc<dyn CommandLogRepository>) -> Self {
        Self { repo }
    }

    /// Record one operation. Never fails the caller.
    pub async fn record(
        &self,
        tenant_id: &str,
        account: Option<&str>,
        user: Option<&str>,
        command: &str,
        details: serde_json::Value,
    ) {
        let entry = CommandLogEntry {
            id: 0,
            tenant_id: tenant_id.to_string(),
            account: account.map(str::to_string),
            user: user.map(str::to_string),
            command: command.to_string(),
            details,
            created_at: Utc::now(),
        };

        if let Err(e) = self.repo.append(&entry).await {
            tracing::warn!("Audit write failed for '{}': {}", command, e);
        }
    }
}
