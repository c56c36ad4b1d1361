//! Session model
//!
//! A session is the ephemeral handle tying an opaque WOPI `file_id` to a
//! tenant, a storage-resolved file path, an identity, a permission set, an
//! expiry and the current WOPI lock. Sessions are created by the management
//! API, consumed by the WOPI protocol handlers, and removed by `close` or
//! the expiry sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    View,
    Edit,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Permission::View => "view",
            Permission::Edit => "edit",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(Permission::View),
            "edit" => Ok(Permission::Edit),
            other => Err(format!("unknown permission: {}", other)),
        }
    }
}

/// WOPI editing session entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session ID (UUID, primary key), externally visible as `session_id`
    pub id: String,
    pub tenant_id: String,
    /// Names a storage row within the tenant
    pub storage_name: String,
    /// Path resolved against the storage's root
    pub file_path: String,
    /// Opaque identifier used in the WOPI URL path; distinct from `id`
    pub file_id: String,
    /// Signed access token carried by every WOPI request
    pub access_token: String,
    /// Granted permissions; `view` is always present when non-empty
    pub permissions: Vec<Permission>,
    /// Issuing context, required for audit
    pub account: String,
    /// Human-readable identity shown in the editor
    pub user: Option<String>,
    /// Callback addressing
    pub origin_connection_id: Option<String>,
    pub origin_page_id: Option<String>,
    /// Current WOPI lock; None means unlocked
    pub lock_id: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Touched on every successful WOPI operation
    pub last_accessed_at: DateTime<Utc>,
    /// First successful GetFile; backs the one-shot `document_opened` event
    pub opened_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Check if the session grants write access
    pub fn can_write(&self) -> bool {
        self.permissions.contains(&Permission::Edit)
    }

    /// Identity shown to the editor: user if set, otherwise account
    pub fn display_name(&self) -> &str {
        self.user.as_deref().unwrap_or(&self.account)
    }

    /// Current lock id, treating an expired lock as absent
    pub fn active_lock(&self, now: DateTime<Utc>) -> Option<&str> {
        match (&self.lock_id, &self.lock_expires_at) {
            (Some(lock), Some(expires)) if *expires > now => Some(lock.as_str()),
            _ => None,
        }
    }
}

/// Input for creating a session
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionInput {
    pub storage_name: String,
    pub file_path: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    pub account: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub origin_connection_id: Option<String>,
    #[serde(default)]
    pub origin_page_id: Option<String>,
    /// Session TTL in seconds; defaults to the configured token TTL
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_session() -> Session {
        let now = Utc::now();
        Session {
            id: "s1".to_string(),
            tenant_id: "acme".to_string(),
            storage_name: "docs".to_string(),
            file_path: "a/b.xlsx".to_string(),
            file_id: "f1".to_string(),
            access_token: "tok".to_string(),
            permissions: vec![Permission::View],
            account: "sales".to_string(),
            user: None,
            origin_connection_id: None,
            origin_page_id: None,
            lock_id: None,
            lock_expires_at: None,
            created_at: now,
            expires_at: now + Duration::hours(1),
            last_accessed_at: now,
            opened_at: None,
        }
    }

    #[test]
    fn test_expiry_check() {
        let mut session = base_session();
        assert!(!session.is_expired());

        session.expires_at = Utc::now() - Duration::seconds(1);
        assert!(session.is_expired());
    }

    #[test]
    fn test_can_write_requires_edit() {
        let mut session = base_session();
        assert!(!session.can_write());

        session.permissions = vec![Permission::View, Permission::Edit];
        assert!(session.can_write());
    }

    #[test]
    fn test_display_name_prefers_user() {
        let mut session = base_session();
        assert_eq!(session.display_name(), "sales");

        session.user = Some("Mario Rossi".to_string());
        assert_eq!(session.display_name(), "Mario Rossi");
    }

    #[test]
    fn test_active_lock_treats_expired_as_absent() {
        let now = Utc::now();
        let mut session = base_session();
        assert!(session.active_lock(now).is_none());

        session.lock_id = Some("L1".to_string());
        session.lock_expires_at = Some(now + Duration::minutes(30));
        assert_eq!(session.active_lock(now), Some("L1"));

        session.lock_expires_at = Some(now - Duration::seconds(1));
        assert!(session.active_lock(now).is_none());
    }
}
