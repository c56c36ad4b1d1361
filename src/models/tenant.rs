//! Tenant model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Editor mode for a tenant.
///
/// Decides which WOPI editor serves the tenant's sessions: the process-wide
/// pool editor, the tenant's own deployment, or none at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EditorMode {
    /// Shared pool editor (default)
    #[default]
    Pool,
    /// Tenant-provided editor URL
    Own,
    /// Document editing disabled for this tenant
    Disabled,
}

impl std::fmt::Display for EditorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EditorMode::Pool => "pool",
            EditorMode::Own => "own",
            EditorMode::Disabled => "disabled",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for EditorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pool" => Ok(EditorMode::Pool),
            "own" => Ok(EditorMode::Own),
            "disabled" => Ok(EditorMode::Disabled),
            other => Err(format!("unknown editor mode: {}", other)),
        }
    }
}

/// Tenant entity: the isolation boundary for sessions, storages and callbacks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier (primary key, chosen at provisioning time)
    pub id: String,
    /// Human-readable name
    pub name: Option<String>,
    /// Inactive tenants cannot create sessions
    pub active: bool,
    /// Which editor serves this tenant
    pub editor_mode: EditorMode,
    /// Editor URL, meaningful when `editor_mode` is `own`
    pub editor_url: Option<String>,
    /// Base URL for event callbacks to the originating application
    pub callback_base_url: Option<String>,
    /// Opaque Authorization header value sent with callbacks
    pub callback_auth: Option<String>,
    /// SHA-256 hex digest of the tenant API token; None means no token issued
    pub api_token_hash: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editor_mode_roundtrip() {
        for mode in [EditorMode::Pool, EditorMode::Own, EditorMode::Disabled] {
            let parsed: EditorMode = mode.to_string().parse().unwrap();
            assert_eq!(parsed, mode);
        }
    }

    #[test]
    fn test_editor_mode_rejects_unknown() {
        assert!("shared".parse::<EditorMode>().is_err());
    }
}
