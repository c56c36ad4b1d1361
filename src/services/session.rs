//! Session manager
//!
//! Business rules for session create/close/cleanup. The manager is the
//! only writer of new session rows; the WOPI handlers mutate existing rows
//! (timestamps, locks) through the repository.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::db::repositories::{InsertError, SessionRepository};
use crate::models::{CreateSessionInput, Permission, Session};
use crate::services::audit::AuditLog;
use crate::services::callback::{CallbackDispatcher, CallbackEvent};
use crate::services::registry::{Registry, RegistryError};
use crate::services::token::TokenService;

/// How many times id generation retries on a unique collision
const CREATE_ATTEMPTS: u32 = 3;

/// Session manager error
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("tenant '{0}' not found")]
    TenantNotFound(String),

    #[error("tenant '{0}' is disabled")]
    TenantDisabled(String),

    #[error("document editing is disabled for tenant '{0}'")]
    EditorDisabled(String),

    #[error("storage '{name}' not found for tenant '{tenant_id}'")]
    StorageNotFound { tenant_id: String, name: String },

    #[error("session '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<RegistryError> for SessionError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::TenantNotFound(id) => SessionError::TenantNotFound(id),
            RegistryError::EditorDisabled(id) => SessionError::EditorDisabled(id),
            RegistryError::StorageNotFound { tenant_id, name } => {
                SessionError::StorageNotFound { tenant_id, name }
            }
            RegistryError::Storage(e) => SessionError::Internal(anyhow::Error::new(e)),
            RegistryError::Internal(e) => SessionError::Internal(e),
        }
    }
}

/// Result of a successful create
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionResult {
    pub session_id: String,
    pub file_id: String,
    pub editor_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a cleanup sweep
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CleanupResult {
    pub expired_count: u64,
    pub lock_released_count: u64,
}

/// Orchestrates registries, token service, store, audit and callbacks
pub struct SessionManager {
    sessions: Arc<dyn SessionRepository>,
    registry: Arc<Registry>,
    tokens: Arc<TokenService>,
    audit: Arc<AuditLog>,
    callbacks: Arc<CallbackDispatcher>,
    public_url: String,
    discovery_token: String,
    default_ttl_seconds: u64,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        registry: Arc<Registry>,
        tokens: Arc<TokenService>,
        audit: Arc<AuditLog>,
        callbacks: Arc<CallbackDispatcher>,
        public_url: String,
        discovery_token: String,
        default_ttl_seconds: u64,
    ) -> Self {
        Self {
            sessions,
            registry,
            tokens,
            audit,
            callbacks,
            public_url,
            discovery_token,
            default_ttl_seconds,
        }
    }

    /// Create a new editing session for a tenant.
    ///
    /// The target file is not required to exist; a session may be created
    /// for a document that the first save will materialize.
    pub async fn create(
        &self,
        tenant_id: &str,
        input: CreateSessionInput,
    ) -> Result<CreateSessionResult, SessionError> {
        let tenant = self.registry.get_tenant(tenant_id).await?;
        if !tenant.active {
            return Err(SessionError::TenantDisabled(tenant_id.to_string()));
        }

        let editor_base = self.registry.editor_base_for(&tenant)?;

        // Storage must exist; the file itself need not
        self.registry
            .get_storage(tenant_id, &input.storage_name)
            .await?;

        let permissions = normalize_permissions(&input.permissions);
        let ttl_seconds = input.ttl_seconds.unwrap_or(self.default_ttl_seconds);

        let mut session = None;
        for attempt in 1..=CREATE_ATTEMPTS {
            let candidate = self.build_session(tenant_id, &input, &permissions, ttl_seconds)?;
            match self.sessions.insert(&candidate).await {
                Ok(()) => {
                    session = Some(candidate);
                    break;
                }
                Err(InsertError::Conflict) => {
                    tracing::warn!(
                        attempt,
                        "Session id collision for tenant '{}', regenerating",
                        tenant_id
                    );
                }
                Err(InsertError::Other(e)) => return Err(SessionError::Internal(e)),
            }
        }
        let session = session.ok_or_else(|| {
            SessionError::Internal(anyhow::anyhow!(
                "could not allocate unique session ids after {} attempts",
                CREATE_ATTEMPTS
            ))
        })?;

        let editor_url = self.compose_editor_url(&editor_base, &session);

        self.audit
            .record(
                tenant_id,
                Some(&session.account),
                session.user.as_deref(),
                "session.create",
                json!({
                    "session_id": session.id,
                    "file_id": session.file_id,
                    "storage_name": session.storage_name,
                    "file_path": session.file_path,
                    "permissions": session.permissions,
                }),
            )
            .await;

        self.callbacks.dispatch(
            &tenant,
            &session,
            CallbackEvent::SessionCreated,
            json!({"expires_at": session.expires_at.to_rfc3339()}),
        );

        Ok(CreateSessionResult {
            session_id: session.id,
            file_id: session.file_id,
            editor_url,
            expires_at: session.expires_at,
        })
    }

    /// Close a session early, releasing any lock with it
    pub async fn close(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_by_id(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        let held_lock = session.active_lock(Utc::now()).map(str::to_string);

        // Deleting the row releases the lock atomically
        self.sessions.delete(session_id).await?;

        if let Some(lock_id) = held_lock {
            if let Ok(tenant) = self.registry.get_tenant(&session.tenant_id).await {
                self.callbacks.dispatch(
                    &tenant,
                    &session,
                    CallbackEvent::LockReleased,
                    json!({"lock_id": lock_id}),
                );
            }
        }

        self.audit
            .record(
                &session.tenant_id,
                Some(&session.account),
                session.user.as_deref(),
                "session.close",
                json!({"session_id": session.id, "file_path": session.file_path}),
            )
            .await;

        Ok(())
    }

    /// Sweep expired sessions. With `dry_run` only counts are reported.
    pub async fn cleanup(&self, dry_run: bool) -> Result<CleanupResult, SessionError> {
        let now = Utc::now();
        let preview = self.sessions.count_expired(now).await?;

        if dry_run {
            return Ok(CleanupResult {
                expired_count: preview.expired,
                lock_released_count: preview.locked,
            });
        }

        let expired = self.sessions.list_expired(now).await?;
        let deleted = self.sessions.delete_expired(now).await?;

        for session in &expired {
            if let Ok(tenant) = self.registry.get_tenant(&session.tenant_id).await {
                self.callbacks.dispatch(
                    &tenant,
                    session,
                    CallbackEvent::SessionExpired,
                    json!({}),
                );
            }
            self.audit
                .record(
                    &session.tenant_id,
                    Some(&session.account),
                    session.user.as_deref(),
                    "session.expired",
                    json!({"session_id": session.id, "file_path": session.file_path}),
                )
                .await;
        }

        Ok(CleanupResult {
            expired_count: deleted,
            lock_released_count: preview.locked,
        })
    }

    fn build_session(
        &self,
        tenant_id: &str,
        input: &CreateSessionInput,
        permissions: &[Permission],
        ttl_seconds: u64,
    ) -> Result<Session, SessionError> {
        let id = Uuid::new_v4().to_string();
        let file_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_seconds as i64);

        let access_token = self.tokens.issue(&id, expires_at)?;

        Ok(Session {
            id,
            tenant_id: tenant_id.to_string(),
            storage_name: input.storage_name.clone(),
            file_path: input.file_path.clone(),
            file_id,
            access_token,
            permissions: permissions.to_vec(),
            account: input.account.clone(),
            user: input.user.clone(),
            origin_connection_id: input.origin_connection_id.clone(),
            origin_page_id: input.origin_page_id.clone(),
            lock_id: None,
            lock_expires_at: None,
            created_at: now,
            expires_at,
            last_accessed_at: now,
            opened_at: None,
        })
    }

    fn compose_editor_url(&self, editor_base: &str, session: &Session) -> String {
        let wopi_src = format!(
            "{}/wopi/files/{}",
            self.public_url.trim_end_matches('/'),
            session.file_id
        );
        format!(
            "{}/browser/{}/cool.html?WOPISrc={}&access_token={}",
            editor_base.trim_end_matches('/'),
            self.discovery_token,
            urlencoding::encode(&wopi_src),
            session.access_token
        )
    }
}

/// `view` is always granted; the rest of the set is kept de-duplicated
fn normalize_permissions(requested: &[Permission]) -> Vec<Permission> {
    let mut permissions = vec![Permission::View];
    if requested.contains(&Permission::Edit) {
        permissions.push(Permission::Edit);
    }
    permissions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallbackConfig;
    use crate::db::repositories::{
        SqlxCommandLogRepository, SqlxSessionRepository, SqlxStorageRepository,
        SqlxTenantRepository, StorageRepository, TenantRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::{EditorMode, StorageProtocol, StorageRecord, Tenant};

    struct Fixture {
        pool: sqlx::SqlitePool,
        manager: SessionManager,
        tokens: Arc<TokenService>,
        _dir: tempfile::TempDir,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();

        let tenant_repo = SqlxTenantRepository::new(pool.clone());
        tenant_repo
            .upsert(&Tenant {
                id: "acme".to_string(),
                name: Some("Acme Corp".to_string()),
                active: true,
                editor_mode: EditorMode::Pool,
                editor_url: None,
                callback_base_url: None,
                callback_auth: None,
                api_token_hash: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        tenant_repo
            .upsert(&Tenant {
                id: "dormant".to_string(),
                name: None,
                active: false,
                editor_mode: EditorMode::Pool,
                editor_url: None,
                callback_base_url: None,
                callback_auth: None,
                api_token_hash: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        SqlxStorageRepository::new(pool.clone())
            .upsert(&StorageRecord {
                tenant_id: "acme".to_string(),
                name: "docs".to_string(),
                protocol: StorageProtocol::Local,
                config: serde_json::json!({"base_path": dir.path()}),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let registry = Arc::new(Registry::new(
            SqlxTenantRepository::boxed(pool.clone()),
            SqlxStorageRepository::boxed(pool.clone()),
            "https://collabora.example.com".to_string(),
            std::time::Duration::from_secs(60),
        ));
        let tokens = Arc::new(TokenService::new("test-secret"));
        let manager = SessionManager::new(
            SqlxSessionRepository::boxed(pool.clone()),
            registry,
            tokens.clone(),
            Arc::new(AuditLog::new(SqlxCommandLogRepository::boxed(pool.clone()))),
            Arc::new(CallbackDispatcher::new(CallbackConfig::default())),
            "http://localhost:8880".to_string(),
            "dist".to_string(),
            3600,
        );

        Fixture {
            pool,
            manager,
            tokens,
            _dir: dir,
        }
    }

    fn input(permissions: Vec<Permission>) -> CreateSessionInput {
        CreateSessionInput {
            storage_name: "docs".to_string(),
            file_path: "a/b.xlsx".to_string(),
            permissions,
            account: "sales".to_string(),
            user: Some("Mario Rossi".to_string()),
            origin_connection_id: None,
            origin_page_id: None,
            ttl_seconds: None,
        }
    }

    #[tokio::test]
    async fn test_create_composes_editor_url() {
        let fx = setup().await;
        let result = fx.manager.create("acme", input(vec![])).await.unwrap();

        assert!(result.editor_url.starts_with(
            "https://collabora.example.com/browser/dist/cool.html?WOPISrc="
        ));
        let encoded_src = format!("%2Fwopi%2Ffiles%2F{}", result.file_id);
        assert!(result.editor_url.contains(&encoded_src));
        assert!(result.editor_url.contains("&access_token="));
        assert_ne!(result.session_id, result.file_id);
    }

    #[tokio::test]
    async fn test_create_injects_view_permission() {
        let fx = setup().await;
        let result = fx.manager.create("acme", input(vec![])).await.unwrap();

        let repo = SqlxSessionRepository::new(fx.pool.clone());
        let session = repo.get_by_id(&result.session_id).await.unwrap().unwrap();
        assert_eq!(session.permissions, vec![Permission::View]);
        assert!(!session.can_write());
    }

    #[tokio::test]
    async fn test_create_with_edit_keeps_both() {
        let fx = setup().await;
        let result = fx
            .manager
            .create("acme", input(vec![Permission::Edit]))
            .await
            .unwrap();

        let repo = SqlxSessionRepository::new(fx.pool.clone());
        let session = repo.get_by_id(&result.session_id).await.unwrap().unwrap();
        assert_eq!(
            session.permissions,
            vec![Permission::View, Permission::Edit]
        );
    }

    #[tokio::test]
    async fn test_create_token_matches_row_expiry() {
        let fx = setup().await;
        let mut req = input(vec![]);
        req.ttl_seconds = Some(60);
        let result = fx.manager.create("acme", req).await.unwrap();

        let repo = SqlxSessionRepository::new(fx.pool.clone());
        let session = repo.get_by_id(&result.session_id).await.unwrap().unwrap();

        let claims = fx.tokens.validate(&session.access_token).unwrap();
        assert_eq!(claims.sub, session.id);
        assert_eq!(claims.exp, session.expires_at.timestamp());

        let ttl = session.expires_at - session.created_at;
        assert_eq!(ttl.num_seconds(), 60);
    }

    #[tokio::test]
    async fn test_create_unknown_tenant() {
        let fx = setup().await;
        assert!(matches!(
            fx.manager.create("ghost", input(vec![])).await,
            Err(SessionError::TenantNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_inactive_tenant() {
        let fx = setup().await;
        assert!(matches!(
            fx.manager.create("dormant", input(vec![])).await,
            Err(SessionError::TenantDisabled(_))
        ));
    }

    #[tokio::test]
    async fn test_create_unknown_storage() {
        let fx = setup().await;
        let mut req = input(vec![]);
        req.storage_name = "missing".to_string();
        assert!(matches!(
            fx.manager.create("acme", req).await,
            Err(SessionError::StorageNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_deletes_session() {
        let fx = setup().await;
        let result = fx.manager.create("acme", input(vec![])).await.unwrap();

        fx.manager.close(&result.session_id).await.unwrap();

        let repo = SqlxSessionRepository::new(fx.pool.clone());
        assert!(repo.get_by_id(&result.session_id).await.unwrap().is_none());

        assert!(matches!(
            fx.manager.close(&result.session_id).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_dry_run_then_real() {
        let fx = setup().await;
        let mut req = input(vec![]);
        req.ttl_seconds = Some(0);
        fx.manager.create("acme", req).await.unwrap();
        fx.manager.create("acme", input(vec![])).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let preview = fx.manager.cleanup(true).await.unwrap();
        assert_eq!(preview.expired_count, 1);

        // Dry run deleted nothing
        let swept = fx.manager.cleanup(false).await.unwrap();
        assert_eq!(swept.expired_count, 1);

        // Nothing left to sweep
        let again = fx.manager.cleanup(false).await.unwrap();
        assert_eq!(again.expired_count, 0);
    }
}
