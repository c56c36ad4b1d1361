//! Common test utilities.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::ServiceExt;

use wopihost::api::middleware::hash_api_token;
use wopihost::api::{self, AppState};
use wopihost::config::CallbackConfig;
use wopihost::db::repositories::{
    SqlxCommandLogRepository, SqlxSessionRepository, SqlxStorageRepository, SqlxTenantRepository,
    TenantRepository, StorageRepository,
};
use wopihost::db::{create_test_pool, migrations};
use wopihost::models::{
    CreateSessionInput, EditorMode, Permission, StorageProtocol, StorageRecord, Tenant,
};
use wopihost::services::{
    AuditLog, CallbackDispatcher, CreateSessionResult, Registry, SessionManager, TokenService,
};

/// API token for the "acme" tenant
pub const ACME_TOKEN: &str = "wk_acme_test_token";
/// API token for the "beta" tenant
pub const BETA_TOKEN: &str = "wk_beta_test_token";

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    pub manager: Arc<SessionManager>,
    /// Root of the local storage named "docs" for both tenants
    pub storage_dir: TempDir,
}

/// Build a complete app with two tenants ("acme", "beta"), a shared local
/// storage named "docs", and the full service stack behind the router.
pub async fn test_app() -> TestApp {
    let pool = create_test_pool().await.expect("failed to create test pool");
    migrations::run_migrations(&pool)
        .await
        .expect("failed to run migrations");

    let storage_dir = TempDir::new().expect("failed to create storage dir");

    let tenant_repo = SqlxTenantRepository::new(pool.clone());
    let storage_repo = SqlxStorageRepository::new(pool.clone());
    for (id, token) in [("acme", ACME_TOKEN), ("beta", BETA_TOKEN)] {
        tenant_repo
            .upsert(&Tenant {
                id: id.to_string(),
                name: None,
                active: true,
                editor_mode: EditorMode::Pool,
                editor_url: None,
                callback_base_url: None,
                callback_auth: None,
                api_token_hash: Some(hash_api_token(token)),
                created_at: Utc::now(),
            })
            .await
            .expect("failed to create tenant");
        storage_repo
            .upsert(&StorageRecord {
                tenant_id: id.to_string(),
                name: "docs".to_string(),
                protocol: StorageProtocol::Local,
                config: serde_json::json!({"base_path": storage_dir.path()}),
                created_at: Utc::now(),
            })
            .await
            .expect("failed to create storage");
    }

    let tenant_repo = SqlxTenantRepository::boxed(pool.clone());
    let storage_repo = SqlxStorageRepository::boxed(pool.clone());
    let session_repo = SqlxSessionRepository::boxed(pool.clone());

    let registry = Arc::new(Registry::new(
        tenant_repo.clone(),
        storage_repo,
        "https://collabora.example.com".to_string(),
        Duration::from_secs(60),
    ));
    let tokens = Arc::new(TokenService::new("test-secret"));
    let audit = Arc::new(AuditLog::new(SqlxCommandLogRepository::boxed(pool.clone())));
    let callbacks = Arc::new(CallbackDispatcher::new(CallbackConfig::default()));
    let manager = Arc::new(SessionManager::new(
        session_repo.clone(),
        registry.clone(),
        tokens.clone(),
        audit.clone(),
        callbacks.clone(),
        "http://localhost:8880".to_string(),
        "dist".to_string(),
        3600,
    ));

    let state = AppState {
        session_manager: manager.clone(),
        session_repo,
        tenant_repo,
        registry,
        tokens,
        audit,
        callbacks,
        lock_ttl_seconds: 1800,
    };

    let app = api::build_router(state, "*", Duration::from_secs(30));

    TestApp {
        app,
        pool,
        manager,
        storage_dir,
    }
}

impl TestApp {
    /// Create a session directly through the manager
    pub async fn create_session(
        &self,
        tenant_id: &str,
        file_path: &str,
        permissions: Vec<Permission>,
        ttl_seconds: Option<u64>,
    ) -> CreateSessionResult {
        self.manager
            .create(
                tenant_id,
                CreateSessionInput {
                    storage_name: "docs".to_string(),
                    file_path: file_path.to_string(),
                    permissions,
                    account: "sales".to_string(),
                    user: Some("Mario Rossi".to_string()),
                    origin_connection_id: None,
                    origin_page_id: None,
                    ttl_seconds,
                },
            )
            .await
            .expect("failed to create session")
    }

    /// The access token backing a session, read from the store
    pub async fn access_token(&self, session_id: &str) -> String {
        use wopihost::db::repositories::SessionRepository;
        let repo = SqlxSessionRepository::new(self.pool.clone());
        repo.get_by_id(session_id)
            .await
            .expect("session lookup failed")
            .expect("session missing")
            .access_token
    }

    /// Seed a file in the shared "docs" storage
    pub fn write_storage_file(&self, rel_path: &str, content: &[u8]) {
        let path = self.storage_dir.path().join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create storage dirs");
        }
        std::fs::write(path, content).expect("failed to seed storage file");
    }

    /// Send one request through the router
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read body");
        (status, headers, body)
    }
}

/// GET request helper
pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// POST request helper with optional headers
pub fn post(uri: &str, headers: &[(&str, &str)], body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(body.into()).unwrap()
}

/// Parse a JSON response body
pub fn json_body(body: &Bytes) -> serde_json::Value {
    serde_json::from_slice(body).expect("response body is not JSON")
}

/// Header value as &str, or "" when absent
pub fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}
