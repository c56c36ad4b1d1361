//! API middleware
//!
//! Contains:
//! - `AppState`: shared services for the handlers
//! - `ApiError`: management API error envelope
//! - Tenant authentication for the management API (Bearer API tokens)

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::db::repositories::{SessionRepository, TenantRepository};
use crate::models::Tenant;
use crate::services::{
    AuditLog, CallbackDispatcher, Registry, SessionError, SessionManager, TokenService,
};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub session_manager: Arc<SessionManager>,
    pub session_repo: Arc<dyn SessionRepository>,
    pub tenant_repo: Arc<dyn TenantRepository>,
    pub registry: Arc<Registry>,
    pub tokens: Arc<TokenService>,
    pub audit: Arc<AuditLog>,
    pub callbacks: Arc<CallbackDispatcher>,
    /// TTL granted on WOPI LOCK and REFRESH_LOCK
    pub lock_ttl_seconds: u64,
}

/// Tenant resolved from the request's API token
#[derive(Debug, Clone)]
pub struct AuthTenant(pub Tenant);

/// Error response for management API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "UPSTREAM_TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match &e {
            SessionError::TenantNotFound(_) | SessionError::NotFound(_) => {
                ApiError::not_found(e.to_string())
            }
            SessionError::StorageNotFound { .. } => ApiError::not_found(e.to_string()),
            SessionError::TenantDisabled(_) | SessionError::EditorDisabled(_) => {
                ApiError::forbidden(e.to_string())
            }
            SessionError::Internal(inner) => {
                tracing::error!("Session operation failed: {:#}", inner);
                ApiError::internal_error("internal error")
            }
        }
    }
}

/// SHA-256 hex digest of an API token, the form stored in the tenant row
pub fn hash_api_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a fresh tenant API token (shown once at provisioning time)
pub fn generate_api_token() -> String {
    let random_bytes: [u8; 32] = rand::random();
    format!("wk_{}", hex::encode(random_bytes))
}

/// Extract the Bearer token from the Authorization header
fn extract_bearer_token(request: &Request) -> Option<String> {
    let auth_header = request.headers().get(header::AUTHORIZATION)?;
    let auth_str = auth_header.to_str().ok()?;
    auth_str.strip_prefix("Bearer ").map(str::to_string)
}

/// Management API authentication middleware.
///
/// Resolves the tenant from `Authorization: Bearer <api_token>` and makes
/// it available to the handlers as an `AuthTenant` extension.
pub async fn require_tenant(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(&request)
        .ok_or_else(|| ApiError::unauthorized("Missing API token"))?;

    let tenant = state
        .tenant_repo
        .get_by_api_token_hash(&hash_api_token(&token))
        .await
        .map_err(|e| {
            tracing::error!("Tenant lookup failed: {:#}", e);
            ApiError::internal_error("internal error")
        })?
        .ok_or_else(|| ApiError::unauthorized("Invalid API token"))?;

    if !tenant.active {
        return Err(ApiError::forbidden(format!(
            "tenant '{}' is disabled",
            tenant.id
        )));
    }

    request.extensions_mut().insert(AuthTenant(tenant));
    Ok(next.run(request).await)
}
