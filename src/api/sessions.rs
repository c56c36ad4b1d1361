//! Session management API
//!
//! REST surface used by the application (not the editor):
//! - POST /sessions/create        create a session, returns the editor URL
//! - GET  /sessions               list active sessions for the tenant
//! - GET  /sessions/{id}          session projection (never the raw token)
//! - POST /sessions/{id}/close    close a session early
//! - POST /sessions/cleanup       sweep expired sessions
//!
//! All routes require `Authorization: Bearer <api_token>`; the tenant is
//! resolved from the token by the auth middleware.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState, AuthTenant};
use crate::models::{CreateSessionInput, Session};
use crate::services::{CleanupResult, CreateSessionResult};

/// Build the management sessions router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_session))
        .route("/", get(list_sessions))
        .route("/cleanup", post(cleanup_sessions))
        .route("/:id", get(get_session))
        .route("/:id/close", post(close_session))
}

/// Session projection returned by the management API.
///
/// The raw access token never leaves the service through this surface; it
/// is only embedded in the editor URL at create time.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub tenant_id: String,
    pub storage_name: String,
    pub file_path: String,
    pub file_id: String,
    pub permissions: Vec<String>,
    pub account: String,
    pub user: Option<String>,
    pub locked: bool,
    pub created_at: String,
    pub expires_at: String,
    pub last_accessed_at: String,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        let locked = session.active_lock(Utc::now()).is_some();
        Self {
            session_id: session.id,
            tenant_id: session.tenant_id,
            storage_name: session.storage_name,
            file_path: session.file_path,
            file_id: session.file_id,
            permissions: session.permissions.iter().map(|p| p.to_string()).collect(),
            account: session.account,
            user: session.user,
            locked,
            created_at: session.created_at.to_rfc3339(),
            expires_at: session.expires_at.to_rfc3339(),
            last_accessed_at: session.last_accessed_at.to_rfc3339(),
        }
    }
}

/// POST /sessions/create
async fn create_session(
    State(state): State<AppState>,
    Extension(AuthTenant(tenant)): Extension<AuthTenant>,
    Json(input): Json<CreateSessionInput>,
) -> Result<Json<CreateSessionResult>, ApiError> {
    if input.account.trim().is_empty() {
        return Err(ApiError::validation_error("account is required"));
    }
    if input.file_path.trim().is_empty() {
        return Err(ApiError::validation_error("file_path is required"));
    }

    let result = state.session_manager.create(&tenant.id, input).await?;
    Ok(Json(result))
}

/// Query parameters for GET /sessions
#[derive(Debug, Deserialize)]
struct ListQuery {
    tenant_id: Option<String>,
}

/// GET /sessions
///
/// The listing is always scoped to the authenticated tenant; a
/// `tenant_id` filter naming anyone else is refused.
async fn list_sessions(
    State(state): State<AppState>,
    Extension(AuthTenant(tenant)): Extension<AuthTenant>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SessionResponse>>, ApiError> {
    if let Some(requested) = &query.tenant_id {
        if requested != &tenant.id {
            return Err(ApiError::forbidden(
                "token not authorized for this tenant",
            ));
        }
    }

    let sessions = state
        .session_repo
        .list_active(Some(&tenant.id))
        .await
        .map_err(|e| {
            tracing::error!("Session listing failed: {:#}", e);
            ApiError::internal_error("internal error")
        })?;

    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

/// GET /sessions/{id}
async fn get_session(
    State(state): State<AppState>,
    Extension(AuthTenant(tenant)): Extension<AuthTenant>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .session_repo
        .get_by_id(&id)
        .await
        .map_err(|e| {
            tracing::error!("Session lookup failed: {:#}", e);
            ApiError::internal_error("internal error")
        })?
        .filter(|s| s.tenant_id == tenant.id)
        .ok_or_else(|| ApiError::not_found(format!("session '{}' not found", id)))?;

    Ok(Json(session.into()))
}

/// POST /sessions/{id}/close
async fn close_session(
    State(state): State<AppState>,
    Extension(AuthTenant(tenant)): Extension<AuthTenant>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Ownership check before the close touches anything
    let owned = state
        .session_repo
        .get_by_id(&id)
        .await
        .map_err(|e| {
            tracing::error!("Session lookup failed: {:#}", e);
            ApiError::internal_error("internal error")
        })?
        .map(|s| s.tenant_id == tenant.id)
        .unwrap_or(false);
    if !owned {
        return Err(ApiError::not_found(format!("session '{}' not found", id)));
    }

    state.session_manager.close(&id).await?;
    Ok(Json(serde_json::json!({"ok": true, "session_id": id})))
}

/// Request body for POST /sessions/cleanup
#[derive(Debug, Default, Deserialize)]
struct CleanupRequest {
    #[serde(default)]
    dry_run: bool,
}

/// POST /sessions/cleanup
async fn cleanup_sessions(
    State(state): State<AppState>,
    body: Option<Json<CleanupRequest>>,
) -> Result<Json<CleanupResult>, ApiError> {
    let dry_run = body.map(|Json(b)| b.dry_run).unwrap_or(false);
    let result = state.session_manager.cleanup(dry_run).await?;
    Ok(Json(result))
}
