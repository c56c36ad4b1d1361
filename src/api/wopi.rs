//! WOPI protocol endpoints
//!
//! The surface the editor talks to. All entry points take the opaque
//! `file_id` as a path segment and `access_token` as a query parameter:
//!
//! - GET  /wopi/files/{file_id}            CheckFileInfo
//! - GET  /wopi/files/{file_id}/contents   GetFile
//! - POST /wopi/files/{file_id}/contents   PutFile
//! - POST /wopi/files/{file_id}            Lock operations (X-WOPI-Override)
//!
//! Every handler runs the same preamble: verify the token signature, load
//! the session by `file_id`, cross-check the stored token and the row's own
//! expiry. The signed token is verifiable offline but the session row stays
//! the authority.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::middleware::AppState;
use crate::db::repositories::{LockOutcome, ReleaseOutcome};
use crate::models::Session;
use crate::services::callback::CallbackEvent;
use crate::services::registry::RegistryError;
use crate::services::token::TokenError;
use crate::storage::{StorageError, StorageNode};

/// Build the WOPI router (mounted under /wopi, no management auth)
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/files/:file_id", get(check_file_info).post(lock_operations))
        .route("/files/:file_id/contents", get(get_file).post(put_file))
}

/// WOPI protocol error, mapped to status and X-WOPI-* headers at the edge
#[derive(Debug)]
pub enum WopiError {
    /// Token malformed or signature check failed
    InvalidToken,
    /// Token or session past its expiry
    Expired,
    /// Presented token does not belong to this file's session
    TokenMismatch,
    /// Session or file missing
    NotFound,
    /// Write attempted without the edit permission; WOPI hides existence
    NotAuthorized,
    /// Lock state does not match; carries the current holder ("" when none)
    LockConflict(String),
    MissingLockHeader,
    MissingOverride,
    UnknownOverride(String),
    Storage(StorageError),
    Internal(anyhow::Error),
}

impl From<StorageError> for WopiError {
    fn from(e: StorageError) -> Self {
        WopiError::Storage(e)
    }
}

impl From<anyhow::Error> for WopiError {
    fn from(e: anyhow::Error) -> Self {
        WopiError::Internal(e)
    }
}

impl From<RegistryError> for WopiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::StorageNotFound { .. } | RegistryError::TenantNotFound(_) => {
                WopiError::NotFound
            }
            RegistryError::Storage(e) => WopiError::Storage(e),
            RegistryError::EditorDisabled(id) => {
                WopiError::Internal(anyhow::anyhow!("editor disabled for tenant '{}'", id))
            }
            RegistryError::Internal(e) => WopiError::Internal(e),
        }
    }
}

impl IntoResponse for WopiError {
    fn into_response(self) -> Response {
        match self {
            WopiError::InvalidToken => {
                (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_token"})))
                    .into_response()
            }
            WopiError::Expired => {
                (StatusCode::UNAUTHORIZED, Json(json!({"error": "expired"}))).into_response()
            }
            WopiError::TokenMismatch => {
                (StatusCode::UNAUTHORIZED, Json(json!({"error": "token_mismatch"})))
                    .into_response()
            }
            WopiError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response()
            }
            WopiError::NotAuthorized => (
                StatusCode::NOT_FOUND,
                [("x-wopi-servererror", "NotAuthorized".to_string())],
                Json(json!({"error": "not_authorized"})),
            )
                .into_response(),
            WopiError::LockConflict(existing) => (
                StatusCode::CONFLICT,
                [("x-wopi-lock", existing)],
                (),
            )
                .into_response(),
            WopiError::MissingLockHeader => (
                StatusCode::BAD_REQUEST,
                [("x-wopi-servererror", "MissingLockHeader".to_string())],
                (),
            )
                .into_response(),
            WopiError::MissingOverride => (
                StatusCode::BAD_REQUEST,
                [("x-wopi-servererror", "MissingOverride".to_string())],
                (),
            )
                .into_response(),
            WopiError::UnknownOverride(name) => (
                StatusCode::BAD_REQUEST,
                [("x-wopi-servererror", format!("UnknownOverride: {}", name))],
                (),
            )
                .into_response(),
            WopiError::Storage(e) => match e {
                StorageError::NotFound(_) | StorageError::InvalidPath(_) => {
                    (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response()
                }
                StorageError::UnsupportedCapability(op) => (
                    StatusCode::NOT_IMPLEMENTED,
                    [("x-wopi-servererror", format!("Unsupported: {}", op))],
                    (),
                )
                    .into_response(),
                StorageError::UnsupportedProtocol(protocol) => (
                    StatusCode::NOT_IMPLEMENTED,
                    [("x-wopi-servererror", format!("UnsupportedProtocol: {}", protocol))],
                    (),
                )
                    .into_response(),
                other => {
                    tracing::error!("Storage failure: {}", other);
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            },
            WopiError::Internal(e) => {
                tracing::error!("WOPI handler failed: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// `access_token` query parameter required by every WOPI endpoint
#[derive(Debug, Deserialize)]
pub struct AccessTokenQuery {
    pub access_token: String,
}

/// WOPI CheckFileInfo response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckFileInfo {
    pub base_file_name: String,
    pub size: u64,
    pub owner_id: String,
    pub user_id: String,
    pub user_friendly_name: String,
    pub version: String,
    pub user_can_write: bool,
    pub user_can_not_write_relative: bool,
    pub supports_locks: bool,
    pub supports_update: bool,
}

/// Common preamble: token signature, session lookup, token/expiry cross-check
async fn authenticate(
    state: &AppState,
    file_id: &str,
    access_token: &str,
) -> Result<Session, WopiError> {
    state.tokens.validate(access_token).map_err(|e| match e {
        TokenError::Expired => WopiError::Expired,
        TokenError::Invalid => WopiError::InvalidToken,
    })?;

    let session = state
        .session_repo
        .get_by_file_id(file_id)
        .await?
        .ok_or(WopiError::NotFound)?;

    if session.access_token != access_token {
        // A valid token used against another session's file_id
        state
            .audit
            .record(
                &session.tenant_id,
                Some(&session.account),
                session.user.as_deref(),
                "wopi.denied",
                json!({"file_id": file_id, "reason": "token_mismatch"}),
            )
            .await;
        return Err(WopiError::TokenMismatch);
    }

    if session.is_expired() {
        return Err(WopiError::Expired);
    }

    Ok(session)
}

/// Version tag for a node: newest version id when the backend versions,
/// otherwise the whole-second mtime. A not-yet-materialized file is "v0".
async fn version_tag(node: &StorageNode) -> Result<String, WopiError> {
    if node.capabilities().versioning {
        let versions = node.versions().await?;
        if let Some(latest) = versions.first() {
            return Ok(latest.version_id.clone());
        }
    }

    match node.mtime().await {
        Ok(mtime) => Ok(format!("v{}", mtime.timestamp())),
        Err(StorageError::NotFound(_)) => Ok("v0".to_string()),
        Err(e) => Err(e.into()),
    }
}

/// Dispatch a callback for a session, resolving its tenant
async fn notify(state: &AppState, session: &Session, event: CallbackEvent, extras: Value) {
    match state.registry.get_tenant(&session.tenant_id).await {
        Ok(tenant) => {
            state.callbacks.dispatch(&tenant, session, event, extras);
        }
        Err(e) => {
            tracing::warn!(
                "Skipping {} callback, tenant lookup failed: {}",
                event.as_str(),
                e
            );
        }
    }
}

/// GET /wopi/files/{file_id} - CheckFileInfo
async fn check_file_info(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(query): Query<AccessTokenQuery>,
) -> Result<Response, WopiError> {
    let session = authenticate(&state, &file_id, &query.access_token).await?;

    let node = state
        .registry
        .resolve_node(&session.tenant_id, &session.storage_name, &session.file_path)
        .await?;

    // A session may precede its file: report size 0 until the first save
    let size = if node.exists().await? {
        node.size().await?
    } else {
        0
    };
    let version = version_tag(&node).await?;

    let info = CheckFileInfo {
        base_file_name: node.basename(),
        size,
        owner_id: session.tenant_id.clone(),
        user_id: session.display_name().to_string(),
        user_friendly_name: session.display_name().to_string(),
        version,
        user_can_write: session.can_write(),
        user_can_not_write_relative: true,
        supports_locks: true,
        supports_update: true,
    };

    state.session_repo.touch(&session.id, Utc::now()).await?;
    state
        .audit
        .record(
            &session.tenant_id,
            Some(&session.account),
            session.user.as_deref(),
            "wopi.check_file_info",
            json!({"file_id": file_id, "file_path": session.file_path, "size": size}),
        )
        .await;

    Ok(Json(info).into_response())
}

/// GET /wopi/files/{file_id}/contents - GetFile
async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(query): Query<AccessTokenQuery>,
) -> Result<Response, WopiError> {
    let session = authenticate(&state, &file_id, &query.access_token).await?;

    let node = state
        .registry
        .resolve_node(&session.tenant_id, &session.storage_name, &session.file_path)
        .await?;

    let content = node.read_bytes().await?;
    let version = version_tag(&node).await?;

    state.session_repo.touch(&session.id, Utc::now()).await?;
    state
        .audit
        .record(
            &session.tenant_id,
            Some(&session.account),
            session.user.as_deref(),
            "wopi.get_file",
            json!({"file_id": file_id, "file_path": session.file_path, "size": content.len()}),
        )
        .await;

    // document_opened fires on the first successful GetFile only
    if state.session_repo.mark_opened(&session.id, Utc::now()).await? {
        notify(&state, &session, CallbackEvent::DocumentOpened, json!({})).await;
    }

    Ok((
        [
            ("content-type", "application/octet-stream".to_string()),
            ("x-wopi-itemversion", version),
        ],
        content,
    )
        .into_response())
}

/// POST /wopi/files/{file_id}/contents - PutFile
async fn put_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(query): Query<AccessTokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WopiError> {
    let session = authenticate(&state, &file_id, &query.access_token).await?;

    if !session.can_write() {
        state
            .audit
            .record(
                &session.tenant_id,
                Some(&session.account),
                session.user.as_deref(),
                "wopi.denied",
                json!({"file_id": file_id, "reason": "not_authorized"}),
            )
            .await;
        return Err(WopiError::NotAuthorized);
    }

    let node = state
        .registry
        .resolve_node(&session.tenant_id, &session.storage_name, &session.file_path)
        .await?;

    let presented = lock_header(&headers);
    let current = state.session_repo.get_lock(&session.id).await?;

    match (&current, &presented) {
        // Unlocked, no lock presented: only a new/empty document may be
        // written without a lock
        (None, None) => {
            let size = match node.size().await {
                Ok(size) => size,
                Err(StorageError::NotFound(_)) => 0,
                Err(e) => return Err(e.into()),
            };
            if size != 0 {
                return Err(WopiError::LockConflict(String::new()));
            }
        }
        (Some(current), Some(presented)) if current == presented => {}
        (Some(current), _) => {
            return Err(WopiError::LockConflict(current.clone()));
        }
        (None, Some(_)) => {
            return Err(WopiError::LockConflict(String::new()));
        }
    }

    node.write_bytes(&body).await?;
    let version = version_tag(&node).await?;

    state.session_repo.touch(&session.id, Utc::now()).await?;
    state
        .audit
        .record(
            &session.tenant_id,
            Some(&session.account),
            session.user.as_deref(),
            "wopi.put_file",
            json!({"file_id": file_id, "file_path": session.file_path, "size": body.len()}),
        )
        .await;
    notify(
        &state,
        &session,
        CallbackEvent::DocumentSaved,
        json!({"size": body.len()}),
    )
    .await;

    Ok(([("x-wopi-itemversion", version)], ()).into_response())
}

/// POST /wopi/files/{file_id} - lock operations via X-WOPI-Override
async fn lock_operations(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(query): Query<AccessTokenQuery>,
    headers: HeaderMap,
) -> Result<Response, WopiError> {
    let session = authenticate(&state, &file_id, &query.access_token).await?;

    let override_name = headers
        .get("x-wopi-override")
        .and_then(|v| v.to_str().ok())
        .ok_or(WopiError::MissingOverride)?
        .to_string();

    let response = match override_name.as_str() {
        "LOCK" => lock(&state, &session, &headers).await?,
        "UNLOCK" => unlock(&state, &session, &headers).await?,
        "REFRESH_LOCK" => refresh_lock(&state, &session, &headers).await?,
        "GET_LOCK" => get_lock(&state, &session).await?,
        other => return Err(WopiError::UnknownOverride(other.to_string())),
    };

    state.session_repo.touch(&session.id, Utc::now()).await?;
    Ok(response)
}

async fn lock(
    state: &AppState,
    session: &Session,
    headers: &HeaderMap,
) -> Result<Response, WopiError> {
    let lock_id = lock_header(headers).ok_or(WopiError::MissingLockHeader)?;
    let ttl = Duration::seconds(state.lock_ttl_seconds as i64);

    match state.session_repo.set_lock(&session.id, &lock_id, ttl).await? {
        LockOutcome::Acquired => {
            state
                .audit
                .record(
                    &session.tenant_id,
                    Some(&session.account),
                    session.user.as_deref(),
                    "wopi.lock",
                    json!({"file_path": session.file_path, "lock_id": lock_id}),
                )
                .await;
            notify(
                state,
                session,
                CallbackEvent::LockAcquired,
                json!({"lock_id": lock_id}),
            )
            .await;
            Ok(([("x-wopi-lock", lock_id)], ()).into_response())
        }
        LockOutcome::AlreadyLocked(existing) => Err(WopiError::LockConflict(existing)),
    }
}

async fn unlock(
    state: &AppState,
    session: &Session,
    headers: &HeaderMap,
) -> Result<Response, WopiError> {
    let lock_id = lock_header(headers).ok_or(WopiError::MissingLockHeader)?;

    match state.session_repo.release_lock(&session.id, &lock_id).await? {
        ReleaseOutcome::Released => {
            state
                .audit
                .record(
                    &session.tenant_id,
                    Some(&session.account),
                    session.user.as_deref(),
                    "wopi.unlock",
                    json!({"file_path": session.file_path, "lock_id": lock_id}),
                )
                .await;
            notify(
                state,
                session,
                CallbackEvent::LockReleased,
                json!({"lock_id": lock_id}),
            )
            .await;
            Ok(StatusCode::OK.into_response())
        }
        ReleaseOutcome::Mismatch(existing) => Err(WopiError::LockConflict(existing)),
        ReleaseOutcome::NotLocked => Err(WopiError::LockConflict(String::new())),
    }
}

async fn refresh_lock(
    state: &AppState,
    session: &Session,
    headers: &HeaderMap,
) -> Result<Response, WopiError> {
    let lock_id = lock_header(headers).ok_or(WopiError::MissingLockHeader)?;

    // Refresh requires the presented lock to be the current one; an
    // unlocked (or expired) session cannot be refreshed into a lock.
    match state.session_repo.get_lock(&session.id).await? {
        Some(current) if current == lock_id => {}
        Some(current) => return Err(WopiError::LockConflict(current)),
        None => return Err(WopiError::LockConflict(String::new())),
    }

    let ttl = Duration::seconds(state.lock_ttl_seconds as i64);
    match state.session_repo.set_lock(&session.id, &lock_id, ttl).await? {
        LockOutcome::Acquired => {
            state
                .audit
                .record(
                    &session.tenant_id,
                    Some(&session.account),
                    session.user.as_deref(),
                    "wopi.refresh_lock",
                    json!({"file_path": session.file_path, "lock_id": lock_id}),
                )
                .await;
            Ok(([("x-wopi-lock", lock_id)], ()).into_response())
        }
        LockOutcome::AlreadyLocked(existing) => Err(WopiError::LockConflict(existing)),
    }
}

async fn get_lock(state: &AppState, session: &Session) -> Result<Response, WopiError> {
    let current = state.session_repo.get_lock(&session.id).await?;
    Ok(([("x-wopi-lock", current.unwrap_or_default())], ()).into_response())
}

/// X-WOPI-Lock header value; empty counts as absent
fn lock_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-wopi-lock")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}
