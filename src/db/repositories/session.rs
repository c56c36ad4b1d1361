//! Session repository
//!
//! Database operations for WOPI editing sessions, including the lock
//! sub-state. Lock transitions are single conditional UPDATE statements
//! (compare-and-set) so that concurrent LOCK/UNLOCK/PutFile requests on the
//! same session serialize at the database row: of two racing acquisitions
//! with different lock ids exactly one UPDATE matches.

use crate::models::{Permission, Session};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

/// Error returned by `insert`
#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    /// Duplicate `file_id` or `access_token`; the caller regenerates and retries
    #[error("duplicate file_id or access_token")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Outcome of `set_lock`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// Another unexpired lock holds the session
    AlreadyLocked(String),
}

/// Outcome of `release_lock`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// A different unexpired lock holds the session
    Mismatch(String),
    /// No lock held (or the lock had already expired)
    NotLocked,
}

/// Expired-session counts reported by `cleanup` in dry-run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupPreview {
    pub expired: u64,
    pub locked: u64,
}

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new session. Fails with `InsertError::Conflict` when the
    /// `file_id` or `access_token` collides with an existing row.
    async fn insert(&self, session: &Session) -> Result<(), InsertError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>>;

    async fn get_by_file_id(&self, file_id: &str) -> Result<Option<Session>>;

    async fn get_by_token(&self, access_token: &str) -> Result<Option<Session>>;

    /// Update `last_accessed_at`
    async fn touch(&self, id: &str, ts: DateTime<Utc>) -> Result<()>;

    /// Record the first successful GetFile. Returns true exactly once per
    /// session; later calls are no-ops returning false.
    async fn mark_opened(&self, id: &str, ts: DateTime<Utc>) -> Result<bool>;

    /// Acquire or refresh a lock. Succeeds when the session is unlocked,
    /// the current lock has expired, or the current lock equals `lock_id`
    /// (idempotent refresh). Otherwise reports the holder.
    async fn set_lock(&self, id: &str, lock_id: &str, ttl: Duration) -> Result<LockOutcome>;

    /// Release a lock held under `lock_id`. Expired locks count as absent.
    async fn release_lock(&self, id: &str, lock_id: &str) -> Result<ReleaseOutcome>;

    /// Current lock id, or None when unlocked or the lock has expired.
    /// An expired lock is cleared as a side effect.
    async fn get_lock(&self, id: &str) -> Result<Option<String>>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Sessions with `expires_at > now`, newest first
    async fn list_active(&self, tenant_id: Option<&str>) -> Result<Vec<Session>>;

    /// Sessions with `expires_at <= now`
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Session>>;

    /// Counts for a cleanup dry run
    async fn count_expired(&self, now: DateTime<Utc>) -> Result<CleanupPreview>;

    /// Delete all sessions with `expires_at <= now`; returns the count
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based session repository implementation
pub struct SqlxSessionRepository {
    pool: SqlitePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: SqlitePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

const SESSION_COLUMNS: &str = "id, tenant_id, storage_name, file_path, file_id, access_token, \
     permissions, account, user, origin_connection_id, origin_page_id, \
     lock_id, lock_expires_at, created_at, expires_at, last_accessed_at, opened_at";

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn insert(&self, session: &Session) -> Result<(), InsertError> {
        let permissions = permissions_to_json(&session.permissions).map_err(InsertError::Other)?;

        let result = sqlx::query(
            r#"
            INSERT INTO sessions
                (id, tenant_id, storage_name, file_path, file_id, access_token,
                 permissions, account, user, origin_connection_id, origin_page_id,
                 lock_id, lock_expires_at, created_at, expires_at, last_accessed_at, opened_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.tenant_id)
        .bind(&session.storage_name)
        .bind(&session.file_path)
        .bind(&session.file_id)
        .bind(&session.access_token)
        .bind(permissions)
        .bind(&session.account)
        .bind(&session.user)
        .bind(&session.origin_connection_id)
        .bind(&session.origin_page_id)
        .bind(&session.lock_id)
        .bind(session.lock_expires_at)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.last_accessed_at)
        .bind(session.opened_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if let Some(db_err) = e.as_database_error() {
                    if db_err.is_unique_violation() {
                        return Err(InsertError::Conflict);
                    }
                }
                Err(InsertError::Other(
                    anyhow::Error::new(e).context("Failed to insert session"),
                ))
            }
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get session by id")?;

        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn get_by_file_id(&self, file_id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE file_id = ?", SESSION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get session by file_id")?;

        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn get_by_token(&self, access_token: &str) -> Result<Option<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE access_token = ?",
            SESSION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(access_token)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get session by access token")?;

        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn touch(&self, id: &str, ts: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_accessed_at = ? WHERE id = ?")
            .bind(ts)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to touch session")?;
        Ok(())
    }

    async fn mark_opened(&self, id: &str, ts: DateTime<Utc>) -> Result<bool> {
        let result =
            sqlx::query("UPDATE sessions SET opened_at = ? WHERE id = ? AND opened_at IS NULL")
                .bind(ts)
                .bind(id)
                .execute(&self.pool)
                .await
                .context("Failed to mark session opened")?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_lock(&self, id: &str, lock_id: &str, ttl: Duration) -> Result<LockOutcome> {
        let now = Utc::now();
        let expires_at = now + ttl;

        // Compare-and-set: matches when unlocked, expired, or same lock id.
        let result = sqlx::query(
            r#"
            UPDATE sessions SET lock_id = ?, lock_expires_at = ?
            WHERE id = ?
              AND (lock_id IS NULL OR lock_id = ? OR lock_expires_at <= ?)
            "#,
        )
        .bind(lock_id)
        .bind(expires_at)
        .bind(id)
        .bind(lock_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to set lock")?;

        if result.rows_affected() > 0 {
            return Ok(LockOutcome::Acquired);
        }

        let existing = self
            .get_lock(id)
            .await?
            .unwrap_or_default();
        Ok(LockOutcome::AlreadyLocked(existing))
    }

    async fn release_lock(&self, id: &str, lock_id: &str) -> Result<ReleaseOutcome> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE sessions SET lock_id = NULL, lock_expires_at = NULL
            WHERE id = ? AND lock_id = ? AND lock_expires_at > ?
            "#,
        )
        .bind(id)
        .bind(lock_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to release lock")?;

        if result.rows_affected() > 0 {
            return Ok(ReleaseOutcome::Released);
        }

        match self.get_lock(id).await? {
            Some(existing) => Ok(ReleaseOutcome::Mismatch(existing)),
            None => Ok(ReleaseOutcome::NotLocked),
        }
    }

    async fn get_lock(&self, id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT lock_id, lock_expires_at FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get lock")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lock_id: Option<String> = row.get("lock_id");
        let lock_expires_at: Option<DateTime<Utc>> = row.get("lock_expires_at");

        match (lock_id, lock_expires_at) {
            (Some(lock), Some(expires)) if expires > Utc::now() => Ok(Some(lock)),
            (Some(_), _) => {
                // Lock expired; clear it so later reads are consistent
                sqlx::query(
                    "UPDATE sessions SET lock_id = NULL, lock_expires_at = NULL \
                     WHERE id = ? AND lock_expires_at <= ?",
                )
                .bind(id)
                .bind(Utc::now())
                .execute(&self.pool)
                .await
                .context("Failed to clear expired lock")?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    async fn list_active(&self, tenant_id: Option<&str>) -> Result<Vec<Session>> {
        let now = Utc::now();
        let rows = match tenant_id {
            Some(tenant) => {
                let sql = format!(
                    "SELECT {} FROM sessions WHERE tenant_id = ? AND expires_at > ? \
                     ORDER BY created_at DESC",
                    SESSION_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(tenant)
                    .bind(now)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM sessions WHERE expires_at > ? ORDER BY created_at DESC",
                    SESSION_COLUMNS
                );
                sqlx::query(&sql).bind(now).fetch_all(&self.pool).await
            }
        }
        .context("Failed to list active sessions")?;

        rows.iter().map(row_to_session).collect()
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE expires_at <= ? ORDER BY expires_at",
            SESSION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list expired sessions")?;

        rows.iter().map(row_to_session).collect()
    }

    async fn count_expired(&self, now: DateTime<Utc>) -> Result<CleanupPreview> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS expired,
                   SUM(CASE WHEN lock_id IS NOT NULL AND lock_expires_at > ? THEN 1 ELSE 0 END)
                       AS locked
            FROM sessions WHERE expires_at <= ?
            "#,
        )
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count expired sessions")?;

        let expired: i64 = row.get("expired");
        let locked: Option<i64> = row.get("locked");
        Ok(CleanupPreview {
            expired: expired as u64,
            locked: locked.unwrap_or(0) as u64,
        })
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Failed to delete expired sessions")?;
        Ok(result.rows_affected())
    }
}

fn permissions_to_json(permissions: &[Permission]) -> Result<String> {
    serde_json::to_string(permissions).context("Failed to encode permissions")
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
    let permissions: String = row.get("permissions");
    let permissions: Vec<Permission> =
        serde_json::from_str(&permissions).context("Failed to decode permissions")?;

    Ok(Session {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        storage_name: row.get("storage_name"),
        file_path: row.get("file_path"),
        file_id: row.get("file_id"),
        access_token: row.get("access_token"),
        permissions,
        account: row.get("account"),
        user: row.get("user"),
        origin_connection_id: row.get("origin_connection_id"),
        origin_page_id: row.get("origin_page_id"),
        lock_id: row.get("lock_id"),
        lock_expires_at: row.get("lock_expires_at"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        last_accessed_at: row.get("last_accessed_at"),
        opened_at: row.get("opened_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use uuid::Uuid;

    async fn setup_test_repo() -> (SqlitePool, SqlxSessionRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        sqlx::query("INSERT INTO tenants (id, name) VALUES ('acme', 'Acme Corp')")
            .execute(&pool)
            .await
            .expect("Failed to create test tenant");
        let repo = SqlxSessionRepository::new(pool.clone());
        (pool, repo)
    }

    fn test_session(ttl_seconds: i64) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4().to_string(),
            tenant_id: "acme".to_string(),
            storage_name: "docs".to_string(),
            file_path: "a/b.xlsx".to_string(),
            file_id: Uuid::new_v4().to_string(),
            access_token: Uuid::new_v4().to_string(),
            permissions: vec![Permission::View, Permission::Edit],
            account: "sales".to_string(),
            user: Some("Mario Rossi".to_string()),
            origin_connection_id: Some("conn-1".to_string()),
            origin_page_id: None,
            lock_id: None,
            lock_expires_at: None,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_seconds),
            last_accessed_at: now,
            opened_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookups() {
        let (_pool, repo) = setup_test_repo().await;
        let session = test_session(3600);
        repo.insert(&session).await.unwrap();

        let by_id = repo.get_by_id(&session.id).await.unwrap().unwrap();
        assert_eq!(by_id.file_id, session.file_id);
        assert_eq!(by_id.permissions, session.permissions);
        assert_eq!(by_id.user.as_deref(), Some("Mario Rossi"));

        let by_file = repo.get_by_file_id(&session.file_id).await.unwrap().unwrap();
        assert_eq!(by_file.id, session.id);
        assert_eq!(by_file.access_token, session.access_token);

        let by_token = repo.get_by_token(&session.access_token).await.unwrap().unwrap();
        assert_eq!(by_token.id, session.id);
    }

    #[tokio::test]
    async fn test_insert_duplicate_file_id_conflicts() {
        let (_pool, repo) = setup_test_repo().await;
        let session = test_session(3600);
        repo.insert(&session).await.unwrap();

        let mut dup = test_session(3600);
        dup.file_id = session.file_id.clone();

        match repo.insert(&dup).await {
            Err(InsertError::Conflict) => {}
            other => panic!("expected Conflict, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_insert_duplicate_token_conflicts() {
        let (_pool, repo) = setup_test_repo().await;
        let session = test_session(3600);
        repo.insert(&session).await.unwrap();

        let mut dup = test_session(3600);
        dup.access_token = session.access_token.clone();

        assert!(matches!(
            repo.insert(&dup).await,
            Err(InsertError::Conflict)
        ));
    }

    #[tokio::test]
    async fn test_lock_acquire_and_conflict() {
        let (_pool, repo) = setup_test_repo().await;
        let session = test_session(3600);
        repo.insert(&session).await.unwrap();

        let outcome = repo
            .set_lock(&session.id, "A", Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(outcome, LockOutcome::Acquired);

        let outcome = repo
            .set_lock(&session.id, "B", Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(outcome, LockOutcome::AlreadyLocked("A".to_string()));

        // Same id refreshes
        let outcome = repo
            .set_lock(&session.id, "A", Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(outcome, LockOutcome::Acquired);
    }

    #[tokio::test]
    async fn test_release_lock_requires_match() {
        let (_pool, repo) = setup_test_repo().await;
        let session = test_session(3600);
        repo.insert(&session).await.unwrap();

        repo.set_lock(&session.id, "A", Duration::minutes(30))
            .await
            .unwrap();

        let outcome = repo.release_lock(&session.id, "B").await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::Mismatch("A".to_string()));

        let outcome = repo.release_lock(&session.id, "A").await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::Released);

        let outcome = repo.release_lock(&session.id, "A").await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::NotLocked);
    }

    #[tokio::test]
    async fn test_expired_lock_reads_as_absent_and_is_stealable() {
        let (_pool, repo) = setup_test_repo().await;
        let session = test_session(3600);
        repo.insert(&session).await.unwrap();

        // Lock that is already past its expiry
        repo.set_lock(&session.id, "A", Duration::seconds(-1))
            .await
            .unwrap();

        assert_eq!(repo.get_lock(&session.id).await.unwrap(), None);

        // Another lock id can take over
        let outcome = repo
            .set_lock(&session.id, "B", Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(outcome, LockOutcome::Acquired);
        assert_eq!(
            repo.get_lock(&session.id).await.unwrap(),
            Some("B".to_string())
        );
    }

    #[tokio::test]
    async fn test_release_expired_lock_is_not_locked() {
        let (_pool, repo) = setup_test_repo().await;
        let session = test_session(3600);
        repo.insert(&session).await.unwrap();

        repo.set_lock(&session.id, "A", Duration::seconds(-1))
            .await
            .unwrap();

        let outcome = repo.release_lock(&session.id, "A").await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::NotLocked);
    }

    #[tokio::test]
    async fn test_concurrent_lock_attempts_one_winner() {
        let (_pool, repo) = setup_test_repo().await;
        let session = test_session(3600);
        repo.insert(&session).await.unwrap();

        let repo = Arc::new(repo);
        let mut handles = Vec::new();
        for lock_id in ["A", "B"] {
            let repo = repo.clone();
            let id = session.id.clone();
            handles.push(tokio::spawn(async move {
                repo.set_lock(&id, lock_id, Duration::minutes(30)).await
            }));
        }

        let mut acquired = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                LockOutcome::Acquired => acquired += 1,
                LockOutcome::AlreadyLocked(holder) => {
                    assert!(holder == "A" || holder == "B");
                    rejected += 1;
                }
            }
        }
        assert_eq!(acquired, 1);
        assert_eq!(rejected, 1);
    }

    #[tokio::test]
    async fn test_touch_updates_last_accessed() {
        let (_pool, repo) = setup_test_repo().await;
        let session = test_session(3600);
        repo.insert(&session).await.unwrap();

        let later = Utc::now() + Duration::minutes(5);
        repo.touch(&session.id, later).await.unwrap();

        let stored = repo.get_by_id(&session.id).await.unwrap().unwrap();
        assert!(stored.last_accessed_at > session.last_accessed_at);
    }

    #[tokio::test]
    async fn test_mark_opened_fires_once() {
        let (_pool, repo) = setup_test_repo().await;
        let session = test_session(3600);
        repo.insert(&session).await.unwrap();

        assert!(repo.mark_opened(&session.id, Utc::now()).await.unwrap());
        assert!(!repo.mark_opened(&session.id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_active_excludes_expired() {
        let (_pool, repo) = setup_test_repo().await;

        let live = test_session(3600);
        let dead = test_session(-60);
        repo.insert(&live).await.unwrap();
        repo.insert(&dead).await.unwrap();

        let active = repo.list_active(None).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, live.id);

        let filtered = repo.list_active(Some("acme")).await.unwrap();
        assert_eq!(filtered.len(), 1);
        let none = repo.list_active(Some("other")).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_counts_and_deletes() {
        let (_pool, repo) = setup_test_repo().await;

        let live = test_session(3600);
        let mut dead_locked = test_session(-60);
        dead_locked.lock_id = Some("L1".to_string());
        dead_locked.lock_expires_at = Some(Utc::now() + Duration::minutes(10));
        let dead_plain = test_session(-60);

        repo.insert(&live).await.unwrap();
        repo.insert(&dead_locked).await.unwrap();
        repo.insert(&dead_plain).await.unwrap();

        let now = Utc::now();
        let preview = repo.count_expired(now).await.unwrap();
        assert_eq!(preview.expired, 2);
        assert_eq!(preview.locked, 1);

        let deleted = repo.delete_expired(now).await.unwrap();
        assert_eq!(deleted, 2);

        // Second sweep has nothing to do
        assert_eq!(repo.delete_expired(Utc::now()).await.unwrap(), 0);
        let active = repo.list_active(None).await.unwrap();
        assert_eq!(active.len(), 1);
    }
}
