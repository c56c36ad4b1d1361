//! Command log repository
//!
//! Append-only audit trail. Rows are never updated or deleted by the
//! service.

use crate::models::CommandLogEntry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

/// Command log repository trait
#[async_trait]
pub trait CommandLogRepository: Send + Sync {
    /// Append one entry. `entry.id` is ignored on insert.
    async fn append(&self, entry: &CommandLogEntry) -> Result<()>;

    /// Most recent entries for a tenant, newest first
    async fn list_recent(&self, tenant_id: &str, limit: i64) -> Result<Vec<CommandLogEntry>>;
}

/// SQLx-based command log repository implementation
pub struct SqlxCommandLogRepository {
    pool: SqlitePool,
}

impl SqlxCommandLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: SqlitePool) -> Arc<dyn CommandLogRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl CommandLogRepository for SqlxCommandLogRepository {
    async fn append(&self, entry: &CommandLogEntry) -> Result<()> {
        let details =
            serde_json::to_string(&entry.details).context("Failed to encode log details")?;

        sqlx::query(
            r#"
            INSERT INTO command_log (tenant_id, account, user, command, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.tenant_id)
        .bind(&entry.account)
        .bind(&entry.user)
        .bind(&entry.command)
        .bind(details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to append command log entry")?;
        Ok(())
    }

    async fn list_recent(&self, tenant_id: &str, limit: i64) -> Result<Vec<CommandLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, account, user, command, details, created_at \
             FROM command_log WHERE tenant_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list command log entries")?;

        rows.iter().map(row_to_entry).collect()
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<CommandLogEntry> {
    let details: String = row.get("details");
    let details: serde_json::Value =
        serde_json::from_str(&details).context("Failed to decode log details")?;

    Ok(CommandLogEntry {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        account: row.get("account"),
        user: row.get("user"),
        command: row.get("command"),
        details,
        created_at: row.get("created_at"),
    })
}
