//! Storage definition repository

use crate::models::{StorageProtocol, StorageRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Storage repository trait
#[async_trait]
pub trait StorageRepository: Send + Sync {
    /// Insert or replace a storage definition for a tenant
    async fn upsert(&self, record: &StorageRecord) -> Result<()>;

    async fn get(&self, tenant_id: &str, name: &str) -> Result<Option<StorageRecord>>;

    async fn list(&self, tenant_id: &str) -> Result<Vec<StorageRecord>>;

    /// Delete a storage definition. Returns false when it is missing.
    async fn remove(&self, tenant_id: &str, name: &str) -> Result<bool>;
}

/// SQLx-based storage repository implementation
pub struct SqlxStorageRepository {
    pool: SqlitePool,
}

impl SqlxStorageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: SqlitePool) -> Arc<dyn StorageRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl StorageRepository for SqlxStorageRepository {
    async fn upsert(&self, record: &StorageRecord) -> Result<()> {
        let config =
            serde_json::to_string(&record.config).context("Failed to encode storage config")?;

        sqlx::query(
            r#"
            INSERT INTO storages (tenant_id, name, protocol, config, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, name) DO UPDATE SET
                protocol = excluded.protocol,
                config = excluded.config
            "#,
        )
        .bind(&record.tenant_id)
        .bind(&record.name)
        .bind(record.protocol.to_string())
        .bind(config)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert storage")?;
        Ok(())
    }

    async fn get(&self, tenant_id: &str, name: &str) -> Result<Option<StorageRecord>> {
        let row = sqlx::query(
            "SELECT tenant_id, name, protocol, config, created_at \
             FROM storages WHERE tenant_id = ? AND name = ?",
        )
        .bind(tenant_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get storage")?;

        row.map(|r| row_to_storage(&r)).transpose()
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<StorageRecord>> {
        let rows = sqlx::query(
            "SELECT tenant_id, name, protocol, config, created_at \
             FROM storages WHERE tenant_id = ? ORDER BY name",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list storages")?;

        rows.iter().map(row_to_storage).collect()
    }

    async fn remove(&self, tenant_id: &str, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM storages WHERE tenant_id = ? AND name = ?")
            .bind(tenant_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .context("Failed to delete storage")?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_storage(row: &sqlx::sqlite::SqliteRow) -> Result<StorageRecord> {
    let protocol: String = row.get("protocol");
    let protocol = StorageProtocol::from_str(&protocol)
        .map_err(|e| anyhow::anyhow!("Invalid storage row: {}", e))?;

    let config: String = row.get("config");
    let config: serde_json::Value =
        serde_json::from_str(&config).context("Failed to decode storage config")?;

    Ok(StorageRecord {
        tenant_id: row.get("tenant_id"),
        name: row.get("name"),
        protocol,
        config,
        created_at: row.get("created_at"),
    })
}
