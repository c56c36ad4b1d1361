//! Tenant repository

use crate::models::{EditorMode, Tenant};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Tenant repository trait
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Insert or replace a tenant row
    async fn upsert(&self, tenant: &Tenant) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Tenant>>;

    /// Look up a tenant by the SHA-256 hash of its API token
    async fn get_by_api_token_hash(&self, hash: &str) -> Result<Option<Tenant>>;

    async fn list(&self, active_only: bool) -> Result<Vec<Tenant>>;

    /// Set or clear the API token hash. Returns false when the tenant is missing.
    async fn set_api_token_hash(&self, id: &str, hash: Option<&str>) -> Result<bool>;

    /// Delete a tenant. Returns false when the tenant is missing.
    async fn remove(&self, id: &str) -> Result<bool>;
}

/// SQLx-based tenant repository implementation
pub struct SqlxTenantRepository {
    pool: SqlitePool,
}

impl SqlxTenantRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: SqlitePool) -> Arc<dyn TenantRepository> {
        Arc::new(Self::new(pool))
    }
}

const TENANT_COLUMNS: &str = "id, name, active, editor_mode, editor_url, \
     callback_base_url, callback_auth, api_token_hash, created_at";

#[async_trait]
impl TenantRepository for SqlxTenantRepository {
    async fn upsert(&self, tenant: &Tenant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenants
                (id, name, active, editor_mode, editor_url,
                 callback_base_url, callback_auth, api_token_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                active = excluded.active,
                editor_mode = excluded.editor_mode,
                editor_url = excluded.editor_url,
                callback_base_url = excluded.callback_base_url,
                callback_auth = excluded.callback_auth,
                api_token_hash = excluded.api_token_hash
            "#,
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .bind(tenant.active)
        .bind(tenant.editor_mode.to_string())
        .bind(&tenant.editor_url)
        .bind(&tenant.callback_base_url)
        .bind(&tenant.callback_auth)
        .bind(&tenant.api_token_hash)
        .bind(tenant.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert tenant")?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Tenant>> {
        let sql = format!("SELECT {} FROM tenants WHERE id = ?", TENANT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get tenant")?;

        row.map(|r| row_to_tenant(&r)).transpose()
    }

    async fn get_by_api_token_hash(&self, hash: &str) -> Result<Option<Tenant>> {
        let sql = format!(
            "SELECT {} FROM tenants WHERE api_token_hash = ?",
            TENANT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get tenant by API token")?;

        row.map(|r| row_to_tenant(&r)).transpose()
    }

    async fn list(&self, active_only: bool) -> Result<Vec<Tenant>> {
        let rows = if active_only {
            let sql = format!(
                "SELECT {} FROM tenants WHERE active = 1 ORDER BY id",
                TENANT_COLUMNS
            );
            sqlx::query(&sql).fetch_all(&self.pool).await
        } else {
            let sql = format!("SELECT {} FROM tenants ORDER BY id", TENANT_COLUMNS);
            sqlx::query(&sql).fetch_all(&self.pool).await
        }
        .context("Failed to list tenants")?;

        rows.iter().map(row_to_tenant).collect()
    }

    async fn set_api_token_hash(&self, id: &str, hash: Option<&str>) -> Result<bool> {
        let result = sqlx::query("UPDATE tenants SET api_token_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to set API token hash")?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tenants WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete tenant")?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_tenant(row: &sqlx::sqlite::SqliteRow) -> Result<Tenant> {
    let editor_mode: String = row.get("editor_mode");
    let editor_mode = EditorMode::from_str(&editor_mode)
        .map_err(|e| anyhow::anyhow!("Invalid tenant row: {}", e))?;

    Ok(Tenant {
        id: row.get("id"),
        name: row.get("name"),
        active: row.get("active"),
        editor_mode,
        editor_url: row.get("editor_url"),
        callback_base_url: row.get("callback_base_url"),
        callback_auth: row.get("callback_auth"),
        api_token_hash: row.get("api_token_hash"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use chrono::Utc;

    async fn setup_test_repo() -> SqlxTenantRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxTenantRepository::new(pool)
    }

    fn test_tenant(id: &str) -> Tenant {
        Tenant {
            id: id.to_string(),
            name: Some("Acme Corp".to_string()),
            active: true,
            editor_mode: EditorMode::Pool,
            editor_url: None,
            callback_base_url: Some("https://app.acme.example".to_string()),
            callback_auth: None,
            api_token_hash: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let repo = setup_test_repo().await;
        let tenant = test_tenant("acme");
        repo.upsert(&tenant).await.unwrap();

        let stored = repo.get("acme").await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("Acme Corp"));
        assert_eq!(stored.editor_mode, EditorMode::Pool);
        assert!(stored.active);
    }

    #[tokio::test]
    async fn test_upsert_updates_existing() {
        let repo = setup_test_repo().await;
        let mut tenant = test_tenant("acme");
        repo.upsert(&tenant).await.unwrap();

        tenant.editor_mode = EditorMode::Own;
        tenant.editor_url = Some("https://collabora.acme.example".to_string());
        repo.upsert(&tenant).await.unwrap();

        let stored = repo.get("acme").await.unwrap().unwrap();
        assert_eq!(stored.editor_mode, EditorMode::Own);
        assert_eq!(
            stored.editor_url.as_deref(),
            Some("https://collabora.acme.example")
        );
    }

    #[tokio::test]
    async fn test_get_by_api_token_hash() {
        let repo = setup_test_repo().await;
        repo.upsert(&test_tenant("acme")).await.unwrap();

        assert!(repo.set_api_token_hash("acme", Some("abc123")).await.unwrap());

        let found = repo.get_by_api_token_hash("abc123").await.unwrap().unwrap();
        assert_eq!(found.id, "acme");

        assert!(repo.get_by_api_token_hash("missing").await.unwrap().is_none());

        // Revoke
        assert!(repo.set_api_token_hash("acme", None).await.unwrap());
        assert!(repo.get_by_api_token_hash("abc123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_active_only() {
        let repo = setup_test_repo().await;
        let mut inactive = test_tenant("old");
        inactive.active = false;
        repo.upsert(&test_tenant("acme")).await.unwrap();
        repo.upsert(&inactive).await.unwrap();

        assert_eq!(repo.list(false).await.unwrap().len(), 2);
        let active = repo.list(true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "acme");
    }

    #[tokio::test]
    async fn test_remove() {
        let repo = setup_test_repo().await;
        repo.upsert(&test_tenant("acme")).await.unwrap();

        assert!(repo.remove("acme").await.unwrap());
        assert!(!repo.remove("acme").await.unwrap());
        assert!(repo.get("acme").await.unwrap().is_none());
    }
}
