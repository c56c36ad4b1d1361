//! Tenant and storage registries
//!
//! The single place that dereferences opaque tenant and storage names into
//! physical resources. The WOPI handlers never touch storage configuration
//! directly; they ask the registry for a node.
//!
//! Tenant and storage rows are read-mostly, so lookups go through a short
//! TTL cache that administrative writes invalidate.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::MemoryCache;
use crate::db::repositories::{StorageRepository, TenantRepository};
use crate::models::{EditorMode, StorageRecord, Tenant};
use crate::storage::{open_storage, StorageError, StorageNode};

/// Registry resolution error
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tenant '{0}' not found")]
    TenantNotFound(String),

    #[error("document editing is disabled for tenant '{0}'")]
    EditorDisabled(String),

    #[error("storage '{name}' not found for tenant '{tenant_id}'")]
    StorageNotFound { tenant_id: String, name: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Resolves tenants, storages and editor URLs
pub struct Registry {
    tenants: Arc<dyn TenantRepository>,
    storages: Arc<dyn StorageRepository>,
    cache: MemoryCache,
    pool_editor_url: String,
}

impl Registry {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        storages: Arc<dyn StorageRepository>,
        pool_editor_url: String,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            tenants,
            storages,
            cache: MemoryCache::with_ttl(cache_ttl),
            pool_editor_url,
        }
    }

    /// Look up a tenant by id. Existence only; callers decide what an
    /// inactive tenant means for them.
    pub async fn get_tenant(&self, tenant_id: &str) -> Result<Tenant, RegistryError> {
        let key = format!("tenant:{}", tenant_id);
        if let Ok(Some(tenant)) = self.cache.get::<Tenant>(&key).await {
            return Ok(tenant);
        }

        let tenant = self
            .tenants
            .get(tenant_id)
            .await?
            .ok_or_else(|| RegistryError::TenantNotFound(tenant_id.to_string()))?;

        if let Err(e) = self.cache.set(&key, &tenant).await {
            tracing::debug!("Failed to cache tenant '{}': {}", tenant_id, e);
        }
        Ok(tenant)
    }

    /// Look up a storage definition within a tenant
    pub async fn get_storage(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> Result<StorageRecord, RegistryError> {
        let key = format!("storage:{}:{}", tenant_id, name);
        if let Ok(Some(record)) = self.cache.get::<StorageRecord>(&key).await {
            return Ok(record);
        }

        let record = self.storages.get(tenant_id, name).await?.ok_or_else(|| {
            RegistryError::StorageNotFound {
                tenant_id: tenant_id.to_string(),
                name: name.to_string(),
            }
        })?;

        if let Err(e) = self.cache.set(&key, &record).await {
            tracing::debug!("Failed to cache storage '{}:{}': {}", tenant_id, name, e);
        }
        Ok(record)
    }

    /// Resolve a `(tenant, storage_name, path)` triple into a storage node
    pub async fn resolve_node(
        &self,
        tenant_id: &str,
        storage_name: &str,
        path: &str,
    ) -> Result<StorageNode, RegistryError> {
        let record = self.get_storage(tenant_id, storage_name).await?;
        let storage = open_storage(&record)?;
        Ok(storage.node(path))
    }

    /// Effective editor base URL for a tenant.
    ///
    /// `pool` uses the process-wide pool URL, `own` uses the tenant's URL,
    /// `disabled` refuses. An `own` tenant without a recorded URL is a
    /// provisioning error; it falls back to the pool with a warning rather
    /// than failing the session.
    pub fn editor_base_for(&self, tenant: &Tenant) -> Result<String, RegistryError> {
        match tenant.editor_mode {
            EditorMode::Disabled => Err(RegistryError::EditorDisabled(tenant.id.clone())),
            EditorMode::Own => match &tenant.editor_url {
                Some(url) => Ok(url.clone()),
                None => {
                    tracing::warn!(
                        "Tenant '{}' has editor_mode=own but no editor_url, using pool",
                        tenant.id
                    );
                    Ok(self.pool_editor_url.clone())
                }
            },
            EditorMode::Pool => Ok(self.pool_editor_url.clone()),
        }
    }

    /// Drop cached state after an administrative write
    pub async fn invalidate_tenant(&self, tenant_id: &str) {
        self.cache.delete(&format!("tenant:{}", tenant_id)).await;
    }

    /// Drop cached state after an administrative write
    pub async fn invalidate_storage(&self, tenant_id: &str, name: &str) {
        self.cache
            .delete(&format!("storage:{}:{}", tenant_id, name))
            .await;
    }
}
