//! In-memory read cache
//!
//! Tenant and storage rows are read on every WOPI request but change only
//! through administrative writes, so the registry keeps them in a small
//! moka cache with a short TTL. Values are stored JSON-serialized to keep
//! the cache generic over entry types.

use anyhow::{Context, Result};
use moka::future::Cache;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default maximum cache capacity (number of entries)
const DEFAULT_MAX_CAPACITY: u64 = 10_000;

/// Cache entry wrapper that stores serialized JSON data
#[derive(Clone)]
struct CacheEntry {
    data: Arc<String>,
}

impl CacheEntry {
    fn new<T: Serialize>(value: &T) -> Result<Self> {
        let json = serde_json::to_string(value).context("Failed to serialize cache value")?;
        Ok(Self {
            data: Arc::new(json),
        })
    }

    fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.data).context("Failed to deserialize cache value")
    }
}

/// In-memory cache using moka with a cache-wide TTL
pub struct MemoryCache {
    cache: Cache<String, CacheEntry>,
    ttl: Duration,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entry_count", &self.cache.entry_count())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl MemoryCache {
    /// Create a cache whose entries expire after `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(DEFAULT_MAX_CAPACITY)
            .time_to_live(ttl)
            .build();
        Self { cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.cache.get(key).await {
            Some(entry) => Ok(Some(entry.deserialize()?)),
            None => Ok(None),
        }
    }

    /// Set a value in cache
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let entry = CacheEntry::new(value)?;
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    /// Delete a value from cache
    pub async fn delete(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}
