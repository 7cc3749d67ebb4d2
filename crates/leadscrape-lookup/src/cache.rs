//! Carrier caches.
//!
//! Read-through and never invalidated. Writes replace a single key, so
//! concurrent lanes never observe a partially written entry.

use crate::backend::CarrierMatch;
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use leadscrape_db::provider_cache::{self, ProviderCacheEntry};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Storage for resolved carriers keyed by normalized phone number.
#[async_trait]
pub trait CarrierCache: Send + Sync {
    /// Cached result for `phone_key`.
    async fn get(&self, phone_key: &str) -> Result<Option<CarrierMatch>>;

    /// Store a result.
    async fn put(&self, phone_key: &str, found: &CarrierMatch) -> Result<()>;
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CarrierMatch>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CarrierCache for MemoryCache {
    async fn get(&self, phone_key: &str) -> Result<Option<CarrierMatch>> {
        Ok(self.entries.read().await.get(phone_key).cloned())
    }

    async fn put(&self, phone_key: &str, found: &CarrierMatch) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(phone_key.to_string(), found.clone());
        Ok(())
    }
}

/// Cache persisted in the `provider_cache` table.
#[derive(Debug, Clone)]
pub struct SqliteCarrierCache {
    pool: Pool<Sqlite>,
}

impl SqliteCarrierCache {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CarrierCache for SqliteCarrierCache {
    async fn get(&self, phone_key: &str) -> Result<Option<CarrierMatch>> {
        let entry = provider_cache::get_entry(&self.pool, phone_key).await?;
        Ok(entry.map(|entry| CarrierMatch {
            carrier: entry.carrier,
            confidence: entry.confidence,
        }))
    }

    async fn put(&self, phone_key: &str, found: &CarrierMatch) -> Result<()> {
        let entry = ProviderCacheEntry {
            phone_key: phone_key.to_string(),
            carrier: found.carrier.clone(),
            confidence: found.confidence,
            looked_up_at: Utc::now(),
        };
        provider_cache::put_entry(&self.pool, &entry).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadscrape_core::Carrier;
    use leadscrape_db::Database;

    #[tokio::test]
    async fn test_memory_cache_round_trip() {
        let cache = MemoryCache::new();
        assert!(cache.is_empty().await);
        assert!(cache.get("0111234567").await.expect("get").is_none());

        cache
            .put("0111234567", &CarrierMatch::named("Etisalat", 0.9))
            .await
            .expect("put");
        let hit = cache.get("0111234567").await.expect("get");
        assert_eq!(hit, Some(CarrierMatch::named("Etisalat", 0.9)));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_sqlite_cache_persists_unknown() {
        let db = Database::new(":memory:").await.expect("create db");
        db.run_migrations().await.expect("run migrations");
        let cache = SqliteCarrierCache::new(db.pool().clone());

        cache
            .put("0551234567", &CarrierMatch::unknown())
            .await
            .expect("put");
        let hit = cache
            .get("0551234567")
            .await
            .expect("get")
            .expect("entry cached");
        assert_eq!(hit.carrier, Carrier::Unknown);
        assert_eq!(
            provider_cache::count_entries(db.pool()).await.expect("count"),
            1
        );
    }
}
