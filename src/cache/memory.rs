//! In-memory cache backend
//!
//! Implements `CacheBackend` on a shared `CacheStore`. Values are stored
//! JSON-encoded, so anything read back has crossed a serialization boundary
//! the same way it would with a networked cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use crate::cache::{CacheBackend, CacheStats, CacheStore, CacheValue};
use crate::config::Config;
use crate::error::Result;

/// Key under which `key` is stored for `version`.
fn namespaced(key: &str, version: &str) -> String {
    format!(":{}:{}", version, key)
}

// == Memory Backend ==
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    store: Arc<RwLock<CacheStore>>,
}

impl MemoryBackend {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(CacheStore::new(max_entries))),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_entries)
    }

    /// Shared handle to the underlying store, for the cleanup task.
    pub fn store(&self) -> Arc<RwLock<CacheStore>> {
        self.store.clone()
    }

    pub async fn stats(&self) -> CacheStats {
        self.store.read().await.stats()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }
}

fn decode(key: &str, raw: &str) -> Option<CacheValue> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "Dropping undecodable cache entry");
            None
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str, version: &str) -> Result<Option<CacheValue>> {
        // Write lock: reads update LRU order and stats
        let raw = self.store.write().await.get(&namespaced(key, version));
        Ok(raw.and_then(|raw| decode(key, &raw)))
    }

    async fn get_many(
        &self,
        keys: &[String],
        version: &str,
    ) -> Result<HashMap<String, CacheValue>> {
        let full_keys: Vec<String> = keys.iter().map(|key| namespaced(key, version)).collect();
        let mut found = {
            let mut store = self.store.write().await;
            store.get_many(full_keys.iter().map(String::as_str))
        };

        Ok(keys
            .iter()
            .zip(&full_keys)
            .filter_map(|(key, full_key)| {
                let raw = found.remove(full_key)?;
                decode(key, &raw).map(|value| (key.clone(), value))
            })
            .collect())
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Duration, version: &str) -> Result<()> {
        let raw = serde_json::to_string(&value)?;
        self.store
            .write()
            .await
            .set(namespaced(key, version), raw, Some(ttl))
    }

    async fn delete(&self, key: &str, version: &str) -> Result<()> {
        self.store.write().await.delete(&namespaced(key, version));
        Ok(())
    }
}
