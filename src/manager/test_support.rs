//! Shared fixtures for manager tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ManagerConfig, ObjectCacheManager};
use crate::cache::{CacheBackend, CacheValue, MemoryBackend};
use crate::datastore::{BackingStore, MemoryStore};
use crate::error::{CacheError, Result};
use crate::model::{FieldValue, Model};
use crate::triggers::{TriggerCondition, TriggerGuard};

// == Models ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub slug: String,
    pub name: String,
}

impl Model for Organization {
    const NAME: &'static str = "Organization";
    const FIELDS: &'static [&'static str] = &["id", "slug", "name"];
    const CACHE_FIELDS: &'static [&'static str] = &["slug"];

    fn field_value(&self, field: &str) -> Option<FieldValue> {
        match field {
            "id" => Some(self.id.into()),
            "slug" => Some(self.slug.as_str().into()),
            "name" => Some(self.name.as_str().into()),
            _ => None,
        }
    }
}

pub fn org(id: i64, slug: &str) -> Organization {
    Organization {
        id,
        slug: slug.to_string(),
        name: format!("Org {}", id),
    }
}

/// A model with no cache fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub event: String,
}

impl Model for AuditEntry {
    const NAME: &'static str = "AuditEntry";
    const FIELDS: &'static [&'static str] = &["id", "event"];

    fn field_value(&self, field: &str) -> Option<FieldValue> {
        match field {
            "id" => Some(self.id.into()),
            "event" => Some(self.event.as_str().into()),
            _ => None,
        }
    }
}

pub fn audit(id: i64) -> AuditEntry {
    AuditEntry {
        id,
        event: "login".to_string(),
    }
}

pub fn new_store() -> Arc<MemoryStore<Organization>> {
    MemoryStore::shared()
}

pub fn plain_harness() -> (Arc<MemoryStore<AuditEntry>>, Arc<ObjectCacheManager<AuditEntry>>) {
    let store = MemoryStore::<AuditEntry>::shared();
    let manager = ObjectCacheManager::new(
        store.clone(),
        Arc::new(MemoryBackend::new(100)),
        ManagerConfig::default(),
    );
    (store, manager)
}

pub fn plain_manager() -> Arc<ObjectCacheManager<AuditEntry>> {
    plain_harness().1
}

// == Harness ==
/// A manager over an in-memory store and backend, with direct access to both.
pub struct Harness {
    pub store: Arc<MemoryStore<Organization>>,
    pub backend: MemoryBackend,
    pub manager: Arc<ObjectCacheManager<Organization>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let store = new_store();
        let backend = MemoryBackend::new(1_000);
        let manager = ObjectCacheManager::new(store.clone(), Arc::new(backend.clone()), config);
        Self {
            store,
            backend,
            manager,
        }
    }

    /// Saves through the store, so the manager sees the signal.
    pub async fn save(&self, row: Organization) {
        self.store.save(row).await.unwrap();
    }

    /// Writes a row the manager never hears about.
    pub async fn seed(&self, row: Organization) {
        self.store.put_unobserved(row).await.unwrap();
    }

    pub fn count(&self, condition: TriggerCondition) -> Counter<'_> {
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = hits.clone();
        let guard = self.manager.register_trigger(condition, move |_| {
            handle.fetch_add(1, Ordering::SeqCst);
        });
        Counter {
            hits,
            _guard: guard,
        }
    }

    pub fn slug_key(&self, slug: &str) -> String {
        self.manager.key("slug", &FieldValue::from(slug))
    }

    pub fn pk_key(&self, id: i64) -> String {
        self.manager.key("id", &FieldValue::Int(id))
    }

    pub async fn backend_entry(&self, key: &str) -> Option<CacheValue> {
        self.backend
            .get(key, self.manager.cache_version())
            .await
            .unwrap()
    }

    pub async fn put_backend(&self, key: &str, value: CacheValue) {
        self.backend
            .set(key, value, Duration::from_secs(60), self.manager.cache_version())
            .await
            .unwrap();
    }
}

/// Counts trigger firings while alive.
pub struct Counter<'a> {
    hits: Arc<AtomicUsize>,
    _guard: TriggerGuard<'a>,
}

impl Counter<'_> {
    pub fn get(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

// == Failing Backend ==
/// A backend whose every call fails.
pub struct FailingBackend;

#[async_trait]
impl CacheBackend for FailingBackend {
    async fn get(&self, _key: &str, _version: &str) -> Result<Option<CacheValue>> {
        Err(CacheError::BackendUnavailable("connection refused".to_string()))
    }

    async fn get_many(
        &self,
        _keys: &[String],
        _version: &str,
    ) -> Result<HashMap<String, CacheValue>> {
        Err(CacheError::BackendUnavailable("connection refused".to_string()))
    }

    async fn set(
        &self,
        _key: &str,
        _value: CacheValue,
        _ttl: Duration,
        _version: &str,
    ) -> Result<()> {
        Err(CacheError::BackendUnavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str, _version: &str) -> Result<()> {
        Err(CacheError::BackendUnavailable("connection refused".to_string()))
    }
}
