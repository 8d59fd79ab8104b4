//! Object Cache Manager
//!
//! Read-through caching for one model type. Lookups go to the local scoped
//! tier, then the shared backend, then the backing store; whatever the store
//! returns is written back to both tiers. Mutation signals from the store
//! keep backend entries in line with the rows they describe.
//!
//! Alternate-key entries are pointers to the primary key; only the
//! primary-key entry holds the row, so an update rewrites one payload and
//! only has to drop the pointers whose value changed.

mod batch;
mod hooks;
mod single;

#[cfg(test)]
pub(crate) mod test_support;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tracing::{error, warn};

use crate::cache::{CacheBackend, CacheValue, LruTracker};
use crate::config::{Config, DEFAULT_CACHE_TTL, DEFAULT_KEY_PREFIX, DEFAULT_MAX_TRACKED};
use crate::datastore::{BackingStore, MutationObserver};
use crate::error::{CacheError, Result};
use crate::keys::{lookup_key, version_tag};
use crate::local::LocalCache;
use crate::model::{canonical_field, FieldValue, Filter, Model};
use crate::triggers::{TriggerCondition, TriggerGuard, TriggerRegistry};

// == Manager Config ==
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Lifetime of pointer and payload entries
    pub ttl: Duration,
    /// Prefix for every key this manager writes
    pub key_prefix: String,
    /// Raise corrupt entries instead of recovering from them
    pub strict: bool,
    /// Fixed version tag; derived from the model's fields when None
    pub cache_version: Option<String>,
    /// Rows whose cache field baselines are remembered at once
    pub max_tracked: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            strict: false,
            cache_version: None,
            max_tracked: DEFAULT_MAX_TRACKED,
        }
    }
}

impl ManagerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: config.ttl(),
            key_prefix: config.key_prefix.clone(),
            strict: config.strict,
            cache_version: None,
            max_tracked: config.max_tracked,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_cache_version(mut self, version: impl Into<String>) -> Self {
        self.cache_version = Some(version.into());
        self
    }

    pub fn with_max_tracked(mut self, max_tracked: usize) -> Self {
        self.max_tracked = max_tracked;
        self
    }
}

/// Cacheable field values last seen for a row, keyed by field name.
type CacheState = HashMap<&'static str, FieldValue>;

// == Baselines ==
/// Last seen cache state per row, keyed by rendered primary key.
///
/// Holds at most `capacity` rows; the least recently tracked go first. A
/// row without a baseline only loses the stale pointer delete on its next
/// save, and the pointer it leaves behind is caught when followed.
struct Baselines {
    states: HashMap<String, CacheState>,
    lru: LruTracker,
    capacity: usize,
}

impl Baselines {
    fn new(capacity: usize) -> Self {
        Self {
            states: HashMap::new(),
            lru: LruTracker::new(),
            capacity,
        }
    }

    fn get(&self, pk: &str) -> Option<&CacheState> {
        self.states.get(pk)
    }

    fn insert(&mut self, pk: String, state: CacheState) {
        self.lru.touch(&pk);
        self.states.insert(pk, state);

        while self.states.len() > self.capacity {
            let Some(oldest) = self.lru.evict_oldest() else {
                break;
            };
            self.states.remove(&oldest);
        }
    }

    fn remove(&mut self, pk: &str) {
        self.lru.remove(pk);
        self.states.remove(pk);
    }

    fn len(&self) -> usize {
        self.states.len()
    }
}

// == Object Cache Manager ==
pub struct ObjectCacheManager<M: Model> {
    store: Arc<dyn BackingStore<M>>,
    backend: Arc<dyn CacheBackend>,
    local: Arc<LocalCache>,
    config: ManagerConfig,
    version: OnceLock<String>,
    /// Baselines for stale pointer cleanup
    tracked: Mutex<Baselines>,
    triggers: TriggerRegistry,
}

impl<M: Model> ObjectCacheManager<M> {
    // == Constructors ==
    /// Creates a manager with its own local cache and subscribes it to the
    /// store's mutation signals.
    pub fn new(
        store: Arc<dyn BackingStore<M>>,
        backend: Arc<dyn CacheBackend>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        Self::with_local_cache(store, backend, Arc::new(LocalCache::new()), config)
    }

    /// Like `new`, sharing `local` with other managers so one scope covers
    /// all of them.
    pub fn with_local_cache(
        store: Arc<dyn BackingStore<M>>,
        backend: Arc<dyn CacheBackend>,
        local: Arc<LocalCache>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            store: store.clone(),
            backend,
            local,
            tracked: Mutex::new(Baselines::new(config.max_tracked)),
            config,
            version: OnceLock::new(),
            triggers: TriggerRegistry::new(),
        });

        let observer: Arc<dyn MutationObserver<M>> = manager.clone();
        store.subscribe(Arc::downgrade(&observer));
        manager
    }

    // == Accessors ==
    /// Version tag applied to every key of this model.
    pub fn cache_version(&self) -> &str {
        self.version.get_or_init(|| {
            self.config
                .cache_version
                .clone()
                .unwrap_or_else(|| version_tag(M::FIELDS))
        })
    }

    pub fn cache_fields(&self) -> &'static [&'static str] {
        M::CACHE_FIELDS
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn local_cache(&self) -> &Arc<LocalCache> {
        &self.local
    }

    pub fn store(&self) -> &Arc<dyn BackingStore<M>> {
        &self.store
    }

    /// Number of rows with a remembered baseline.
    pub fn tracked_len(&self) -> usize {
        self.lock_tracked().len()
    }

    // == Local Scope ==
    /// Runs `fut` inside a local cache scope bound to the current task; see
    /// `LocalCache::scope`.
    pub async fn local_scope<F: Future>(&self, fut: F) -> Result<F::Output> {
        self.local.scope(fut).await
    }

    // == Triggers ==
    /// Runs `action` on every matching operation until the guard drops.
    pub fn register_trigger<F>(&self, condition: TriggerCondition, action: F) -> TriggerGuard<'_>
    where
        F: Fn(&'static str) + Send + Sync + 'static,
    {
        self.triggers.register(condition, action)
    }

    // == Invalidate ==
    /// Drops the cached row for `pk`, for changes the hooks cannot see.
    pub async fn invalidate(&self, pk: impl Into<FieldValue>) -> Result<()> {
        let key = self.key(M::PK_FIELD, &pk.into());
        self.local.remove(&key);
        self.backend_delete(&key).await;
        Ok(())
    }

    // == Helpers ==
    fn is_cacheable(&self) -> bool {
        !M::CACHE_FIELDS.is_empty()
    }

    fn is_pk(field: &str) -> bool {
        field == M::PK_FIELD
    }

    /// Canonical form of `field`, or `NotCacheable` if lookups on it cannot
    /// be served from the cache.
    fn cacheable_field<'a>(&self, field: &'a str) -> Result<&'a str> {
        let canonical = canonical_field(field, M::PK_FIELD);
        if !self.is_cacheable() {
            return Err(CacheError::NotCacheable(format!(
                "{} declares no cache fields",
                M::NAME
            )));
        }
        if !Self::is_pk(canonical) && !M::CACHE_FIELDS.contains(&canonical) {
            return Err(CacheError::NotCacheable(format!(
                "{}.{} is not a cache field",
                M::NAME,
                canonical
            )));
        }
        Ok(canonical)
    }

    fn key(&self, field: &str, value: &FieldValue) -> String {
        lookup_key(M::NAME, M::PK_FIELD, &self.config.key_prefix, field, value)
    }

    /// Reads the backing store, firing query triggers.
    async fn fetch(&self, filter: &Filter) -> Result<M> {
        self.triggers.execute(TriggerCondition::Query, M::NAME);
        self.store.get(filter).await
    }

    async fn fetch_many(&self, field: &str, values: &[FieldValue]) -> Result<Vec<M>> {
        self.triggers.execute(TriggerCondition::Query, M::NAME);
        self.store.get_many(field, values).await
    }

    /// Row held by the local tier under `key`.
    ///
    /// `Some(Err)` describes an entry that exists but cannot be trusted.
    fn local_row(
        &self,
        key: &str,
        field: &str,
        value: &FieldValue,
    ) -> Option<std::result::Result<M, String>> {
        let entry = self.local.get(key)?;
        let row = match entry.downcast_ref::<M>() {
            Some(row) => row.clone(),
            None => return Some(Err(format!("local entry is not a {}", M::NAME))),
        };
        if Self::is_pk(field) && !row.pk().same_key(value) {
            return Some(Err(format!("local entry has primary key {}", row.pk())));
        }
        Some(Ok(row))
    }

    /// Decodes a primary-key entry and checks it belongs to `pk`.
    fn check_payload(pk: &FieldValue, entry: CacheValue) -> std::result::Result<M, String> {
        let row = entry.into_model::<M>()?;
        if !row.pk().same_key(pk) {
            return Err(format!(
                "cached primary key {} does not match requested {}",
                row.pk(),
                pk
            ));
        }
        Ok(row)
    }

    /// True if `row` still holds `value` in `field`.
    fn holds(row: &M, field: &str, value: &FieldValue) -> bool {
        row.field_value(field)
            .map(|current| current.same_key(value))
            .unwrap_or(false)
    }

    /// Drops an untrustworthy entry from both tiers.
    ///
    /// In strict mode the problem is returned instead, after dropping.
    async fn drop_corrupt(&self, key: &str, reason: &str) -> Result<()> {
        self.local.remove(key);
        self.backend_delete(key).await;

        if self.config.strict {
            return Err(CacheError::CorruptCacheEntry {
                key: key.to_string(),
                reason: reason.to_string(),
            });
        }
        error!(
            model = M::NAME,
            key,
            reason,
            "Cache response returned invalid value"
        );
        Ok(())
    }

    // == Backend Access ==
    // Backend failures degrade to misses; they never reach the caller.

    async fn backend_get(&self, key: &str) -> Option<CacheValue> {
        match self.backend.get(key, self.cache_version()).await {
            Ok(value) => value,
            Err(e) => {
                warn!(model = M::NAME, key, error = %e, "Cache backend get failed");
                None
            }
        }
    }

    async fn backend_get_many(&self, keys: &[String]) -> HashMap<String, CacheValue> {
        match self.backend.get_many(keys, self.cache_version()).await {
            Ok(values) => values,
            Err(e) => {
                warn!(model = M::NAME, keys = keys.len(), error = %e, "Cache backend get_many failed");
                HashMap::new()
            }
        }
    }

    async fn backend_set(&self, key: &str, value: CacheValue) {
        if let Err(e) = self
            .backend
            .set(key, value, self.config.ttl, self.cache_version())
            .await
        {
            warn!(model = M::NAME, key, error = %e, "Cache backend set failed");
        }
    }

    async fn backend_delete(&self, key: &str) {
        if let Err(e) = self.backend.delete(key, self.cache_version()).await {
            warn!(model = M::NAME, key, error = %e, "Cache backend delete failed");
        }
    }

    fn lock_tracked(&self) -> MutexGuard<'_, Baselines> {
        self.tracked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<M: Model> std::fmt::Debug for ObjectCacheManager<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCacheManager")
            .field("model", &M::NAME)
            .field("cache_fields", &M::CACHE_FIELDS)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_version_derived_from_fields() {
        let harness = Harness::new();
        assert_eq!(harness.manager.cache_version(), version_tag(Organization::FIELDS));
        assert_eq!(harness.manager.cache_version().len(), 3);
    }

    #[tokio::test]
    async fn test_version_override() {
        let harness = Harness::with_config(ManagerConfig::default().with_cache_version("v9"));
        assert_eq!(harness.manager.cache_version(), "v9");
    }

    #[tokio::test]
    async fn test_manager_config_from_config() {
        let config = Config {
            cache_ttl: 30,
            strict: true,
            ..Config::default()
        };
        let manager_config = ManagerConfig::from_config(&config);

        assert_eq!(manager_config.ttl, Duration::from_secs(30));
        assert!(manager_config.strict);
        assert_eq!(manager_config.key_prefix, "modelcache");
    }

    #[tokio::test]
    async fn test_cacheable_field_resolution() {
        let harness = Harness::new();
        let manager = &harness.manager;

        assert_eq!(manager.cacheable_field("pk").unwrap(), "id");
        assert_eq!(manager.cacheable_field("slug__exact").unwrap(), "slug");
        assert!(matches!(
            manager.cacheable_field("name"),
            Err(CacheError::NotCacheable(_))
        ));
    }

    #[tokio::test]
    async fn test_invalidate_drops_payload() {
        let harness = Harness::new();
        harness.save(org(7, "acme")).await;
        let key = harness.manager.key("id", &FieldValue::Int(7));
        assert!(harness.backend_entry(&key).await.is_some());

        harness.manager.invalidate(7).await.unwrap();

        assert!(harness.backend_entry(&key).await.is_none());
    }

    #[test]
    fn test_baselines_forget_least_recently_tracked() {
        let mut baselines = Baselines::new(2);
        baselines.insert("1".to_string(), CacheState::new());
        baselines.insert("2".to_string(), CacheState::new());
        baselines.insert("1".to_string(), CacheState::new());
        baselines.insert("3".to_string(), CacheState::new());

        assert_eq!(baselines.len(), 2);
        assert!(baselines.get("1").is_some());
        assert!(baselines.get("2").is_none());

        baselines.remove("1");
        assert_eq!(baselines.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_reads_keep_tracking_bounded() {
        let harness = Harness::with_config(ManagerConfig::default().with_max_tracked(10));
        let pks: Vec<FieldValue> = (0..50).map(FieldValue::Int).collect();
        for id in 0..50 {
            harness.seed(org(id, &format!("org-{}", id))).await;
        }

        harness.manager.get_many("pk", &pks).await.unwrap();
        harness.manager.get_many("pk", &pks).await.unwrap();

        assert_eq!(harness.manager.tracked_len(), 10);
        assert_eq!(harness.manager.get(Filter::pk(3)).await.unwrap(), org(3, "org-3"));
    }

    #[tokio::test]
    async fn test_manager_is_dropped_with_its_owner() {
        let harness = Harness::new();
        let weak = Arc::downgrade(&harness.manager);
        let store = harness.store.clone();
        drop(harness);

        assert!(weak.upgrade().is_none());
        // Store keeps working without observers
        store.save(org(1, "solo")).await.unwrap();
    }
}
