//! Local Cache Module
//!
//! Opt-in in-process tier consulted before the backend. Entries live in a
//! store owned by an open scope, and a scope is bound to the task that runs
//! it: other tasks, including ones spawned from inside the scope, never see
//! its entries and may open scopes of their own.
//!
//! Every scope exit bumps the generation counter of the `LocalCache` that
//! opened it.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{CacheError, Result};

type LocalValue = Arc<dyn Any + Send + Sync>;

tokio::task_local! {
    /// Store of the scope open in the current task.
    static ACTIVE_SCOPE: Arc<ScopeStore>;
}

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(0);

struct ScopeStore {
    /// Id of the `LocalCache` that opened the scope
    owner: u64,
    generation: u64,
    entries: Mutex<HashMap<String, LocalValue>>,
}

impl ScopeStore {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, LocalValue>> {
        // A panic mid-update leaves at worst a missing entry
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// == Local Cache ==
/// Scope manager for the local tier, shared by the managers it is handed to.
///
/// A task may have one scope open at a time; opening a second one inside it
/// is a programming error and fails with `ScopeAlreadyActive`.
pub struct LocalCache {
    id: u64,
    generation: AtomicU64,
}

impl Default for LocalCache {
    fn default() -> Self {
        Self {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            generation: AtomicU64::new(0),
        }
    }
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    // == Scope ==
    /// Runs `fut` with a fresh local scope bound to the current task.
    ///
    /// The scope closes when `fut` completes or is dropped.
    pub async fn scope<F: Future>(&self, fut: F) -> Result<F::Output> {
        if ACTIVE_SCOPE.try_with(|_| ()).is_ok() {
            return Err(CacheError::ScopeAlreadyActive);
        }

        let store = Arc::new(ScopeStore {
            owner: self.id,
            generation: self.generation(),
            entries: Mutex::new(HashMap::new()),
        });
        debug!(generation = store.generation, "Entered local cache scope");

        let _exit = ScopeExit { cache: self };
        Ok(ACTIVE_SCOPE.scope(store, fut).await)
    }

    /// True if the current task runs inside a scope opened by this cache.
    pub fn is_active(&self) -> bool {
        self.with_entries(|_| ()).is_some()
    }

    /// Generation of the scope open in the current task, if any.
    pub fn active_generation(&self) -> Option<u64> {
        ACTIVE_SCOPE
            .try_with(|store| (store.owner == self.id).then_some(store.generation))
            .ok()
            .flatten()
    }

    /// Number of scopes exited so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of entries visible to the current task (0 outside a scope).
    pub fn len(&self) -> usize {
        self.with_entries(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn get(&self, key: &str) -> Option<LocalValue> {
        self.with_entries(|entries| entries.get(key).cloned())
            .flatten()
    }

    pub(crate) fn insert<T: Any + Send + Sync>(&self, key: String, value: T) {
        self.with_entries(|entries| entries.insert(key, Arc::new(value)));
    }

    pub(crate) fn remove(&self, key: &str) {
        self.with_entries(|entries| entries.remove(key));
    }

    /// Runs `f` on the current task's entries, or returns None when the task
    /// has no scope open on this cache.
    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, LocalValue>) -> R) -> Option<R> {
        ACTIVE_SCOPE
            .try_with(|store| (store.owner == self.id).then(|| f(&mut *store.lock())))
            .ok()
            .flatten()
    }

    fn exit(&self) {
        let previous = self.generation.fetch_add(1, Ordering::AcqRel);
        debug!(generation = previous, "Exited local cache scope");
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("active", &self.is_active())
            .field("generation", &self.generation())
            .finish()
    }
}

/// Bumps the generation when a scope ends, including by cancellation.
struct ScopeExit<'a> {
    cache: &'a LocalCache,
}

impl Drop for ScopeExit<'_> {
    fn drop(&mut self) {
        self.cache.exit();
    }
}
