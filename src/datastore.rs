//! Backing Store Module
//!
//! The source of truth the cache reads through to, and the mutation signals
//! it emits. `MemoryStore` is a complete in-process implementation used by
//! the demo binary and the tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::model::{canonical_field, FieldValue, Filter, Model};

// == Mutation Observer ==
/// Receives row lifecycle signals from a backing store.
///
/// Signals are delivered after the store has applied the change and before
/// the mutating call returns.
#[async_trait]
pub trait MutationObserver<M: Model>: Send + Sync {
    /// A row was just materialized from storage.
    async fn on_load(&self, row: &M);

    /// A row was durably inserted or updated.
    async fn on_save(&self, row: &M);

    /// A row was durably removed.
    async fn on_delete(&self, row: &M);
}

// == Backing Store ==
#[async_trait]
pub trait BackingStore<M: Model>: Send + Sync {
    /// Returns the single row matching `filter`, or `NotFound`.
    async fn get(&self, filter: &Filter) -> Result<M>;

    /// Returns every row whose `field` equals one of `values`.
    async fn get_many(&self, field: &str, values: &[FieldValue]) -> Result<Vec<M>>;

    /// Inserts or updates `row`, returning it as stored.
    async fn save(&self, row: M) -> Result<M>;

    async fn delete(&self, row: &M) -> Result<()>;

    /// Registers an observer for this store's mutation signals.
    ///
    /// Observers are held weakly; a dropped observer stops receiving signals.
    fn subscribe(&self, observer: Weak<dyn MutationObserver<M>>);
}

// == Memory Store ==
/// Rows held in a map keyed by primary key.
pub struct MemoryStore<M: Model> {
    rows: RwLock<BTreeMap<String, M>>,
    observers: Mutex<Vec<Weak<dyn MutationObserver<M>>>>,
    queries: AtomicUsize,
}

impl<M: Model> Default for MemoryStore<M> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            observers: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
        }
    }
}

impl<M: Model> MemoryStore<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of reads served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Writes `row` without emitting any signal, as an out-of-band writer
    /// such as a migration or another service would.
    pub async fn put_unobserved(&self, row: M) -> Result<()> {
        let pk = Self::pk_key(&row)?;
        self.rows.write().await.insert(pk, row);
        Ok(())
    }

    fn pk_key(row: &M) -> Result<String> {
        let pk = row.pk();
        if pk.is_null() {
            return Err(CacheError::Store(format!(
                "cannot store {} without a primary key",
                M::NAME
            )));
        }
        Ok(pk.to_string())
    }

    fn observers(&self) -> Vec<Arc<dyn MutationObserver<M>>> {
        let mut observers = self
            .observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        observers.retain(|observer| observer.strong_count() > 0);
        observers.iter().filter_map(Weak::upgrade).collect()
    }

    async fn notify_loaded(&self, rows: &[M]) {
        let observers = self.observers();
        for row in rows {
            for observer in &observers {
                observer.on_load(row).await;
            }
        }
    }
}

#[async_trait]
impl<M: Model> BackingStore<M> for MemoryStore<M> {
    async fn get(&self, filter: &Filter) -> Result<M> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mut matches: Vec<M> = {
            let rows = self.rows.read().await;
            rows.values().filter(|row| filter.matches(*row)).cloned().collect()
        };

        let row = match matches.len() {
            0 => {
                return Err(CacheError::NotFound {
                    model: M::NAME,
                    lookup: filter.to_string(),
                })
            }
            1 => matches.remove(0),
            n => {
                return Err(CacheError::Store(format!(
                    "get() returned {} {} rows for {}",
                    n,
                    M::NAME,
                    filter
                )))
            }
        };

        self.notify_loaded(std::slice::from_ref(&row)).await;
        Ok(row)
    }

    async fn get_many(&self, field: &str, values: &[FieldValue]) -> Result<Vec<M>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let field = canonical_field(field, M::PK_FIELD);
        let found: Vec<M> = {
            let rows = self.rows.read().await;
            rows.values()
                .filter(|row| {
                    row.field_value(field)
                        .map(|current| values.iter().any(|value| value.same_key(&current)))
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        self.notify_loaded(&found).await;
        Ok(found)
    }

    async fn save(&self, row: M) -> Result<M> {
        let pk = Self::pk_key(&row)?;
        self.rows.write().await.insert(pk.clone(), row.clone());
        debug!(model = M::NAME, pk = %pk, "Saved row");

        for observer in self.observers() {
            observer.on_save(&row).await;
        }
        Ok(row)
    }

    async fn delete(&self, row: &M) -> Result<()> {
        let pk = Self::pk_key(row)?;
        let removed = self.rows.write().await.remove(&pk);
        let Some(removed) = removed else {
            return Err(CacheError::NotFound {
                model: M::NAME,
                lookup: format!("{}={}", M::PK_FIELD, pk),
            });
        };
        debug!(model = M::NAME, pk = %pk, "Deleted row");

        for observer in self.observers() {
            observer.on_delete(&removed).await;
        }
        Ok(())
    }

    fn subscribe(&self, observer: Weak<dyn MutationObserver<M>>) {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observer);
    }
}
