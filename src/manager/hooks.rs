//! Mutation signal handling.
//!
//! The manager observes its backing store. Each load records a baseline of
//! the row's cache field values; a later save writes the row through and
//! drops pointers whose value moved away from that baseline.
//!
//! Deletes purge every key the row may be cached under.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::ObjectCacheManager;
use crate::cache::CacheValue;
use crate::datastore::MutationObserver;
use crate::model::{cache_state, Model};
use crate::triggers::TriggerCondition;

#[async_trait]
impl<M: Model> MutationObserver<M> for ObjectCacheManager<M> {
    async fn on_load(&self, row: &M) {
        if self.is_cacheable() {
            self.track(row);
        }
    }

    async fn on_save(&self, row: &M) {
        if self.is_cacheable() {
            self.forget_local(row);
            self.write_through(row).await;
        }
        self.triggers.execute(TriggerCondition::Save, M::NAME);
    }

    async fn on_delete(&self, row: &M) {
        if self.is_cacheable() {
            self.purge(row).await;
        }
        self.triggers.execute(TriggerCondition::Delete, M::NAME);
    }
}

impl<M: Model> ObjectCacheManager<M> {
    // == Write Through ==
    /// Writes `row` to the backend: one pointer per non-null cache field,
    /// then the payload under the primary key.
    ///
    /// Pointers for values the row held when last seen, and no longer holds,
    /// are deleted afterwards.
    pub(crate) async fn write_through(&self, row: &M) {
        let pk = row.pk();
        if pk.is_null() {
            return;
        }

        for field in M::CACHE_FIELDS.iter().filter(|field| !Self::is_pk(field)) {
            let Some(value) = row.field_value(field).filter(|value| !value.is_null()) else {
                continue;
            };
            self.backend_set(&self.key(field, &value), CacheValue::pointer(pk.clone()))
                .await;
        }

        match CacheValue::payload(row) {
            Ok(payload) => self.backend_set(&self.key(M::PK_FIELD, &pk), payload).await,
            Err(e) => warn!(model = M::NAME, pk = %pk, error = %e, "Failed to serialize row"),
        }

        for key in self.moved_keys(row) {
            debug!(model = M::NAME, pk = %pk, key = %key, "Dropping stale pointer");
            self.backend_delete(&key).await;
        }
        self.track(row);
    }

    /// Pointer keys for baseline values that `row` no longer holds.
    fn moved_keys(&self, row: &M) -> Vec<String> {
        let tracked = self.lock_tracked();
        let Some(previous) = tracked.get(&row.pk().to_string()) else {
            return Vec::new();
        };

        previous
            .iter()
            .filter(|(field, old)| {
                !old.is_null()
                    && !row
                        .field_value(field)
                        .map(|current| current.same_key(old))
                        .unwrap_or(false)
            })
            .map(|(field, old)| self.key(field, old))
            .collect()
    }

    fn track(&self, row: &M) {
        let pk = row.pk();
        if pk.is_null() {
            return;
        }
        self.lock_tracked().insert(pk.to_string(), cache_state(row));
    }

    /// Every key `row` may be cached under: its primary key, its current
    /// cache field values and the values it held when last seen.
    fn row_keys(&self, row: &M) -> BTreeSet<String> {
        let pk = row.pk();
        let mut keys = BTreeSet::from([self.key(M::PK_FIELD, &pk)]);

        for field in M::CACHE_FIELDS.iter().filter(|field| !Self::is_pk(field)) {
            if let Some(value) = row.field_value(field).filter(|value| !value.is_null()) {
                keys.insert(self.key(field, &value));
            }
        }

        if let Some(previous) = self.lock_tracked().get(&pk.to_string()) {
            for (field, value) in previous.iter().filter(|(_, value)| !value.is_null()) {
                keys.insert(self.key(field, value));
            }
        }
        keys
    }

    /// Clears the local tier's view of `row`.
    fn forget_local(&self, row: &M) {
        for key in self.row_keys(row) {
            self.local.remove(&key);
        }
    }

    async fn purge(&self, row: &M) {
        let keys = self.row_keys(row);
        for key in &keys {
            self.local.remove(key);
            self.backend_delete(key).await;
        }
        self.lock_tracked().remove(&row.pk().to_string());
        debug!(model = M::NAME, pk = %row.pk(), keys = keys.len(), "Purged cached row");
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::cache::CacheValue;
    use crate::datastore::BackingStore;
    use crate::model::{FieldValue, Filter};
    use crate::triggers::TriggerCondition;

    #[tokio::test]
    async fn test_rename_moves_pointer() {
        let harness = Harness::new();
        harness.save(org(7, "acme")).await;
        let queries = harness.count(TriggerCondition::Query);

        harness.save(org(7, "acme-2")).await;

        assert!(harness.backend_entry(&harness.slug_key("acme")).await.is_none());
        assert_eq!(
            harness.backend_entry(&harness.slug_key("acme-2")).await,
            Some(CacheValue::Pointer(FieldValue::Int(7)))
        );
        let renamed = harness.manager.get(Filter::new("slug", "acme-2")).await.unwrap();
        assert_eq!(renamed, org(7, "acme-2"));
        assert!(harness
            .manager
            .get(Filter::new("slug", "acme"))
            .await
            .unwrap_err()
            .is_not_found());
        // Only the lookup of the old slug reached the store
        assert_eq!(queries.get(), 1);
    }

    #[tokio::test]
    async fn test_rename_after_load_uses_loaded_baseline() {
        let harness = Harness::new();
        harness.seed(org(7, "acme")).await;
        let mut row = harness.manager.get(Filter::new("slug", "acme")).await.unwrap();

        row.slug = "acme-2".to_string();
        harness.save(row).await;

        assert!(harness.backend_entry(&harness.slug_key("acme")).await.is_none());
        let payload = harness.backend_entry(&harness.pk_key(7)).await.unwrap();
        assert_eq!(payload.into_model::<Organization>().unwrap(), org(7, "acme-2"));
    }

    #[tokio::test]
    async fn test_delete_purges_every_key() {
        let harness = Harness::new();
        harness.save(org(7, "acme")).await;

        harness.store.delete(&org(7, "acme")).await.unwrap();

        assert!(harness.backend_entry(&harness.pk_key(7)).await.is_none());
        assert!(harness.backend_entry(&harness.slug_key("acme")).await.is_none());
        assert!(harness.manager.get(Filter::pk(7)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_purges_previous_values() {
        let harness = Harness::new();
        harness.save(org(7, "acme")).await;
        // A stale pointer that survived a rename made elsewhere
        harness
            .put_backend(&harness.slug_key("acme"), CacheValue::pointer(FieldValue::Int(7)))
            .await;
        harness.store.put_unobserved(org(7, "acme-2")).await.unwrap();

        harness.store.delete(&org(7, "acme-2")).await.unwrap();

        assert!(harness.backend_entry(&harness.slug_key("acme")).await.is_none());
    }

    #[tokio::test]
    async fn test_save_clears_local_scope() {
        let harness = Harness::new();
        harness.save(org(7, "acme")).await;

        let row = harness
            .manager
            .local_scope(async {
                harness.manager.get(Filter::pk(7)).await.unwrap();
                harness.save(org(7, "acme-2")).await;
                harness.manager.get(Filter::pk(7)).await.unwrap()
            })
            .await
            .unwrap();

        assert_eq!(row, org(7, "acme-2"));
    }

    #[tokio::test]
    async fn test_save_and_delete_fire_triggers() {
        let harness = Harness::new();
        let saves = harness.count(TriggerCondition::Save);
        let deletes = harness.count(TriggerCondition::Delete);

        harness.save(org(7, "acme")).await;
        harness.save(org(7, "acme-2")).await;
        harness.store.delete(&org(7, "acme-2")).await.unwrap();

        assert_eq!(saves.get(), 2);
        assert_eq!(deletes.get(), 1);
    }

    #[tokio::test]
    async fn test_read_backfill_does_not_fire_save() {
        let harness = Harness::new();
        harness.seed(org(7, "acme")).await;
        let saves = harness.count(TriggerCondition::Save);

        harness.manager.get(Filter::pk(7)).await.unwrap();

        assert_eq!(saves.get(), 0);
    }

    #[tokio::test]
    async fn test_uncacheable_model_still_fires_triggers() {
        let (store, manager) = plain_harness();
        let saves = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let handle = saves.clone();
        let _guard = manager.register_trigger(TriggerCondition::Save, move |_| {
            handle.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        store.save(audit(1)).await.unwrap();

        assert_eq!(saves.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
