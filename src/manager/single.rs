//! Single-row read-through lookup.

use tracing::debug;

use super::ObjectCacheManager;
use crate::cache::CacheValue;
use crate::error::Result;
use crate::model::{FieldValue, Filter, Model};

impl<M: Model> ObjectCacheManager<M> {
    // == Get ==
    /// Returns the row matching `filter`, serving it from cache when possible.
    ///
    /// `filter` must name the primary key or one of the model's cache
    /// fields, otherwise this fails with `NotCacheable`. A full hit on an
    /// alternate key costs two backend reads; a miss costs one backing-store
    /// read and warms the cache.
    pub async fn get(&self, filter: Filter) -> Result<M> {
        let field = self.cacheable_field(filter.field())?;
        let cache_key = self.key(field, filter.value());

        if Self::is_pk(field) {
            return self.get_by_pk(&filter, &cache_key).await;
        }

        match self.local_row(&cache_key, field, filter.value()) {
            Some(Ok(row)) => return Ok(row),
            Some(Err(reason)) => return self.recover(&filter, &cache_key, &reason).await,
            None => {}
        }

        match self.backend_get(&cache_key).await {
            None => {
                debug!(model = M::NAME, lookup = %filter, "Cache miss");
                self.read_repair(&filter, &cache_key).await
            }
            Some(CacheValue::Pointer(pk)) => self.follow_pointer(&filter, field, &cache_key, pk).await,
            Some(CacheValue::Payload { .. }) => {
                self.recover(&filter, &cache_key, "expected pointer, found payload")
                    .await
            }
        }
    }

    /// Resolves an alternate-key pointer through the primary-key entry.
    async fn follow_pointer(
        &self,
        filter: &Filter,
        field: &str,
        cache_key: &str,
        pk: FieldValue,
    ) -> Result<M> {
        let pk_key = self.key(M::PK_FIELD, &pk);
        let pk_filter = Filter::new(M::PK_FIELD, pk);

        let row = match self.get_by_pk(&pk_filter, &pk_key).await {
            Ok(row) => row,
            Err(e) if e.is_not_found() => {
                debug!(model = M::NAME, lookup = %filter, "Dangling cache pointer");
                self.backend_delete(cache_key).await;
                return self.read_repair(filter, cache_key).await;
            }
            Err(e) => return Err(e),
        };

        // A concurrent writer may have moved the value to another row
        if !Self::holds(&row, field, filter.value()) {
            debug!(model = M::NAME, lookup = %filter, "Stale cache pointer");
            self.backend_delete(cache_key).await;
            return self.read_repair(filter, cache_key).await;
        }

        self.local.insert(cache_key.to_string(), row.clone());
        Ok(row)
    }

    async fn get_by_pk(&self, filter: &Filter, cache_key: &str) -> Result<M> {
        match self.local_row(cache_key, M::PK_FIELD, filter.value()) {
            Some(Ok(row)) => return Ok(row),
            Some(Err(reason)) => return self.recover(filter, cache_key, &reason).await,
            None => {}
        }

        let Some(entry) = self.backend_get(cache_key).await else {
            debug!(model = M::NAME, lookup = %filter, "Cache miss");
            return self.read_repair(filter, cache_key).await;
        };

        match Self::check_payload(filter.value(), entry) {
            Ok(row) => {
                debug!(model = M::NAME, lookup = %filter, "Cache hit");
                self.local.insert(cache_key.to_string(), row.clone());
                Ok(row)
            }
            Err(reason) => self.recover(filter, cache_key, &reason).await,
        }
    }

    /// Reads the row from the backing store and writes it to both tiers.
    async fn read_repair(&self, filter: &Filter, cache_key: &str) -> Result<M> {
        let row = self.fetch(filter).await?;
        self.write_through(&row).await;
        self.local.insert(cache_key.to_string(), row.clone());
        Ok(row)
    }

    /// Drops a corrupt entry and falls back to the backing store.
    async fn recover(&self, filter: &Filter, cache_key: &str, reason: &str) -> Result<M> {
        self.drop_corrupt(cache_key, reason).await?;
        self.read_repair(filter, cache_key).await
    }
}
