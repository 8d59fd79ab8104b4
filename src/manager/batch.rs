//! Batch read-through lookup.
//!
//! One backend round trip for the requested keys, one more for any pointers
//! they resolve to, and a single `field IN (...)` store query for whatever
//! is still missing.

use std::collections::HashMap;

use tracing::debug;

use super::ObjectCacheManager;
use crate::cache::CacheValue;
use crate::error::Result;
use crate::model::{FieldValue, Model};

/// A requested value that still needs resolving, with its cache key.
type Pending = Vec<(String, FieldValue)>;

impl<M: Model> ObjectCacheManager<M> {
    // == Get Many ==
    /// Returns the rows whose `field` equals one of `values`.
    ///
    /// Values with no matching row are skipped rather than reported, so the
    /// result may be shorter than `values`. Result order is unspecified.
    pub async fn get_many(&self, field: &str, values: &[FieldValue]) -> Result<Vec<M>> {
        let field = self.cacheable_field(field)?;
        if Self::is_pk(field) {
            return self.get_many_by_pk(values).await;
        }

        let (mut results, pending) = self.partition_local(field, values).await?;
        if pending.is_empty() {
            return Ok(results);
        }

        let keys: Vec<String> = pending.iter().map(|(key, _)| key.clone()).collect();
        let cached = self.backend_get_many(&keys).await;

        let mut misses = Pending::new();
        let mut pointers: Vec<(String, FieldValue, FieldValue)> = Vec::new();
        for (key, value) in pending {
            match cached.get(&key) {
                None => misses.push((key, value)),
                Some(CacheValue::Pointer(pk)) => pointers.push((key, value, pk.clone())),
                Some(CacheValue::Payload { .. }) => {
                    self.drop_corrupt(&key, "expected pointer, found payload")
                        .await?;
                    misses.push((key, value));
                }
            }
        }

        if !pointers.is_empty() {
            let pks: Vec<FieldValue> = pointers.iter().map(|(_, _, pk)| pk.clone()).collect();
            let resolved = index_by(self.get_many_by_pk(&pks).await?, field);

            for (key, value, _) in pointers {
                match resolved.get(&value.to_string()) {
                    Some(row) => {
                        self.local.insert(key, row.clone());
                        results.push(row.clone());
                    }
                    None => {
                        // Dangling or stale pointer; the store decides
                        debug!(model = M::NAME, field, value = %value, "Unresolved cache pointer");
                        self.backend_delete(&key).await;
                        misses.push((key, value));
                    }
                }
            }
        }

        results.extend(self.fill_from_store(field, misses).await?);
        Ok(results)
    }

    async fn get_many_by_pk(&self, values: &[FieldValue]) -> Result<Vec<M>> {
        let (mut results, pending) = self.partition_local(M::PK_FIELD, values).await?;
        if pending.is_empty() {
            return Ok(results);
        }

        let keys: Vec<String> = pending.iter().map(|(key, _)| key.clone()).collect();
        let cached = self.backend_get_many(&keys).await;

        let mut misses = Pending::new();
        for (key, value) in pending {
            let Some(entry) = cached.get(&key).cloned() else {
                misses.push((key, value));
                continue;
            };
            match Self::check_payload(&value, entry) {
                Ok(row) => {
                    self.local.insert(key, row.clone());
                    results.push(row);
                }
                Err(reason) => {
                    self.drop_corrupt(&key, &reason).await?;
                    misses.push((key, value));
                }
            }
        }

        results.extend(self.fill_from_store(M::PK_FIELD, misses).await?);
        Ok(results)
    }

    /// Splits `values` into rows the local tier already holds and the rest.
    async fn partition_local(&self, field: &str, values: &[FieldValue]) -> Result<(Vec<M>, Pending)> {
        let mut hits = Vec::new();
        let mut pending = Pending::new();

        for value in values {
            let key = self.key(field, value);
            match self.local_row(&key, field, value) {
                Some(Ok(row)) => hits.push(row),
                Some(Err(reason)) => {
                    self.drop_corrupt(&key, &reason).await?;
                    pending.push((key, value.clone()));
                }
                None => pending.push((key, value.clone())),
            }
        }

        Ok((hits, pending))
    }

    /// Resolves `misses` with one store query and warms the cache with the
    /// rows found.
    ///
    /// Rows are written with the full per-object write so the model's other
    /// pointer entries are populated too, not just `field`'s.
    async fn fill_from_store(&self, field: &str, misses: Pending) -> Result<Vec<M>> {
        if misses.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<FieldValue> = misses.iter().map(|(_, value)| value.clone()).collect();
        let rows = index_by(self.fetch_many(field, &values).await?, field);

        let mut found = Vec::new();
        for (key, value) in misses {
            if let Some(row) = rows.get(&value.to_string()) {
                self.local.insert(key, row.clone());
                found.push(row.clone());
            }
        }

        for row in rows.values() {
            self.write_through(row).await;
        }
        Ok(found)
    }
}

/// Indexes rows by the rendered value of `field`.
fn index_by<M: Model>(rows: Vec<M>, field: &str) -> HashMap<String, M> {
    rows.into_iter()
        .filter_map(|row| {
            let value = row.field_value(field)?;
            Some((value.to_string(), row))
        })
        .collect()
}
