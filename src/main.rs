//! Model Cache demo
//!
//! Wires an in-memory backend and store to a manager and walks through a
//! cached lookup, a slug rename and a delete, logging what each step hit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use model_cache::{
    spawn_cleanup_task, BackingStore, CacheError, Config, FieldValue, Filter, LimitedCache,
    ManagerConfig, MemoryBackend, MemoryStore, Model, ModeLimit, ModelCache, ObjectCacheManager,
    TriggerCondition,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Organization {
    id: i64,
    slug: String,
    name: String,
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" for this crate, can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "model_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        ttl = config.cache_ttl,
        prefix = %config.key_prefix,
        strict = config.strict,
        max_entries = config.max_entries,
        mode = %config.mode,
        "Configuration loaded"
    );

    let backend = MemoryBackend::from_config(&config);
    let cleanup = spawn_cleanup_task(backend.clone(), Duration::from_secs(config.cleanup_interval));

    let store = MemoryStore::<Organization>::shared();
    let manager = ObjectCacheManager::new(
        store.clone(),
        Arc::new(backend.clone()),
        ManagerConfig::from_config(&config),
    );
    info!(version = manager.cache_version(), fields = ?manager.cache_fields(), "Manager ready");

    let queries = Arc::new(AtomicUsize::new(0));
    let counter = queries.clone();
    let _trigger = manager.register_trigger(TriggerCondition::Query, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let acme = store
        .save(Organization {
            id: 1,
            slug: "acme".to_string(),
            name: "Acme".to_string(),
        })
        .await
        .context("saving organization")?;

    let found = manager.get(Filter::new("slug", "acme")).await?;
    info!(id = found.id, queries = queries.load(Ordering::SeqCst), "Looked up by slug");

    let renamed = store
        .save(Organization {
            slug: "acme-2".to_string(),
            ..acme
        })
        .await
        .context("renaming organization")?;
    info!(slug = %renamed.slug, "Renamed organization");

    let found = manager.get(Filter::new("slug", "acme-2")).await?;
    info!(id = found.id, queries = queries.load(Ordering::SeqCst), "Looked up by new slug");

    match manager.get(Filter::new("slug", "acme")).await {
        Err(e) if e.is_not_found() => info!(error = %e, "Old slug no longer resolves"),
        Err(e) => return Err(e.into()),
        Ok(row) => anyhow::bail!("old slug still resolves to {}", row.id),
    }

    manager
        .local_scope(async {
            let rows = manager
                .get_many("pk", &[FieldValue::Int(1), FieldValue::Int(2)])
                .await?;
            manager.get(Filter::pk(1)).await?;
            info!(
                rows = rows.len(),
                local_entries = manager.local_cache().len(),
                "Batch lookup inside local scope"
            );
            Ok::<_, CacheError>(())
        })
        .await??;

    let limited = LimitedCache::new(manager.clone(), ModeLimit::new(config.mode, [config.mode]));
    let via_limit: Organization = limited.get(Filter::pk(1)).await?;
    info!(id = via_limit.id, mode = %limited.limit().current(), "Lookup through mode limit");

    store.delete(&renamed).await.context("deleting organization")?;
    let gone = manager.get(Filter::pk(1)).await;
    info!(deleted = gone.is_err(), "Deleted organization");

    let stats = backend.stats().await;
    info!(
        stats = %serde_json::to_string(&stats)?,
        hit_rate = stats.hit_rate(),
        store_queries = store.query_count(),
        "Backend statistics"
    );

    cleanup.abort();
    Ok(())
}
