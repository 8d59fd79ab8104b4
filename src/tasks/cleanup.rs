//! TTL Cleanup Task
//!
//! Background task that periodically sweeps expired entries out of the
//! in-memory backend. Reads already skip expired entries; the sweep keeps
//! them from holding capacity until the next read of the same key.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::MemoryBackend;

/// Shortest pause between sweeps; shorter intervals are raised to it.
pub const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(10);

/// Spawns a task that removes expired entries from `backend` every
/// `interval`, or every `MIN_CLEANUP_INTERVAL` if `interval` is shorter.
///
/// The task runs until the returned handle is aborted.
///
/// # Example
/// ```ignore
/// let backend = MemoryBackend::new(10_000);
/// let cleanup = spawn_cleanup_task(backend.clone(), Duration::from_secs(1));
/// // Later, during shutdown:
/// cleanup.abort();
/// ```
pub fn spawn_cleanup_task(backend: MemoryBackend, interval: Duration) -> JoinHandle<()> {
    let store = backend.store();
    let interval = interval.max(MIN_CLEANUP_INTERVAL);

    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting TTL cleanup task");

        loop {
            tokio::time::sleep(interval).await;

            let (removed, remaining) = {
                let mut store = store.write().await;
                (store.cleanup_expired(), store.len())
            };

            if removed > 0 {
                info!(removed, remaining, "TTL cleanup removed expired entries");
            } else {
                debug!(remaining, "TTL cleanup found no expired entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, CacheValue};
    use crate::model::FieldValue;

    const VERSION: &str = "abc";

    async fn put(backend: &MemoryBackend, key: &str, ttl: Duration) {
        backend
            .set(key, CacheValue::pointer(FieldValue::Int(1)), ttl, VERSION)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let backend = MemoryBackend::new(100);
        put(&backend, "expire_soon", Duration::from_millis(20)).await;

        let handle = spawn_cleanup_task(backend.clone(), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Swept without any read touching the key
        assert_eq!(backend.len().await, 0);
        assert!(backend.stats().await.expirations >= 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let backend = MemoryBackend::new(100);
        put(&backend, "long_lived", Duration::from_secs(3600)).await;

        let handle = spawn_cleanup_task(backend.clone(), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(backend.len().await, 1);
        assert!(backend.get("long_lived", VERSION).await.unwrap().is_some());

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_survives_zero_interval() {
        let backend = MemoryBackend::new(100);
        put(&backend, "expire_soon", Duration::from_millis(20)).await;

        let handle = spawn_cleanup_task(backend.clone(), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!handle.is_finished(), "Task should still be sweeping");
        assert_eq!(backend.len().await, 0);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let backend = MemoryBackend::new(100);

        let handle = spawn_cleanup_task(backend, Duration::from_millis(50));
        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
