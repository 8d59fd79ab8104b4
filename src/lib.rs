//! Model Cache - read-through object caching for keyed models
//!
//! Serves single and batch lookups by primary key or alternate unique key
//! from a scoped in-process tier and a shared TTL backend, falling back to
//! the backing store and keeping both tiers in line with its mutations.

pub mod cache;
pub mod config;
pub mod datastore;
pub mod error;
pub mod keys;
pub mod limit;
pub mod local;
pub mod manager;
pub mod model;
pub mod tasks;
pub mod triggers;

pub use cache::{CacheBackend, CacheStats, CacheValue, MemoryBackend};
pub use config::Config;
pub use datastore::{BackingStore, MemoryStore, MutationObserver};
pub use error::{CacheError, Result};
pub use limit::{DeploymentMode, LimitedCache, ModeLimit, ModelCache};
pub use local::LocalCache;
pub use manager::{ManagerConfig, ObjectCacheManager};
pub use model::{FieldValue, Filter, Model};
pub use tasks::spawn_cleanup_task;
pub use triggers::{TriggerCondition, TriggerGuard, TriggerRegistry};
