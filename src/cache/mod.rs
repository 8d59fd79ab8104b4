//! Cache Module
//!
//! The shared backend tier: the `CacheBackend` contract, the values stored
//! through it, and an in-memory implementation with TTL expiration and LRU
//! eviction.

mod backend;
mod entry;
mod lru;
mod memory;
mod stats;
mod store;


// Re-export public types
pub use backend::{CacheBackend, CacheValue};
pub use entry::CacheEntry;
pub use lru::LruTracker;
pub use memory::MemoryBackend;
pub use stats::CacheStats;
pub use store::CacheStore;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB
