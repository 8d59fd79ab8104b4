//! Error types for the model cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the model cache.
///
/// Only `NotCacheable`, `NotFound` and `Unavailable` are expected to reach
/// application code in normal operation. Backend failures and corrupt
/// entries are recovered inside the manager.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Lookup shape the cache cannot serve (wrong arity or field not cacheable)
    #[error("We cannot cache this query: {0}")]
    NotCacheable(String),

    /// Backing store has no row matching the lookup
    #[error("{model} matching query does not exist: {lookup}")]
    NotFound { model: &'static str, lookup: String },

    /// Cached value has the wrong shape or disagrees with its key
    #[error("Unexpected value returned from cache for {key}: {reason}")]
    CorruptCacheEntry { key: String, reason: String },

    /// Cache backend transport failure
    #[error("Cache backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backing store failure other than a missing row
    #[error("Backing store error: {0}")]
    Store(String),

    /// A local cache scope was opened while another one is active
    #[error("nested use of local cache scope")]
    ScopeAlreadyActive,

    /// Operation rejected by the deployment mode limit
    #[error("{operation} is not available in {mode} mode")]
    Unavailable {
        operation: &'static str,
        mode: String,
    },

    /// Invalid key or value handed to a backend
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Snapshot encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// True when the error means "no such row" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }
}

// == Result Type Alias ==
/// Convenience Result type for the model cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = CacheError::NotFound {
            model: "Organization",
            lookup: "slug=acme".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Organization matching query does not exist: slug=acme"
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unavailable_display() {
        let err = CacheError::Unavailable {
            operation: "get_many",
            mode: "region".to_string(),
        };
        assert_eq!(err.to_string(), "get_many is not available in region mode");
        assert!(!err.is_not_found());
    }
}
