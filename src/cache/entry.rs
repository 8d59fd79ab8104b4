//! Cache Entry Module
//!
//! A single serialized value held by the in-memory backend, with its expiry.

use std::time::Duration;

use chrono::Utc;

// == Cache Entry ==
/// Serialized value plus TTL bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Encoded `CacheValue`
    pub value: String,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<i64>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry that expires after `ttl`, or never when `ttl` is None.
    pub fn new(value: String, ttl: Option<Duration>) -> Self {
        let now = current_timestamp_ms();
        let expires_at = ttl.map(|ttl| now.saturating_add(ttl.as_millis() as i64));

        Self {
            value,
            created_at: now,
            expires_at,
        }
    }

    // == Is Expired ==
    /// An entry is expired once the current time reaches its expiration time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    pub(crate) fn is_expired_at(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(expires) if now_ms >= expires)
    }

    // == Time To Live ==
    /// Remaining lifetime, `Some(ZERO)` once expired, None without a TTL.
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at.map(|expires| {
            let remaining = expires - current_timestamp_ms();
            Duration::from_millis(remaining.max(0) as u64)
        })
    }
}

/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}
