//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::time::Duration;

use crate::limit::DeploymentMode;

/// Default TTL for pointer and payload entries, in seconds.
pub const DEFAULT_CACHE_TTL: u64 = 60 * 5;

/// Default prefix for every model cache key.
pub const DEFAULT_KEY_PREFIX: &str = "modelcache";

/// Default number of rows a manager keeps cache field baselines for.
pub const DEFAULT_MAX_TRACKED: usize = 10_000;

/// Process-level cache configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// TTL in seconds for entries written by the managers
    pub cache_ttl: u64,
    /// Prefix for every cache key
    pub key_prefix: String,
    /// Raise corrupt cache entries instead of recovering from them
    pub strict: bool,
    /// Maximum number of entries the in-memory backend can hold
    pub max_entries: usize,
    /// Background cleanup task interval in seconds, never zero
    pub cleanup_interval: u64,
    /// Rows per manager whose cache field baselines are remembered
    pub max_tracked: usize,
    /// Deployment mode the process runs in
    pub mode: DeploymentMode,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MODEL_CACHE_TTL` - Entry TTL in seconds (default: 300)
    /// - `MODEL_CACHE_PREFIX` - Key prefix (default: modelcache)
    /// - `MODEL_CACHE_STRICT` - `1` or `true` to raise corrupt entries (default: false)
    /// - `MODEL_CACHE_MAX_ENTRIES` - In-memory backend capacity (default: 10000)
    /// - `MODEL_CACHE_CLEANUP_INTERVAL` - Cleanup frequency in seconds, `0` is ignored (default: 1)
    /// - `MODEL_CACHE_MAX_TRACKED` - Baselines kept per manager (default: 10000)
    /// - `MODEL_CACHE_MODE` - `monolith`, `control` or `region` (default: monolith)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_ttl: env::var("MODEL_CACHE_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache_ttl),
            key_prefix: env::var("MODEL_CACHE_PREFIX")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.key_prefix),
            strict: env::var("MODEL_CACHE_STRICT")
                .ok()
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.strict),
            max_entries: env::var("MODEL_CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_entries),
            cleanup_interval: parse_positive(env::var("MODEL_CACHE_CLEANUP_INTERVAL").ok())
                .unwrap_or(defaults.cleanup_interval),
            max_tracked: env::var("MODEL_CACHE_MAX_TRACKED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_tracked),
            mode: env::var("MODEL_CACHE_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.mode),
        }
    }

    /// Entry TTL as a `Duration`.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            strict: false,
            max_entries: 10_000,
            cleanup_interval: 1,
            max_tracked: DEFAULT_MAX_TRACKED,
            mode: DeploymentMode::Monolith,
        }
    }
}

/// Parses a value that must be greater than zero.
fn parse_positive(raw: Option<String>) -> Option<u64> {
    raw.and_then(|v| v.parse().ok()).filter(|v| *v > 0)
}
