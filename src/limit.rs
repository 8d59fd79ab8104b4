//! Deployment Limits Module
//!
//! A cache can be restricted to the deployment modes where its model lives.
//! `LimitedCache` wraps any `ModelCache` and checks every call against a
//! `ModeLimit` before delegating.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{CacheError, Result};
use crate::manager::ObjectCacheManager;
use crate::model::{FieldValue, Filter, Model};

// == Deployment Mode ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeploymentMode {
    /// Everything runs in one deployment
    #[default]
    Monolith,
    Control,
    Region,
}

impl FromStr for DeploymentMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monolith" => Ok(DeploymentMode::Monolith),
            "control" => Ok(DeploymentMode::Control),
            "region" => Ok(DeploymentMode::Region),
            other => Err(CacheError::InvalidRequest(format!(
                "unknown deployment mode: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentMode::Monolith => "monolith",
            DeploymentMode::Control => "control",
            DeploymentMode::Region => "region",
        };
        f.write_str(name)
    }
}

// == Mode Limit ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeLimit {
    current: DeploymentMode,
    allowed: Vec<DeploymentMode>,
}

impl ModeLimit {
    pub fn new(current: DeploymentMode, allowed: impl IntoIterator<Item = DeploymentMode>) -> Self {
        Self {
            current,
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn current(&self) -> DeploymentMode {
        self.current
    }

    pub fn is_available(&self) -> bool {
        self.current == DeploymentMode::Monolith || self.allowed.contains(&self.current)
    }

    /// Fails with `Unavailable` when `operation` may not run here.
    pub fn check(&self, operation: &'static str) -> Result<()> {
        if self.is_available() {
            return Ok(());
        }
        Err(CacheError::Unavailable {
            operation,
            mode: self.current.to_string(),
        })
    }
}

// == Model Cache ==
/// Cached lookups for model `M`.
#[async_trait]
pub trait ModelCache<M: Model>: Send + Sync {
    async fn get(&self, filter: Filter) -> Result<M>;

    async fn get_many(&self, field: &str, values: &[FieldValue]) -> Result<Vec<M>>;

    async fn invalidate(&self, pk: FieldValue) -> Result<()>;
}

#[async_trait]
impl<M: Model> ModelCache<M> for ObjectCacheManager<M> {
    async fn get(&self, filter: Filter) -> Result<M> {
        ObjectCacheManager::get(self, filter).await
    }

    async fn get_many(&self, field: &str, values: &[FieldValue]) -> Result<Vec<M>> {
        ObjectCacheManager::get_many(self, field, values).await
    }

    async fn invalidate(&self, pk: FieldValue) -> Result<()> {
        ObjectCacheManager::invalidate(self, pk).await
    }
}

// == Limited Cache ==
/// A `ModelCache` that only serves calls in the modes its limit allows.
#[derive(Debug)]
pub struct LimitedCache<C: ?Sized> {
    inner: Arc<C>,
    limit: ModeLimit,
}

impl<C: ?Sized> LimitedCache<C> {
    pub fn new(inner: Arc<C>, limit: ModeLimit) -> Self {
        Self { inner, limit }
    }

    pub fn limit(&self) -> &ModeLimit {
        &self.limit
    }

    pub fn inner(&self) -> &Arc<C> {
        &self.inner
    }
}

#[async_trait]
impl<M: Model, C: ModelCache<M> + ?Sized> ModelCache<M> for LimitedCache<C> {
    async fn get(&self, filter: Filter) -> Result<M> {
        self.limit.check("get")?;
        self.inner.get(filter).await
    }

    async fn get_many(&self, field: &str, values: &[FieldValue]) -> Result<Vec<M>> {
        self.limit.check("get_many")?;
        self.inner.get_many(field, values).await
    }

    async fn invalidate(&self, pk: FieldValue) -> Result<()> {
        self.limit.check("invalidate")?;
        self.inner.invalidate(pk).await
    }
}
