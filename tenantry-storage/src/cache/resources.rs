//! Per-resource cache wrappers.
//!
//! Each wrapper owns its key layout and TTL so call sites never build keys
//! by hand.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tenantry_core::{TenantId, TenantryResult};

use super::compute::CachedCompute;
use super::key::{CacheKey, CacheNamespace, KeyPrefix};
use super::read::CacheRead;

/// Segment under which a tenant's full integration listing is cached.
const LIST_SEGMENT: &str = "_all";

/// Cache for per-tenant integration configuration records.
///
/// Callers cache the record exactly as stored (secrets still encrypted).
#[derive(Debug, Clone)]
pub struct IntegrationConfigCache {
    cache: CachedCompute,
    ttl: Duration,
}

impl IntegrationConfigCache {
    pub fn new(cache: CachedCompute) -> Self {
        Self {
            cache,
            ttl: CacheNamespace::IntegrationConfig.default_ttl(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn key(tenant_id: &TenantId, integration_type: &str) -> CacheKey {
        CacheKey::new(CacheNamespace::IntegrationConfig, tenant_id, [integration_type])
    }

    pub fn list_key(tenant_id: &TenantId) -> CacheKey {
        CacheKey::new(CacheNamespace::IntegrationConfig, tenant_id, [LIST_SEGMENT])
    }

    /// Read one integration record through the cache.
    pub async fn get_or_load<T, F, Fut>(
        &self,
        tenant_id: &TenantId,
        integration_type: &str,
        load: F,
    ) -> TenantryResult<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = TenantryResult<T>>,
    {
        self.cache
            .get_or_compute(&Self::key(tenant_id, integration_type), self.ttl, load)
            .await
    }

    /// Read a tenant's full integration listing through the cache.
    pub async fn get_or_load_all<T, F, Fut>(
        &self,
        tenant_id: &TenantId,
        load: F,
    ) -> TenantryResult<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = TenantryResult<T>>,
    {
        self.cache
            .get_or_compute(&Self::list_key(tenant_id), self.ttl, load)
            .await
    }

    /// Drop one record and the tenant listing that includes it.
    pub async fn invalidate(&self, tenant_id: &TenantId, integration_type: &str) {
        self.cache
            .invalidate(&Self::key(tenant_id, integration_type))
            .await;
        self.cache.invalidate(&Self::list_key(tenant_id)).await;
    }

    /// Drop everything cached for the tenant's integrations.
    pub async fn invalidate_tenant(&self, tenant_id: &TenantId) -> u64 {
        self.cache
            .invalidate_prefix(&KeyPrefix::new(CacheNamespace::IntegrationConfig, tenant_id))
            .await
    }
}

/// Cache for computed statistics.
///
/// Any new call record changes every statistic of its tenant, so the only
/// invalidation offered is the whole tenant prefix.
#[derive(Debug, Clone)]
pub struct StatsCache {
    cache: CachedCompute,
    ttl: Duration,
}

impl StatsCache {
    pub fn new(cache: CachedCompute) -> Self {
        Self {
            cache,
            ttl: CacheNamespace::Statistics.default_ttl(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn key(tenant_id: &TenantId, query_key: &str) -> CacheKey {
        CacheKey::new(CacheNamespace::Statistics, tenant_id, [query_key])
    }

    pub async fn get_or_compute<T, F, Fut>(
        &self,
        tenant_id: &TenantId,
        query_key: &str,
        compute: F,
    ) -> TenantryResult<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = TenantryResult<T>>,
    {
        self.cache
            .get_or_compute(&Self::key(tenant_id, query_key), self.ttl, compute)
            .await
    }

    pub async fn invalidate_tenant(&self, tenant_id: &TenantId) -> u64 {
        self.cache
            .invalidate_prefix(&KeyPrefix::new(CacheNamespace::Statistics, tenant_id))
            .await
    }
}
