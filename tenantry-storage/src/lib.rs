//! Tenantry Storage - cache layer
//!
//! Namespaced, tenant-scoped TTL cache in front of integration configuration
//! reads and computed statistics, with in-memory, LMDB and (feature `redis`)
//! Redis backends.

pub mod cache;

pub use cache::{
    connect_backend, CacheBackend, CacheKey, CacheNamespace, CacheRead, CacheStats, CachedCompute,
    InMemoryCacheBackend, IntegrationConfigCache, KeyPrefix, LmdbCacheBackend, LmdbCacheError,
    StatsCache,
};

#[cfg(feature = "redis")]
pub use cache::RedisCacheBackend;
