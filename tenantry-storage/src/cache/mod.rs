//! Tenant-scoped cache layer.
//!
//! Every cached value lives under a [`CacheKey`] that names its namespace and
//! tenant. Reads go through [`CachedCompute`] (or one of the resource
//! wrappers built on it); writes to the authoritative store must invalidate
//! the affected keys before they return.

mod compute;
mod key;
mod lmdb;
mod memory;
mod read;
mod resources;
mod traits;

#[cfg(feature = "redis")]
mod redis_backend;

use std::sync::Arc;

use tenantry_core::{CacheBackendKind, CacheError, CacheSettings};

pub use compute::CachedCompute;
pub use key::{CacheKey, CacheNamespace, KeyPrefix, SEPARATOR};
pub use lmdb::{LmdbCacheBackend, LmdbCacheError};
pub use memory::{InMemoryCacheBackend, PURGE_EVERY_WRITES};
pub use read::CacheRead;
pub use resources::{IntegrationConfigCache, StatsCache};
pub use traits::{CacheBackend, CacheStats};

#[cfg(feature = "redis")]
pub use redis_backend::RedisCacheBackend;

/// Construct the backend selected by `settings`.
pub async fn connect_backend(settings: &CacheSettings) -> Result<Arc<dyn CacheBackend>, CacheError> {
    let backend: Arc<dyn CacheBackend> = match settings.backend {
        CacheBackendKind::Memory => Arc::new(InMemoryCacheBackend::new()),
        CacheBackendKind::Lmdb => Arc::new(LmdbCacheBackend::new(&settings.path, settings.max_size_mb)?),
        #[cfg(feature = "redis")]
        CacheBackendKind::Redis => Arc::new(
            RedisCacheBackend::connect(&settings.redis_url, settings.key_prefix.clone()).await?,
        ),
        #[cfg(not(feature = "redis"))]
        CacheBackendKind::Redis => {
            return Err(CacheError::Unavailable {
                reason: "redis cache requested but the `redis` feature is not enabled".to_string(),
            })
        }
    };
    tracing::info!(backend = backend.name(), "Cache backend ready");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory_backend() {
        let backend = connect_backend(&CacheSettings::default()).await.unwrap();
        assert_eq!(backend.name(), "memory");
    }

    #[tokio::test]
    async fn test_connect_lmdb_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = CacheSettings {
            path: dir.path().join("cache").display().to_string(),
            max_size_mb: 8,
            ..CacheSettings::default().with_backend(CacheBackendKind::Lmdb)
        };
        let backend = connect_backend(&settings).await.unwrap();
        assert_eq!(backend.name(), "lmdb");
    }
}
