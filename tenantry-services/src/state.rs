//! Shared state handed to request handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tenantry_core::{CacheSettings, CryptoConfig, HealthCheck, PoolConfig};
use tenantry_crypto::EncryptionService;
use tenantry_pool::{PgConnector, PgTenantRegistry, PoolManager, RegistryConfig};
use tenantry_storage::{connect_backend, CacheBackend, CachedCompute, IntegrationConfigCache, StatsCache};

use crate::error::ApiResult;
use crate::integration::IntegrationService;
use crate::pg::{PgCallRecordStore, PgIntegrationStore};
use crate::stats::StatsService;

/// Application-wide state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Per-tenant database clients.
    pub pool: PoolManager<PgConnector>,
    pub crypto: Arc<EncryptionService>,
    pub cache: Arc<dyn CacheBackend>,
    pub integrations: IntegrationService,
    pub stats: StatsService,
    /// Stops the background health sweeper.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the Postgres deployment from environment variables.
    ///
    /// Fails if `TENANTRY_ENCRYPTION_KEY` is unset, the registry table name
    /// is invalid, or the configured cache backend cannot be opened. Spawns
    /// the pool health sweeper.
    pub async fn from_env() -> ApiResult<Self> {
        let crypto = Arc::new(EncryptionService::new(CryptoConfig::from_env()?)?);
        let cache_settings = CacheSettings::from_env()?;
        let registry = PgTenantRegistry::from_config(&RegistryConfig::from_env()?)?;

        let pool = PoolManager::new(
            PgConnector::new(),
            Arc::new(registry),
            Arc::clone(&crypto),
            PoolConfig::from_env(),
        );
        let cache = connect_backend(&cache_settings).await?;

        let state = Self::assemble(pool, crypto, cache, &cache_settings);
        state.pool.spawn_health_sweeper(state.shutdown.clone());
        Ok(state)
    }

    /// Build the services over an existing pool and cache backend.
    pub fn assemble(
        pool: PoolManager<PgConnector>,
        crypto: Arc<EncryptionService>,
        cache: Arc<dyn CacheBackend>,
        settings: &CacheSettings,
    ) -> Self {
        let compute = CachedCompute::new(Arc::clone(&cache));
        let integrations = IntegrationService::new(
            Arc::new(PgIntegrationStore::new(pool.clone())),
            Arc::clone(&crypto),
            IntegrationConfigCache::new(compute.clone()).with_ttl(settings.config_ttl),
        );
        let stats = StatsService::new(
            Arc::new(PgCallRecordStore::new(pool.clone())),
            StatsCache::new(compute).with_ttl(settings.stats_ttl),
        );

        Self {
            pool,
            crypto,
            cache,
            integrations,
            stats,
            shutdown: CancellationToken::new(),
        }
    }

    /// Pool health plus cache statistics.
    pub async fn health(&self) -> HealthCheck {
        let cache_stats = CachedCompute::new(Arc::clone(&self.cache)).stats().await;
        self.pool.health().with_metadata(
            "cache",
            serde_json::json!({
                "backend": self.cache.name(),
                "hits": cache_stats.hits,
                "misses": cache_stats.misses,
                "entries": cache_stats.entry_count,
                "hit_rate": cache_stats.hit_rate(),
            }),
        )
    }

    /// Stop the sweeper and close every tenant connection.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.pool.shutdown().await;
    }
}
