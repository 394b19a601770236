//! Redis-backed cache, shared across service instances.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicU64, Ordering};
use tenantry_core::CacheError;

use super::key::{CacheKey, KeyPrefix};
use super::traits::{CacheBackend, CacheStats};

const SCAN_BATCH: usize = 500;

fn backend_error(op: &str, e: redis::RedisError) -> CacheError {
    CacheError::Unavailable {
        reason: format!("redis {op}: {e}"),
    }
}

/// Redis cache using a multiplexed, auto-reconnecting connection.
pub struct RedisCacheBackend {
    manager: ConnectionManager,
    prefix: Option<String>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RedisCacheBackend {
    #[tracing::instrument(level = "debug", skip(url))]
    pub async fn connect(url: &str, prefix: Option<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| backend_error("client open", e))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| backend_error("connect", e))?;
        Ok(Self {
            manager,
            prefix: prefix.filter(|p| !p.trim().is_empty()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn scoped(&self, encoded: String) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{encoded}", p.trim()),
            None => encoded,
        }
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    #[tracing::instrument(level = "debug", skip(self), fields(key = %key))]
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn
            .get(self.scoped(key.encode()))
            .await
            .map_err(|e| backend_error("get", e))?;
        let counter = if value.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    #[tracing::instrument(level = "debug", skip(self, value), fields(key = %key))]
    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let secs = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(self.scoped(key.encode()), value, secs)
            .await
            .map_err(|e| backend_error("set_ex", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), fields(key = %key))]
    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .del(self.scoped(key.encode()))
            .await
            .map_err(|e| backend_error("del", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_prefix(&self, prefix: &KeyPrefix) -> Result<u64, CacheError> {
        let mut conn = self.manager.clone();
        let pattern = format!("{}*", self.scoped(prefix.encode()));
        let mut cursor: u64 = 0;
        let mut removed = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| backend_error("scan", e))?;

            if !keys.is_empty() {
                let n: i64 = conn
                    .del(&keys)
                    .await
                    .map_err(|e| backend_error("del", e))?;
                removed += n.max(0) as u64;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ..Default::default()
        })
    }
}
