//! Cache-aside reads with invalidation.
//!
//! `CachedCompute` is the one place that decides what happens when the cache
//! misbehaves: backend failures and undecodable entries are logged and
//! treated as misses, so the authoritative source always answers.
//!
//! Invalidations bump a generation counter for the key and for its tenant
//! prefix. A computed value is only written back if neither generation moved
//! while it was being computed, so a read that started before a write cannot
//! repopulate the cache with the pre-write value.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tenantry_core::TenantryResult;

use super::key::{CacheKey, KeyPrefix};
use super::read::CacheRead;
use super::traits::{CacheBackend, CacheStats};

/// Number of generation counters. Keys share counters by hash; a collision
/// only costs a skipped write-back.
const GENERATION_SLOTS: usize = 1024;

/// Striped invalidation counters, bounded regardless of key count.
struct Generations {
    slots: Box<[AtomicU64]>,
}

/// Generations of a key and of its prefix, taken before computing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    key: u64,
    prefix: u64,
}

impl Generations {
    fn new() -> Self {
        Self {
            slots: (0..GENERATION_SLOTS).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn slot(&self, encoded: &str) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        encoded.hash(&mut hasher);
        &self.slots[(hasher.finish() % self.slots.len() as u64) as usize]
    }

    fn snapshot(&self, key: &CacheKey) -> Snapshot {
        Snapshot {
            key: self.slot(&key.encode()).load(Ordering::SeqCst),
            prefix: self.slot(&key.prefix().encode()).load(Ordering::SeqCst),
        }
    }

    fn bump(&self, encoded: &str) {
        self.slot(encoded).fetch_add(1, Ordering::SeqCst);
    }
}

/// Cache-aside helper over a shared backend.
///
/// Clones share the backend and the generation counters, so every service
/// reading and invalidating the same keys must use clones of one instance.
#[derive(Clone)]
pub struct CachedCompute {
    backend: Arc<dyn CacheBackend>,
    generations: Arc<Generations>,
}

impl CachedCompute {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            generations: Arc::new(Generations::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Return the cached value for `key`, or run `compute`, store its result
    /// for `ttl` and return it.
    ///
    /// Errors from `compute` are returned unchanged and nothing is cached.
    /// If `key` or its prefix is invalidated while `compute` runs, the result
    /// is returned but not cached.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        compute: F,
    ) -> TenantryResult<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = TenantryResult<T>>,
    {
        if let Some(value) = self.lookup(key).await {
            return Ok(CacheRead::from_cache(value));
        }

        let before = self.generations.snapshot(key);
        let value = compute().await?;
        if self.generations.snapshot(key) != before {
            tracing::debug!(key = %key, "Invalidated during compute, not caching");
            return Ok(CacheRead::from_source(value));
        }

        self.store(key, &value, ttl).await;
        // An invalidation that landed between the check and the write must
        // still win.
        if self.generations.snapshot(key) != before {
            self.delete(key).await;
        }
        Ok(CacheRead::from_source(value))
    }

    /// Read and decode `key`. Any failure is a miss.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        match self.backend.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(
                        key = %key,
                        backend = self.backend.name(),
                        error = %e,
                        "Discarding undecodable cache entry"
                    );
                    self.invalidate(key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    backend = self.backend.name(),
                    error = %e,
                    "Cache read failed, computing from source"
                );
                None
            }
        }
    }

    /// Write `value` under `key`. Failures are logged.
    pub async fn store<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache value failed to serialize");
                return;
            }
        };
        if let Err(e) = self.backend.set(key, bytes, ttl).await {
            tracing::warn!(
                key = %key,
                backend = self.backend.name(),
                error = %e,
                "Cache write failed"
            );
        }
    }

    /// Delete `key`. Failures are logged; the entry then ages out by TTL.
    pub async fn invalidate(&self, key: &CacheKey) {
        self.generations.bump(&key.encode());
        self.delete(key).await;
    }

    async fn delete(&self, key: &CacheKey) {
        if let Err(e) = self.backend.delete(key).await {
            tracing::warn!(
                key = %key,
                backend = self.backend.name(),
                error = %e,
                "Cache invalidation failed"
            );
        }
    }

    /// Delete every key under `prefix`, returning how many were removed.
    pub async fn invalidate_prefix(&self, prefix: &KeyPrefix) -> u64 {
        self.generations.bump(&prefix.encode());
        match self.backend.delete_prefix(prefix).await {
            Ok(removed) => {
                tracing::debug!(
                    prefix = %prefix.encode(),
                    removed,
                    "Invalidated cache prefix"
                );
                removed
            }
            Err(e) => {
                tracing::warn!(
                    prefix = %prefix.encode(),
                    backend = self.backend.name(),
                    error = %e,
                    "Cache prefix invalidation failed"
                );
                0
            }
        }
    }

    /// Backend statistics, or defaults if the backend cannot report them.
    pub async fn stats(&self) -> CacheStats {
        self.backend.stats().await.unwrap_or_else(|e| {
            tracing::warn!(backend = self.backend.name(), error = %e, "Cache stats unavailable");
            CacheStats::default()
        })
    }
}

impl std::fmt::Debug for CachedCompute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedCompute")
            .field("backend", &self.backend.name())
            .finish()
    }
}
