//! In-process cache backend.
//!
//! Default for development and tests. Entries expire lazily: an expired
//! entry is dropped the next time it is read, or by the purge that runs every
//! [`PURGE_EVERY_WRITES`] writes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tenantry_core::CacheError;

use super::key::{CacheKey, KeyPrefix};
use super::traits::{CacheBackend, CacheStats};

/// Writes between purges of expired entries.
pub const PURGE_EVERY_WRITES: u64 = 256;

#[derive(Debug)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// `HashMap`-backed cache with per-entry TTL.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    writes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

fn poisoned() -> CacheError {
    CacheError::Unavailable {
        reason: "in-memory cache lock poisoned".to_string(),
    }
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        Ok(self.purge_locked(&mut entries))
    }

    fn purge_locked(&self, entries: &mut HashMap<String, MemoryEntry>) -> u64 {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = (before - entries.len()) as u64;
        self.expirations.fetch_add(removed, Ordering::Relaxed);
        if removed > 0 {
            tracing::debug!(removed, "Purged expired cache entries");
        }
        removed
    }

    /// Whether a live entry exists for `key`, without touching statistics.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| {
                entries
                    .get(&key.encode())
                    .is_some_and(|entry| entry.expires_at > now)
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let encoded = key.encode();
        let now = Instant::now();

        let expired = {
            let entries = self.entries.read().map_err(|_| poisoned())?;
            match entries.get(&encoded) {
                Some(entry) if entry.expires_at > now => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = self.entries.write().map_err(|_| poisoned())?;
            if entries
                .get(&encoded)
                .is_some_and(|entry| entry.expires_at <= now)
            {
                entries.remove(&encoded);
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let entry = MemoryEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.encode(), entry);
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % PURGE_EVERY_WRITES == 0 {
            self.purge_locked(&mut entries);
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .remove(&key.encode());
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &KeyPrefix) -> Result<u64, CacheError> {
        let encoded = prefix.encode();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&encoded));
        Ok((before - entries.len()) as u64)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: entries.len() as u64,
            memory_bytes: entries
                .iter()
                .map(|(k, v)| (k.len() + v.value.len()) as u64)
                .sum(),
            expirations: self.expirations.load(Ordering::Relaxed),
        })
    }
}
