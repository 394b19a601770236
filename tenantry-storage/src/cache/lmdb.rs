//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) as a memory-mapped,
//! process-local cache that survives restarts.
//!
//! # Value Format
//!
//! `[expires_at: 8 bytes, unix millis, little endian][payload]`. Expired
//! entries are treated as misses and removed on read.
//!
//! # Tenant Isolation
//!
//! Keys are encoded `CacheKey`s, so a tenant's entries in one namespace are
//! contiguous and `delete_prefix` is a single prefix scan.

use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use tenantry_core::CacheError;

use super::key::{CacheKey, KeyPrefix};
use super::traits::{CacheBackend, CacheStats};

const EXPIRY_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Unavailable {
            reason: e.to_string(),
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed cache with per-entry expiry.
pub struct LmdbCacheBackend {
    env: Env,
    db: Database<Bytes, Bytes>,
    stats: RwLock<CacheStats>,
}

impl LmdbCacheBackend {
    /// Open (or create) a cache under `path` with a map of `max_size_mb`.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per directory by this
        // process and never with conflicting flags.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        tracing::info!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB cache");

        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    fn record<F: FnOnce(&mut CacheStats)>(&self, f: F) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    fn remove_expired(&self, key: &[u8]) -> Result<(), LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db.delete(&mut wtxn, key).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        self.record(|s| s.expirations += 1);
        Ok(())
    }
}

fn encode_value(value: &[u8], ttl: Duration) -> Vec<u8> {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);
    let mut out = Vec::with_capacity(EXPIRY_LEN + value.len());
    out.extend_from_slice(&expires_at.to_le_bytes());
    out.extend_from_slice(value);
    out
}

/// Split a stored value into its expiry and payload. `None` for values too
/// short to carry an expiry.
fn decode_value(bytes: &[u8]) -> Option<(i64, &[u8])> {
    if bytes.len() < EXPIRY_LEN {
        return None;
    }
    let (expiry, payload) = bytes.split_at(EXPIRY_LEN);
    let expiry: [u8; EXPIRY_LEN] = expiry.try_into().ok()?;
    Some((i64::from_le_bytes(expiry), payload))
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let encoded = key.encode();
        let live = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            match self.db.get(&rtxn, encoded.as_bytes()).map_err(txn_error)? {
                None => None,
                Some(bytes) => match decode_value(bytes) {
                    Some((expires_at, payload)) if expires_at > Utc::now().timestamp_millis() => {
                        Some(Some(payload.to_vec()))
                    }
                    _ => Some(None),
                },
            }
        };

        match live {
            Some(Some(payload)) => {
                self.record(|s| s.hits += 1);
                Ok(Some(payload))
            }
            Some(None) => {
                self.remove_expired(encoded.as_bytes())?;
                self.record(|s| s.misses += 1);
                Ok(None)
            }
            None => {
                self.record(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let encoded = key.encode();
        let full = encode_value(&value, ttl);

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .put(&mut wtxn, encoded.as_bytes(), &full)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        let encoded = key.encode();
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .delete(&mut wtxn, encoded.as_bytes())
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &KeyPrefix) -> Result<u64, CacheError> {
        let encoded = prefix.encode();

        let keys: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            let iter = self
                .db
                .prefix_iter(&rtxn, encoded.as_bytes())
                .map_err(txn_error)?;
            iter.filter_map(|item| item.ok().map(|(k, _)| k.to_vec()))
                .collect()
        };

        if keys.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut removed = 0u64;
        for key in &keys {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                removed += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let entry_count = self.db.len(&rtxn).map_err(txn_error)?;
        let memory_bytes = self
            .env
            .real_disk_size()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.entry_count = entry_count;
        stats.memory_bytes = memory_bytes;
        Ok(stats)
    }
}
