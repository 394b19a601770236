//! Read results that carry their cache provenance.

use chrono::Utc;
use serde::Serialize;
use tenantry_core::Timestamp;

/// A value paired with whether it came from the cache.
///
/// Handlers surface `cached` to clients, so provenance travels with the
/// value instead of being logged and lost.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheRead<T> {
    value: T,
    cached: bool,
    read_at: Timestamp,
}

impl<T> CacheRead<T> {
    /// A value served from the cache.
    pub fn from_cache(value: T) -> Self {
        Self {
            value,
            cached: true,
            read_at: Utc::now(),
        }
    }

    /// A value computed from the authoritative source.
    pub fn from_source(value: T) -> Self {
        Self {
            value,
            cached: false,
            read_at: Utc::now(),
        }
    }

    pub fn was_cache_hit(&self) -> bool {
        self.cached
    }

    pub fn read_at(&self) -> Timestamp {
        self.read_at
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// Transform the value, keeping provenance.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> CacheRead<U> {
        CacheRead {
            value: f(self.value),
            cached: self.cached,
            read_at: self.read_at,
        }
    }

    /// Fallible [`map`](Self::map).
    pub fn try_map<U, E, F: FnOnce(T) -> Result<U, E>>(self, f: F) -> Result<CacheRead<U>, E> {
        Ok(CacheRead {
            value: f(self.value)?,
            cached: self.cached,
            read_at: self.read_at,
        })
    }
}
