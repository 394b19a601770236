//! Pooled connection entries and their lifecycle.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use tenantry_core::{ConnectionHealth, TenantId, Timestamp};

// ============================================================================
// ENTRY STATE
// ============================================================================

/// Lifecycle state of a tenant's pool entry.
///
/// ```text
/// Connecting -> Active <-> Idle -> Evicted -> Closed
///               Active|Idle -> Unhealthy -> Closed
/// ```
///
/// `Closed` means the driver client has been closed. A retired entry is never
/// handed out again; the next caller builds a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// A connection attempt is in flight.
    Connecting,
    /// At least one lease is outstanding.
    Active,
    /// Live, with no outstanding lease.
    Idle,
    /// Failed a health check; closes when the last lease drops.
    Unhealthy,
    /// Removed by idle timeout, explicit eviction or shutdown.
    Evicted,
    Closed,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Connecting => "connecting",
            EntryState::Active => "active",
            EntryState::Idle => "idle",
            EntryState::Unhealthy => "unhealthy",
            EntryState::Evicted => "evicted",
            EntryState::Closed => "closed",
        }
    }

    /// Whether a lease may be taken on an entry in this state.
    pub fn is_usable(&self) -> bool {
        matches!(self, EntryState::Active | EntryState::Idle)
    }

    /// Retired states wait only for their last lease before closing.
    pub fn is_retired(&self) -> bool {
        matches!(self, EntryState::Unhealthy | EntryState::Evicted)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryState::Closed)
    }

    pub fn can_transition_to(&self, next: EntryState) -> bool {
        use EntryState::*;
        matches!(
            (self, next),
            (Connecting, Active)
                | (Connecting, Closed)
                | (Active, Idle)
                | (Idle, Active)
                | (Active | Idle, Unhealthy)
                | (Active | Idle, Evicted)
                | (Unhealthy | Evicted, Closed)
        )
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// POOLED ENTRY
// ============================================================================

#[derive(Debug)]
struct EntryMeta {
    state: EntryState,
    health: ConnectionHealth,
    refs: usize,
    last_used: Instant,
    last_used_at: Timestamp,
}

impl EntryMeta {
    fn touch(&mut self) {
        self.last_used = Instant::now();
        self.last_used_at = Utc::now();
    }
}

/// One tenant's driver client plus the bookkeeping the manager needs.
///
/// Methods that retire the entry return `true` when the caller has become
/// responsible for closing the client. That happens exactly once per entry.
pub struct PooledEntry<T> {
    tenant_id: TenantId,
    database_name: String,
    client: T,
    created_at: Timestamp,
    meta: Mutex<EntryMeta>,
}

impl<T> PooledEntry<T> {
    /// A freshly connected entry: `Idle`, unverified, no leases.
    pub fn new(tenant_id: TenantId, database_name: String, client: T) -> Self {
        let now = Utc::now();
        Self {
            tenant_id,
            database_name,
            client,
            created_at: now,
            meta: Mutex::new(EntryMeta {
                state: EntryState::Idle,
                health: ConnectionHealth::Unverified,
                refs: 0,
                last_used: Instant::now(),
                last_used_at: now,
            }),
        }
    }

    fn meta(&self) -> MutexGuard<'_, EntryMeta> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn client(&self) -> &T {
        &self.client
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn state(&self) -> EntryState {
        self.meta().state
    }

    pub fn health(&self) -> ConnectionHealth {
        self.meta().health
    }

    pub fn ref_count(&self) -> usize {
        self.meta().refs
    }

    /// Take a lease if the entry is still usable.
    pub fn try_acquire(&self) -> bool {
        let mut meta = self.meta();
        if !meta.state.is_usable() {
            return false;
        }
        meta.state = EntryState::Active;
        meta.refs += 1;
        meta.touch();
        true
    }

    /// Give a lease back. Returns `true` if this was the last lease on a
    /// retired entry.
    pub fn release(&self) -> bool {
        let mut meta = self.meta();
        meta.refs = meta.refs.saturating_sub(1);
        meta.touch();
        if meta.refs > 0 {
            return false;
        }
        match meta.state {
            EntryState::Active => {
                meta.state = EntryState::Idle;
                false
            }
            state if state.is_retired() => {
                meta.state = EntryState::Closed;
                true
            }
            _ => false,
        }
    }

    /// Move a usable entry to `Unhealthy` or `Evicted`.
    ///
    /// Returns `true` if no lease is outstanding, in which case the entry is
    /// already `Closed` and the caller must close the client.
    pub fn retire(&self, to: EntryState) -> bool {
        let mut meta = self.meta();
        Self::retire_locked(&mut meta, to)
    }

    /// Evict the entry if it has been unleased for at least `min_idle`.
    ///
    /// `None` means the entry was left alone; otherwise the flag has the
    /// meaning of [`PooledEntry::retire`].
    pub fn retire_if_idle(&self, now: Instant, min_idle: Duration) -> Option<bool> {
        let mut meta = self.meta();
        if meta.refs > 0 || !meta.state.is_usable() {
            return None;
        }
        if now.saturating_duration_since(meta.last_used) < min_idle {
            return None;
        }
        Some(Self::retire_locked(&mut meta, EntryState::Evicted))
    }

    fn retire_locked(meta: &mut EntryMeta, to: EntryState) -> bool {
        if !to.is_retired() || !meta.state.can_transition_to(to) {
            return false;
        }
        if to == EntryState::Unhealthy {
            meta.health = ConnectionHealth::Unhealthy;
        }
        if meta.refs == 0 {
            meta.state = EntryState::Closed;
            true
        } else {
            meta.state = to;
            false
        }
    }

    /// How long the entry has gone without a lease, or `None` while leased
    /// or retired.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        let meta = self.meta();
        if meta.refs > 0 || !meta.state.is_usable() {
            return None;
        }
        Some(now.saturating_duration_since(meta.last_used))
    }

    pub fn mark_healthy(&self) {
        let mut meta = self.meta();
        if meta.state.is_usable() {
            meta.health = ConnectionHealth::Healthy;
        }
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        let meta = self.meta();
        EntrySnapshot {
            tenant_id: self.tenant_id.clone(),
            state: meta.state,
            health: meta.health,
            refs: meta.refs,
            database_name: Some(self.database_name.clone()),
            created_at: Some(self.created_at),
            last_used_at: Some(meta.last_used_at),
        }
    }
}

impl<T> fmt::Debug for PooledEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.meta();
        f.debug_struct("PooledEntry")
            .field("tenant_id", &self.tenant_id)
            .field("database_name", &self.database_name)
            .field("state", &meta.state)
            .field("health", &meta.health)
            .field("refs", &meta.refs)
            .finish()
    }
}

/// Point-in-time view of one pool slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub tenant_id: TenantId,
    pub state: EntryState,
    pub health: ConnectionHealth,
    pub refs: usize,
    /// `None` while connecting.
    pub database_name: Option<String>,
    pub created_at: Option<Timestamp>,
    pub last_used_at: Option<Timestamp>,
}

impl EntrySnapshot {
    pub(crate) fn connecting(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            state: EntryState::Connecting,
            health: ConnectionHealth::Unverified,
            refs: 0,
            database_name: None,
            created_at: None,
            last_used_at: None,
        }
    }
}
