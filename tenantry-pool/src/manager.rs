//! Per-tenant connection pool manager.
//!
//! One live entry per tenant. Lookups on a live entry are lock-and-lease with
//! no I/O; misses go through a single in-flight attempt per tenant that runs
//! on its own task, so callers that give up waiting never cancel it.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tenantry_core::{
    ConnectionError, HealthCheck, PoolConfig, TenantError, TenantId, TenantryError,
    TenantryResult, MIN_HEALTH_CHECK_INTERVAL,
};
use tenantry_crypto::{EncryptionService, PurposeSalt};

use crate::connector::{ConnectTarget, Connector, ConnectorError};
use crate::entry::{EntrySnapshot, EntryState, PooledEntry};
use crate::registry::{TenantDescriptor, TenantRegistry};

type Outcome<T> = TenantryResult<Arc<PooledEntry<T>>>;
type SharedAttempt<T> = Shared<BoxFuture<'static, Outcome<T>>>;

enum Slot<T> {
    Connecting {
        attempt: u64,
        outcome: SharedAttempt<T>,
    },
    Live(Arc<PooledEntry<T>>),
}

enum Claim<C: Connector> {
    Leased(TenantConnection<C>),
    Wait(SharedAttempt<C::Client>),
}

// ============================================================================
// STATISTICS
// ============================================================================

#[derive(Debug, Default)]
struct PoolCounters {
    connects_attempted: AtomicU64,
    connects_succeeded: AtomicU64,
    connects_failed: AtomicU64,
    fast_path_hits: AtomicU64,
    evictions: AtomicU64,
    health_failures: AtomicU64,
    closes: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Pool counters since the manager was created.
///
/// Connect counters are per driver attempt, so one establishment with two
/// retries counts three attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub connects_attempted: u64,
    pub connects_succeeded: u64,
    pub connects_failed: u64,
    pub fast_path_hits: u64,
    pub evictions: u64,
    pub health_failures: u64,
    pub closes: u64,
}

/// What one health/eviction pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub pinged: usize,
    pub evicted: usize,
    pub unhealthy: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.pinged == 0 && self.evicted == 0 && self.unhealthy == 0
    }
}

// ============================================================================
// POOL MANAGER
// ============================================================================

struct PoolInner<C: Connector> {
    connector: C,
    registry: Arc<dyn TenantRegistry>,
    crypto: Arc<EncryptionService>,
    config: PoolConfig,
    slots: DashMap<TenantId, Slot<C::Client>>,
    next_attempt: AtomicU64,
    counters: PoolCounters,
    /// Entries that failed their ping in the most recent sweep.
    last_sweep_unhealthy: AtomicUsize,
    shut_down: AtomicBool,
}

/// Hands out per-tenant database clients.
///
/// Cheap to clone; clones share the same table.
pub struct PoolManager<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for PoolManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for PoolManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("connector", &self.inner.connector.name())
            .field("slots", &self.inner.slots.len())
            .field("shut_down", &self.inner.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}

impl<C: Connector> PoolManager<C> {
    pub fn new(
        connector: C,
        registry: Arc<dyn TenantRegistry>,
        crypto: Arc<EncryptionService>,
        config: PoolConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                registry,
                crypto,
                config,
                slots: DashMap::new(),
                next_attempt: AtomicU64::new(1),
                counters: PoolCounters::default(),
                last_sweep_unhealthy: AtomicUsize::new(0),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// Lease the tenant's database client, connecting on first use.
    ///
    /// Concurrent callers for the same tenant share one connection attempt
    /// and all observe its outcome. Registry, decryption and invalid-target
    /// failures are returned as-is and never retried; transient driver
    /// failures are retried per the pool's retry policy.
    #[tracing::instrument(level = "debug", skip_all, fields(tenant = %tenant_id))]
    pub async fn get_connection(&self, tenant_id: &TenantId) -> TenantryResult<TenantConnection<C>> {
        loop {
            if self.inner.shut_down.load(Ordering::Acquire) {
                return Err(ConnectionError::ShutDown.into());
            }
            let pending = match self.inner.claim(tenant_id) {
                Claim::Leased(lease) => return Ok(lease),
                Claim::Wait(pending) => pending,
            };
            let entry = pending.await?;
            if entry.try_acquire() {
                return Ok(TenantConnection::new(Arc::clone(&self.inner), entry));
            }
            tracing::debug!(
                tenant = %tenant_id,
                state = %entry.state(),
                "Entry retired before lease, retrying"
            );
        }
    }

    /// Remove the tenant's entry, e.g. after its descriptor was rotated.
    ///
    /// An outstanding lease keeps the client open until it drops. An
    /// in-flight attempt is detached and its result closed on arrival.
    pub async fn evict(&self, tenant_id: &TenantId) -> bool {
        let Some((_, slot)) = self.inner.slots.remove(tenant_id) else {
            return false;
        };
        bump(&self.inner.counters.evictions);
        tracing::info!(tenant = %tenant_id, "Evicting tenant connection");
        if let Slot::Live(entry) = slot {
            if entry.retire(EntryState::Evicted) {
                self.inner.close_entry(entry).await;
            }
        }
        true
    }

    /// One health and eviction pass over every unleased entry.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now()).await
    }

    /// [`PoolManager::sweep`] as if the current time were `now`.
    pub async fn sweep_at(&self, now: Instant) -> SweepReport {
        let inner = &self.inner;
        let mut report = SweepReport::default();

        for entry in inner.live_entries() {
            if let Some(close_now) = entry.retire_if_idle(now, inner.config.idle_timeout) {
                report.evicted += 1;
                bump(&inner.counters.evictions);
                tracing::info!(tenant = %entry.tenant_id(), "Evicting idle tenant connection");
                inner.remove_slot(&entry);
                if close_now {
                    inner.close_entry(entry).await;
                }
                continue;
            }

            let due = entry
                .idle_for(now)
                .is_some_and(|idle| idle >= inner.config.ping_after);
            if !due {
                continue;
            }

            report.pinged += 1;
            let ping = tokio::time::timeout(
                inner.config.connect_timeout,
                inner.connector.ping(entry.client()),
            )
            .await;
            let failure = match ping {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!(
                    "ping timed out after {}ms",
                    inner.config.connect_timeout.as_millis()
                )),
            };

            match failure {
                None => entry.mark_healthy(),
                Some(reason) => {
                    report.unhealthy += 1;
                    bump(&inner.counters.health_failures);
                    tracing::warn!(
                        tenant = %entry.tenant_id(),
                        reason = %reason,
                        "Tenant connection failed health check"
                    );
                    inner.remove_slot(&entry);
                    if entry.retire(EntryState::Unhealthy) {
                        inner.close_entry(entry).await;
                    }
                }
            }
        }

        inner
            .last_sweep_unhealthy
            .store(report.unhealthy, Ordering::Relaxed);
        if !report.is_empty() {
            tracing::debug!(
                pinged = report.pinged,
                evicted = report.evicted,
                unhealthy = report.unhealthy,
                "Pool sweep finished"
            );
        }
        report
    }

    /// Run [`PoolManager::sweep`] every `health_check_interval` until
    /// `cancel` fires.
    pub fn spawn_health_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let period = manager
                .inner
                .config
                .health_check_interval
                .max(MIN_HEALTH_CHECK_INTERVAL);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("tenant pool health sweeper cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        manager.sweep().await;
                    }
                }
            }
        })
    }

    /// Per-slot view, connecting slots included.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let mut entries: Vec<EntrySnapshot> = self
            .inner
            .slots
            .iter()
            .map(|slot| match slot.value() {
                Slot::Connecting { .. } => EntrySnapshot::connecting(slot.key().clone()),
                Slot::Live(entry) => entry.snapshot(),
            })
            .collect();
        entries.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        entries
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.inner.counters;
        PoolStats {
            connects_attempted: c.connects_attempted.load(Ordering::Relaxed),
            connects_succeeded: c.connects_succeeded.load(Ordering::Relaxed),
            connects_failed: c.connects_failed.load(Ordering::Relaxed),
            fast_path_hits: c.fast_path_hits.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            health_failures: c.health_failures.load(Ordering::Relaxed),
            closes: c.closes.load(Ordering::Relaxed),
        }
    }

    /// Aggregated pool health.
    pub fn health(&self) -> HealthCheck {
        const COMPONENT: &str = "tenant_pool";

        let snapshot = self.snapshot();
        let connecting = snapshot
            .iter()
            .filter(|e| e.state == EntryState::Connecting)
            .count();
        let leased = snapshot.iter().filter(|e| e.refs > 0).count();
        // Failed entries leave the table in the sweep that finds them, so
        // the last sweep's count is what reports them.
        let unhealthy = self.inner.last_sweep_unhealthy.load(Ordering::Relaxed);

        let check = if self.inner.shut_down.load(Ordering::Acquire) {
            HealthCheck::unhealthy(COMPONENT, "pool is shut down")
        } else if unhealthy > 0 {
            HealthCheck::degraded(
                COMPONENT,
                format!("{unhealthy} tenant connection(s) failed the last health check"),
            )
        } else {
            HealthCheck::healthy(COMPONENT)
        };

        check
            .with_metadata("connector", self.inner.connector.name().into())
            .with_metadata("entries", snapshot.len().into())
            .with_metadata("connecting", connecting.into())
            .with_metadata("leased", leased.into())
            .with_metadata(
                "stats",
                serde_json::to_value(self.stats()).unwrap_or_default(),
            )
    }

    /// Close every entry and refuse further requests.
    ///
    /// Leased entries close when their lease drops.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let tenants: Vec<TenantId> = self.inner.slots.iter().map(|s| s.key().clone()).collect();
        tracing::info!(entries = tenants.len(), "Shutting down tenant pool");

        for tenant_id in tenants {
            if let Some((_, Slot::Live(entry))) = self.inner.slots.remove(&tenant_id) {
                if entry.retire(EntryState::Evicted) {
                    self.inner.close_entry(entry).await;
                }
            }
        }
    }
}

impl<C: Connector> PoolInner<C> {
    /// Lease a live entry or join (starting if needed) the tenant's attempt.
    fn claim(self: &Arc<Self>, tenant_id: &TenantId) -> Claim<C> {
        match self.slots.entry(tenant_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let retired = match occupied.get() {
                    Slot::Connecting { outcome, .. } => return Claim::Wait(outcome.clone()),
                    Slot::Live(entry) => {
                        if entry.try_acquire() {
                            bump(&self.counters.fast_path_hits);
                            return Claim::Leased(TenantConnection::new(
                                Arc::clone(self),
                                Arc::clone(entry),
                            ));
                        }
                        entry.state()
                    }
                };
                tracing::debug!(tenant = %tenant_id, state = %retired, "Replacing retired entry");
                let (attempt, outcome) = self.start_attempt(tenant_id.clone());
                occupied.insert(Slot::Connecting {
                    attempt,
                    outcome: outcome.clone(),
                });
                Claim::Wait(outcome)
            }
            Entry::Vacant(vacant) => {
                let (attempt, outcome) = self.start_attempt(tenant_id.clone());
                vacant.insert(Slot::Connecting {
                    attempt,
                    outcome: outcome.clone(),
                });
                Claim::Wait(outcome)
            }
        }
    }

    fn start_attempt(self: &Arc<Self>, tenant_id: TenantId) -> (u64, SharedAttempt<C::Client>) {
        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);

        let task = {
            let inner = Arc::clone(self);
            let tenant_id = tenant_id.clone();
            tokio::spawn(async move {
                let established = inner.establish(&tenant_id).await;
                inner.finish_attempt(&tenant_id, attempt, established).await
            })
        };

        let inner = Arc::clone(self);
        let outcome = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(tenant = %tenant_id, error = %e, "Connection attempt task failed");
                    inner
                        .slots
                        .remove_if(&tenant_id, |_, slot| is_attempt(slot, attempt));
                    Err(ConnectionError::AttemptAborted {
                        tenant_id: tenant_id.to_string(),
                    }
                    .into())
                }
            }
        }
        .boxed()
        .shared();

        (attempt, outcome)
    }

    /// Install the attempt's result, unless the slot moved on meanwhile.
    async fn finish_attempt(
        &self,
        tenant_id: &TenantId,
        attempt: u64,
        established: TenantryResult<(C::Client, String)>,
    ) -> Outcome<C::Client> {
        let (client, database_name) = match established {
            Ok(ok) => ok,
            Err(e) => {
                self.slots
                    .remove_if(tenant_id, |_, slot| is_attempt(slot, attempt));
                return Err(e);
            }
        };

        let entry = Arc::new(PooledEntry::new(tenant_id.clone(), database_name, client));
        let installed = match self.slots.get_mut(tenant_id) {
            Some(mut slot) if is_attempt(&*slot, attempt) => {
                *slot = Slot::Live(Arc::clone(&entry));
                true
            }
            _ => false,
        };

        if installed {
            return Ok(entry);
        }

        tracing::debug!(tenant = %tenant_id, "Connection attempt superseded, closing its client");
        if entry.retire(EntryState::Evicted) {
            self.close_entry(entry).await;
        }
        if self.shut_down.load(Ordering::Acquire) {
            Err(ConnectionError::ShutDown.into())
        } else {
            Err(ConnectionError::AttemptAborted {
                tenant_id: tenant_id.to_string(),
            }
            .into())
        }
    }

    /// Descriptor, decrypt, connect.
    async fn establish(&self, tenant_id: &TenantId) -> TenantryResult<(C::Client, String)> {
        let descriptor = self.registry.get_tenant_descriptor(tenant_id).await?;
        if !descriptor.active {
            return Err(TenantError::Inactive {
                tenant_id: tenant_id.to_string(),
            }
            .into());
        }

        let uri = self.decrypt_uri(&descriptor).await?;
        let target = ConnectTarget {
            tenant_id: tenant_id.clone(),
            uri,
            database_name: descriptor.database_name.clone(),
            max_pool_size: self.config.max_pool_size,
            connect_timeout: self.config.connect_timeout,
        };
        let client = self.connect_with_retry(&target).await?;
        Ok((client, descriptor.database_name))
    }

    async fn decrypt_uri(&self, descriptor: &TenantDescriptor) -> TenantryResult<SecretString> {
        let crypto = Arc::clone(&self.crypto);
        let field = descriptor.connection.clone();
        let decrypted = tokio::task::spawn_blocking(move || {
            crypto.decrypt(&field, PurposeSalt::ConnectionString)
        })
        .await
        .map_err(|_| ConnectionError::AttemptAborted {
            tenant_id: descriptor.tenant_id.to_string(),
        })?;

        match decrypted {
            Ok(uri) => Ok(SecretString::from(uri)),
            Err(e) => {
                tracing::error!(
                    tenant = %descriptor.tenant_id,
                    error = %e,
                    "Tenant connection string failed to decrypt"
                );
                Err(e.into())
            }
        }
    }

    async fn connect_with_retry(&self, target: &ConnectTarget) -> TenantryResult<C::Client> {
        let policy = &self.config.retry;
        let timeout = self.config.connect_timeout;
        let mut timeouts = 0u32;
        let mut last_reason = String::new();

        for attempt in 1..=policy.max_attempts {
            bump(&self.counters.connects_attempted);
            let result = tokio::time::timeout(timeout, self.connector.connect(target)).await;
            match result {
                Ok(Ok(client)) => {
                    bump(&self.counters.connects_succeeded);
                    tracing::info!(
                        tenant = %target.tenant_id,
                        database = %target.database_name,
                        connector = self.connector.name(),
                        attempt,
                        "Tenant connection established"
                    );
                    return Ok(client);
                }
                Ok(Err(ConnectorError::InvalidTarget(reason))) => {
                    bump(&self.counters.connects_failed);
                    return Err(ConnectionError::InvalidTarget {
                        tenant_id: target.tenant_id.to_string(),
                        reason,
                    }
                    .into());
                }
                Ok(Err(ConnectorError::Transient(reason))) => {
                    last_reason = reason;
                }
                Err(_) => {
                    timeouts += 1;
                    last_reason = format!("timed out after {}ms", timeout.as_millis());
                }
            }

            bump(&self.counters.connects_failed);
            tracing::warn!(
                tenant = %target.tenant_id,
                attempt,
                max_attempts = policy.max_attempts,
                reason = %last_reason,
                "Tenant connection attempt failed"
            );
            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.delay).await;
            }
        }

        let tenant_id = target.tenant_id.to_string();
        let err: TenantryError = if timeouts == policy.max_attempts {
            ConnectionError::Timeout {
                tenant_id,
                attempts: policy.max_attempts,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .into()
        } else {
            ConnectionError::Failed {
                tenant_id,
                attempts: policy.max_attempts,
                reason: last_reason,
            }
            .into()
        };
        Err(err)
    }

    fn live_entries(&self) -> Vec<Arc<PooledEntry<C::Client>>> {
        self.slots
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Live(entry) => Some(Arc::clone(entry)),
                Slot::Connecting { .. } => None,
            })
            .collect()
    }

    /// Drop the slot only if it still holds this exact entry.
    fn remove_slot(&self, entry: &Arc<PooledEntry<C::Client>>) {
        self.slots.remove_if(entry.tenant_id(), |_, slot| {
            matches!(slot, Slot::Live(live) if Arc::ptr_eq(live, entry))
        });
    }

    async fn close_entry(&self, entry: Arc<PooledEntry<C::Client>>) {
        self.connector.close(entry.client().clone()).await;
        bump(&self.counters.closes);
        tracing::debug!(tenant = %entry.tenant_id(), "Tenant connection closed");
    }
}

fn is_attempt<T>(slot: &Slot<T>, attempt: u64) -> bool {
    matches!(slot, Slot::Connecting { attempt: a, .. } if *a == attempt)
}

// ============================================================================
// LEASE
// ============================================================================

/// A borrowed tenant client. Dropping it returns the lease; if the entry was
/// retired meanwhile and this was the last lease, the client is closed on
/// the current runtime.
pub struct TenantConnection<C: Connector> {
    inner: Arc<PoolInner<C>>,
    entry: Arc<PooledEntry<C::Client>>,
}

impl<C: Connector> TenantConnection<C> {
    fn new(inner: Arc<PoolInner<C>>, entry: Arc<PooledEntry<C::Client>>) -> Self {
        Self { inner, entry }
    }

    pub fn client(&self) -> &C::Client {
        self.entry.client()
    }

    pub fn tenant_id(&self) -> &TenantId {
        self.entry.tenant_id()
    }

    pub fn database_name(&self) -> &str {
        self.entry.database_name()
    }

    pub fn state(&self) -> EntryState {
        self.entry.state()
    }

    /// Whether two leases borrow the same pool entry.
    pub fn same_entry(&self, other: &TenantConnection<C>) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl<C: Connector> Deref for TenantConnection<C> {
    type Target = C::Client;

    fn deref(&self) -> &Self::Target {
        self.entry.client()
    }
}

impl<C: Connector> Drop for TenantConnection<C> {
    fn drop(&mut self) {
        if !self.entry.release() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let entry = Arc::clone(&self.entry);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { inner.close_entry(entry).await });
            }
            Err(_) => {
                tracing::warn!(
                    tenant = %entry.tenant_id(),
                    "No runtime to close retired tenant connection; dropping client"
                );
            }
        }
    }
}

impl<C: Connector> fmt::Debug for TenantConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantConnection")
            .field("entry", &self.entry)
            .finish()
    }
}
