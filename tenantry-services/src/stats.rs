//! Call statistics.
//!
//! Definitions used throughout:
//! - a call is *connected* iff it has a start timestamp;
//! - a call is *successful* iff it is connected and flagged successful;
//! - a call is *unresponsive* iff its disconnection reason is one of the
//!   no-answer reasons below (sentiment is never consulted);
//! - success rate is successful / connected, 0 when nothing connected.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use tenantry_core::{TenantId, TenantryResult};
use tenantry_storage::{CacheRead, StatsCache};

use crate::store::{CallRecord, CallRecordStore, StatsQuery};

static UNRESPONSIVE_REASON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(dial_no_answer|dial_busy|dial_failed|voicemail_reached|inactivity|user_not_responding)$",
    )
    .expect("Invalid unresponsive-reason regex")
});

pub fn is_connected(call: &CallRecord) -> bool {
    call.start_timestamp.is_some()
}

pub fn is_successful(call: &CallRecord) -> bool {
    is_connected(call) && call.call_successful == Some(true)
}

pub fn is_unresponsive(call: &CallRecord) -> bool {
    call.disconnection_reason
        .as_deref()
        .is_some_and(|reason| UNRESPONSIVE_REASON.is_match(reason))
}

/// Aggregate statistics over a set of calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallStats {
    pub total_calls: u64,
    pub connected_calls: u64,
    pub successful_calls: u64,
    pub unresponsive_calls: u64,
    /// `successful_calls / connected_calls`, in `[0, 1]`.
    pub success_rate: f64,
    /// Mean talk time of connected calls that have ended.
    pub average_duration_secs: f64,
}

impl CallStats {
    pub fn compute<'a>(calls: impl IntoIterator<Item = &'a CallRecord>) -> Self {
        let mut stats = CallStats::default();
        let mut ended = 0u64;
        let mut total_secs = 0f64;

        for call in calls {
            stats.total_calls += 1;
            if is_connected(call) {
                stats.connected_calls += 1;
            }
            if is_successful(call) {
                stats.successful_calls += 1;
            }
            if is_unresponsive(call) {
                stats.unresponsive_calls += 1;
            }
            if let (Some(start), Some(end)) = (call.start_timestamp, call.end_timestamp) {
                ended += 1;
                total_secs += (end - start).num_milliseconds().max(0) as f64 / 1000.0;
            }
        }

        if stats.connected_calls > 0 {
            stats.success_rate = stats.successful_calls as f64 / stats.connected_calls as f64;
        }
        if ended > 0 {
            stats.average_duration_secs = total_secs / ended as f64;
        }
        stats
    }
}

/// Statistics read through the cache; recording a call invalidates every
/// cached statistic of its tenant.
#[derive(Clone)]
pub struct StatsService {
    calls: Arc<dyn CallRecordStore>,
    cache: StatsCache,
}

impl StatsService {
    pub fn new(calls: Arc<dyn CallRecordStore>, cache: StatsCache) -> Self {
        Self { calls, cache }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(tenant = %tenant_id, query = %query.cache_key()))]
    pub async fn compute(
        &self,
        tenant_id: &TenantId,
        query: &StatsQuery,
    ) -> TenantryResult<CacheRead<CallStats>> {
        self.cache
            .get_or_compute(tenant_id, &query.cache_key(), || self.load(tenant_id, query))
            .await
    }

    async fn load(&self, tenant_id: &TenantId, query: &StatsQuery) -> TenantryResult<CallStats> {
        let calls = self.calls.list(tenant_id, query).await?;
        Ok(CallStats::compute(calls.iter().filter(|c| query.matches(c))))
    }

    /// Persist a call, then drop the tenant's cached statistics.
    pub async fn record_call(&self, tenant_id: &TenantId, call: &CallRecord) -> TenantryResult<()> {
        self.calls.insert(tenant_id, call).await?;
        let removed = self.cache.invalidate_tenant(tenant_id).await;
        tracing::debug!(tenant = %tenant_id, removed, "Recorded call, statistics invalidated");
        Ok(())
    }
}

impl std::fmt::Debug for StatsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsService").field("cache", &self.cache).finish()
    }
}
