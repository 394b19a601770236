//! Authoritative sources behind the cached services.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tenantry_core::{TenantId, TenantryResult, Timestamp};
use tenantry_crypto::{EncryptedConfig, IntegrationType};

// ============================================================================
// INTEGRATION RECORDS
// ============================================================================

/// One stored integration configuration, secrets still encrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationRecord {
    pub integration_type: IntegrationType,
    pub config: EncryptedConfig,
    pub updated_at: Timestamp,
}

/// Per-tenant integration configuration storage.
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn load(
        &self,
        tenant_id: &TenantId,
        integration_type: IntegrationType,
    ) -> TenantryResult<Option<IntegrationRecord>>;

    /// Every integration of the tenant, in a stable order.
    async fn load_all(&self, tenant_id: &TenantId) -> TenantryResult<Vec<IntegrationRecord>>;

    /// Insert or replace the tenant's record of `record.integration_type`.
    async fn save(&self, tenant_id: &TenantId, record: &IntegrationRecord) -> TenantryResult<()>;

    /// Returns whether a record was deleted.
    async fn delete(
        &self,
        tenant_id: &TenantId,
        integration_type: IntegrationType,
    ) -> TenantryResult<bool>;
}

// ============================================================================
// CALL RECORDS
// ============================================================================

/// One call as the statistics see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: Uuid,
    pub agent_id: Option<String>,
    /// Set once the call was answered.
    pub start_timestamp: Option<Timestamp>,
    pub end_timestamp: Option<Timestamp>,
    pub call_successful: Option<bool>,
    pub disconnection_reason: Option<String>,
    pub created_at: Timestamp,
}

impl CallRecord {
    /// A call placed now, not yet answered.
    pub fn placed(agent_id: Option<String>) -> Self {
        Self {
            call_id: Uuid::now_v7(),
            agent_id,
            start_timestamp: None,
            end_timestamp: None,
            call_successful: None,
            disconnection_reason: None,
            created_at: chrono::Utc::now(),
        }
    }
}

/// Which calls a statistic covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsQuery {
    pub agent_id: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<Timestamp>,
    /// Exclusive upper bound on `created_at`.
    pub until: Option<Timestamp>,
}

impl StatsQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Self::default()
        }
    }

    pub fn between(mut self, since: Timestamp, until: Timestamp) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    /// Stable cache segment for this query.
    pub fn cache_key(&self) -> String {
        let mut key = match &self.agent_id {
            Some(agent) => format!("agent={agent}"),
            None => "all".to_string(),
        };
        if let Some(since) = self.since {
            key.push_str(&format!(",since={}", since.timestamp_millis()));
        }
        if let Some(until) = self.until {
            key.push_str(&format!(",until={}", until.timestamp_millis()));
        }
        key
    }

    pub fn matches(&self, call: &CallRecord) -> bool {
        self.agent_id
            .as_ref()
            .map_or(true, |agent| call.agent_id.as_ref() == Some(agent))
            && self.since.map_or(true, |since| call.created_at >= since)
            && self.until.map_or(true, |until| call.created_at < until)
    }
}

/// Per-tenant call record storage.
#[async_trait]
pub trait CallRecordStore: Send + Sync {
    async fn insert(&self, tenant_id: &TenantId, call: &CallRecord) -> TenantryResult<()>;

    async fn list(&self, tenant_id: &TenantId, query: &StatsQuery) -> TenantryResult<Vec<CallRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_query_cache_keys_are_distinct() {
        let now = Utc::now();
        let keys = [
            StatsQuery::all().cache_key(),
            StatsQuery::for_agent("a1").cache_key(),
            StatsQuery::for_agent("a2").cache_key(),
            StatsQuery::all().between(now, now + Duration::hours(1)).cache_key(),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(StatsQuery::all().cache_key(), "all");
    }

    #[test]
    fn test_query_matches() {
        let mut call = CallRecord::placed(Some("a1".to_string()));
        call.created_at = Utc::now();

        assert!(StatsQuery::all().matches(&call));
        assert!(StatsQuery::for_agent("a1").matches(&call));
        assert!(!StatsQuery::for_agent("a2").matches(&call));

        let window = StatsQuery::all().between(call.created_at, call.created_at + Duration::seconds(1));
        assert!(window.matches(&call));
        let later = StatsQuery::all().between(call.created_at + Duration::seconds(1), call.created_at + Duration::seconds(2));
        assert!(!later.matches(&call));
    }
}
