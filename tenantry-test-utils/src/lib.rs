//! Tenantry Test Utilities
//!
//! Shared test infrastructure for the Tenantry workspace:
//! - Scriptable connector and registry doubles for the pool manager
//! - In-memory stores behind the integration and statistics services
//! - A cache backend that fails every call
//! - Fixtures, proptest generators and assertions

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

pub use tenantry_core::{
    CacheError, ConnectionError, CryptoConfig, CryptoError, PoolConfig, RetryPolicy, TenantError,
    TenantId, TenantryError, TenantryResult,
};
pub use tenantry_crypto::{ConfigMap, EncryptedField, EncryptionService, IntegrationType, PurposeSalt};
pub use tenantry_pool::{ConnectTarget, Connector, ConnectorError, PoolManager, TenantDescriptor, TenantRegistry};
pub use tenantry_services::{CallRecord, CallRecordStore, IntegrationRecord, IntegrationStore, StatsQuery};
use tenantry_storage::{CacheBackend, CacheKey, CacheStats, KeyPrefix};

// ============================================================================
// MOCK CONNECTOR
// ============================================================================

#[derive(Debug, Default)]
struct ConnectorScript {
    next_id: AtomicU64,
    connects: AtomicUsize,
    pings: AtomicUsize,
    closes: AtomicUsize,
    closed: Mutex<Vec<u64>>,
    fail_first: AtomicUsize,
    reject: AtomicBool,
    hang: AtomicBool,
    ping_fails: AtomicBool,
    delay_ms: AtomicU64,
}

/// Connector whose clients are plain ids.
///
/// Every behavior is switchable at runtime through shared state, so a test
/// can keep a clone while the pool manager owns another.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    script: Arc<ConnectorScript>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` connects with a transient error.
    pub fn fail_next(&self, n: usize) -> &Self {
        let done = self.script.connects.load(Ordering::SeqCst);
        self.script.fail_first.store(done + n, Ordering::SeqCst);
        self
    }

    /// Reject every connect as an invalid target.
    pub fn reject_targets(&self, reject: bool) -> &Self {
        self.script.reject.store(reject, Ordering::SeqCst);
        self
    }

    /// Never complete a connect.
    pub fn hang(&self, hang: bool) -> &Self {
        self.script.hang.store(hang, Ordering::SeqCst);
        self
    }

    pub fn fail_pings(&self, fail: bool) -> &Self {
        self.script.ping_fails.store(fail, Ordering::SeqCst);
        self
    }

    /// Delay every connect by `delay` before it resolves.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.script
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub fn connects(&self) -> usize {
        self.script.connects.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.script.pings.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.script.closes.load(Ordering::SeqCst)
    }

    /// Ids of every closed client, in close order.
    pub fn closed_clients(&self) -> Vec<u64> {
        self.script
            .closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Client = u64;

    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self, target: &ConnectTarget) -> Result<u64, ConnectorError> {
        let n = self.script.connects.fetch_add(1, Ordering::SeqCst);

        let delay = self.script.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.script.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.script.reject.load(Ordering::SeqCst) {
            return Err(ConnectorError::InvalidTarget(format!(
                "unsupported target for {}",
                target.tenant_id
            )));
        }
        if n < self.script.fail_first.load(Ordering::SeqCst) {
            return Err(ConnectorError::Transient("connection refused".to_string()));
        }
        Ok(self.script.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn ping(&self, _client: &u64) -> Result<(), ConnectorError> {
        self.script.pings.fetch_add(1, Ordering::SeqCst);
        if self.script.ping_fails.load(Ordering::SeqCst) {
            Err(ConnectorError::Transient("connection reset".to_string()))
        } else {
            Ok(())
        }
    }

    async fn close(&self, client: u64) {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        self.script
            .closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(client);
    }
}

// ============================================================================
// MOCK REGISTRY
// ============================================================================

/// In-memory tenant registry that counts lookups.
#[derive(Debug, Default)]
pub struct MockTenantRegistry {
    tenants: DashMap<TenantId, TenantDescriptor>,
    lookups: AtomicUsize,
}

impl MockTenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, descriptor: TenantDescriptor) {
        self.tenants.insert(descriptor.tenant_id.clone(), descriptor);
    }

    pub fn set_active(&self, tenant_id: &TenantId, active: bool) {
        if let Some(mut descriptor) = self.tenants.get_mut(tenant_id) {
            descriptor.active = active;
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantRegistry for MockTenantRegistry {
    async fn get_tenant_descriptor(&self, tenant_id: &TenantId) -> TenantryResult<TenantDescriptor> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.tenants
            .get(tenant_id)
            .map(|d| d.value().clone())
            .ok_or_else(|| {
                TenantError::NotFound {
                    tenant_id: tenant_id.to_string(),
                }
                .into()
            })
    }
}

// ============================================================================
// IN-MEMORY STORES
// ============================================================================

/// Delay applied to the next few reads of a store.
#[derive(Debug, Default)]
struct SlowReads {
    remaining: AtomicUsize,
    delay_ms: AtomicU64,
}

impl SlowReads {
    fn arm(&self, reads: usize, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        self.remaining.store(reads, Ordering::SeqCst);
    }

    async fn wait(&self) {
        let armed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            let delay = self.delay_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

/// Integration store backed by a map, counting reads that reach it.
#[derive(Debug, Default)]
pub struct InMemoryIntegrationStore {
    records: DashMap<(TenantId, IntegrationType), IntegrationRecord>,
    loads: AtomicUsize,
    slow: SlowReads,
}

impl InMemoryIntegrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `load`/`load_all` calls served.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Delay the next `loads` reads by `delay`. The record is captured
    /// before sleeping, so a slow read returns what was stored when it began.
    pub fn delay_next_loads(&self, loads: usize, delay: Duration) -> &Self {
        self.slow.arm(loads, delay);
        self
    }

    /// The stored record, bypassing the load counter.
    pub fn stored(&self, tenant_id: &TenantId, integration_type: IntegrationType) -> Option<IntegrationRecord> {
        self.records
            .get(&(tenant_id.clone(), integration_type))
            .map(|r| r.value().clone())
    }
}

#[async_trait]
impl IntegrationStore for InMemoryIntegrationStore {
    async fn load(
        &self,
        tenant_id: &TenantId,
        integration_type: IntegrationType,
    ) -> TenantryResult<Option<IntegrationRecord>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let record = self.stored(tenant_id, integration_type);
        self.slow.wait().await;
        Ok(record)
    }

    async fn load_all(&self, tenant_id: &TenantId) -> TenantryResult<Vec<IntegrationRecord>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let mut records: Vec<IntegrationRecord> = self
            .records
            .iter()
            .filter(|r| &r.key().0 == tenant_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.integration_type.as_str());
        self.slow.wait().await;
        Ok(records)
    }

    async fn save(&self, tenant_id: &TenantId, record: &IntegrationRecord) -> TenantryResult<()> {
        self.records
            .insert((tenant_id.clone(), record.integration_type), record.clone());
        Ok(())
    }

    async fn delete(
        &self,
        tenant_id: &TenantId,
        integration_type: IntegrationType,
    ) -> TenantryResult<bool> {
        Ok(self
            .records
            .remove(&(tenant_id.clone(), integration_type))
            .is_some())
    }
}

/// Call record store backed by a per-tenant list.
#[derive(Debug, Default)]
pub struct InMemoryCallRecords {
    calls: Mutex<HashMap<TenantId, Vec<CallRecord>>>,
    lists: AtomicUsize,
    slow: SlowReads,
}

impl InMemoryCallRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `list` calls served.
    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    /// Delay the next `lists` reads by `delay`, returning the calls stored
    /// when each read began.
    pub fn delay_next_lists(&self, lists: usize, delay: Duration) -> &Self {
        self.slow.arm(lists, delay);
        self
    }
}

#[async_trait]
impl CallRecordStore for InMemoryCallRecords {
    async fn insert(&self, tenant_id: &TenantId, call: &CallRecord) -> TenantryResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tenant_id.clone())
            .or_default()
            .push(call.clone());
        Ok(())
    }

    async fn list(&self, tenant_id: &TenantId, query: &StatsQuery) -> TenantryResult<Vec<CallRecord>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let listed: Vec<CallRecord> = {
            let calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            calls
                .get(tenant_id)
                .map(|calls| calls.iter().filter(|c| query.matches(c)).cloned().collect())
                .unwrap_or_default()
        };
        self.slow.wait().await;
        Ok(listed)
    }
}

// ============================================================================
// FAILING CACHE BACKEND
// ============================================================================

/// Cache backend whose every call fails as unavailable.
#[derive(Debug, Default)]
pub struct FailingCacheBackend {
    calls: AtomicUsize,
}

impl FailingCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable {
            reason: "cache backend offline".to_string(),
        })
    }
}

#[async_trait]
impl CacheBackend for FailingCacheBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, _key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        self.fail()
    }

    async fn set(&self, _key: &CacheKey, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        self.fail()
    }

    async fn delete(&self, _key: &CacheKey) -> Result<(), CacheError> {
        self.fail()
    }

    async fn delete_prefix(&self, _prefix: &KeyPrefix) -> Result<u64, CacheError> {
        self.fail()
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.fail()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Tenantry inputs.

    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use proptest::prelude::*;
    use uuid::Uuid;

    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        "[A-Za-z0-9_\\-]{1,24}".prop_map(|raw| TenantId::new(raw).expect("pattern excludes ':' and whitespace"))
    }

    /// Secret-looking tokens, never shorter than 8 characters.
    pub fn arb_secret() -> impl Strategy<Value = String> {
        "[A-Za-z0-9]{8,48}"
    }

    pub fn arb_twilio_config() -> impl Strategy<Value = ConfigMap> {
        ("AC[a-f0-9]{16}", arb_secret(), proptest::option::of("\\+1[0-9]{10}")).prop_map(
            |(sid, token, phone)| fixtures::twilio_config(&sid, &token, phone.as_deref()),
        )
    }

    pub fn arb_disconnection_reason() -> impl Strategy<Value = Option<String>> {
        proptest::option::of(prop_oneof![
            Just("dial_no_answer".to_string()),
            Just("dial_busy".to_string()),
            Just("voicemail_reached".to_string()),
            Just("agent_hangup".to_string()),
            Just("user_hangup".to_string()),
            Just("inactivity".to_string()),
        ])
    }

    /// A call created within the last day, connected or not.
    pub fn arb_call_record() -> impl Strategy<Value = CallRecord> {
        (
            proptest::option::of("agent_[0-9]"),
            any::<bool>(),
            0i64..600,
            proptest::option::of(any::<bool>()),
            arb_disconnection_reason(),
            0i64..86_400,
        )
            .prop_map(|(agent_id, connected, talk_secs, successful, reason, age_secs)| {
                let created_at = Utc::now() - ChronoDuration::seconds(age_secs);
                let start = connected.then_some(created_at);
                CallRecord {
                    call_id: Uuid::now_v7(),
                    agent_id,
                    start_timestamp: start,
                    end_timestamp: start.map(|s| s + ChronoDuration::seconds(talk_secs)),
                    call_successful: successful,
                    disconnection_reason: reason,
                    created_at,
                }
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use serde_json::{json, Value};

    /// Master secret shared by every fixture service.
    pub const TEST_MASTER_SECRET: &str = "tenantry-test-master";

    pub fn tenant(raw: &str) -> TenantId {
        TenantId::new(raw).expect("fixture tenant ids are valid")
    }

    /// Encryption service with cheap key derivation.
    pub fn test_crypto() -> Arc<EncryptionService> {
        Arc::new(
            EncryptionService::new(CryptoConfig::new(TEST_MASTER_SECRET).with_kdf_log_n(4))
                .expect("low-cost scrypt params are valid"),
        )
    }

    /// Pool config with millisecond retries and short timeouts.
    pub fn fast_pool_config() -> PoolConfig {
        PoolConfig::default()
            .with_connect_timeout(Duration::from_millis(200))
            .with_retry(RetryPolicy::new(3, Duration::from_millis(5)))
    }

    /// An active tenant whose connection string is sealed by `crypto`.
    pub fn descriptor(crypto: &EncryptionService, tenant_id: &TenantId, uri: &str) -> TenantDescriptor {
        TenantDescriptor {
            tenant_id: tenant_id.clone(),
            connection: crypto
                .encrypt(uri, PurposeSalt::ConnectionString)
                .expect("fixture encryption succeeds"),
            database_name: format!("{}_db", tenant_id.as_str().to_lowercase()),
            active: true,
        }
    }

    /// A descriptor whose auth tag no longer matches its ciphertext.
    pub fn tampered_descriptor(crypto: &EncryptionService, tenant_id: &TenantId) -> TenantDescriptor {
        let mut d = descriptor(crypto, tenant_id, "postgres://tampered");
        let flipped = if d.connection.auth_tag.starts_with('0') { "1" } else { "0" };
        d.connection.auth_tag.replace_range(0..1, flipped);
        d
    }

    /// Pool manager over a mock connector and registry.
    pub fn mock_pool(
        connector: MockConnector,
        registry: Arc<MockTenantRegistry>,
        crypto: Arc<EncryptionService>,
        config: PoolConfig,
    ) -> PoolManager<MockConnector> {
        PoolManager::new(connector, registry, crypto, config)
    }

    /// Registry pre-populated with active tenants, sealed by `crypto`.
    pub fn registry_with(crypto: &EncryptionService, tenants: &[&TenantId]) -> Arc<MockTenantRegistry> {
        let registry = MockTenantRegistry::new();
        for tenant_id in tenants {
            registry.insert(descriptor(
                crypto,
                tenant_id,
                &format!("postgres://db.internal/{}", tenant_id),
            ));
        }
        Arc::new(registry)
    }

    pub fn twilio_config(account_sid: &str, auth_token: &str, phone: Option<&str>) -> ConfigMap {
        let mut config = ConfigMap::new();
        config.insert("accountSid".to_string(), json!(account_sid));
        config.insert("authToken".to_string(), json!(auth_token));
        if let Some(phone) = phone {
            config.insert("phoneNumber".to_string(), json!(phone));
        }
        config
    }

    pub fn hubspot_config(access_token: &str, refresh_token: &str) -> ConfigMap {
        let mut config = ConfigMap::new();
        config.insert("accessToken".to_string(), json!(access_token));
        config.insert("refreshToken".to_string(), json!(refresh_token));
        config.insert("portalId".to_string(), Value::from(4242));
        config
    }

    /// A connected call that lasted `secs` seconds.
    pub fn connected_call(agent_id: &str, successful: bool, secs: i64) -> CallRecord {
        let placed = CallRecord::placed(Some(agent_id.to_string()));
        let start = placed.created_at;
        CallRecord {
            start_timestamp: Some(start),
            end_timestamp: Some(start + chrono::Duration::seconds(secs)),
            call_successful: Some(successful),
            disconnection_reason: Some("agent_hangup".to_string()),
            ..placed
        }
    }

    /// An unanswered call.
    pub fn missed_call(agent_id: &str, reason: &str) -> CallRecord {
        CallRecord {
            disconnection_reason: Some(reason.to_string()),
            ..CallRecord::placed(Some(agent_id.to_string()))
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Tenantry-specific expectations.

    use super::*;

    /// Assert that `secret` appears nowhere in the serialized value.
    pub fn assert_no_secret<T: serde::Serialize + ?Sized>(value: &T, secret: &str) {
        let rendered = serde_json::to_string(value).expect("value serializes");
        assert!(
            !rendered.contains(secret),
            "secret leaked into serialized output: {}",
            rendered
        );
    }

    /// Assert the error is a connection failure after exactly `attempts` tries.
    pub fn assert_connect_failed(err: &TenantryError, attempts: u32) {
        match err {
            TenantryError::Connection(ConnectionError::Failed { attempts: got, .. }) => {
                assert_eq!(*got, attempts, "unexpected attempt count")
            }
            other => panic!("expected ConnectionError::Failed, got {:?}", other),
        }
    }

    pub fn assert_connect_timeout(err: &TenantryError) {
        assert!(
            matches!(err, TenantryError::Connection(ConnectionError::Timeout { .. })),
            "expected ConnectionError::Timeout, got {:?}",
            err
        );
    }

    pub fn assert_decryption_failed(err: &TenantryError) {
        assert!(
            matches!(err, TenantryError::Crypto(CryptoError::Decryption { .. })),
            "expected CryptoError::Decryption, got {:?}",
            err
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
