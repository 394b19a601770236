//! Tenant Pool Lifecycle Tests
//!
//! **Property: Single Flight**
//! However many callers race for a cold tenant, exactly one driver connect
//! is made and every caller leases the same entry.
//!
//! **Property: Close Once**
//! Every client the connector hands out is closed at most once, and never
//! while a lease on it is outstanding.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tenantry_core::{ConnectionError, PoolConfig, RetryPolicy, TenantError, TenantryError};
use tenantry_pool::EntryState;
use tenantry_test_utils::assertions::{assert_connect_failed, assert_connect_timeout, assert_decryption_failed};
use tenantry_test_utils::fixtures::{self, tenant};
use tenantry_test_utils::{MockConnector, MockTenantRegistry};
use tokio::runtime::Runtime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

/// Poll `cond` until it holds or a second passes.
async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn setup(
    connector: MockConnector,
    config: PoolConfig,
    tenants: &[&str],
) -> (tenantry_pool::PoolManager<MockConnector>, Arc<MockTenantRegistry>) {
    let crypto = fixtures::test_crypto();
    let ids: Vec<_> = tenants.iter().map(|t| tenant(t)).collect();
    let registry = fixtures::registry_with(&crypto, &ids.iter().collect::<Vec<_>>());
    let pool = fixtures::mock_pool(connector, Arc::clone(&registry), crypto, config);
    (pool, registry)
}

// ============================================================================
// SINGLE FLIGHT
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_requests_share_one_connect() {
    let connector = MockConnector::new().with_delay(Duration::from_millis(50));
    let (pool, registry) = setup(connector.clone(), fixtures::fast_pool_config(), &["T1"]);
    let t1 = tenant("T1");

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let pool = pool.clone();
            let t1 = t1.clone();
            tokio::spawn(async move { pool.get_connection(&t1).await })
        })
        .collect();

    let mut leases = Vec::new();
    for handle in handles {
        leases.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(connector.connects(), 1);
    assert_eq!(registry.lookups(), 1);
    assert!(leases.iter().all(|l| l.same_entry(&leases[0])));
    assert!(leases.iter().all(|l| **l == *leases[0].client()));
    assert_eq!(pool.snapshot()[0].refs, 50);
}

#[tokio::test]
async fn test_cancelled_caller_still_populates_pool() {
    let connector = MockConnector::new().with_delay(Duration::from_millis(100));
    let (pool, _) = setup(connector.clone(), fixtures::fast_pool_config(), &["T1"]);
    let t1 = tenant("T1");

    let early = tokio::time::timeout(Duration::from_millis(10), pool.get_connection(&t1)).await;
    assert!(early.is_err(), "caller should have given up");

    assert!(
        eventually(|| pool
            .snapshot()
            .first()
            .is_some_and(|e| e.state == EntryState::Idle))
        .await
    );
    let lease = pool.get_connection(&t1).await.unwrap();
    assert_eq!(connector.connects(), 1);
    assert_eq!(lease.state(), EntryState::Active);
    assert_eq!(pool.stats().fast_path_hits, 1);
}

#[tokio::test]
async fn test_tenants_are_independent() {
    let connector = MockConnector::new();
    let (pool, _) = setup(connector.clone(), fixtures::fast_pool_config(), &["T1", "T2"]);

    let a = pool.get_connection(&tenant("T1")).await.unwrap();
    let b = pool.get_connection(&tenant("T2")).await.unwrap();

    assert_eq!(connector.connects(), 2);
    assert!(!a.same_entry(&b));
    assert_ne!(a.database_name(), b.database_name());
}

// ============================================================================
// FAILURES AND RETRIES
// ============================================================================

#[tokio::test]
async fn test_transient_failures_retry_up_to_max_attempts() {
    let connector = MockConnector::new();
    connector.fail_next(10);
    let config = PoolConfig::default().with_retry(RetryPolicy::new(4, Duration::from_millis(1)));
    let (pool, _) = setup(connector.clone(), config, &["T1"]);

    let err = pool.get_connection(&tenant("T1")).await.unwrap_err();
    assert_connect_failed(&err, 4);
    assert_eq!(connector.connects(), 4);
    assert!(pool.snapshot().is_empty());

    let stats = pool.stats();
    assert_eq!(stats.connects_attempted, 4);
    assert_eq!(stats.connects_failed, 4);
}

#[tokio::test]
async fn test_recovers_after_transient_failures() {
    let connector = MockConnector::new();
    connector.fail_next(2);
    let (pool, _) = setup(connector.clone(), fixtures::fast_pool_config(), &["T1"]);

    let lease = pool.get_connection(&tenant("T1")).await.unwrap();
    assert_eq!(connector.connects(), 3);
    assert_eq!(lease.state(), EntryState::Active);
}

#[tokio::test]
async fn test_failed_attempt_does_not_poison_next_request() {
    let connector = MockConnector::new();
    connector.fail_next(3);
    let (pool, _) = setup(connector.clone(), fixtures::fast_pool_config(), &["T1"]);
    let t1 = tenant("T1");

    assert!(pool.get_connection(&t1).await.is_err());
    assert!(pool.get_connection(&t1).await.is_ok());
    assert_eq!(connector.connects(), 4);
}

#[tokio::test]
async fn test_every_attempt_timing_out_is_a_timeout() {
    let connector = MockConnector::new();
    connector.hang(true);
    let config = PoolConfig::default()
        .with_connect_timeout(Duration::from_millis(20))
        .with_retry(RetryPolicy::new(2, Duration::from_millis(1)));
    let (pool, _) = setup(connector.clone(), config, &["T1"]);

    let err = pool.get_connection(&tenant("T1")).await.unwrap_err();
    assert_connect_timeout(&err);
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn test_invalid_target_is_not_retried() {
    let connector = MockConnector::new();
    connector.reject_targets(true);
    let (pool, _) = setup(connector.clone(), fixtures::fast_pool_config(), &["T1"]);

    let err = pool.get_connection(&tenant("T1")).await.unwrap_err();
    assert!(matches!(
        err,
        TenantryError::Connection(ConnectionError::InvalidTarget { .. })
    ));
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_tampered_descriptor_fails_without_connecting() {
    let crypto = fixtures::test_crypto();
    let registry = Arc::new(MockTenantRegistry::new());
    let t1 = tenant("T1");
    registry.insert(fixtures::tampered_descriptor(&crypto, &t1));
    let connector = MockConnector::new();
    let pool = fixtures::mock_pool(connector.clone(), registry, crypto, fixtures::fast_pool_config());

    let err = pool.get_connection(&t1).await.unwrap_err();
    assert_decryption_failed(&err);
    assert_eq!(connector.connects(), 0);
    assert!(pool.snapshot().is_empty());
}

#[tokio::test]
async fn test_unknown_and_inactive_tenants() {
    let connector = MockConnector::new();
    let (pool, registry) = setup(connector.clone(), fixtures::fast_pool_config(), &["T1"]);

    let err = pool.get_connection(&tenant("NOPE")).await.unwrap_err();
    assert!(matches!(err, TenantryError::Tenant(TenantError::NotFound { .. })));

    registry.set_active(&tenant("T1"), false);
    let err = pool.get_connection(&tenant("T1")).await.unwrap_err();
    assert!(matches!(err, TenantryError::Tenant(TenantError::Inactive { .. })));

    assert_eq!(connector.connects(), 0);
    assert_eq!(registry.lookups(), 2);
}

// ============================================================================
// EVICTION AND HEALTH
// ============================================================================

#[tokio::test]
async fn test_idle_entry_evicted_then_reconnected() {
    let connector = MockConnector::new();
    let config = fixtures::fast_pool_config()
        .with_idle_timeout(Duration::from_secs(600))
        .with_ping_after(Duration::from_secs(60));
    let (pool, _) = setup(connector.clone(), config, &["T1"]);
    let t1 = tenant("T1");

    let first_client = *pool.get_connection(&t1).await.unwrap();

    let report = pool.sweep_at(Instant::now() + Duration::from_secs(601)).await;
    assert_eq!(report.evicted, 1);
    assert!(pool.snapshot().is_empty());
    assert_eq!(connector.closed_clients(), vec![first_client]);

    let second = pool.get_connection(&t1).await.unwrap();
    assert_ne!(*second, first_client);
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn test_evicted_entry_closes_after_last_lease() {
    let connector = MockConnector::new();
    let (pool, _) = setup(connector.clone(), fixtures::fast_pool_config(), &["T1"]);
    let t1 = tenant("T1");

    let held = pool.get_connection(&t1).await.unwrap();
    assert!(pool.evict(&t1).await);
    assert_eq!(connector.closes(), 0, "leased client must stay open");
    assert_eq!(held.state(), EntryState::Evicted);

    let fresh = pool.get_connection(&t1).await.unwrap();
    assert!(!fresh.same_entry(&held));

    drop(held);
    assert!(eventually(|| connector.closes() == 1).await);
    drop(fresh);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connector.closes(), 1);
}

#[tokio::test]
async fn test_failed_health_check_removes_entry() {
    let connector = MockConnector::new();
    let config = fixtures::fast_pool_config().with_ping_after(Duration::from_secs(30));
    let (pool, _) = setup(connector.clone(), config, &["T1"]);
    let t1 = tenant("T1");

    drop(pool.get_connection(&t1).await.unwrap());
    connector.fail_pings(true);

    let report = pool.sweep_at(Instant::now() + Duration::from_secs(31)).await;
    assert_eq!(report.pinged, 1);
    assert_eq!(report.unhealthy, 1);
    assert!(pool.snapshot().is_empty());
    assert_eq!(connector.closes(), 1);
    assert_eq!(pool.stats().health_failures, 1);

    connector.fail_pings(false);
    assert!(pool.get_connection(&t1).await.is_ok());
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn test_sweep_leaves_leased_entries_alone() {
    let connector = MockConnector::new();
    let (pool, _) = setup(connector.clone(), fixtures::fast_pool_config(), &["T1"]);

    let _lease = pool.get_connection(&tenant("T1")).await.unwrap();
    let report = pool.sweep_at(Instant::now() + Duration::from_secs(3600)).await;

    assert!(report.is_empty());
    assert_eq!(connector.pings(), 0);
    assert_eq!(pool.snapshot().len(), 1);
}

#[tokio::test]
async fn test_health_sweeper_stops_on_cancel() {
    let connector = MockConnector::new();
    let config = fixtures::fast_pool_config()
        .with_health_check_interval(Duration::from_millis(5))
        .with_ping_after(Duration::ZERO);
    let (pool, _) = setup(connector.clone(), config, &["T1"]);
    drop(pool.get_connection(&tenant("T1")).await.unwrap());

    let cancel = CancellationToken::new();
    let sweeper = pool.spawn_health_sweeper(cancel.clone());
    assert!(eventually(|| connector.pings() > 0).await);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper exits after cancel")
        .unwrap();
}

#[tokio::test]
async fn test_health_sweeper_survives_zero_interval() {
    let connector = MockConnector::new();
    let config = PoolConfig {
        health_check_interval: Duration::ZERO,
        ..fixtures::fast_pool_config().with_ping_after(Duration::ZERO)
    };
    let (pool, _) = setup(connector.clone(), config, &["T1"]);
    drop(pool.get_connection(&tenant("T1")).await.unwrap());

    let cancel = CancellationToken::new();
    let sweeper = pool.spawn_health_sweeper(cancel.clone());
    assert!(eventually(|| connector.pings() > 1).await);
    assert!(!sweeper.is_finished(), "sweeper must keep running");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper exits after cancel")
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_idle_and_refuses_requests() {
    let connector = MockConnector::new();
    let (pool, _) = setup(connector.clone(), fixtures::fast_pool_config(), &["T1", "T2"]);

    drop(pool.get_connection(&tenant("T1")).await.unwrap());
    let held = pool.get_connection(&tenant("T2")).await.unwrap();

    pool.shutdown().await;
    assert_eq!(connector.closes(), 1);
    assert!(matches!(
        pool.get_connection(&tenant("T1")).await.unwrap_err(),
        TenantryError::Connection(ConnectionError::ShutDown)
    ));

    drop(held);
    assert!(eventually(|| connector.closes() == 2).await);
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// One connect per tenant regardless of how many callers race.
    #[test]
    fn prop_single_flight_per_tenant(callers in 1usize..40, tenants in 1usize..4) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let names: Vec<String> = (0..tenants).map(|i| format!("T{i}")).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let connector = MockConnector::new().with_delay(Duration::from_millis(5));
            let (pool, _) = setup(connector.clone(), fixtures::fast_pool_config(), &refs);

            let handles: Vec<_> = (0..callers)
                .flat_map(|_| names.clone())
                .map(|name| {
                    let pool = pool.clone();
                    tokio::spawn(async move { pool.get_connection(&tenant(&name)).await.map(|l| *l) })
                })
                .collect();
            for handle in handles {
                prop_assert!(handle.await.unwrap().is_ok());
            }

            prop_assert_eq!(connector.connects(), tenants);
            prop_assert_eq!(pool.snapshot().len(), tenants);
            prop_assert!(pool.snapshot().iter().all(|e| e.refs == 0));
            Ok(())
        })?;
    }

    /// Evicting with and without leases never closes a client twice.
    #[test]
    fn prop_each_client_closed_at_most_once(rounds in 1usize..6, hold in any::<bool>()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let connector = MockConnector::new();
            let (pool, _) = setup(connector.clone(), fixtures::fast_pool_config(), &["T1"]);
            let t1 = tenant("T1");

            let mut held = Vec::new();
            for _ in 0..rounds {
                let lease = pool.get_connection(&t1).await.unwrap();
                if hold {
                    held.push(lease);
                }
                pool.evict(&t1).await;
            }
            drop(held);
            pool.shutdown().await;
            prop_assert!(eventually(|| connector.closes() == rounds).await);

            let mut closed = connector.closed_clients();
            closed.sort_unstable();
            closed.dedup();
            prop_assert_eq!(closed.len(), rounds);
            Ok(())
        })?;
    }
}
