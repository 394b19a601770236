//! Core Type Property Tests
//!
//! **Property: Tenant Ids Are Key-Safe**
//! A tenant id is accepted iff it is non-empty and free of whitespace and
//! `:`, and an accepted id survives display and serde unchanged.
//!
//! **Property: Config Floors**
//! Builders never produce a zero-attempt retry policy, an empty pool or a
//! health interval below the sweeper's minimum.

use std::time::Duration;

use proptest::prelude::*;
use tenantry_core::{
    CacheBackendKind, PoolConfig, RetryPolicy, TenantId, ValidationError,
    MIN_HEALTH_CHECK_INTERVAL,
};

// ============================================================================
// GENERATORS
// ============================================================================

fn arb_valid_tenant_id() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.\\-]{1,40}"
}

/// A valid id with one forbidden character spliced in.
fn arb_invalid_tenant_id() -> impl Strategy<Value = String> {
    (
        "[a-zA-Z0-9_]{0,20}",
        prop_oneof![Just(':'), Just(' '), Just('\t'), Just('\n')],
        "[a-zA-Z0-9_]{0,20}",
    )
        .prop_map(|(head, bad, tail)| format!("{head}{bad}{tail}"))
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_valid_tenant_ids_round_trip(raw in arb_valid_tenant_id()) {
        let id = TenantId::new(raw.clone()).unwrap();
        prop_assert_eq!(id.as_str(), raw.as_str());
        prop_assert_eq!(id.to_string(), raw.clone());

        let json = serde_json::to_string(&id).unwrap();
        let back: TenantId = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, id);
    }

    #[test]
    fn prop_tenant_ids_with_separator_or_whitespace_rejected(raw in arb_invalid_tenant_id()) {
        let err = TenantId::new(raw.clone()).unwrap_err();
        let is_invalid_value = matches!(err, ValidationError::InvalidValue { .. });
        prop_assert!(is_invalid_value);
        prop_assert!(serde_json::from_value::<TenantId>(serde_json::Value::String(raw)).is_err());
    }

    #[test]
    fn prop_retry_policy_has_an_attempt(attempts in 0u32..10, delay_ms in 0u64..5000) {
        let policy = RetryPolicy::new(attempts, Duration::from_millis(delay_ms));
        prop_assert_eq!(policy.max_attempts, attempts.max(1));
        prop_assert_eq!(policy.delay, Duration::from_millis(delay_ms));
    }

    #[test]
    fn prop_pool_builders_respect_floors(size in 0u32..64, interval_us in 0u64..5_000) {
        let config = PoolConfig::new()
            .with_max_pool_size(size)
            .with_health_check_interval(Duration::from_micros(interval_us));

        prop_assert!(config.max_pool_size >= 1);
        prop_assert!(config.health_check_interval >= MIN_HEALTH_CHECK_INTERVAL);
        if Duration::from_micros(interval_us) >= MIN_HEALTH_CHECK_INTERVAL {
            prop_assert_eq!(config.health_check_interval, Duration::from_micros(interval_us));
        }
    }

    #[test]
    fn prop_backend_kind_parse_ignores_case(
        name in prop_oneof![Just("memory"), Just("lmdb"), Just("redis")],
        upper in proptest::collection::vec(any::<bool>(), 6),
    ) {
        let mixed: String = name
            .chars()
            .zip(upper.iter().cycle())
            .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
            .collect();
        let parsed = format!("  {mixed} ").parse::<CacheBackendKind>().unwrap();
        prop_assert_eq!(parsed, name.parse::<CacheBackendKind>().unwrap());
    }
}

#[test]
fn test_empty_tenant_id_is_missing_field() {
    assert!(matches!(
        TenantId::new(""),
        Err(ValidationError::RequiredFieldMissing { .. })
    ));
}
