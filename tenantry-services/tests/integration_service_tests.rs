//! Integration Service Tests
//!
//! **Property: Read Your Writes**
//! After attach, update or remove returns, the next read reflects the write:
//! it reaches the store instead of serving the previous cached value.
//!
//! **Property: No Secret Leaves Sanitized**
//! Sanitized views never contain a plaintext secret, its ciphertext, or an
//! IV/tag sibling.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;
use tenantry_core::{CryptoConfig, CryptoError, StorageError, TenantryError, ValidationError};
use tenantry_crypto::{iv_key, ConfigMap, EncryptionService, IntegrationType, MASK};
use tenantry_services::{ApiError, ErrorCode, IntegrationRecord, IntegrationService, IntegrationStore};
use tenantry_storage::{CacheBackend, CachedCompute, InMemoryCacheBackend, IntegrationConfigCache};
use tenantry_test_utils::assertions::assert_no_secret;
use tenantry_test_utils::fixtures::{self, tenant};
use tenantry_test_utils::generators::{arb_secret, arb_tenant_id};
use tenantry_test_utils::{FailingCacheBackend, InMemoryIntegrationStore};
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn service_over(backend: Arc<dyn CacheBackend>) -> (IntegrationService, Arc<InMemoryIntegrationStore>) {
    let store = Arc::new(InMemoryIntegrationStore::new());
    let service = IntegrationService::new(
        store.clone(),
        fixtures::test_crypto(),
        IntegrationConfigCache::new(CachedCompute::new(backend)),
    );
    (service, store)
}

fn service() -> (IntegrationService, Arc<InMemoryIntegrationStore>) {
    service_over(Arc::new(InMemoryCacheBackend::new()))
}

// ============================================================================
// ATTACH / READ / UPDATE
// ============================================================================

#[tokio::test]
async fn test_twilio_attach_read_update_flow() {
    let (service, store) = service();
    let t1 = tenant("T1");

    let attached = service
        .attach(
            &t1,
            IntegrationType::Twilio,
            fixtures::twilio_config("AC123", "secret-token-1", Some("+15550001111")),
        )
        .await
        .unwrap();
    assert_eq!(attached.config["authToken"], json!(MASK));
    assert_eq!(attached.config["accountSid"], json!("AC123"));

    let stored = store.stored(&t1, IntegrationType::Twilio).unwrap();
    assert_ne!(stored.config.config()["authToken"], json!("secret-token-1"));
    assert!(stored.config.config().contains_key(&iv_key("authToken")));

    let plain = service.get_decrypted(&t1, IntegrationType::Twilio).await.unwrap();
    assert!(!plain.was_cache_hit());
    assert_eq!(plain.value()["authToken"], json!("secret-token-1"));

    let again = service.get_decrypted(&t1, IntegrationType::Twilio).await.unwrap();
    assert!(again.was_cache_hit());

    let mut patch = ConfigMap::new();
    patch.insert("authToken".to_string(), json!("secret-token-2"));
    service.update(&t1, IntegrationType::Twilio, patch).await.unwrap();

    let after = service.get_decrypted(&t1, IntegrationType::Twilio).await.unwrap();
    assert!(!after.was_cache_hit(), "write must invalidate the cached record");
    assert_eq!(after.value()["authToken"], json!("secret-token-2"));
    assert_eq!(after.value()["phoneNumber"], json!("+15550001111"));
}

#[tokio::test]
async fn test_update_leaves_untouched_fields_byte_identical() {
    let (service, store) = service();
    let t1 = tenant("T1");
    service
        .attach(&t1, IntegrationType::Twilio, fixtures::twilio_config("AC1", "token-1", None))
        .await
        .unwrap();
    let before = store.stored(&t1, IntegrationType::Twilio).unwrap();

    let mut patch = ConfigMap::new();
    patch.insert("phoneNumber".to_string(), json!("+15550002222"));
    service.update(&t1, IntegrationType::Twilio, patch).await.unwrap();

    let after = store.stored(&t1, IntegrationType::Twilio).unwrap();
    for key in ["authToken", "authTokenIV", "authTokenAuthTag", "accountSid"] {
        assert_eq!(before.config.config()[key], after.config.config()[key], "{key}");
    }
}

#[tokio::test]
async fn test_update_of_missing_integration_is_not_found() {
    let (service, _) = service();
    let err = service
        .update(&tenant("T1"), IntegrationType::OpenAi, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TenantryError::Storage(StorageError::NotFound { .. })));
    assert_eq!(ApiError::from(err).code, ErrorCode::EntityNotFound);
}

#[tokio::test]
async fn test_attach_rejects_missing_required_field() {
    let (service, store) = service();
    let mut config = ConfigMap::new();
    config.insert("accountSid".to_string(), json!("AC1"));

    let err = service
        .attach(&tenant("T1"), IntegrationType::Twilio, config)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TenantryError::Validation(ValidationError::RequiredFieldMissing { .. })
    ));
    assert!(store.stored(&tenant("T1"), IntegrationType::Twilio).is_none());
}

#[tokio::test]
async fn test_record_sealed_under_other_key_fails_to_decrypt() {
    let (service, store) = service();
    let t1 = tenant("T1");
    let other = EncryptionService::new(CryptoConfig::new("another-master").with_kdf_log_n(4)).unwrap();
    let config = other
        .encrypt_integration(&fixtures::twilio_config("AC1", "tok", None), IntegrationType::Twilio)
        .unwrap();
    store
        .save(
            &t1,
            &IntegrationRecord {
                integration_type: IntegrationType::Twilio,
                config,
                updated_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();

    let err = service.get_decrypted(&t1, IntegrationType::Twilio).await.unwrap_err();
    assert!(matches!(err, TenantryError::Crypto(CryptoError::Decryption { .. })));
    assert_eq!(ApiError::from(err).code, ErrorCode::DecryptionFailed);

    // The masked view does not need the key.
    assert!(service.get_sanitized(&t1, IntegrationType::Twilio).await.is_ok());
}

// ============================================================================
// CONCURRENT READS AND WRITES
// ============================================================================

fn phone_patch(phone: &str) -> ConfigMap {
    let mut patch = ConfigMap::new();
    patch.insert("phoneNumber".to_string(), json!(phone));
    patch
}

#[tokio::test]
async fn test_read_racing_an_update_does_not_cache_the_old_record() {
    let (service, store) = service();
    let t1 = tenant("T1");
    service
        .attach(&t1, IntegrationType::Twilio, fixtures::twilio_config("AC1", "tok-1", Some("+1000")))
        .await
        .unwrap();
    store.delay_next_loads(1, Duration::from_millis(200));

    let reader = {
        let (service, t1) = (service.clone(), t1.clone());
        tokio::spawn(async move { service.get_decrypted(&t1, IntegrationType::Twilio).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    service
        .update(&t1, IntegrationType::Twilio, phone_patch("+2000"))
        .await
        .unwrap();

    let raced = reader.await.unwrap().unwrap();
    assert!(!raced.was_cache_hit());
    assert_eq!(raced.value()["phoneNumber"], json!("+1000"));

    let after = service.get_decrypted(&t1, IntegrationType::Twilio).await.unwrap();
    assert!(!after.was_cache_hit(), "old record must not be written back after the update");
    assert_eq!(after.value()["phoneNumber"], json!("+2000"));
}

#[tokio::test]
async fn test_listing_racing_an_attach_does_not_cache_the_old_listing() {
    let (service, store) = service();
    let t1 = tenant("T1");
    service
        .attach(&t1, IntegrationType::Twilio, fixtures::twilio_config("AC1", "tok-1", None))
        .await
        .unwrap();
    store.delay_next_loads(1, Duration::from_millis(200));

    let reader = {
        let (service, t1) = (service.clone(), t1.clone());
        tokio::spawn(async move { service.list_sanitized(&t1).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    service
        .attach(&t1, IntegrationType::OpenAi, {
            let mut c = ConfigMap::new();
            c.insert("apiKey".to_string(), json!("sk-one"));
            c
        })
        .await
        .unwrap();

    assert_eq!(reader.await.unwrap().unwrap().value().len(), 1);
    let after = service.list_sanitized(&t1).await.unwrap();
    assert!(!after.was_cache_hit());
    assert_eq!(after.value().len(), 2);
}

#[tokio::test]
async fn test_concurrent_partial_updates_keep_both_fields() {
    let (service, store) = service();
    let t1 = tenant("T1");
    service
        .attach(&t1, IntegrationType::Twilio, fixtures::twilio_config("AC1", "tok-1", Some("+1000")))
        .await
        .unwrap();
    store.delay_next_loads(2, Duration::from_millis(100));

    let phone = {
        let (service, t1) = (service.clone(), t1.clone());
        tokio::spawn(async move {
            service
                .update(&t1, IntegrationType::Twilio, phone_patch("+2000"))
                .await
        })
    };
    let token = {
        let (service, t1) = (service.clone(), t1.clone());
        tokio::spawn(async move {
            let mut patch = ConfigMap::new();
            patch.insert("authToken".to_string(), json!("tok-2"));
            service.update(&t1, IntegrationType::Twilio, patch).await
        })
    };
    phone.await.unwrap().unwrap();
    token.await.unwrap().unwrap();

    let plain = service.get_decrypted(&t1, IntegrationType::Twilio).await.unwrap();
    assert_eq!(plain.value()["phoneNumber"], json!("+2000"));
    assert_eq!(plain.value()["authToken"], json!("tok-2"));
    assert_eq!(plain.value()["accountSid"], json!("AC1"));
}

// ============================================================================
// LISTING AND REMOVAL
// ============================================================================

#[tokio::test]
async fn test_list_is_invalidated_by_writes() {
    let (service, store) = service();
    let t1 = tenant("T1");
    service
        .attach(&t1, IntegrationType::OpenAi, {
            let mut c = ConfigMap::new();
            c.insert("apiKey".to_string(), json!("sk-one"));
            c
        })
        .await
        .unwrap();

    let first = service.list_sanitized(&t1).await.unwrap();
    assert_eq!(first.value().len(), 1);
    assert!(service.list_sanitized(&t1).await.unwrap().was_cache_hit());

    service
        .attach(&t1, IntegrationType::Twilio, fixtures::twilio_config("AC1", "tok-1", None))
        .await
        .unwrap();
    let loads = store.loads();
    let second = service.list_sanitized(&t1).await.unwrap();
    assert!(!second.was_cache_hit());
    assert_eq!(second.value().len(), 2);
    assert_eq!(store.loads(), loads + 1);

    assert!(service.remove(&t1, IntegrationType::OpenAi).await.unwrap());
    assert!(!service.remove(&t1, IntegrationType::OpenAi).await.unwrap());
    let third = service.list_sanitized(&t1).await.unwrap();
    assert_eq!(third.value().len(), 1);
    assert!(service.get_sanitized(&t1, IntegrationType::OpenAi).await.is_err());
}

#[tokio::test]
async fn test_tenants_do_not_share_cached_configs() {
    let (service, _) = service();
    let (t1, t2) = (tenant("T1"), tenant("T2"));
    service
        .attach(&t1, IntegrationType::Twilio, fixtures::twilio_config("AC1", "tok-1", None))
        .await
        .unwrap();
    service.get_sanitized(&t1, IntegrationType::Twilio).await.unwrap();

    assert!(service.get_sanitized(&t2, IntegrationType::Twilio).await.is_err());
}

// ============================================================================
// DEGRADED CACHE
// ============================================================================

#[tokio::test]
async fn test_failing_cache_still_serves_reads_and_writes() {
    let backend = Arc::new(FailingCacheBackend::new());
    let (service, store) = service_over(backend.clone());
    let t1 = tenant("T1");

    service
        .attach(&t1, IntegrationType::Twilio, fixtures::twilio_config("AC1", "tok-1", None))
        .await
        .unwrap();
    for _ in 0..3 {
        let read = service.get_decrypted(&t1, IntegrationType::Twilio).await.unwrap();
        assert!(!read.was_cache_hit());
        assert_eq!(read.value()["authToken"], json!("tok-1"));
    }
    assert_eq!(store.loads(), 3);
    assert!(backend.calls() > 0);
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Sanitized single and list views never carry the plaintext secret.
    #[test]
    fn prop_sanitized_views_hide_secrets(tenant_id in arb_tenant_id(), token in arb_secret()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let (service, _) = service();
            service
                .attach(&tenant_id, IntegrationType::Twilio, fixtures::twilio_config("AC9", &token, None))
                .await
                .unwrap();

            let one = service.get_sanitized(&tenant_id, IntegrationType::Twilio).await.unwrap();
            assert_no_secret(one.value(), &token);
            prop_assert!(!one.value().config.keys().any(|k| k.ends_with("IV") || k.ends_with("AuthTag")));

            let all = service.list_sanitized(&tenant_id).await.unwrap();
            assert_no_secret(all.value(), &token);
            Ok(())
        })?;
    }

    /// Every write is visible to the very next read.
    #[test]
    fn prop_read_after_write_sees_write(tokens in proptest::collection::vec(arb_secret(), 1..6)) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let (service, _) = service();
            let t1 = tenant("T1");
            service
                .attach(&t1, IntegrationType::Twilio, fixtures::twilio_config("AC1", "initial", None))
                .await
                .unwrap();
            for token in tokens {
                service.get_decrypted(&t1, IntegrationType::Twilio).await.unwrap();
                let mut patch = ConfigMap::new();
                patch.insert("authToken".to_string(), json!(token));
                service.update(&t1, IntegrationType::Twilio, patch).await.unwrap();

                let read = service.get_decrypted(&t1, IntegrationType::Twilio).await.unwrap();
                prop_assert!(!read.was_cache_hit());
                prop_assert_eq!(&read.value()["authToken"], &json!(token));
            }
            Ok(())
        })?;
    }
}
