//! Integration configuration service.
//!
//! The cache holds records exactly as stored, secrets still encrypted;
//! decryption and masking happen on every read. Every write invalidates the
//! record and the tenant's listing before it returns.
//!
//! Writes to one (tenant, integration) record are serialized, so a partial
//! update always merges onto the latest stored version.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use tenantry_core::{CryptoError, StorageError, TenantId, TenantryResult, Timestamp};
use tenantry_crypto::{sanitize_config, ConfigMap, EncryptionService, IntegrationType};
use tenantry_storage::{CacheRead, IntegrationConfigCache};

use crate::store::{IntegrationRecord, IntegrationStore};

/// Client-safe view of an integration: secrets masked, no IV/tag metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationSummary {
    pub integration_type: IntegrationType,
    pub config: ConfigMap,
    pub updated_at: Timestamp,
}

impl IntegrationSummary {
    fn of(record: &IntegrationRecord) -> Self {
        Self {
            integration_type: record.integration_type,
            config: sanitize_config(&record.config, record.integration_type),
            updated_at: record.updated_at,
        }
    }
}

fn not_found(tenant_id: &TenantId, integration_type: IntegrationType) -> StorageError {
    StorageError::NotFound {
        resource: "integration".to_string(),
        id: format!("{}/{}", tenant_id, integration_type),
    }
}

type RecordKey = (TenantId, IntegrationType);

#[derive(Clone)]
pub struct IntegrationService {
    store: Arc<dyn IntegrationStore>,
    crypto: Arc<EncryptionService>,
    cache: IntegrationConfigCache,
    write_locks: Arc<DashMap<RecordKey, Arc<Mutex<()>>>>,
}

impl IntegrationService {
    pub fn new(
        store: Arc<dyn IntegrationStore>,
        crypto: Arc<EncryptionService>,
        cache: IntegrationConfigCache,
    ) -> Self {
        Self {
            store,
            crypto,
            cache,
            write_locks: Arc::new(DashMap::new()),
        }
    }

    /// Validate, encrypt and store a new (or replacement) configuration.
    #[tracing::instrument(level = "debug", skip_all, fields(tenant = %tenant_id, integration = %integration_type))]
    pub async fn attach(
        &self,
        tenant_id: &TenantId,
        integration_type: IntegrationType,
        config: ConfigMap,
    ) -> TenantryResult<IntegrationSummary> {
        let encrypted = self
            .with_crypto(move |crypto| crypto.encrypt_integration(&config, integration_type))
            .await?;
        let _guard = self.lock_record(tenant_id, integration_type).await;
        let record = IntegrationRecord {
            integration_type,
            config: encrypted,
            updated_at: Utc::now(),
        };
        self.store.save(tenant_id, &record).await?;
        self.cache.invalidate(tenant_id, integration_type.as_str()).await;

        tracing::info!(tenant = %tenant_id, integration = %integration_type, "Integration attached");
        Ok(IntegrationSummary::of(&record))
    }

    /// Apply a partial update. Fields absent from `patch` keep their stored
    /// ciphertext, IV and tag unchanged.
    #[tracing::instrument(level = "debug", skip_all, fields(tenant = %tenant_id, integration = %integration_type))]
    pub async fn update(
        &self,
        tenant_id: &TenantId,
        integration_type: IntegrationType,
        patch: ConfigMap,
    ) -> TenantryResult<IntegrationSummary> {
        let _guard = self.lock_record(tenant_id, integration_type).await;
        let existing = self
            .store
            .load(tenant_id, integration_type)
            .await?
            .ok_or_else(|| not_found(tenant_id, integration_type))?;

        let merged = self
            .with_crypto(move |crypto| {
                crypto.merge_update(&existing.config, &patch, integration_type)
            })
            .await?;
        let record = IntegrationRecord {
            integration_type,
            config: merged,
            updated_at: Utc::now(),
        };
        self.store.save(tenant_id, &record).await?;
        self.cache.invalidate(tenant_id, integration_type.as_str()).await;

        tracing::info!(tenant = %tenant_id, integration = %integration_type, "Integration updated");
        Ok(IntegrationSummary::of(&record))
    }

    /// Plaintext configuration, for internal callers only.
    pub async fn get_decrypted(
        &self,
        tenant_id: &TenantId,
        integration_type: IntegrationType,
    ) -> TenantryResult<CacheRead<ConfigMap>> {
        let read = self.read_record(tenant_id, integration_type).await?;
        let encrypted = read.value().config.clone();
        let plaintext = self
            .with_crypto(move |crypto| crypto.decrypt_config(&encrypted, integration_type))
            .await?;
        Ok(read.map(|_| plaintext))
    }

    pub async fn get_sanitized(
        &self,
        tenant_id: &TenantId,
        integration_type: IntegrationType,
    ) -> TenantryResult<CacheRead<IntegrationSummary>> {
        let read = self.read_record(tenant_id, integration_type).await?;
        Ok(read.map(|record| IntegrationSummary::of(&record)))
    }

    pub async fn list_sanitized(
        &self,
        tenant_id: &TenantId,
    ) -> TenantryResult<CacheRead<Vec<IntegrationSummary>>> {
        let read = self
            .cache
            .get_or_load_all(tenant_id, || self.store.load_all(tenant_id))
            .await?;
        Ok(read.map(|records: Vec<IntegrationRecord>| {
            records.iter().map(IntegrationSummary::of).collect()
        }))
    }

    /// Delete the configuration. Returns whether anything was stored.
    #[tracing::instrument(level = "debug", skip_all, fields(tenant = %tenant_id, integration = %integration_type))]
    pub async fn remove(
        &self,
        tenant_id: &TenantId,
        integration_type: IntegrationType,
    ) -> TenantryResult<bool> {
        let _guard = self.lock_record(tenant_id, integration_type).await;
        let removed = self.store.delete(tenant_id, integration_type).await?;
        self.cache.invalidate(tenant_id, integration_type.as_str()).await;
        if removed {
            tracing::info!(tenant = %tenant_id, integration = %integration_type, "Integration removed");
        }
        Ok(removed)
    }

    async fn read_record(
        &self,
        tenant_id: &TenantId,
        integration_type: IntegrationType,
    ) -> TenantryResult<CacheRead<IntegrationRecord>> {
        self.cache
            .get_or_load(tenant_id, integration_type.as_str(), || {
                self.load_required(tenant_id, integration_type)
            })
            .await
    }

    async fn load_required(
        &self,
        tenant_id: &TenantId,
        integration_type: IntegrationType,
    ) -> TenantryResult<IntegrationRecord> {
        let found = self.store.load(tenant_id, integration_type).await?;
        found.ok_or_else(|| not_found(tenant_id, integration_type).into())
    }

    /// Exclusive write access to one record until the guard drops.
    async fn lock_record(
        &self,
        tenant_id: &TenantId,
        integration_type: IntegrationType,
    ) -> OwnedMutexGuard<()> {
        let lock = self
            .write_locks
            .entry((tenant_id.clone(), integration_type))
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Run `f` on the blocking pool; key derivation and AEAD are CPU-bound.
    async fn with_crypto<T, F>(&self, f: F) -> TenantryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&EncryptionService) -> TenantryResult<T> + Send + 'static,
    {
        let crypto = Arc::clone(&self.crypto);
        tokio::task::spawn_blocking(move || f(&crypto))
            .await
            .map_err(|e| CryptoError::Encryption {
                reason: format!("crypto task failed: {}", e),
            })?
    }
}

impl std::fmt::Debug for IntegrationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationService")
            .field("crypto", &self.crypto)
            .field("cache", &self.cache)
            .finish()
    }
}
