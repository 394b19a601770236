//! Credential store accessor
//!
//! Reads a tenant's encrypted connection descriptor from the central tenant
//! registry. Pure reads, no caching: the pool manager only asks on a miss.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tenantry_core::{TenantId, TenantryResult};
use tenantry_crypto::EncryptedField;

/// A tenant's connection descriptor as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDescriptor {
    pub tenant_id: TenantId,
    /// Encrypted connection string (hex ciphertext, IV and tag).
    pub connection: EncryptedField,
    /// Database the tenant's data lives in.
    pub database_name: String,
    pub active: bool,
}

/// Source of tenant descriptors.
///
/// Implementations fail with `TenantError::NotFound` for unknown tenants and
/// return inactive tenants as-is; the pool manager decides what inactive
/// means.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    async fn get_tenant_descriptor(&self, tenant_id: &TenantId) -> TenantryResult<TenantDescriptor>;
}
