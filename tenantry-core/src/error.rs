//! Error types for Tenantry operations
//!
//! Every error is `Clone`: a single in-flight connection attempt delivers its
//! outcome to every waiter, so the same error value is handed out many times.

use thiserror::Error;

/// Tenant registry errors. These are caller errors and are never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TenantError {
    #[error("Tenant {tenant_id} not found")]
    NotFound { tenant_id: String },

    #[error("Tenant {tenant_id} is inactive")]
    Inactive { tenant_id: String },
}

/// Encryption service errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Authentication tag did not verify: wrong key, corrupted ciphertext or
    /// mismatched IV. Never retried.
    #[error("Decryption failed for {context}")]
    Decryption { context: String },

    #[error("Encryption failed: {reason}")]
    Encryption { reason: String },

    #[error("Invalid encoding for {field}: {reason}")]
    InvalidEncoding { field: String, reason: String },

    #[error("Key derivation failed: {reason}")]
    KeyDerivation { reason: String },

    #[error("Unknown integration type: {integration_type}")]
    UnknownIntegration { integration_type: String },

    #[error("Encrypted record for {integration_type} is missing {what}")]
    MalformedRecord {
        integration_type: String,
        what: String,
    },
}

/// Connection establishment and health errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection to tenant {tenant_id} failed after {attempts} attempt(s): {reason}")]
    Failed {
        tenant_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Connection to tenant {tenant_id} timed out after {attempts} attempt(s) of {timeout_ms}ms")]
    Timeout {
        tenant_id: String,
        attempts: u32,
        timeout_ms: u64,
    },

    #[error("Connection target for tenant {tenant_id} is invalid: {reason}")]
    InvalidTarget { tenant_id: String, reason: String },

    #[error("Connection attempt for tenant {tenant_id} was aborted")]
    AttemptAborted { tenant_id: String },

    #[error("Connection pool is shut down")]
    ShutDown,
}

/// Cache backend errors. Always recovered locally by the cache wrappers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache serialization error: {reason}")]
    Serialization { reason: String },
}

/// Authoritative storage errors (registry, integration records, call records).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Stored {resource} is corrupt: {reason}")]
    Corrupt { resource: String, reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Tenantry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TenantryError {
    #[error(transparent)]
    Tenant(#[from] TenantError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TenantryError {
    /// True for `DecryptionError`-class failures (bad key, tampered data).
    pub fn is_decryption(&self) -> bool {
        matches!(
            self,
            TenantryError::Crypto(CryptoError::Decryption { .. })
                | TenantryError::Crypto(CryptoError::InvalidEncoding { .. })
        )
    }

    /// True for errors a later attempt might not reproduce.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TenantryError::Connection(ConnectionError::Failed { .. })
                | TenantryError::Connection(ConnectionError::Timeout { .. })
                | TenantryError::Connection(ConnectionError::AttemptAborted { .. })
                | TenantryError::Cache(CacheError::Unavailable { .. })
        )
    }
}

/// Result type for Tenantry operations.
pub type TenantryResult<T> = Result<T, TenantryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_is_transparent() {
        let err: TenantryError = TenantError::Inactive {
            tenant_id: "T1".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Tenant T1 is inactive");
    }

    #[test]
    fn test_error_classes() {
        let decrypt: TenantryError = CryptoError::Decryption {
            context: "descriptor".to_string(),
        }
        .into();
        assert!(decrypt.is_decryption());
        assert!(!decrypt.is_transient());

        let failed: TenantryError = ConnectionError::Failed {
            tenant_id: "T1".to_string(),
            attempts: 3,
            reason: "refused".to_string(),
        }
        .into();
        assert!(failed.is_transient());
        assert!(!failed.is_decryption());
    }
}
