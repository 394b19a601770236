//! Tenantry Core - shared types for the connection and credential resolution layer
//!
//! Identity, error taxonomy, configuration and health types used by every
//! other crate in the workspace.

pub mod config;
pub mod error;
pub mod health;
pub mod identity;

pub use config::{
    env_or, CacheBackendKind, CacheSettings, CryptoConfig, PoolConfig, RetryPolicy,
    DEFAULT_KDF_LOG_N, MIN_HEALTH_CHECK_INTERVAL,
};
pub use error::{
    CacheError, ConfigError, ConnectionError, CryptoError, StorageError, TenantError,
    TenantryError, TenantryResult, ValidationError,
};
pub use health::{ConnectionHealth, HealthCheck, HealthStatus};
pub use identity::{TenantId, Timestamp};
