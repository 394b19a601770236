//! Database driver abstraction.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use tenantry_core::TenantId;

/// Everything a driver needs to open a tenant's database.
pub struct ConnectTarget {
    pub tenant_id: TenantId,
    /// Decrypted connection string. Never logged.
    pub uri: SecretString,
    pub database_name: String,
    pub max_pool_size: u32,
    pub connect_timeout: Duration,
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("tenant_id", &self.tenant_id)
            .field("uri", &"[REDACTED]")
            .field("database_name", &self.database_name)
            .field("max_pool_size", &self.max_pool_size)
            .finish()
    }
}

/// Driver-level failure, classified for the retry loop.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConnectorError {
    /// Worth retrying: refused, reset, server selection failed.
    #[error("{0}")]
    Transient(String),

    /// The connection string itself is unusable. Never retried.
    #[error("invalid connection target: {0}")]
    InvalidTarget(String),
}

/// A database driver that can open, verify and close per-tenant clients.
///
/// `Client` is the driver's own pooled handle (cheap to clone); the pool
/// manager keeps one per tenant and hands out leases on it.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: Clone + Send + Sync + 'static;

    /// Short driver name for logs.
    fn name(&self) -> &'static str;

    /// Open and verify a client for `target`.
    async fn connect(&self, target: &ConnectTarget) -> Result<Self::Client, ConnectorError>;

    /// Cheap liveness check.
    async fn ping(&self, client: &Self::Client) -> Result<(), ConnectorError>;

    /// Release the client's resources.
    async fn close(&self, client: Self::Client);
}
