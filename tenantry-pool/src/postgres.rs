//! PostgreSQL driver and tenant registry.
//!
//! Each tenant gets its own `deadpool-postgres` pool, bounded by the pool
//! manager's `max_pool_size`. The central tenant registry is read through a
//! separate, process-wide pool.

use async_trait::async_trait;
use deadpool_postgres::{Config, Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use secrecy::{ExposeSecret, SecretString};
use tokio_postgres::NoTls;

use tenantry_core::{env_or, ConfigError, StorageError, TenantError, TenantId, TenantryResult};
use tenantry_crypto::EncryptedField;

use crate::connector::{ConnectTarget, Connector, ConnectorError};
use crate::registry::{TenantDescriptor, TenantRegistry};

// ============================================================================
// TENANT DATABASES
// ============================================================================

/// Opens one `deadpool-postgres` pool per tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl PgConnector {
    pub fn new() -> Self {
        Self
    }

    async fn verify(pool: &Pool) -> Result<(), ConnectorError> {
        let client = pool
            .get()
            .await
            .map_err(|e| ConnectorError::Transient(format!("Failed to get connection: {}", e)))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| ConnectorError::Transient(format!("Health query failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Client = Pool;

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&self, target: &ConnectTarget) -> Result<Pool, ConnectorError> {
        let mut cfg: tokio_postgres::Config = target
            .uri
            .expose_secret()
            .parse()
            .map_err(|e: tokio_postgres::Error| ConnectorError::InvalidTarget(e.to_string()))?;
        if !target.database_name.is_empty() {
            cfg.dbname(&target.database_name);
        }
        cfg.connect_timeout(target.connect_timeout);

        let manager = Manager::from_config(
            cfg,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let max_size = usize::try_from(target.max_pool_size).unwrap_or(usize::MAX).max(1);
        let pool = Pool::builder(manager)
            .max_size(max_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| ConnectorError::InvalidTarget(format!("Failed to create pool: {}", e)))?;

        // deadpool connects lazily; fail here rather than on first use.
        if let Err(e) = Self::verify(&pool).await {
            pool.close();
            return Err(e);
        }
        Ok(pool)
    }

    async fn ping(&self, pool: &Pool) -> Result<(), ConnectorError> {
        Self::verify(pool).await
    }

    async fn close(&self, pool: Pool) {
        pool.close();
    }
}

// ============================================================================
// TENANT REGISTRY
// ============================================================================

/// Central registry database configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: SecretString,
    pub max_size: usize,
    /// Table holding tenant descriptors.
    pub table: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "tenantry".to_string(),
            user: "postgres".to_string(),
            password: SecretString::from(String::new()),
            max_size: 8,
            table: "tenants".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Load the registry configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TENANTRY_REGISTRY_HOST` (default: localhost)
    /// - `TENANTRY_REGISTRY_PORT` (default: 5432)
    /// - `TENANTRY_REGISTRY_NAME` (default: tenantry)
    /// - `TENANTRY_REGISTRY_USER` (default: postgres)
    /// - `TENANTRY_REGISTRY_PASSWORD` (default: empty)
    /// - `TENANTRY_REGISTRY_POOL_SIZE` (default: 8)
    /// - `TENANTRY_REGISTRY_TABLE` (default: tenants)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            host: env_or("TENANTRY_REGISTRY_HOST", defaults.host),
            port: env_or("TENANTRY_REGISTRY_PORT", defaults.port),
            dbname: env_or("TENANTRY_REGISTRY_NAME", defaults.dbname),
            user: env_or("TENANTRY_REGISTRY_USER", defaults.user),
            password: SecretString::from(
                std::env::var("TENANTRY_REGISTRY_PASSWORD").unwrap_or_default(),
            ),
            max_size: env_or("TENANTRY_REGISTRY_POOL_SIZE", defaults.max_size),
            table: env_or("TENANTRY_REGISTRY_TABLE", defaults.table),
        };
        config.validate()?;
        Ok(config)
    }

    /// The table name is interpolated into SQL, so only plain identifiers
    /// (optionally schema-qualified) are accepted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = !self.table.is_empty()
            && self.table.split('.').all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
            });
        if valid {
            Ok(())
        } else {
            Err(ConfigError::InvalidValue {
                field: "TENANTRY_REGISTRY_TABLE".to_string(),
                value: self.table.clone(),
                reason: "must be a plain SQL identifier".to_string(),
            })
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> Result<Pool, ConfigError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.expose_secret().to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(self.max_size));

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ConfigError::InvalidValue {
                field: "registry".to_string(),
                value: format!("{}:{}/{}", self.host, self.port, self.dbname),
                reason: format!("Failed to create pool: {}", e),
            })
    }
}

/// Reads tenant descriptors from the central registry table.
///
/// Expected columns: `tenant_id`, `encrypted_connection`, `connection_iv`,
/// `connection_auth_tag`, `database_name`, `active`.
#[derive(Clone)]
pub struct PgTenantRegistry {
    pool: Pool,
    query: String,
}

impl PgTenantRegistry {
    pub fn new(pool: Pool, config: &RegistryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let query = format!(
            "SELECT encrypted_connection, connection_iv, connection_auth_tag, database_name, active \
             FROM {} WHERE tenant_id = $1",
            config.table
        );
        Ok(Self { pool, query })
    }

    pub fn from_config(config: &RegistryConfig) -> Result<Self, ConfigError> {
        Self::new(config.create_pool()?, config)
    }
}

fn query_failed(e: impl std::fmt::Display) -> StorageError {
    StorageError::QueryFailed {
        reason: e.to_string(),
    }
}

#[async_trait]
impl TenantRegistry for PgTenantRegistry {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_tenant_descriptor(&self, tenant_id: &TenantId) -> TenantryResult<TenantDescriptor> {
        let client = self.pool.get().await.map_err(query_failed)?;
        let row = client
            .query_opt(self.query.as_str(), &[&tenant_id.as_str()])
            .await
            .map_err(query_failed)?
            .ok_or_else(|| TenantError::NotFound {
                tenant_id: tenant_id.to_string(),
            })?;

        let corrupt = |e: tokio_postgres::Error| StorageError::Corrupt {
            resource: "tenant descriptor".to_string(),
            reason: e.to_string(),
        };
        Ok(TenantDescriptor {
            tenant_id: tenant_id.clone(),
            connection: EncryptedField {
                ciphertext: row.try_get("encrypted_connection").map_err(corrupt)?,
                iv: row.try_get("connection_iv").map_err(corrupt)?,
                auth_tag: row.try_get("connection_auth_tag").map_err(corrupt)?,
            },
            database_name: row.try_get("database_name").map_err(corrupt)?,
            active: row.try_get("active").map_err(corrupt)?,
        })
    }
}
