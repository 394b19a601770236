//! Tenantry Pool - Per-tenant database connection management
//!
//! Resolves a tenant id to a live database client: registry lookup, decrypt
//! of the stored connection string, driver connect with bounded retry, and
//! a shared entry per tenant that later callers lease without I/O.

mod connector;
mod entry;
mod manager;
#[cfg(feature = "mongodb")]
mod mongo;
mod postgres;
mod registry;

pub use connector::{ConnectTarget, Connector, ConnectorError};
pub use entry::{EntrySnapshot, EntryState, PooledEntry};
pub use manager::{PoolManager, PoolStats, SweepReport, TenantConnection};
#[cfg(feature = "mongodb")]
pub use mongo::{MongoConnector, MongoTenantRegistry};
pub use postgres::{PgConnector, PgTenantRegistry, RegistryConfig};
pub use registry::{TenantDescriptor, TenantRegistry};
