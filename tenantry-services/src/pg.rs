//! PostgreSQL-backed stores.
//!
//! Both stores live in the tenant's own database and borrow a lease from the
//! pool manager for every operation.

use async_trait::async_trait;
use deadpool_postgres::Object;
use tokio_postgres::Row;
use uuid::Uuid;

use tenantry_core::{StorageError, TenantId, TenantryResult};
use tenantry_crypto::{EncryptedConfig, IntegrationType};
use tenantry_pool::{PgConnector, PoolManager, TenantConnection};

use crate::store::{CallRecord, CallRecordStore, IntegrationRecord, IntegrationStore, StatsQuery};

/// Tables the stores expect in every tenant database.
pub const TENANT_SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS integrations (
    integration_type TEXT PRIMARY KEY,
    config JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS call_records (
    call_id TEXT PRIMARY KEY,
    agent_id TEXT,
    start_timestamp TIMESTAMPTZ,
    end_timestamp TIMESTAMPTZ,
    call_successful BOOLEAN,
    disconnection_reason TEXT,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS call_records_created_at_idx ON call_records (created_at);
";

fn query_failed(err: impl std::fmt::Display) -> StorageError {
    tracing::error!(error = %err, "Tenant database query failed");
    StorageError::QueryFailed {
        reason: err.to_string(),
    }
}

fn corrupt(resource: &str, err: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupt {
        resource: resource.to_string(),
        reason: err.to_string(),
    }
}

/// A pooled client plus the lease that keeps its pool open.
///
/// Fields drop in declaration order: the client returns to its pool before
/// the lease is released, so a retired pool is never closed with an object
/// still checked out.
struct TenantClient<C = Object, L = TenantConnection<PgConnector>> {
    client: C,
    _lease: L,
}

async fn checkout(
    pool: &PoolManager<PgConnector>,
    tenant_id: &TenantId,
) -> TenantryResult<TenantClient> {
    let lease = pool.get_connection(tenant_id).await?;
    let client = lease.get().await.map_err(query_failed)?;
    Ok(TenantClient {
        client,
        _lease: lease,
    })
}

/// Create the tenant tables if they do not exist.
pub async fn ensure_tenant_schema(
    pool: &PoolManager<PgConnector>,
    tenant_id: &TenantId,
) -> TenantryResult<()> {
    let conn = checkout(pool, tenant_id).await?;
    conn.client
        .batch_execute(TENANT_SCHEMA_SQL)
        .await
        .map_err(query_failed)?;
    Ok(())
}

// ============================================================================
// INTEGRATIONS
// ============================================================================

#[derive(Clone)]
pub struct PgIntegrationStore {
    pool: PoolManager<PgConnector>,
}

impl PgIntegrationStore {
    pub fn new(pool: PoolManager<PgConnector>) -> Self {
        Self { pool }
    }

    fn record_from_row(integration_type: IntegrationType, row: &Row) -> TenantryResult<IntegrationRecord> {
        let config: serde_json::Value = row.try_get("config").map_err(|e| corrupt("integration", e))?;
        let config: EncryptedConfig =
            serde_json::from_value(config).map_err(|e| corrupt("integration", e))?;
        Ok(IntegrationRecord {
            integration_type,
            config,
            updated_at: row.try_get("updated_at").map_err(|e| corrupt("integration", e))?,
        })
    }
}

#[async_trait]
impl IntegrationStore for PgIntegrationStore {
    async fn load(
        &self,
        tenant_id: &TenantId,
        integration_type: IntegrationType,
    ) -> TenantryResult<Option<IntegrationRecord>> {
        let conn = checkout(&self.pool, tenant_id).await?;
        let row = conn
            .client
            .query_opt(
                "SELECT config, updated_at FROM integrations WHERE integration_type = $1",
                &[&integration_type.as_str()],
            )
            .await
            .map_err(query_failed)?;
        row.map(|row| Self::record_from_row(integration_type, &row))
            .transpose()
    }

    async fn load_all(&self, tenant_id: &TenantId) -> TenantryResult<Vec<IntegrationRecord>> {
        let conn = checkout(&self.pool, tenant_id).await?;
        let rows = conn
            .client
            .query(
                "SELECT integration_type, config, updated_at FROM integrations ORDER BY integration_type",
                &[],
            )
            .await
            .map_err(query_failed)?;

        rows.iter()
            .map(|row| {
                let raw: String = row
                    .try_get("integration_type")
                    .map_err(|e| corrupt("integration", e))?;
                let integration_type: IntegrationType =
                    raw.parse().map_err(|e| corrupt("integration", e))?;
                Self::record_from_row(integration_type, row)
            })
            .collect()
    }

    async fn save(&self, tenant_id: &TenantId, record: &IntegrationRecord) -> TenantryResult<()> {
        let config = serde_json::to_value(&record.config).map_err(|e| corrupt("integration", e))?;
        let conn = checkout(&self.pool, tenant_id).await?;
        conn.client
            .execute(
                "INSERT INTO integrations (integration_type, config, updated_at) VALUES ($1, $2, $3) \
                 ON CONFLICT (integration_type) DO UPDATE \
                 SET config = EXCLUDED.config, updated_at = EXCLUDED.updated_at",
                &[&record.integration_type.as_str(), &config, &record.updated_at],
            )
            .await
            .map_err(query_failed)?;
        Ok(())
    }

    async fn delete(
        &self,
        tenant_id: &TenantId,
        integration_type: IntegrationType,
    ) -> TenantryResult<bool> {
        let conn = checkout(&self.pool, tenant_id).await?;
        let deleted = conn
            .client
            .execute(
                "DELETE FROM integrations WHERE integration_type = $1",
                &[&integration_type.as_str()],
            )
            .await
            .map_err(query_failed)?;
        Ok(deleted > 0)
    }
}

// ============================================================================
// CALL RECORDS
// ============================================================================

#[derive(Clone)]
pub struct PgCallRecordStore {
    pool: PoolManager<PgConnector>,
}

impl PgCallRecordStore {
    pub fn new(pool: PoolManager<PgConnector>) -> Self {
        Self { pool }
    }
}

fn call_from_row(row: &Row) -> Result<CallRecord, StorageError> {
    let raw_id: String = row.try_get("call_id").map_err(|e| corrupt("call record", e))?;
    Ok(CallRecord {
        call_id: Uuid::parse_str(&raw_id).map_err(|e| corrupt("call record", e))?,
        agent_id: row.try_get("agent_id").map_err(|e| corrupt("call record", e))?,
        start_timestamp: row
            .try_get("start_timestamp")
            .map_err(|e| corrupt("call record", e))?,
        end_timestamp: row
            .try_get("end_timestamp")
            .map_err(|e| corrupt("call record", e))?,
        call_successful: row
            .try_get("call_successful")
            .map_err(|e| corrupt("call record", e))?,
        disconnection_reason: row
            .try_get("disconnection_reason")
            .map_err(|e| corrupt("call record", e))?,
        created_at: row.try_get("created_at").map_err(|e| corrupt("call record", e))?,
    })
}

#[async_trait]
impl CallRecordStore for PgCallRecordStore {
    async fn insert(&self, tenant_id: &TenantId, call: &CallRecord) -> TenantryResult<()> {
        let conn = checkout(&self.pool, tenant_id).await?;
        conn.client
            .execute(
                "INSERT INTO call_records (call_id, agent_id, start_timestamp, end_timestamp, \
                 call_successful, disconnection_reason, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &call.call_id.to_string(),
                    &call.agent_id,
                    &call.start_timestamp,
                    &call.end_timestamp,
                    &call.call_successful,
                    &call.disconnection_reason,
                    &call.created_at,
                ],
            )
            .await
            .map_err(query_failed)?;
        Ok(())
    }

    async fn list(&self, tenant_id: &TenantId, query: &StatsQuery) -> TenantryResult<Vec<CallRecord>> {
        let conn = checkout(&self.pool, tenant_id).await?;
        let rows = conn
            .client
            .query(
                "SELECT call_id, agent_id, start_timestamp, end_timestamp, call_successful, \
                 disconnection_reason, created_at FROM call_records \
                 WHERE ($1::text IS NULL OR agent_id = $1) \
                 AND ($2::timestamptz IS NULL OR created_at >= $2) \
                 AND ($3::timestamptz IS NULL OR created_at < $3)",
                &[&query.agent_id, &query.since, &query.until],
            )
            .await
            .map_err(query_failed)?;
        Ok(rows.iter().map(call_from_row).collect::<Result<_, _>>()?)
    }
}
