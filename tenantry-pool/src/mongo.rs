//! MongoDB driver and tenant registry.

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use secrecy::ExposeSecret;
use serde::Deserialize;

use tenantry_core::{StorageError, TenantError, TenantId, TenantryResult};
use tenantry_crypto::EncryptedField;

use crate::connector::{ConnectTarget, Connector, ConnectorError};
use crate::registry::{TenantDescriptor, TenantRegistry};

/// Opens one `mongodb::Client` per tenant, scoped to the tenant's database.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

impl MongoConnector {
    pub fn new() -> Self {
        Self
    }
}

async fn ping_database(db: &Database) -> Result<(), ConnectorError> {
    db.run_command(doc! { "ping": 1 })
        .await
        .map(|_| ())
        .map_err(|e| ConnectorError::Transient(e.to_string()))
}

#[async_trait]
impl Connector for MongoConnector {
    type Client = Database;

    fn name(&self) -> &'static str {
        "mongodb"
    }

    async fn connect(&self, target: &ConnectTarget) -> Result<Database, ConnectorError> {
        let mut options = ClientOptions::parse(target.uri.expose_secret())
            .await
            .map_err(|e| ConnectorError::InvalidTarget(e.to_string()))?;
        options.max_pool_size = Some(target.max_pool_size);
        options.connect_timeout = Some(target.connect_timeout);
        options.server_selection_timeout = Some(target.connect_timeout);

        let client =
            Client::with_options(options).map_err(|e| ConnectorError::InvalidTarget(e.to_string()))?;
        let db = client.database(&target.database_name);

        // The driver connects lazily; fail here rather than on first use.
        if let Err(e) = ping_database(&db).await {
            client.shutdown().await;
            return Err(e);
        }
        Ok(db)
    }

    async fn ping(&self, db: &Database) -> Result<(), ConnectorError> {
        ping_database(db).await
    }

    async fn close(&self, db: Database) {
        db.client().clone().shutdown().await;
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TenantDocument {
    encrypted_connection: String,
    connection_iv: String,
    connection_auth_tag: String,
    database_name: String,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

/// Reads tenant descriptors from a registry collection keyed by `tenantId`.
#[derive(Clone)]
pub struct MongoTenantRegistry {
    tenants: Collection<TenantDocument>,
}

impl MongoTenantRegistry {
    pub fn new(db: &Database, collection: &str) -> Self {
        Self {
            tenants: db.collection(collection),
        }
    }
}

#[async_trait]
impl TenantRegistry for MongoTenantRegistry {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_tenant_descriptor(&self, tenant_id: &TenantId) -> TenantryResult<TenantDescriptor> {
        let found = self
            .tenants
            .find_one(doc! { "tenantId": tenant_id.as_str() })
            .await
            .map_err(|e| StorageError::QueryFailed {
                reason: e.to_string(),
            })?
            .ok_or_else(|| TenantError::NotFound {
                tenant_id: tenant_id.to_string(),
            })?;

        Ok(TenantDescriptor {
            tenant_id: tenant_id.clone(),
            connection: EncryptedField {
                ciphertext: found.encrypted_connection,
                iv: found.connection_iv,
                auth_tag: found.connection_auth_tag,
            },
            database_name: found.database_name,
            active: found.active,
        })
    }
}
