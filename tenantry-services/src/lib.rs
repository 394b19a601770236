//! Tenantry Services - handler-facing glue
//!
//! What request handlers call: integration configuration round-tripped
//! through the encryption service and the config cache, call statistics
//! through the stats cache, and the mapping from workspace errors to HTTP
//! status codes.

pub mod error;
pub mod integration;
pub mod pg;
pub mod state;
pub mod stats;
pub mod store;
pub mod telemetry;

pub use error::{ApiError, ApiResult, ErrorCode};
pub use integration::{IntegrationService, IntegrationSummary};
pub use pg::{ensure_tenant_schema, PgCallRecordStore, PgIntegrationStore, TENANT_SCHEMA_SQL};
pub use state::AppState;
pub use stats::{is_connected, is_successful, is_unresponsive, CallStats, StatsService};
pub use store::{CallRecord, CallRecordStore, IntegrationRecord, IntegrationStore, StatsQuery};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
