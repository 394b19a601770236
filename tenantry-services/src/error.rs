//! Error Types for Tenantry handlers
//!
//! Maps the workspace error taxonomy onto handler-facing error codes and
//! HTTP status codes. Cache errors have no mapping of their own: the cache
//! wrappers recover from them before a handler ever sees one.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

use tenantry_core::{
    CacheError, ConfigError, ConnectionError, CryptoError, StorageError, TenantError,
    TenantryError, ValidationError,
};

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for handler responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Client Errors (400, 403, 404)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Required field is missing from request
    MissingField,

    /// Integration type is not supported
    UnknownIntegration,

    /// Tenant exists but is deactivated
    TenantInactive,

    /// Requested tenant does not exist
    TenantNotFound,

    /// Requested record does not exist
    EntityNotFound,

    // ========================================================================
    // Server Errors (500, 503, 504)
    // ========================================================================
    /// Tenant database could not be reached
    ConnectionFailed,

    /// Tenant database did not answer in time
    ConnectionTimeout,

    /// Stored credentials could not be decrypted
    DecryptionFailed,

    /// Server configuration is invalid
    ConfigurationError,

    /// Database operation failed
    DatabaseError,

    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed
            | ErrorCode::MissingField
            | ErrorCode::UnknownIntegration => StatusCode::BAD_REQUEST,

            ErrorCode::TenantInactive => StatusCode::FORBIDDEN,

            ErrorCode::TenantNotFound | ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,

            ErrorCode::ConnectionFailed => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::ConnectionTimeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::DecryptionFailed
            | ErrorCode::ConfigurationError
            | ErrorCode::DatabaseError
            | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::UnknownIntegration => "Unknown integration type",
            ErrorCode::TenantInactive => "Tenant is inactive",
            ErrorCode::TenantNotFound => "Tenant not found",
            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::ConnectionFailed => "Tenant database unavailable",
            ErrorCode::ConnectionTimeout => "Tenant database timed out",
            ErrorCode::DecryptionFailed => "Stored credentials could not be decrypted",
            ErrorCode::ConfigurationError => "Server configuration error",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::InternalError => "Internal server error",
        }
    }

    /// Whether a client may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::ConnectionFailed | ErrorCode::ConnectionTimeout)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error for handler responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Result type for handler-facing operations.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// CONVERSIONS FROM WORKSPACE ERRORS
// ============================================================================

impl From<TenantryError> for ApiError {
    fn from(err: TenantryError) -> Self {
        match err {
            TenantryError::Tenant(e) => e.into(),
            TenantryError::Crypto(e) => e.into(),
            TenantryError::Connection(e) => e.into(),
            TenantryError::Cache(e) => e.into(),
            TenantryError::Storage(e) => e.into(),
            TenantryError::Validation(e) => e.into(),
            TenantryError::Config(e) => e.into(),
        }
    }
}

impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        let code = match &err {
            TenantError::NotFound { .. } => ErrorCode::TenantNotFound,
            TenantError::Inactive { .. } => ErrorCode::TenantInactive,
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<CryptoError> for ApiError {
    fn from(err: CryptoError) -> Self {
        if let CryptoError::UnknownIntegration { .. } = err {
            return ApiError::new(ErrorCode::UnknownIntegration, err.to_string());
        }
        // Details stay in the log; clients only learn the class.
        tracing::error!(error = %err, "Credential encryption error");
        let code = match err {
            CryptoError::KeyDerivation { .. } => ErrorCode::ConfigurationError,
            CryptoError::Encryption { .. } => ErrorCode::InternalError,
            _ => ErrorCode::DecryptionFailed,
        };
        ApiError::from_code(code)
    }
}

impl From<ConnectionError> for ApiError {
    fn from(err: ConnectionError) -> Self {
        match &err {
            ConnectionError::Timeout { .. } => {
                ApiError::new(ErrorCode::ConnectionTimeout, err.to_string())
            }
            ConnectionError::InvalidTarget { tenant_id, .. } => {
                tracing::error!(tenant = %tenant_id, error = %err, "Invalid tenant connection target");
                ApiError::from_code(ErrorCode::ConfigurationError)
            }
            ConnectionError::Failed { .. }
            | ConnectionError::AttemptAborted { .. }
            | ConnectionError::ShutDown => {
                ApiError::new(ErrorCode::ConnectionFailed, err.to_string())
            }
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        tracing::error!(error = %err, "Cache error reached a handler");
        ApiError::from_code(ErrorCode::InternalError)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::NotFound { .. } => ApiError::new(ErrorCode::EntityNotFound, err.to_string()),
            StorageError::QueryFailed { .. } | StorageError::Corrupt { .. } => {
                tracing::error!(error = %err, "Storage error");
                ApiError::from_code(ErrorCode::DatabaseError)
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let code = match &err {
            ValidationError::RequiredFieldMissing { .. } => ErrorCode::MissingField,
            ValidationError::InvalidValue { .. } => ErrorCode::ValidationFailed,
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        tracing::error!(error = %err, "Configuration error");
        ApiError::from_code(ErrorCode::ConfigurationError)
    }
}
