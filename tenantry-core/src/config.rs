//! Configuration for the connection and credential resolution layer.
//!
//! Every config type has sensible defaults for development and a `from_env`
//! constructor. The master encryption secret is the one value without a
//! default: its absence is a fatal startup condition.

use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Read and parse an environment variable, falling back to `default` when it
/// is unset or unparseable.
pub fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_or(name, default_secs))
}

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Fixed-delay retry policy for transient connection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Delay between consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

// ============================================================================
// POOL CONFIGURATION
// ============================================================================

/// Shortest sweep interval accepted; zero would spin the sweeper.
pub const MIN_HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(1);

/// Per-tenant connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on the driver client's internal pool size, per tenant.
    pub max_pool_size: u32,
    /// Bound on a single driver-level connect attempt.
    pub connect_timeout: Duration,
    /// Retry policy for transient connect failures.
    pub retry: RetryPolicy,
    /// Entries unused for longer than this are evicted by the sweep.
    pub idle_timeout: Duration,
    /// How often the background sweeper runs. Never below
    /// [`MIN_HEALTH_CHECK_INTERVAL`].
    pub health_check_interval: Duration,
    /// Entries unused for longer than this are pinged by the sweep.
    pub ping_after: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 10,
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            idle_timeout: Duration::from_secs(600),
            health_check_interval: Duration::from_secs(60),
            ping_after: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Create a new pool config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load pool configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TENANTRY_POOL_MAX_SIZE` (default: 10)
    /// - `TENANTRY_POOL_CONNECT_TIMEOUT_SECS` (default: 10)
    /// - `TENANTRY_POOL_MAX_ATTEMPTS` (default: 3)
    /// - `TENANTRY_POOL_RETRY_DELAY_MS` (default: 1000)
    /// - `TENANTRY_POOL_IDLE_TIMEOUT_SECS` (default: 600)
    /// - `TENANTRY_POOL_HEALTH_INTERVAL_SECS` (default: 60, minimum: 1)
    /// - `TENANTRY_POOL_PING_AFTER_SECS` (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_pool_size: env_or("TENANTRY_POOL_MAX_SIZE", defaults.max_pool_size),
            connect_timeout: env_secs("TENANTRY_POOL_CONNECT_TIMEOUT_SECS", 10),
            retry: RetryPolicy::new(
                env_or("TENANTRY_POOL_MAX_ATTEMPTS", defaults.retry.max_attempts),
                Duration::from_millis(env_or("TENANTRY_POOL_RETRY_DELAY_MS", 1000u64)),
            ),
            idle_timeout: env_secs("TENANTRY_POOL_IDLE_TIMEOUT_SECS", 600),
            health_check_interval: env_secs("TENANTRY_POOL_HEALTH_INTERVAL_SECS", 60)
                .max(Duration::from_secs(1)),
            ping_after: env_secs("TENANTRY_POOL_PING_AFTER_SECS", 60),
        }
    }

    pub fn with_max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = size.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval.max(MIN_HEALTH_CHECK_INTERVAL);
        self
    }

    pub fn with_ping_after(mut self, after: Duration) -> Self {
        self.ping_after = after;
        self
    }
}

// ============================================================================
// CRYPTO CONFIGURATION
// ============================================================================

/// scrypt cost parameter (log2 N) compatible with the persisted records.
pub const DEFAULT_KDF_LOG_N: u8 = 14;

/// Encryption service configuration.
#[derive(Debug)]
pub struct CryptoConfig {
    /// Process-wide master secret used as key material.
    pub master_secret: SecretString,
    /// scrypt cost parameter (log2 N).
    pub kdf_log_n: u8,
}

impl CryptoConfig {
    pub fn new(master_secret: impl Into<String>) -> Self {
        Self {
            master_secret: SecretString::from(master_secret.into()),
            kdf_log_n: DEFAULT_KDF_LOG_N,
        }
    }

    /// Load from `TENANTRY_ENCRYPTION_KEY` (required) and
    /// `TENANTRY_KDF_LOG_N` (default: 14).
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = std::env::var("TENANTRY_ENCRYPTION_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "TENANTRY_ENCRYPTION_KEY".to_string(),
            })?;

        let kdf_log_n = match std::env::var("TENANTRY_KDF_LOG_N") {
            Ok(raw) => raw.trim().parse::<u8>().map_err(|e| ConfigError::InvalidValue {
                field: "TENANTRY_KDF_LOG_N".to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => DEFAULT_KDF_LOG_N,
        };

        Ok(Self::new(secret).with_kdf_log_n(kdf_log_n))
    }

    /// Lower the KDF cost. Only test fixtures should go below the default.
    pub fn with_kdf_log_n(mut self, log_n: u8) -> Self {
        self.kdf_log_n = log_n;
        self
    }
}

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Which cache backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    Lmdb,
    Redis,
}

impl FromStr for CacheBackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "lmdb" => Ok(Self::Lmdb),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::InvalidValue {
                field: "TENANTRY_CACHE_BACKEND".to_string(),
                value: other.to_string(),
                reason: "expected memory, lmdb or redis".to_string(),
            }),
        }
    }
}

/// Cache layer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    /// LMDB directory.
    pub path: String,
    /// LMDB map size in megabytes.
    pub max_size_mb: usize,
    /// Redis connection URL.
    pub redis_url: String,
    /// Optional key prefix for shared Redis deployments.
    pub key_prefix: Option<String>,
    /// TTL for integration configuration entries (rarely changes).
    pub config_ttl: Duration,
    /// TTL for computed statistics (changes often).
    pub stats_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            path: "./data/cache".to_string(),
            max_size_mb: 256,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: None,
            config_ttl: Duration::from_secs(3600),
            stats_ttl: Duration::from_secs(300),
        }
    }
}

impl CacheSettings {
    /// Load cache settings from environment variables.
    ///
    /// An unrecognized `TENANTRY_CACHE_BACKEND` is an error rather than a
    /// silent fallback, so a typo cannot quietly disable a shared cache.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let backend = match std::env::var("TENANTRY_CACHE_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.backend,
        };
        Ok(Self {
            backend,
            path: std::env::var("TENANTRY_CACHE_PATH").unwrap_or(defaults.path),
            max_size_mb: env_or("TENANTRY_CACHE_MAX_MB", defaults.max_size_mb),
            redis_url: std::env::var("TENANTRY_REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("TENANTRY_CACHE_KEY_PREFIX")
                .ok()
                .filter(|p| !p.trim().is_empty()),
            config_ttl: env_secs("TENANTRY_CACHE_CONFIG_TTL_SECS", 3600),
            stats_ttl: env_secs("TENANTRY_CACHE_STATS_TTL_SECS", 300),
        })
    }

    pub fn with_backend(mut self, backend: CacheBackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_config_ttl(mut self, ttl: Duration) -> Self {
        self.config_ttl = ttl;
        self
    }

    pub fn with_stats_ttl(mut self, ttl: Duration) -> Self {
        self.stats_ttl = ttl;
        self
    }
}
