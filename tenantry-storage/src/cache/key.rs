//! Tenant-scoped cache keys.
//!
//! A `CacheKey` cannot be built without a tenant id, and every key of a
//! tenant within a namespace shares a prefix, so a tenant's entries can be
//! invalidated in bulk without touching anyone else's.

use std::fmt;
use std::time::Duration;

use tenantry_core::TenantId;

/// Separator between key components.
pub const SEPARATOR: char = ':';

/// What a cached value is for. Each namespace carries its own default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    /// Encrypted integration configuration records. Rarely changes.
    IntegrationConfig,
    /// Computed call statistics. Changes often.
    Statistics,
}

impl CacheNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::IntegrationConfig => "integration_config",
            CacheNamespace::Statistics => "stats",
        }
    }

    pub fn default_ttl(&self) -> Duration {
        match self {
            CacheNamespace::IntegrationConfig => Duration::from_secs(3600),
            CacheNamespace::Statistics => Duration::from_secs(300),
        }
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of one cached value: `{namespace}:{tenant}:{segments joined by ':'}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    inner: CacheKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKeyInner {
    namespace: CacheNamespace,
    tenant_id: TenantId,
    segments: Vec<String>,
}

impl CacheKey {
    pub fn new<I, S>(namespace: CacheNamespace, tenant_id: &TenantId, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: CacheKeyInner {
                namespace,
                tenant_id: tenant_id.clone(),
                segments: segments.into_iter().map(Into::into).collect(),
            },
        }
    }

    pub fn namespace(&self) -> CacheNamespace {
        self.inner.namespace
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.inner.tenant_id
    }

    pub fn segments(&self) -> &[String] {
        &self.inner.segments
    }

    /// The prefix shared by every key of this key's tenant and namespace.
    pub fn prefix(&self) -> KeyPrefix {
        KeyPrefix::new(self.inner.namespace, &self.inner.tenant_id)
    }

    pub fn encode(&self) -> String {
        let mut out = self.prefix().encode();
        let mut first = true;
        for segment in &self.inner.segments {
            if !first {
                out.push(SEPARATOR);
            }
            out.push_str(segment);
            first = false;
        }
        out
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Prefix covering all of one tenant's keys in one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPrefix {
    namespace: CacheNamespace,
    tenant_id: TenantId,
}

impl KeyPrefix {
    pub fn new(namespace: CacheNamespace, tenant_id: &TenantId) -> Self {
        Self {
            namespace,
            tenant_id: tenant_id.clone(),
        }
    }

    pub fn namespace(&self) -> CacheNamespace {
        self.namespace
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Encoded prefix, including the trailing separator.
    pub fn encode(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}",
            self.namespace.as_str(),
            self.tenant_id
        )
    }

    pub fn matches(&self, encoded_key: &str) -> bool {
        encoded_key.starts_with(&self.encode())
    }
}
