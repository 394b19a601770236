//! Tenantry Crypto - field-level credential encryption
//!
//! Encrypts tenant connection strings and the secret fields of third-party
//! integration configurations. Two record layouts are supported: per-field
//! inline IV/tag siblings, and a shared envelope whose secret fields are
//! sealed together under one IV/tag pair.

mod record;
mod sanitize;
mod schema;
mod service;

pub use record::{
    auth_tag_key, is_inline_sibling, iv_key, validate_for_attach, ConfigMap, EncryptedConfig,
    EnvelopeMetadata, AUTH_TAG_SUFFIX, IV_SUFFIX,
};
pub use sanitize::{sanitize_config, sanitize_plaintext, MASK};
pub use schema::{
    encryptable_fields, requires_encryption, ConfigShape, FieldSpec, IntegrationSchema,
    IntegrationType,
};
pub use service::{EncryptedField, EncryptionService, PurposeSalt, IV_LEN, KEY_LEN, TAG_LEN};
