//! Encrypted integration records
//!
//! Converts integration configuration maps between plaintext and their
//! persisted encrypted form, and applies partial updates without touching
//! fields the update does not name.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tenantry_core::{CryptoError, TenantryResult, ValidationError};

use crate::schema::{encryptable_fields, ConfigShape, IntegrationSchema, IntegrationType};
use crate::service::{decode_hex, EncryptionService, PurposeSalt};

/// Field name → value map of an integration configuration.
pub type ConfigMap = Map<String, Value>;

pub const IV_SUFFIX: &str = "IV";
pub const AUTH_TAG_SUFFIX: &str = "AuthTag";

pub fn iv_key(field: &str) -> String {
    format!("{field}{IV_SUFFIX}")
}

pub fn auth_tag_key(field: &str) -> String {
    format!("{field}{AUTH_TAG_SUFFIX}")
}

/// IV and tag shared by every secret field of an envelope, plus the order in
/// which the fields were sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub iv: String,
    pub auth_tag: String,
    pub fields: Vec<String>,
}

/// An integration configuration as stored at rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum EncryptedConfig {
    /// Each secret field carries `{field}IV` and `{field}AuthTag` siblings.
    Inline { config: ConfigMap },
    /// Secret fields hold consecutive segments of one ciphertext sealed
    /// under `metadata`.
    SharedEnvelope {
        config: ConfigMap,
        metadata: EnvelopeMetadata,
    },
}

impl EncryptedConfig {
    pub fn config(&self) -> &ConfigMap {
        match self {
            EncryptedConfig::Inline { config } => config,
            EncryptedConfig::SharedEnvelope { config, .. } => config,
        }
    }

    pub fn shape(&self) -> ConfigShape {
        match self {
            EncryptedConfig::Inline { .. } => ConfigShape::Inline,
            EncryptedConfig::SharedEnvelope { .. } => ConfigShape::SharedEnvelope,
        }
    }

    pub fn envelope(&self) -> Option<&EnvelopeMetadata> {
        match self {
            EncryptedConfig::Inline { .. } => None,
            EncryptedConfig::SharedEnvelope { metadata, .. } => Some(metadata),
        }
    }

    /// Whether `field` is stored encrypted in this record.
    pub fn is_encrypted_field(&self, field: &str) -> bool {
        match self {
            EncryptedConfig::Inline { config } => config.contains_key(&iv_key(field)),
            EncryptedConfig::SharedEnvelope { metadata, .. } => {
                metadata.fields.iter().any(|f| f == field)
            }
        }
    }
}

/// True when `key` is the IV or tag sibling of an inline-encrypted field.
pub fn is_inline_sibling(key: &str, config: &ConfigMap) -> bool {
    [IV_SUFFIX, AUTH_TAG_SUFFIX].iter().any(|suffix| {
        key.strip_suffix(suffix).is_some_and(|base| {
            !base.is_empty() && config.contains_key(base) && config.contains_key(&iv_key(base))
        })
    })
}

/// True when `key` names the IV or tag slot of a schema secret or of any
/// field present in `config`. Such keys would be read back as encryption
/// metadata.
fn is_reserved_key(key: &str, schema: &IntegrationSchema, config: &ConfigMap) -> bool {
    [IV_SUFFIX, AUTH_TAG_SUFFIX].iter().any(|suffix| {
        key.strip_suffix(suffix).is_some_and(|base| {
            !base.is_empty() && (schema.is_secret(base) || config.contains_key(base))
        })
    })
}

fn secret_str<'a>(field: &str, value: &'a Value) -> Result<&'a str, ValidationError> {
    value.as_str().ok_or_else(|| ValidationError::InvalidValue {
        field: field.to_string(),
        reason: "secret fields must be strings".to_string(),
    })
}

/// Associated data binding an envelope's layout: each field name and its
/// segment length, in seal order.
fn envelope_aad<'a>(layout: impl IntoIterator<Item = (&'a str, usize)>) -> Vec<u8> {
    let mut aad = Vec::new();
    for (name, len) in layout {
        aad.extend_from_slice(&(name.len() as u32).to_be_bytes());
        aad.extend_from_slice(name.as_bytes());
        aad.extend_from_slice(&(len as u64).to_be_bytes());
    }
    aad
}

fn malformed(integration_type: IntegrationType, what: impl Into<String>) -> CryptoError {
    CryptoError::MalformedRecord {
        integration_type: integration_type.to_string(),
        what: what.into(),
    }
}

/// Reject configurations that cannot be attached as-is.
pub fn validate_for_attach(
    config: &ConfigMap,
    integration_type: IntegrationType,
) -> Result<(), ValidationError> {
    let schema = integration_type.schema();
    for name in schema.required_fields() {
        let present = match config.get(name) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(ValidationError::RequiredFieldMissing {
                field: name.to_string(),
            });
        }
    }
    for (key, value) in config {
        if is_reserved_key(key, schema, config) {
            return Err(ValidationError::InvalidValue {
                field: key.clone(),
                reason: "encryption metadata cannot be supplied directly".to_string(),
            });
        }
        if schema.is_secret(key) && !value.is_null() {
            secret_str(key, value)?;
        }
    }
    Ok(())
}

impl EncryptionService {
    /// Validate and encrypt a new integration configuration using the
    /// schema's declared secret fields.
    pub fn encrypt_integration(
        &self,
        config: &ConfigMap,
        integration_type: IntegrationType,
    ) -> TenantryResult<EncryptedConfig> {
        validate_for_attach(config, integration_type)?;
        let fields = encryptable_fields(integration_type.schema());
        self.encrypt_config(config, integration_type, &fields)
    }

    /// Encrypt exactly the named fields of `config`. Fields that are absent
    /// or null are skipped; every other entry is copied unchanged.
    pub fn encrypt_config(
        &self,
        config: &ConfigMap,
        integration_type: IntegrationType,
        fields: &[&str],
    ) -> TenantryResult<EncryptedConfig> {
        let present: Vec<(String, String)> = fields
            .iter()
            .filter_map(|name| match config.get(*name) {
                None | Some(Value::Null) => None,
                Some(value) => Some(secret_str(name, value).map(|s| (name.to_string(), s.to_string()))),
            })
            .collect::<Result<_, _>>()?;

        let mut out = config.clone();
        match integration_type.schema().shape {
            ConfigShape::Inline => {
                for (name, plaintext) in &present {
                    self.write_inline(&mut out, name, plaintext)?;
                }
                Ok(EncryptedConfig::Inline { config: out })
            }
            ConfigShape::SharedEnvelope => {
                let metadata = self.seal_envelope(&mut out, &present)?;
                Ok(EncryptedConfig::SharedEnvelope {
                    config: out,
                    metadata,
                })
            }
        }
    }

    /// Decrypt every encrypted field. IV/tag siblings are not returned.
    pub fn decrypt_config(
        &self,
        encrypted: &EncryptedConfig,
        integration_type: IntegrationType,
    ) -> TenantryResult<ConfigMap> {
        let schema = integration_type.schema();
        match encrypted {
            EncryptedConfig::Inline { config } => {
                let mut out = ConfigMap::new();
                for (key, value) in config {
                    if is_inline_sibling(key, config) {
                        continue;
                    }
                    if config.contains_key(&iv_key(key)) {
                        let plaintext = self.read_inline(config, key, integration_type)?;
                        out.insert(key.clone(), Value::String(plaintext));
                    } else if schema.is_secret(key) && value.is_string() {
                        return Err(malformed(integration_type, iv_key(key)).into());
                    } else {
                        out.insert(key.clone(), value.clone());
                    }
                }
                Ok(out)
            }
            EncryptedConfig::SharedEnvelope { config, metadata } => {
                let mut out = config.clone();
                for (name, plaintext) in self.open_envelope(config, metadata, integration_type)? {
                    out.insert(name, Value::String(plaintext));
                }
                Ok(out)
            }
        }
    }

    /// Apply a partial update to an encrypted record.
    ///
    /// Only fields named by `patch` change. A null value removes an optional
    /// field. Inline secrets are re-encrypted individually; touching any
    /// envelope secret re-seals the whole envelope under a fresh IV. Works on
    /// a copy, so any error leaves `existing` as it was.
    pub fn merge_update(
        &self,
        existing: &EncryptedConfig,
        patch: &ConfigMap,
        integration_type: IntegrationType,
    ) -> TenantryResult<EncryptedConfig> {
        let schema = integration_type.schema();
        for (key, value) in patch {
            if is_reserved_key(key, schema, existing.config()) || is_reserved_key(key, schema, patch) {
                return Err(ValidationError::InvalidValue {
                    field: key.clone(),
                    reason: "encryption metadata cannot be supplied directly".to_string(),
                }
                .into());
            }
            if value.is_null() && schema.field(key).is_some_and(|f| f.required) {
                return Err(ValidationError::RequiredFieldMissing { field: key.clone() }.into());
            }
        }

        match existing {
            EncryptedConfig::Inline { config } => {
                let mut out = config.clone();
                for (key, value) in patch {
                    let encrypt = schema.is_secret(key) || config.contains_key(&iv_key(key));
                    if encrypt {
                        out.remove(&iv_key(key));
                        out.remove(&auth_tag_key(key));
                    }
                    if value.is_null() {
                        out.remove(key);
                    } else if encrypt {
                        let plaintext = secret_str(key, value)?;
                        self.write_inline(&mut out, key, plaintext)?;
                    } else {
                        out.insert(key.clone(), value.clone());
                    }
                }
                Ok(EncryptedConfig::Inline { config: out })
            }
            EncryptedConfig::SharedEnvelope { config, metadata } => {
                let in_envelope =
                    |key: &str| schema.is_secret(key) || metadata.fields.iter().any(|f| f == key);

                let mut out = config.clone();
                for (key, value) in patch.iter().filter(|(k, _)| !in_envelope(k.as_str())) {
                    if value.is_null() {
                        out.remove(key);
                    } else {
                        out.insert(key.clone(), value.clone());
                    }
                }

                if !patch.keys().any(|k| in_envelope(k.as_str())) {
                    return Ok(EncryptedConfig::SharedEnvelope {
                        config: out,
                        metadata: metadata.clone(),
                    });
                }

                let mut secrets = self.open_envelope(config, metadata, integration_type)?;
                for (key, value) in patch.iter().filter(|(k, _)| in_envelope(k.as_str())) {
                    secrets.retain(|(name, _)| name != key);
                    if value.is_null() {
                        out.remove(key);
                    } else {
                        secrets.push((key.clone(), secret_str(key, value)?.to_string()));
                    }
                }
                secrets.sort_by_key(|(name, _)| {
                    schema
                        .fields
                        .iter()
                        .position(|f| f.name == name.as_str())
                        .unwrap_or(usize::MAX)
                });

                let metadata = self.seal_envelope(&mut out, &secrets)?;
                Ok(EncryptedConfig::SharedEnvelope {
                    config: out,
                    metadata,
                })
            }
        }
    }

    fn write_inline(&self, out: &mut ConfigMap, field: &str, plaintext: &str) -> Result<(), CryptoError> {
        let sealed = self.encrypt(plaintext, PurposeSalt::Integration)?;
        out.insert(field.to_string(), Value::String(sealed.ciphertext));
        out.insert(iv_key(field), Value::String(sealed.iv));
        out.insert(auth_tag_key(field), Value::String(sealed.auth_tag));
        Ok(())
    }

    fn read_inline(
        &self,
        config: &ConfigMap,
        field: &str,
        integration_type: IntegrationType,
    ) -> Result<String, CryptoError> {
        let get = |key: String| {
            config
                .get(&key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| malformed(integration_type, key))
        };
        let sealed = crate::service::EncryptedField {
            ciphertext: get(field.to_string())?,
            iv: get(iv_key(field))?,
            auth_tag: get(auth_tag_key(field))?,
        };
        self.decrypt(&sealed, PurposeSalt::Integration)
    }

    /// Seal `entries` as one message and store each ciphertext segment in its
    /// field of `out`. Field names and segment lengths are authenticated.
    fn seal_envelope(
        &self,
        out: &mut ConfigMap,
        entries: &[(String, String)],
    ) -> Result<EnvelopeMetadata, CryptoError> {
        let buffer: Vec<u8> = entries
            .iter()
            .flat_map(|(_, plaintext)| plaintext.as_bytes().iter().copied())
            .collect();
        let aad = envelope_aad(entries.iter().map(|(name, plaintext)| (name.as_str(), plaintext.len())));
        let sealed = self.seal(buffer, &aad, PurposeSalt::Integration)?;

        let mut offset = 0;
        for (name, plaintext) in entries {
            let end = offset + plaintext.len();
            out.insert(name.clone(), Value::String(hex::encode(&sealed.ciphertext[offset..end])));
            offset = end;
        }

        Ok(EnvelopeMetadata {
            iv: hex::encode(sealed.iv),
            auth_tag: hex::encode(&sealed.tag),
            fields: entries.iter().map(|(name, _)| name.clone()).collect(),
        })
    }

    fn open_envelope(
        &self,
        config: &ConfigMap,
        metadata: &EnvelopeMetadata,
        integration_type: IntegrationType,
    ) -> Result<Vec<(String, String)>, CryptoError> {
        let mut buffer = Vec::new();
        let mut lengths = Vec::with_capacity(metadata.fields.len());
        for name in &metadata.fields {
            let segment = config
                .get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| malformed(integration_type, format!("envelope field {name}")))?;
            let bytes = decode_hex(name, segment)?;
            lengths.push(bytes.len());
            buffer.extend_from_slice(&bytes);
        }

        let iv = decode_hex("iv", &metadata.iv)?;
        let tag = decode_hex("authTag", &metadata.auth_tag)?;
        let aad = envelope_aad(
            metadata
                .fields
                .iter()
                .map(String::as_str)
                .zip(lengths.iter().copied()),
        );
        let plaintext = self.open(buffer, &iv, &tag, &aad, PurposeSalt::Integration)?;

        let mut offset = 0;
        metadata
            .fields
            .iter()
            .zip(lengths)
            .map(|(name, len)| {
                let segment = plaintext[offset..offset + len].to_vec();
                offset += len;
                String::from_utf8(segment)
                    .map(|s| (name.clone(), s))
                    .map_err(|_| CryptoError::InvalidEncoding {
                        field: name.clone(),
                        reason: "decrypted value is not UTF-8".to_string(),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tenantry_core::{CryptoConfig, TenantryError};

    fn service() -> EncryptionService {
        EncryptionService::new(CryptoConfig::new("test-master").with_kdf_log_n(4)).unwrap()
    }

    fn map(value: Value) -> ConfigMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_twilio_inline_round_trip() {
        let svc = service();
        let config = map(json!({"accountSid": "ACxxx", "authToken": "secret123"}));
        let encrypted = svc
            .encrypt_config(&config, IntegrationType::Twilio, &["authToken"])
            .unwrap();

        let stored = encrypted.config();
        assert_eq!(stored["accountSid"], "ACxxx");
        assert_ne!(stored["authToken"], "secret123");
        assert!(stored.contains_key("authTokenIV"));
        assert!(stored.contains_key("authTokenAuthTag"));

        let decrypted = svc.decrypt_config(&encrypted, IntegrationType::Twilio).unwrap();
        assert_eq!(decrypted, config);
    }

    #[test]
    fn test_attach_requires_fields() {
        let svc = service();
        let err = svc
            .encrypt_integration(&map(json!({"accountSid": "ACxxx"})), IntegrationType::Twilio)
            .unwrap_err();
        assert_eq!(
            err,
            TenantryError::Validation(ValidationError::RequiredFieldMissing {
                field: "authToken".to_string()
            })
        );

        let err = svc
            .encrypt_integration(
                &map(json!({"accountSid": "AC", "authToken": "t", "authTokenIV": "00"})),
                IntegrationType::Twilio,
            )
            .unwrap_err();
        assert!(matches!(err, TenantryError::Validation(_)));
    }

    #[test]
    fn test_attach_rejects_metadata_suffix_on_plain_field() {
        let svc = service();
        for key in ["regionIV", "regionAuthTag"] {
            let mut config = map(json!({"apiKey": "sk-1", "region": "eu"}));
            config.insert(key.to_string(), json!("x"));
            let err = svc
                .encrypt_integration(&config, IntegrationType::OpenAi)
                .unwrap_err();
            assert!(
                matches!(&err, TenantryError::Validation(ValidationError::InvalidValue { field, .. }) if field == key),
                "{key}: {err:?}"
            );
        }

        // Without the base field the suffix is just part of a name.
        let config = map(json!({"apiKey": "sk-1", "regionIV": "x"}));
        let encrypted = svc.encrypt_integration(&config, IntegrationType::OpenAi).unwrap();
        let decrypted = svc.decrypt_config(&encrypted, IntegrationType::OpenAi).unwrap();
        assert_eq!(decrypted["regionIV"], "x");
    }

    #[test]
    fn test_update_rejects_metadata_suffix_on_plain_field() {
        let svc = service();
        let before = svc
            .encrypt_integration(&map(json!({"apiKey": "sk-1", "region": "eu"})), IntegrationType::OpenAi)
            .unwrap();

        let err = svc
            .merge_update(&before, &map(json!({"regionIV": "x"})), IntegrationType::OpenAi)
            .unwrap_err();
        assert!(matches!(err, TenantryError::Validation(_)));

        let err = svc
            .merge_update(&before, &map(json!({"zone": "a", "zoneAuthTag": "x"})), IntegrationType::OpenAi)
            .unwrap_err();
        assert!(matches!(err, TenantryError::Validation(_)));
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let svc = service();
        let config = map(json!({"apiKey": "sk-1", "region": "eu"}));
        let encrypted = svc.encrypt_integration(&config, IntegrationType::OpenAi).unwrap();
        assert_eq!(encrypted.config()["region"], "eu");
    }

    #[test]
    fn test_partial_update_preserves_untouched_fields() {
        let svc = service();
        let config = map(json!({
            "accountSid": "ACxxx",
            "authToken": "secret123",
            "phoneNumber": "+15550100"
        }));
        let before = svc.encrypt_integration(&config, IntegrationType::Twilio).unwrap();

        let patch = map(json!({"phoneNumber": "+15550199"}));
        let after = svc.merge_update(&before, &patch, IntegrationType::Twilio).unwrap();
        for key in ["authToken", "authTokenIV", "authTokenAuthTag", "accountSid"] {
            assert_eq!(before.config()[key], after.config()[key], "{key} changed");
        }
        assert_eq!(after.config()["phoneNumber"], "+15550199");

        let patch = map(json!({"authToken": "rotated"}));
        let rotated = svc.merge_update(&after, &patch, IntegrationType::Twilio).unwrap();
        assert_ne!(after.config()["authTokenIV"], rotated.config()["authTokenIV"]);
        let decrypted = svc.decrypt_config(&rotated, IntegrationType::Twilio).unwrap();
        assert_eq!(decrypted["authToken"], "rotated");
        assert_eq!(decrypted["phoneNumber"], "+15550199");
    }

    #[test]
    fn test_update_rejects_required_null_and_siblings() {
        let svc = service();
        let config = map(json!({"accountSid": "AC", "authToken": "t"}));
        let before = svc.encrypt_integration(&config, IntegrationType::Twilio).unwrap();

        let err = svc
            .merge_update(&before, &map(json!({"authToken": null})), IntegrationType::Twilio)
            .unwrap_err();
        assert!(matches!(err, TenantryError::Validation(_)));

        let err = svc
            .merge_update(&before, &map(json!({"authTokenIV": "00"})), IntegrationType::Twilio)
            .unwrap_err();
        assert!(matches!(err, TenantryError::Validation(_)));
    }

    #[test]
    fn test_shared_envelope_round_trip() {
        let svc = service();
        let config = map(json!({
            "accessToken": "at-1",
            "refreshToken": "rt-1",
            "portalId": "42"
        }));
        let encrypted = svc.encrypt_integration(&config, IntegrationType::HubSpot).unwrap();

        let metadata = encrypted.envelope().unwrap();
        assert_eq!(metadata.fields, vec!["accessToken", "refreshToken"]);
        assert!(!encrypted.config().contains_key("accessTokenIV"));
        assert_ne!(encrypted.config()["accessToken"], "at-1");

        let decrypted = svc.decrypt_config(&encrypted, IntegrationType::HubSpot).unwrap();
        assert_eq!(decrypted, config);
    }

    #[test]
    fn test_shared_envelope_detects_tampering() {
        let svc = service();
        let config = map(json!({"accessToken": "at-1", "refreshToken": "rt-1"}));
        let encrypted = svc.encrypt_integration(&config, IntegrationType::HubSpot).unwrap();

        let EncryptedConfig::SharedEnvelope { mut config, metadata } = encrypted else {
            panic!("expected envelope");
        };
        config.insert("refreshToken".to_string(), Value::String(hex::encode("rt-2")));
        let tampered = EncryptedConfig::SharedEnvelope { config, metadata };

        let err = svc.decrypt_config(&tampered, IntegrationType::HubSpot).unwrap_err();
        assert!(err.is_decryption());
    }

    #[test]
    fn test_shared_envelope_detects_shifted_boundary() {
        let svc = service();
        let config = map(json!({"accessToken": "at-1", "refreshToken": "rt-1"}));
        let encrypted = svc.encrypt_integration(&config, IntegrationType::HubSpot).unwrap();

        let EncryptedConfig::SharedEnvelope { mut config, metadata } = encrypted else {
            panic!("expected envelope");
        };
        let mut access = hex::decode(config["accessToken"].as_str().unwrap()).unwrap();
        let mut refresh = hex::decode(config["refreshToken"].as_str().unwrap()).unwrap();
        let moved = access.pop().unwrap();
        refresh.insert(0, moved);
        config.insert("accessToken".to_string(), Value::String(hex::encode(&access)));
        config.insert("refreshToken".to_string(), Value::String(hex::encode(&refresh)));
        let shifted = EncryptedConfig::SharedEnvelope { config, metadata };

        let err = svc.decrypt_config(&shifted, IntegrationType::HubSpot).unwrap_err();
        assert!(matches!(err, TenantryError::Crypto(CryptoError::Decryption { .. })));
    }

    #[test]
    fn test_shared_envelope_detects_reordered_fields() {
        let svc = service();
        let config = map(json!({"accessToken": "same", "refreshToken": "same"}));
        let encrypted = svc.encrypt_integration(&config, IntegrationType::HubSpot).unwrap();

        let EncryptedConfig::SharedEnvelope { config, mut metadata } = encrypted else {
            panic!("expected envelope");
        };
        metadata.fields.reverse();
        let reordered = EncryptedConfig::SharedEnvelope { config, metadata };

        let err = svc.decrypt_config(&reordered, IntegrationType::HubSpot).unwrap_err();
        assert!(err.is_decryption());
    }

    #[test]
    fn test_shared_envelope_update_reseals() {
        let svc = service();
        let config = map(json!({
            "clientId": "cid",
            "clientSecret": "cs-1",
            "refreshToken": "rt-1"
        }));
        let before = svc
            .encrypt_integration(&config, IntegrationType::GoogleCalendar)
            .unwrap();

        let plain_only = svc
            .merge_update(&before, &map(json!({"calendarId": "primary"})), IntegrationType::GoogleCalendar)
            .unwrap();
        assert_eq!(before.envelope(), plain_only.envelope());

        let rotated = svc
            .merge_update(&before, &map(json!({"refreshToken": "rt-2"})), IntegrationType::GoogleCalendar)
            .unwrap();
        assert_ne!(before.envelope().unwrap().iv, rotated.envelope().unwrap().iv);

        let decrypted = svc
            .decrypt_config(&rotated, IntegrationType::GoogleCalendar)
            .unwrap();
        assert_eq!(decrypted["clientSecret"], "cs-1");
        assert_eq!(decrypted["refreshToken"], "rt-2");
        assert_eq!(decrypted["clientId"], "cid");
    }

    #[test]
    fn test_record_serializes_with_shape_tag() {
        let svc = service();
        let config = map(json!({"apiKey": "xi-1"}));
        let encrypted = svc.encrypt_integration(&config, IntegrationType::ElevenLabs).unwrap();

        let json = serde_json::to_value(&encrypted).unwrap();
        assert_eq!(json["shape"], "inline");
        let back: EncryptedConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, encrypted);
    }
}
