//! Masking of secret fields for display.

use serde_json::Value;

use crate::record::{is_inline_sibling, ConfigMap, EncryptedConfig};
use crate::schema::IntegrationType;

/// Replacement shown for every secret value.
pub const MASK: &str = "********";

/// Plaintext secrets at least this long keep a short suffix for recognition.
const REVEAL_MIN_CHARS: usize = 16;
const REVEAL_SUFFIX_CHARS: usize = 4;

/// Mask an encrypted record for display.
///
/// Secret fields become [`MASK`]; IV/tag siblings and envelope metadata are
/// dropped, so no ciphertext or key material leaves this function.
pub fn sanitize_config(encrypted: &EncryptedConfig, integration_type: IntegrationType) -> ConfigMap {
    let schema = integration_type.schema();
    let config = encrypted.config();

    config
        .iter()
        .filter(|(key, _)| !is_inline_sibling(key, config))
        .map(|(key, value)| {
            let secret = schema.is_secret(key) || encrypted.is_encrypted_field(key);
            let shown = if secret && !value.is_null() {
                Value::String(MASK.to_string())
            } else {
                value.clone()
            };
            (key.clone(), shown)
        })
        .collect()
}

/// Mask a decrypted configuration for display. Long secrets keep their last
/// few characters.
pub fn sanitize_plaintext(config: &ConfigMap, integration_type: IntegrationType) -> ConfigMap {
    let schema = integration_type.schema();
    config
        .iter()
        .map(|(key, value)| {
            let shown = if schema.is_secret(key) {
                mask_display(value)
            } else {
                value.clone()
            };
            (key.clone(), shown)
        })
        .collect()
}

fn mask_display(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) if s.chars().count() >= REVEAL_MIN_CHARS => {
            let suffix: String = s
                .chars()
                .skip(s.chars().count() - REVEAL_SUFFIX_CHARS)
                .collect();
            Value::String(format!("{MASK}{suffix}"))
        }
        _ => Value::String(MASK.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::EncryptionService;
    use serde_json::json;
    use tenantry_core::CryptoConfig;

    #[test]
    fn test_sanitized_record_leaks_nothing() {
        let svc = EncryptionService::new(CryptoConfig::new("m").with_kdf_log_n(4)).unwrap();
        let config = json!({"accountSid": "ACxxx", "authToken": "secret123"})
            .as_object()
            .cloned()
            .unwrap();
        let encrypted = svc.encrypt_integration(&config, IntegrationType::Twilio).unwrap();

        let sanitized = sanitize_config(&encrypted, IntegrationType::Twilio);
        assert_eq!(sanitized["authToken"], MASK);
        assert_eq!(sanitized["accountSid"], "ACxxx");
        assert_eq!(sanitized.len(), 2);

        let rendered = serde_json::to_string(&sanitized).unwrap();
        assert!(!rendered.contains("secret123"));
        for sibling in ["authTokenIV", "authTokenAuthTag"] {
            let stored = encrypted.config()[sibling].as_str().unwrap();
            assert!(!rendered.contains(stored));
        }
    }

    #[test]
    fn test_plaintext_masking_truncates_long_values() {
        let config = json!({
            "apiKey": "sk-abcdefghijklmnop1234",
            "organization": "org-1"
        })
        .as_object()
        .cloned()
        .unwrap();
        let sanitized = sanitize_plaintext(&config, IntegrationType::OpenAi);
        assert_eq!(sanitized["apiKey"], format!("{MASK}1234"));
        assert_eq!(sanitized["organization"], "org-1");

        let short = json!({"apiKey": "short"}).as_object().cloned().unwrap();
        assert_eq!(sanitize_plaintext(&short, IntegrationType::OpenAi)["apiKey"], MASK);
    }
}
