//! Encryption service
//!
//! AES-256-GCM over string fields with a key derived from the process master
//! secret and a fixed per-purpose salt. Ciphertext, IV and tag are persisted
//! as separate hex strings.

use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::AeadInPlace;
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, KeyInit};
use once_cell::sync::OnceCell;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretBox, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

use tenantry_core::{CryptoConfig, CryptoError};

/// AES-256-GCM with the 16-byte IV used by persisted records.
type Aes256Gcm16 = AesGcm<Aes256, U16>;
/// AES-256-GCM with the standard 96-bit nonce.
type Aes256Gcm12 = AesGcm<Aes256, U12>;

/// Length of freshly generated IVs.
pub const IV_LEN: usize = 16;
/// Older records may carry a 96-bit IV.
pub const SHORT_IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Fixed salt per kind of secret. A key derived for one purpose never
/// decrypts data sealed for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PurposeSalt {
    /// Tenant database connection strings in the central registry.
    ConnectionString,
    /// Third-party integration credentials.
    Integration,
}

impl PurposeSalt {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            PurposeSalt::ConnectionString => b"tenantry.connection-string.v1",
            PurposeSalt::Integration => b"tenantry.integration-credentials.v1",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PurposeSalt::ConnectionString => "connection string",
            PurposeSalt::Integration => "integration credential",
        }
    }
}

/// One sealed value as persisted: hex ciphertext, IV and authentication tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedField {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
}

/// Raw output of one AEAD operation.
pub(crate) struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub tag: Vec<u8>,
}

/// Symmetric field-level encryption keyed by master secret and purpose salt.
///
/// Key derivation is deliberately slow; each purpose's key is derived once
/// and then memoized for the life of the service.
pub struct EncryptionService {
    master_secret: SecretString,
    params: scrypt::Params,
    connection_key: OnceCell<SecretBox<[u8; KEY_LEN]>>,
    integration_key: OnceCell<SecretBox<[u8; KEY_LEN]>>,
}

impl fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionService")
            .field("kdf_log_n", &self.params.log_n())
            .field("connection_key_ready", &self.connection_key.get().is_some())
            .field("integration_key_ready", &self.integration_key.get().is_some())
            .finish_non_exhaustive()
    }
}

impl EncryptionService {
    pub fn new(config: CryptoConfig) -> Result<Self, CryptoError> {
        let params = scrypt::Params::new(config.kdf_log_n, SCRYPT_R, SCRYPT_P, KEY_LEN)
            .map_err(|e| CryptoError::KeyDerivation {
                reason: format!("invalid scrypt parameters: {e}"),
            })?;
        Ok(Self {
            master_secret: config.master_secret,
            params,
            connection_key: OnceCell::new(),
            integration_key: OnceCell::new(),
        })
    }

    fn key(&self, salt: PurposeSalt) -> Result<&SecretBox<[u8; KEY_LEN]>, CryptoError> {
        let cell = match salt {
            PurposeSalt::ConnectionString => &self.connection_key,
            PurposeSalt::Integration => &self.integration_key,
        };
        cell.get_or_try_init(|| {
            let mut key = Box::new([0u8; KEY_LEN]);
            scrypt::scrypt(
                self.master_secret.expose_secret().as_bytes(),
                salt.as_bytes(),
                &self.params,
                key.as_mut_slice(),
            )
            .map_err(|e| CryptoError::KeyDerivation {
                reason: e.to_string(),
            })?;
            tracing::debug!(purpose = salt.label(), "Derived encryption key");
            Ok(SecretBox::new(key))
        })
    }

    /// Encrypt `plaintext` under a fresh random IV.
    pub fn encrypt(&self, plaintext: &str, salt: PurposeSalt) -> Result<EncryptedField, CryptoError> {
        let sealed = self.seal(plaintext.as_bytes().to_vec(), b"", salt)?;
        Ok(EncryptedField {
            ciphertext: hex::encode(&sealed.ciphertext),
            iv: hex::encode(sealed.iv),
            auth_tag: hex::encode(&sealed.tag),
        })
    }

    /// Verify and decrypt one sealed value.
    pub fn decrypt(&self, field: &EncryptedField, salt: PurposeSalt) -> Result<String, CryptoError> {
        let ciphertext = decode_hex("ciphertext", &field.ciphertext)?;
        let iv = decode_hex("iv", &field.iv)?;
        let tag = decode_hex("authTag", &field.auth_tag)?;
        let plaintext = self.open(ciphertext, &iv, &tag, b"", salt)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidEncoding {
            field: "plaintext".to_string(),
            reason: "decrypted value is not UTF-8".to_string(),
        })
    }

    /// Encrypt `buffer` in place; `aad` is authenticated but not encrypted.
    pub(crate) fn seal(
        &self,
        mut buffer: Vec<u8>,
        aad: &[u8],
        salt: PurposeSalt,
    ) -> Result<Sealed, CryptoError> {
        let key = self.key(salt)?;
        let cipher = Aes256Gcm16::new_from_slice(key.expose_secret()).map_err(|e| {
            CryptoError::Encryption {
                reason: e.to_string(),
            }
        })?;

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let tag = cipher
            .encrypt_in_place_detached(aes_gcm::Nonce::<U16>::from_slice(&iv), aad, &mut buffer)
            .map_err(|e| CryptoError::Encryption {
                reason: e.to_string(),
            })?;

        Ok(Sealed {
            ciphertext: buffer,
            iv,
            tag: tag.to_vec(),
        })
    }

    pub(crate) fn open(
        &self,
        mut buffer: Vec<u8>,
        iv: &[u8],
        tag: &[u8],
        aad: &[u8],
        salt: PurposeSalt,
    ) -> Result<Vec<u8>, CryptoError> {
        if tag.len() != TAG_LEN {
            return Err(CryptoError::InvalidEncoding {
                field: "authTag".to_string(),
                reason: format!("expected {TAG_LEN} bytes, got {}", tag.len()),
            });
        }
        let tag = aes_gcm::Tag::<U16>::from_slice(tag);
        let key = self.key(salt)?;
        let key_error = |e: aes_gcm::aes::cipher::InvalidLength| CryptoError::KeyDerivation {
            reason: e.to_string(),
        };

        let verified = match iv.len() {
            IV_LEN => Aes256Gcm16::new_from_slice(key.expose_secret())
                .map_err(key_error)?
                .decrypt_in_place_detached(aes_gcm::Nonce::<U16>::from_slice(iv), aad, &mut buffer, tag),
            SHORT_IV_LEN => Aes256Gcm12::new_from_slice(key.expose_secret())
                .map_err(key_error)?
                .decrypt_in_place_detached(aes_gcm::Nonce::<U12>::from_slice(iv), aad, &mut buffer, tag),
            other => {
                return Err(CryptoError::InvalidEncoding {
                    field: "iv".to_string(),
                    reason: format!("expected {IV_LEN} or {SHORT_IV_LEN} bytes, got {other}"),
                })
            }
        };

        verified.map_err(|_| {
            tracing::warn!(purpose = salt.label(), "Authentication tag mismatch");
            CryptoError::Decryption {
                context: salt.label().to_string(),
            }
        })?;
        Ok(buffer)
    }
}

pub(crate) fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(value).map_err(|e| CryptoError::InvalidEncoding {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(secret: &str) -> EncryptionService {
        EncryptionService::new(CryptoConfig::new(secret).with_kdf_log_n(4)).unwrap()
    }

    #[test]
    fn test_round_trip_and_fresh_iv() {
        let svc = service("master");
        let a = svc.encrypt("secret123", PurposeSalt::Integration).unwrap();
        let b = svc.encrypt("secret123", PurposeSalt::Integration).unwrap();

        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(a.iv.len(), IV_LEN * 2);
        assert_eq!(a.auth_tag.len(), TAG_LEN * 2);
        assert_eq!(svc.decrypt(&a, PurposeSalt::Integration).unwrap(), "secret123");
        assert_eq!(svc.decrypt(&b, PurposeSalt::Integration).unwrap(), "secret123");
    }

    #[test]
    fn test_tampered_tag_fails() {
        let svc = service("master");
        let mut field = svc.encrypt("postgres://db", PurposeSalt::ConnectionString).unwrap();
        let flipped = if field.auth_tag.starts_with('0') { "1" } else { "0" };
        field.auth_tag.replace_range(0..1, flipped);

        let err = svc.decrypt(&field, PurposeSalt::ConnectionString).unwrap_err();
        assert!(matches!(err, CryptoError::Decryption { .. }));
    }

    #[test]
    fn test_wrong_key_or_purpose_fails() {
        let svc = service("master");
        let field = svc.encrypt("value", PurposeSalt::Integration).unwrap();

        assert!(matches!(
            svc.decrypt(&field, PurposeSalt::ConnectionString),
            Err(CryptoError::Decryption { .. })
        ));
        assert!(matches!(
            service("other-master").decrypt(&field, PurposeSalt::Integration),
            Err(CryptoError::Decryption { .. })
        ));
    }

    #[test]
    fn test_bad_hex_is_encoding_error() {
        let svc = service("master");
        let mut field = svc.encrypt("value", PurposeSalt::Integration).unwrap();
        field.iv = "zz".to_string();
        assert!(matches!(
            svc.decrypt(&field, PurposeSalt::Integration),
            Err(CryptoError::InvalidEncoding { .. })
        ));
    }

    #[test]
    fn test_short_iv_records_still_decrypt() {
        let svc = service("master");
        let key = svc.key(PurposeSalt::ConnectionString).unwrap();
        let cipher = Aes256Gcm12::new_from_slice(key.expose_secret()).unwrap();
        let iv = [7u8; SHORT_IV_LEN];
        let mut buffer = b"mongodb://legacy".to_vec();
        let tag = cipher
            .encrypt_in_place_detached(aes_gcm::Nonce::<U12>::from_slice(&iv), b"", &mut buffer)
            .unwrap();

        let field = EncryptedField {
            ciphertext: hex::encode(&buffer),
            iv: hex::encode(iv),
            auth_tag: hex::encode(tag),
        };
        assert_eq!(
            svc.decrypt(&field, PurposeSalt::ConnectionString).unwrap(),
            "mongodb://legacy"
        );
    }

    #[test]
    fn test_debug_hides_secret() {
        let svc = service("do-not-print");
        assert!(!format!("{:?}", svc).contains("do-not-print"));
    }
}
