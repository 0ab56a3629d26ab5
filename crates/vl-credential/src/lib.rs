// vl-credential: authenticated encryption of gateway passwords at rest.
//
// AES-256-GCM with a fresh random 96-bit IV per encryption. The stored blob
// is three base64 strings in one JSON object:
//
//   { "encrypted": "...", "iv": "...", "authTag": "..." }
//
// Invariants:
// - IV reuse under a fixed key is forbidden; every encrypt draws a new IV.
// - Decryption verifies the auth tag; tampering with any of the three fields
//   is a hard error, never an empty or truncated plaintext.
// - Plaintext and key material never appear in logs or Debug output.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Stored blob
// ---------------------------------------------------------------------------

/// The at-rest form of an encrypted credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCredential {
    pub encrypted: String,
    pub iv: String,
    #[serde(rename = "authTag")]
    pub auth_tag: String,
}

impl EncryptedCredential {
    /// Parse the JSON blob as stored in a gateway record.
    pub fn from_json(blob: &str) -> Result<Self, CredentialError> {
        serde_json::from_str(blob).map_err(|e| CredentialError::BadBlob(e.to_string()))
    }

    /// Serialize for storage in a gateway record.
    pub fn to_json(&self) -> Result<String, CredentialError> {
        serde_json::to_string(self).map_err(|e| CredentialError::BadBlob(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// AES-256-GCM codec bound to one process-wide key.
///
/// Intentionally not `Debug`: the key must not be printable.
pub struct CredentialCodec {
    cipher: Aes256Gcm,
}

impl CredentialCodec {
    /// Build a codec from the base64-encoded 32-byte key in configuration.
    ///
    /// A missing or wrong-length key is a boot-time failure; callers must not
    /// fall back to a weaker or empty key.
    pub fn from_base64_key(key_b64: &str) -> Result<Self, CredentialError> {
        let key_bytes = BASE64
            .decode(key_b64.trim())
            .map_err(|e| CredentialError::InvalidKey(format!("not base64: {}", e)))?;
        if key_bytes.len() != KEY_LEN {
            return Err(CredentialError::InvalidKey(format!(
                "decoded key must be {} bytes, got {}",
                KEY_LEN,
                key_bytes.len()
            )));
        }
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes)),
        })
    }

    /// Encrypt a plaintext password into the storage blob.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedCredential, CredentialError> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        // aes-gcm appends the 16-byte tag to the ciphertext; the storage
        // schema keeps the two separate.
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| CredentialError::EncryptFailed)?;
        let split = sealed.len() - TAG_LEN;

        Ok(EncryptedCredential {
            encrypted: BASE64.encode(&sealed[..split]),
            iv: BASE64.encode(iv),
            auth_tag: BASE64.encode(&sealed[split..]),
        })
    }

    /// Decrypt a storage blob back to the plaintext password.
    ///
    /// Any tamper — ciphertext, IV, or tag — fails tag verification and
    /// surfaces as [`CredentialError::DecryptFailed`].
    pub fn decrypt(&self, credential: &EncryptedCredential) -> Result<String, CredentialError> {
        let ciphertext = decode_field("encrypted", &credential.encrypted)?;
        let iv = decode_field("iv", &credential.iv)?;
        let tag = decode_field("authTag", &credential.auth_tag)?;

        if iv.len() != IV_LEN {
            return Err(CredentialError::BadBlob(format!(
                "iv must be {} bytes, got {}",
                IV_LEN,
                iv.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(CredentialError::BadBlob(format!(
                "authTag must be {} bytes, got {}",
                TAG_LEN,
                tag.len()
            )));
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map_err(|_| CredentialError::DecryptFailed)?;
        String::from_utf8(plaintext).map_err(|_| CredentialError::DecryptFailed)
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CredentialError> {
    BASE64
        .decode(value)
        .map_err(|e| CredentialError::BadBlob(format!("{} is not base64: {}", name, e)))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed: credential is corrupt or was encrypted with a different key")]
    DecryptFailed,
    #[error("malformed credential blob: {0}")]
    BadBlob(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_codec() -> CredentialCodec {
        CredentialCodec::from_base64_key(&BASE64.encode([7u8; KEY_LEN])).expect("key")
    }

    #[test]
    fn round_trip_recovers_plaintext() {
        let codec = test_codec();
        let blob = codec.encrypt("hunter2").expect("encrypt");
        assert_eq!(codec.decrypt(&blob).expect("decrypt"), "hunter2");
    }

    #[test]
    fn round_trip_survives_json_storage() {
        let codec = test_codec();
        let blob = codec.encrypt("gateway-pass").expect("encrypt");
        let stored = blob.to_json().expect("to_json");
        let loaded = EncryptedCredential::from_json(&stored).expect("from_json");
        assert_eq!(codec.decrypt(&loaded).expect("decrypt"), "gateway-pass");
        // Frozen storage field names.
        assert!(stored.contains("\"authTag\""));
        assert!(stored.contains("\"encrypted\""));
        assert!(stored.contains("\"iv\""));
    }

    #[test]
    fn same_plaintext_yields_fresh_iv_and_ciphertext() {
        let codec = test_codec();
        let a = codec.encrypt("same").expect("encrypt");
        let b = codec.encrypt("same").expect("encrypt");
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.encrypted, b.encrypted);
    }

    #[test]
    fn tampering_any_field_fails_decryption() {
        let codec = test_codec();
        let blob = codec.encrypt("secret").expect("encrypt");

        let mut bad_ct = blob.clone();
        bad_ct.encrypted = flip_first_byte(&bad_ct.encrypted);
        assert!(matches!(
            codec.decrypt(&bad_ct),
            Err(CredentialError::DecryptFailed)
        ));

        let mut bad_iv = blob.clone();
        bad_iv.iv = flip_first_byte(&bad_iv.iv);
        assert!(matches!(
            codec.decrypt(&bad_iv),
            Err(CredentialError::DecryptFailed)
        ));

        let mut bad_tag = blob.clone();
        bad_tag.auth_tag = flip_first_byte(&bad_tag.auth_tag);
        assert!(matches!(
            codec.decrypt(&bad_tag),
            Err(CredentialError::DecryptFailed)
        ));
    }

    /// Flip one bit of the first decoded byte and re-encode.
    fn flip_first_byte(b64: &str) -> String {
        let mut bytes = BASE64.decode(b64).expect("decode");
        bytes[0] ^= 0x01;
        BASE64.encode(bytes)
    }

    #[test]
    fn decrypt_with_different_key_fails() {
        let codec = test_codec();
        let blob = codec.encrypt("secret").expect("encrypt");
        let other =
            CredentialCodec::from_base64_key(&BASE64.encode([8u8; KEY_LEN])).expect("key");
        assert!(matches!(
            other.decrypt(&blob),
            Err(CredentialError::DecryptFailed)
        ));
    }

    #[test]
    fn wrong_key_length_is_rejected_at_construction() {
        let short = BASE64.encode([1u8; 16]);
        assert!(matches!(
            CredentialCodec::from_base64_key(&short),
            Err(CredentialError::InvalidKey(_))
        ));
        assert!(matches!(
            CredentialCodec::from_base64_key("not base64!!"),
            Err(CredentialError::InvalidKey(_))
        ));
    }

    #[test]
    fn malformed_blob_is_a_bad_blob_not_a_panic() {
        let codec = test_codec();
        let blob = EncryptedCredential {
            encrypted: "###".to_owned(),
            iv: BASE64.encode([0u8; IV_LEN]),
            auth_tag: BASE64.encode([0u8; TAG_LEN]),
        };
        assert!(matches!(
            codec.decrypt(&blob),
            Err(CredentialError::BadBlob(_))
        ));

        let short_iv = EncryptedCredential {
            encrypted: BASE64.encode([0u8; 4]),
            iv: BASE64.encode([0u8; 4]),
            auth_tag: BASE64.encode([0u8; TAG_LEN]),
        };
        assert!(matches!(
            codec.decrypt(&short_iv),
            Err(CredentialError::BadBlob(_))
        ));
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let codec = test_codec();
        let blob = codec.encrypt("").expect("encrypt");
        assert_eq!(codec.decrypt(&blob).expect("decrypt"), "");
    }
}
