//! Credential decryption.
//!
//! Connections store their password as AES-256-GCM ciphertext. The engine
//! only ever sees the plaintext inside a [`Secret`], whose `Debug` output is
//! redacted.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use davsync_core::EncryptedCredential;
use rand::Rng;
use thiserror::Error;

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

/// Result type for secret operations.
pub type SecretResult<T> = Result<T, SecretError>;

/// Errors from key handling and decryption.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("invalid key: {message}")]
    InvalidKey { message: String },

    #[error("decryption failed: {message}")]
    Decryption { message: String },

    #[error("encryption failed: {message}")]
    Encryption { message: String },
}

impl SecretError {
    fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    fn decryption(message: impl Into<String>) -> Self {
        Self::Decryption {
            message: message.into(),
        }
    }
}

/// A decrypted credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Turns a stored credential back into plaintext.
pub trait SecretDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &[u8], iv: &[u8], tag: &[u8]) -> SecretResult<Secret>;

    fn decrypt_credential(&self, credential: &EncryptedCredential) -> SecretResult<Secret> {
        self.decrypt(&credential.ciphertext, &credential.iv, &credential.tag)
    }
}

/// AES-256-GCM with a single master key.
#[derive(Clone)]
pub struct AesGcmDecryptor {
    key: [u8; KEY_LENGTH],
}

impl fmt::Debug for AesGcmDecryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmDecryptor").finish_non_exhaustive()
    }
}

impl AesGcmDecryptor {
    pub fn new(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Builds a decryptor from a base64-encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> SecretResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SecretError::invalid_key(format!("invalid base64 key: {e}")))?;
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
            SecretError::invalid_key(format!("key must be {} bytes, got {}", KEY_LENGTH, b.len()))
        })?;
        Ok(Self::new(key))
    }

    /// Generates a fresh random key, base64-encoded.
    pub fn generate_key() -> String {
        let key: [u8; KEY_LENGTH] = rand::rng().random();
        STANDARD.encode(key)
    }

    fn cipher(&self) -> SecretResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| SecretError::invalid_key(format!("failed to create cipher: {e}")))
    }

    /// Encrypts a secret into the stored form, with a random nonce.
    pub fn encrypt(&self, plaintext: &str) -> SecretResult<EncryptedCredential> {
        let nonce_bytes: [u8; NONCE_LENGTH] = rand::rng().random();
        let mut sealed = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| SecretError::Encryption {
                message: e.to_string(),
            })?;

        // The tag trails the ciphertext.
        let tag = sealed.split_off(sealed.len() - TAG_LENGTH);
        Ok(EncryptedCredential {
            ciphertext: sealed,
            iv: nonce_bytes.to_vec(),
            tag,
        })
    }
}

impl SecretDecryptor for AesGcmDecryptor {
    fn decrypt(&self, ciphertext: &[u8], iv: &[u8], tag: &[u8]) -> SecretResult<Secret> {
        if iv.len() != NONCE_LENGTH {
            return Err(SecretError::decryption(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LENGTH,
                iv.len()
            )));
        }
        if tag.len() != TAG_LENGTH {
            return Err(SecretError::decryption(format!(
                "tag must be {} bytes, got {}",
                TAG_LENGTH,
                tag.len()
            )));
        }

        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LENGTH);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(iv), sealed.as_slice())
            .map_err(|_| SecretError::decryption("authentication tag mismatch"))?;

        String::from_utf8(plaintext)
            .map(Secret)
            .map_err(|e| SecretError::decryption(format!("plaintext is not UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decryptor() -> AesGcmDecryptor {
        AesGcmDecryptor::new([7u8; KEY_LENGTH])
    }

    #[test]
    fn encrypt_then_decrypt() {
        let d = decryptor();
        let stored = d.encrypt("hunter2").unwrap();
        assert_eq!(stored.iv.len(), NONCE_LENGTH);
        assert_eq!(stored.tag.len(), TAG_LENGTH);
        assert_eq!(stored.ciphertext.len(), "hunter2".len());

        let secret = d.decrypt_credential(&stored).unwrap();
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn tampered_tag_is_rejected() {
        let d = decryptor();
        let mut stored = d.encrypt("hunter2").unwrap();
        stored.tag[0] ^= 0xff;
        assert!(matches!(
            d.decrypt_credential(&stored),
            Err(SecretError::Decryption { .. })
        ));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let stored = decryptor().encrypt("hunter2").unwrap();
        let other = AesGcmDecryptor::new([9u8; KEY_LENGTH]);
        assert!(other.decrypt_credential(&stored).is_err());
    }

    #[test]
    fn bad_lengths_are_rejected() {
        let d = decryptor();
        assert!(d.decrypt(b"x", &[0u8; 4], &[0u8; TAG_LENGTH]).is_err());
        assert!(d.decrypt(b"x", &[0u8; NONCE_LENGTH], &[0u8; 3]).is_err());
    }

    #[test]
    fn key_from_base64() {
        let key = AesGcmDecryptor::generate_key();
        assert!(AesGcmDecryptor::from_base64(&key).is_ok());
        assert!(matches!(
            AesGcmDecryptor::from_base64("c2hvcnQ="),
            Err(SecretError::InvalidKey { .. })
        ));
        assert!(AesGcmDecryptor::from_base64("not base64!").is_err());
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret(<redacted>)");
    }
}
