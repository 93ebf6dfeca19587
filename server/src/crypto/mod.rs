//! Chat Encryption
//!
//! AES-256-GCM encryption for chat bodies at rest in the KV store.
//! The key is generated at process start and never persisted, so stored
//! ciphertext is only readable within the lifetime of the minting process.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;
use tracing::warn;

/// Encryption errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid encrypted data format")]
    InvalidFormat,
}

/// Cipher for chat bodies, keyed once per process.
pub struct ChatCipher {
    cipher: Aes256Gcm,
}

impl ChatCipher {
    /// Create a cipher with a fresh random 256-bit key.
    #[must_use]
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    /// Encrypt a plaintext chat body.
    ///
    /// Returns base64 of: nonce(12 bytes) || ciphertext || tag(16 bytes)
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        // Combine: nonce || ciphertext (which includes the auth tag)
        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(combined))
    }

    /// Decrypt a stored chat body.
    ///
    /// Records written under a prior key generation (or malformed records)
    /// are surfaced as-is rather than dropped: any failure logs a warning
    /// and returns the input unchanged.
    pub fn decrypt(&self, encoded: &str) -> String {
        match self.try_decrypt(encoded) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(error = %e, "Failed to decrypt chat body, returning ciphertext");
                encoded.to_string()
            }
        }
    }

    fn try_decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let combined = STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::InvalidFormat)?;

        // Nonce is the first 12 bytes
        if combined.len() < 12 {
            return Err(CryptoError::InvalidFormat);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {e}")))
    }
}
