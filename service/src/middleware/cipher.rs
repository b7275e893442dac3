//! Symmetric encryption of raw API keys.
//!
//! Keys are sealed with AES-256-GCM under the process-wide secret. Each call
//! draws a fresh 96-bit nonce, and the stored envelope is
//! `v1:` + hex(nonce ‖ ciphertext ‖ tag), so decryption needs nothing but
//! the secret.

use std::fmt;

use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce, aead::Aead};
use thiserror::Error;
use zeroize::Zeroizing;

/// Length of the symmetric secret in bytes.
pub const SECRET_LEN: usize = 32;

const ENVELOPE_PREFIX: &str = "v1:";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("ciphertext envelope is malformed")]
    Malformed,
    #[error("unsupported ciphertext version")]
    UnsupportedVersion,
    #[error("ciphertext failed authentication")]
    Authentication,
    #[error("encryption failed")]
    Encryption,
    #[error("failed to generate random bytes: {0}")]
    Randomness(String),
    #[error("invalid encryption secret: {0}")]
    InvalidSecret(String),
}

/// AES-256-GCM sealer for API keys.
#[derive(Clone)]
pub struct Cipher {
    inner: Aes256Gcm,
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cipher { .. }")
    }
}

impl Cipher {
    /// Create a cipher from raw secret bytes.
    pub fn new(secret: &[u8; SECRET_LEN]) -> Self {
        Self {
            inner: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(secret)),
        }
    }

    /// Create a cipher from a 64-character hex secret.
    pub fn from_hex(secret_hex: &str) -> Result<Self, CryptoError> {
        let mut secret = Zeroizing::new([0u8; SECRET_LEN]);
        hex::decode_to_slice(secret_hex.trim(), &mut secret[..])
            .map_err(|e| CryptoError::InvalidSecret(e.to_string()))?;
        Ok(Self::new(&secret))
    }

    /// Generate a cryptographically secure random secret.
    pub fn generate_secret() -> Result<Zeroizing<[u8; SECRET_LEN]>, CryptoError> {
        let mut secret = Zeroizing::new([0u8; SECRET_LEN]);
        getrandom::fill(&mut secret[..]).map_err(|e| CryptoError::Randomness(e.to_string()))?;
        Ok(secret)
    }

    /// Seal `raw_key` into a storable envelope.
    pub fn encrypt(&self, raw_key: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        getrandom::fill(&mut nonce_bytes).map_err(|e| CryptoError::Randomness(e.to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .inner
            .encrypt(nonce, raw_key.as_bytes())
            .map_err(|_| CryptoError::Encryption)?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + sealed.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&sealed);

        Ok(format!("{ENVELOPE_PREFIX}{}", hex::encode(envelope)))
    }

    /// Open an envelope produced by [`Cipher::encrypt`].
    ///
    /// Fails with [`CryptoError::Authentication`] when the tag does not
    /// verify, whether from tampering or from a different secret.
    pub fn decrypt(&self, ciphertext: &str) -> Result<Zeroizing<String>, CryptoError> {
        let body = match ciphertext.strip_prefix(ENVELOPE_PREFIX) {
            Some(body) => body,
            None if ciphertext.contains(':') => return Err(CryptoError::UnsupportedVersion),
            None => return Err(CryptoError::Malformed),
        };

        let bytes = hex::decode(body).map_err(|_| CryptoError::Malformed)?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Malformed);
        }

        let (nonce_bytes, sealed) = bytes.split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            self.inner
                .decrypt(Nonce::from_slice(nonce_bytes), sealed)
                .map_err(|_| CryptoError::Authentication)?,
        );

        let raw = std::str::from_utf8(&plaintext).map_err(|_| CryptoError::Malformed)?;
        Ok(Zeroizing::new(raw.to_string()))
    }
}
