//! OS keychain abstraction for the encryption secret.
//!
//! Uses the `keyring` crate to provide a cross-platform interface to:
//! - macOS: Keychain
//! - Linux: Secret Service (GNOME Keyring / KWallet)
//! - Windows: Credential Manager

use anyhow::{Context, Result};
use zeroize::Zeroizing;

use crate::middleware::cipher::{Cipher, SECRET_LEN};

pub const KEYRING_SERVICE: &str = "keystone";
pub const KEYRING_USER: &str = "encryption-key";

/// Load the hex-encoded encryption secret, generating and storing a new one
/// on first use.
pub fn load_or_create_secret(service: &str, user: &str) -> Result<Zeroizing<String>> {
    let entry = keyring::Entry::new(service, user)?;
    match entry.get_password() {
        Ok(secret_hex) => {
            let secret_hex = Zeroizing::new(secret_hex);
            let mut decoded = Zeroizing::new([0u8; SECRET_LEN]);
            hex::decode_to_slice(secret_hex.as_str(), &mut decoded[..])
                .context("keychain holds a malformed encryption secret")?;
            Ok(secret_hex)
        }
        Err(keyring::Error::NoEntry) => {
            let secret = Cipher::generate_secret()?;
            let secret_hex = Zeroizing::new(hex::encode(&secret[..]));
            entry.set_password(&secret_hex)?;
            tracing::info!(service, "generated new encryption secret in OS keychain");
            Ok(secret_hex)
        }
        Err(e) => Err(e).context("failed to read encryption secret from OS keychain"),
    }
}
