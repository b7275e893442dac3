use thiserror::Error;

use crate::config::ConfigError;
use crate::middleware::cipher::CryptoError;
use crate::providers::Provider;

/// Errors raised by the credential engine.
///
/// "No provider is available" is deliberately absent: the selector reports it
/// as `None`, not as an error.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("no valid API key for {provider}")]
    NoValidCredential { provider: Provider },
    #[error("{provider} rejected the API key: {message}")]
    ValidationRejected { provider: Provider, message: String },
    #[error("could not validate the {provider} API key: {message}")]
    ValidationTransientFailure { provider: Provider, message: String },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("credential invariant violated: {0}")]
    InvariantViolation(String),
    #[error("credential store error: {0}")]
    Store(#[from] anyhow::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CredentialError {
    /// Stable label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownProvider(_) => "unknown_provider",
            Self::NoValidCredential { .. } => "no_valid_credential",
            Self::ValidationRejected { .. } => "validation_rejected",
            Self::ValidationTransientFailure { .. } => "validation_transient_failure",
            Self::Crypto(_) => "crypto",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::Store(_) => "store",
            Self::Config(_) => "config",
        }
    }
}
