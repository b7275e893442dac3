//! Wiring of the engine's collaborators from an [`EngineConfig`].

use std::sync::Arc;

use crate::config::{ConfigError, EngineConfig};
use crate::error::CredentialError;
use crate::middleware::catalog::ModelCatalog;
use crate::middleware::cipher::Cipher;
use crate::middleware::keyring::{self, KEYRING_SERVICE, KEYRING_USER};
use crate::middleware::persistence::Persistence;
use crate::middleware::resolver::ProviderConfigResolver;
use crate::middleware::selector::ModelSelector;
use crate::providers::Validator;

/// A resolver plus the selector reading from it.
pub struct Engine<P> {
    resolver: Arc<ProviderConfigResolver<P>>,
    selector: ModelSelector<P>,
}

impl<P> Clone for Engine<P> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            selector: self.selector.clone(),
        }
    }
}

impl<P: Persistence> Engine<P> {
    pub fn new(resolver: ProviderConfigResolver<P>) -> Self {
        let resolver = Arc::new(resolver);
        Self {
            selector: ModelSelector::new(Arc::clone(&resolver)),
            resolver,
        }
    }

    /// Build every collaborator from `config`.
    ///
    /// The encryption secret comes from the configuration when set, otherwise
    /// from the OS keychain (created on first use).
    pub async fn from_config(config: &EngineConfig, persistence: Arc<P>) -> Result<Self, CredentialError> {
        let cipher = match &config.encryption_key {
            Some(secret_hex) => Cipher::from_hex(secret_hex)?,
            None => {
                let secret_hex = tokio::task::spawn_blocking(|| {
                    keyring::load_or_create_secret(KEYRING_SERVICE, KEYRING_USER)
                })
                .await
                .map_err(|e| ConfigError::Secret(e.to_string()))?
                .map_err(|e| ConfigError::Secret(format!("{e:#}")))?;
                Cipher::from_hex(&secret_hex)?
            }
        };

        let catalog = match &config.catalog_path {
            Some(path) => ModelCatalog::load(path)
                .await
                .map_err(|e| ConfigError::Catalog(format!("{e:#}")))?,
            None => ModelCatalog::builtin(),
        };

        tracing::debug!(config = ?config, models = catalog.len(), "Engine configured");

        Ok(Self::new(ProviderConfigResolver::new(
            persistence,
            Arc::new(catalog),
            Arc::new(cipher),
            Arc::new(Validator::from_config(config)),
        )))
    }

    pub fn resolver(&self) -> &ProviderConfigResolver<P> {
        &self.resolver
    }

    pub fn selector(&self) -> &ModelSelector<P> {
        &self.selector
    }
}
