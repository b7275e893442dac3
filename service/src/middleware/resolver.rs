//! Per-provider configuration snapshots and the key lifecycle.
//!
//! Reads never call out to a provider: a snapshot reflects the stored
//! validation state. Only `save_api_key` and the revalidation calls reach the
//! validator.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use zeroize::Zeroizing;

use crate::error::CredentialError;
use crate::middleware::catalog::{ModelCatalog, ModelDescriptor};
use crate::middleware::cipher::Cipher;
use crate::middleware::persistence::Persistence;
use crate::middleware::store::{Credential, CredentialPatch, CredentialStore, ValidationStatus};
use crate::providers::{Provider, ValidationOutcome, Validator};

/// Read-only view of one provider for one user. Computed per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub provider: Provider,
    pub is_enabled: bool,
    pub has_api_key: bool,
    pub api_key_valid: bool,
    pub validation_status: ValidationStatus,
    /// The user's preferred model for this provider.
    pub default_model: Option<String>,
    pub available_models: Vec<ModelDescriptor>,
    /// Error kind when the snapshot could not be resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderSnapshot {
    /// Snapshot for a provider the user never configured.
    pub fn unconfigured(provider: Provider) -> Self {
        Self {
            provider,
            is_enabled: false,
            has_api_key: false,
            api_key_valid: false,
            validation_status: ValidationStatus::Unvalidated,
            default_model: None,
            available_models: Vec::new(),
            error: None,
        }
    }

    fn degraded(provider: Provider, error: &CredentialError) -> Self {
        Self {
            error: Some(error.kind().to_string()),
            ..Self::unconfigured(provider)
        }
    }

    /// Enabled by the user and holding a valid key.
    pub fn is_usable(&self) -> bool {
        self.is_enabled && self.api_key_valid
    }
}

/// Combines the credential store, cipher, validator and catalog.
pub struct ProviderConfigResolver<P> {
    store: CredentialStore<P>,
    catalog: Arc<ModelCatalog>,
    cipher: Arc<Cipher>,
    validator: Arc<Validator>,
}

impl<P: Persistence> ProviderConfigResolver<P> {
    pub fn new(
        persistence: Arc<P>,
        catalog: Arc<ModelCatalog>,
        cipher: Arc<Cipher>,
        validator: Arc<Validator>,
    ) -> Self {
        Self {
            store: CredentialStore::new(persistence),
            catalog,
            cipher,
            validator,
        }
    }

    pub fn store(&self) -> &CredentialStore<P> {
        &self.store
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub async fn resolve(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<ProviderSnapshot, CredentialError> {
        let Some(credential) = self.store.get(user_id, provider).await? else {
            return Ok(ProviderSnapshot::unconfigured(provider));
        };

        let mut snapshot = ProviderSnapshot {
            is_enabled: credential.is_enabled,
            validation_status: credential.validation_status,
            default_model: credential.default_model.clone(),
            ..ProviderSnapshot::unconfigured(provider)
        };

        match credential.validation_status {
            // A key that never passed validation is not a usable key.
            ValidationStatus::Unvalidated => {}
            ValidationStatus::Valid => {
                snapshot.has_api_key = credential.has_api_key();
                snapshot.api_key_valid = credential.has_valid_key();
                if snapshot.api_key_valid {
                    snapshot.available_models = self
                        .catalog
                        .all_for(self.store.persistence().as_ref(), user_id, provider)
                        .await?;
                }
            }
            ValidationStatus::Invalid => {
                snapshot.has_api_key = credential.has_api_key();
            }
        }

        Ok(snapshot)
    }

    /// Snapshot of every provider, in catalog order. A provider that fails to
    /// resolve comes back unusable instead of failing the whole call.
    pub async fn resolve_all(&self, user_id: &str) -> Vec<ProviderSnapshot> {
        let results = join_all(
            Provider::ALL.map(|provider| async move { (provider, self.resolve(user_id, provider).await) }),
        )
        .await;

        results
            .into_iter()
            .map(|(provider, result)| {
                result.unwrap_or_else(|e| {
                    tracing::warn!(
                        user_id,
                        provider = %provider,
                        error_kind = e.kind(),
                        "Provider snapshot degraded"
                    );
                    metrics::counter!(
                        "keystone_snapshot_degraded_total",
                        "provider" => provider.as_str()
                    )
                    .increment(1);
                    ProviderSnapshot::degraded(provider, &e)
                })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Key lifecycle
    // -----------------------------------------------------------------------

    /// The raw key for a generation request. Only a `valid` credential with a
    /// stored key qualifies.
    pub async fn get_api_key(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Zeroizing<String>, CredentialError> {
        let credential = self
            .store
            .get(user_id, provider)
            .await?
            .filter(Credential::has_valid_key);

        let Some(credential) = credential else {
            tracing::debug!(
                user_id,
                provider = %provider,
                error_kind = "no_valid_credential",
                "No usable API key"
            );
            return Err(CredentialError::NoValidCredential { provider });
        };

        self.open(&credential)
    }

    /// Validate `raw_key` and, only if the provider accepts it, store it.
    pub async fn save_api_key(
        &self,
        user_id: &str,
        provider: Provider,
        raw_key: &str,
    ) -> Result<ValidationOutcome, CredentialError> {
        let outcome = self.validator.validate(provider, raw_key).await;
        if !outcome.is_valid() {
            tracing::info!(
                user_id,
                provider = %provider,
                outcome = outcome.kind(),
                "API key not saved"
            );
            return Ok(outcome);
        }

        let ciphertext = self.cipher.encrypt(raw_key.trim())?;
        self.store
            .upsert(
                user_id,
                provider,
                CredentialPatch::validated_key(ciphertext, Utc::now()),
            )
            .await?;

        tracing::info!(user_id, provider = %provider, "API key validated and saved");
        Ok(outcome)
    }

    /// Validate a key without touching storage.
    pub async fn validate_api_key(&self, provider: Provider, raw_key: &str) -> ValidationOutcome {
        self.validator.validate(provider, raw_key).await
    }

    /// Re-check the stored key. `Valid` refreshes the timestamp, `Invalid`
    /// is persisted, a transient failure changes nothing. A result for a key
    /// that was replaced or deleted while the check ran is not recorded.
    pub async fn revalidate_api_key(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<ValidationOutcome, CredentialError> {
        let credential = self
            .store
            .get(user_id, provider)
            .await?
            .filter(Credential::has_api_key)
            .ok_or(CredentialError::NoValidCredential { provider })?;
        let ciphertext = credential
            .encrypted_api_key
            .as_deref()
            .ok_or(CredentialError::NoValidCredential { provider })?;

        let raw_key = self.open(&credential)?;
        let outcome = self.validator.validate(provider, &raw_key).await;

        let status = match &outcome {
            ValidationOutcome::Valid => ValidationStatus::Valid,
            ValidationOutcome::Invalid(_) => ValidationStatus::Invalid,
            ValidationOutcome::TransientFailure(_) => return Ok(outcome),
        };

        let recorded = self
            .store
            .record_validation(user_id, provider, ciphertext, status)
            .await?;

        match recorded {
            None => tracing::info!(
                user_id,
                provider = %provider,
                outcome = outcome.kind(),
                "API key changed during revalidation, result not recorded"
            ),
            Some(_) if status != credential.validation_status => tracing::info!(
                user_id,
                provider = %provider,
                from = ?credential.validation_status,
                to = ?status,
                "Credential status changed"
            ),
            Some(_) => {}
        }

        Ok(outcome)
    }

    /// Revalidate every provider holding a stored key. Outbound calls are
    /// bounded by the validator's concurrency cap.
    pub async fn revalidate_all(
        &self,
        user_id: &str,
    ) -> Vec<(Provider, Result<ValidationOutcome, CredentialError>)> {
        let results = join_all(Provider::ALL.map(|provider| async move {
            match self.store.get(user_id, provider).await {
                Ok(Some(c)) if c.has_api_key() => {
                    Some((provider, self.revalidate_api_key(user_id, provider).await))
                }
                Ok(_) => None,
                Err(e) => Some((provider, Err(e))),
            }
        }))
        .await;

        results.into_iter().flatten().collect()
    }

    /// Soft-delete the key. Idempotent.
    pub async fn delete_api_key(&self, user_id: &str, provider: Provider) -> Result<(), CredentialError> {
        if self.store.clear(user_id, provider).await?.is_some() {
            tracing::info!(user_id, provider = %provider, "API key deleted");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Preferences
    // -----------------------------------------------------------------------

    pub async fn set_enabled(
        &self,
        user_id: &str,
        provider: Provider,
        is_enabled: bool,
    ) -> Result<Credential, CredentialError> {
        self.store
            .upsert(user_id, provider, CredentialPatch::enabled(is_enabled))
            .await
    }

    pub async fn set_default_model(
        &self,
        user_id: &str,
        provider: Provider,
        model_id: Option<String>,
    ) -> Result<Credential, CredentialError> {
        self.store
            .upsert(user_id, provider, CredentialPatch::default_model(model_id))
            .await
    }

    pub async fn update_settings(
        &self,
        user_id: &str,
        provider: Provider,
        settings: Map<String, Value>,
    ) -> Result<Credential, CredentialError> {
        self.store
            .upsert(user_id, provider, CredentialPatch::settings(settings))
            .await
    }

    fn open(&self, credential: &Credential) -> Result<Zeroizing<String>, CredentialError> {
        let provider = credential.provider;
        let ciphertext = credential
            .encrypted_api_key
            .as_deref()
            .ok_or(CredentialError::NoValidCredential { provider })?;

        // A ciphertext that fails to open will never open; report it as
        // missing so the caller asks for a new key.
        self.cipher.decrypt(ciphertext).map_err(|e| {
            tracing::warn!(
                user_id = %credential.user_id,
                provider = %provider,
                error_kind = "crypto",
                error = %e,
                "Stored API key could not be decrypted"
            );
            CredentialError::NoValidCredential { provider }
        })
    }
}
