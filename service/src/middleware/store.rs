//! Credential records and the store that guards them.
//!
//! One [`Credential`] exists per (user, provider). The store is a thin layer
//! over the injected [`Persistence`] collaborator: it creates rows on demand,
//! stamps `updated_at`, and refuses any write that would leave a `valid`
//! credential without a key.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CredentialError;
use crate::middleware::persistence::Persistence;
use crate::providers::Provider;

/// Validation state of a stored credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    #[default]
    Unvalidated,
    Valid,
    Invalid,
}

/// A user's credential for one provider.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub user_id: String,
    pub provider: Provider,
    /// Cipher envelope; never the raw key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_api_key: Option<String>,
    #[serde(default)]
    pub validation_status: ValidationStatus,
    #[serde(default)]
    pub last_validated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Provider-specific options, opaque to the engine.
    #[serde(default)]
    pub settings: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("has_api_key", &self.has_api_key())
            .field("validation_status", &self.validation_status)
            .field("last_validated_at", &self.last_validated_at)
            .field("is_enabled", &self.is_enabled)
            .field("default_model", &self.default_model)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

impl Credential {
    /// A fresh, unvalidated credential with no key.
    pub fn new(user_id: impl Into<String>, provider: Provider, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            provider,
            encrypted_api_key: None,
            validation_status: ValidationStatus::Unvalidated,
            last_validated_at: None,
            is_enabled: false,
            default_model: None,
            settings: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.encrypted_api_key.is_some()
    }

    /// Whether a generation request may use this credential's key.
    pub fn has_valid_key(&self) -> bool {
        self.validation_status == ValidationStatus::Valid && self.has_api_key()
    }

    fn check_invariants(&self) -> Result<(), CredentialError> {
        if self.validation_status == ValidationStatus::Valid && !self.has_api_key() {
            return Err(CredentialError::InvariantViolation(format!(
                "{} credential for user {} marked valid without a key",
                self.provider, self.user_id
            )));
        }
        if self.validation_status == ValidationStatus::Unvalidated && self.has_api_key() {
            return Err(CredentialError::InvariantViolation(format!(
                "{} credential for user {} stores an unvalidated key",
                self.provider, self.user_id
            )));
        }
        Ok(())
    }
}

/// Partial update applied by [`CredentialStore::upsert`].
///
/// `None` leaves a field untouched; `Some(None)` clears an optional field.
#[derive(Clone, Default)]
pub struct CredentialPatch {
    pub encrypted_api_key: Option<Option<String>>,
    pub validation_status: Option<ValidationStatus>,
    pub last_validated_at: Option<Option<DateTime<Utc>>>,
    pub is_enabled: Option<bool>,
    pub default_model: Option<Option<String>>,
    pub settings: Option<Map<String, Value>>,
}

impl fmt::Debug for CredentialPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPatch")
            .field(
                "encrypted_api_key",
                &self.encrypted_api_key.as_ref().map(|k| k.is_some()),
            )
            .field("validation_status", &self.validation_status)
            .field("is_enabled", &self.is_enabled)
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

impl CredentialPatch {
    /// Store a freshly validated key and enable the provider.
    pub fn validated_key(ciphertext: String, now: DateTime<Utc>) -> Self {
        Self {
            encrypted_api_key: Some(Some(ciphertext)),
            validation_status: Some(ValidationStatus::Valid),
            last_validated_at: Some(Some(now)),
            is_enabled: Some(true),
            ..Default::default()
        }
    }

    /// Record the result of re-checking a stored key.
    pub fn revalidated(status: ValidationStatus, now: DateTime<Utc>) -> Self {
        Self {
            validation_status: Some(status),
            last_validated_at: Some(Some(now)),
            ..Default::default()
        }
    }

    /// Soft delete: drop the key, mark invalid, disable.
    pub fn cleared() -> Self {
        Self {
            encrypted_api_key: Some(None),
            validation_status: Some(ValidationStatus::Invalid),
            is_enabled: Some(false),
            ..Default::default()
        }
    }

    pub fn enabled(is_enabled: bool) -> Self {
        Self {
            is_enabled: Some(is_enabled),
            ..Default::default()
        }
    }

    pub fn default_model(model_id: Option<String>) -> Self {
        Self {
            default_model: Some(model_id),
            ..Default::default()
        }
    }

    pub fn settings(settings: Map<String, Value>) -> Self {
        Self {
            settings: Some(settings),
            ..Default::default()
        }
    }

    fn apply(self, credential: &mut Credential) {
        if let Some(key) = self.encrypted_api_key {
            credential.encrypted_api_key = key;
        }
        if let Some(status) = self.validation_status {
            credential.validation_status = status;
        }
        if let Some(at) = self.last_validated_at {
            credential.last_validated_at = at;
        }
        if let Some(enabled) = self.is_enabled {
            credential.is_enabled = enabled;
        }
        if let Some(model) = self.default_model {
            credential.default_model = model;
        }
        if let Some(settings) = self.settings {
            credential.settings = settings;
        }
    }
}

/// CRUD over one credential row per (user, provider).
pub struct CredentialStore<P> {
    persistence: Arc<P>,
}

impl<P> Clone for CredentialStore<P> {
    fn clone(&self) -> Self {
        Self {
            persistence: Arc::clone(&self.persistence),
        }
    }
}

impl<P: Persistence> CredentialStore<P> {
    pub fn new(persistence: Arc<P>) -> Self {
        Self { persistence }
    }

    pub fn persistence(&self) -> &Arc<P> {
        &self.persistence
    }

    pub async fn get(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<Credential>, CredentialError> {
        let credential = self.persistence.load_credential(user_id, provider).await?;
        if let Some(c) = &credential {
            check_identity(c, user_id, provider)?;
        }
        Ok(credential)
    }

    /// Every stored credential of `user_id`, in catalog order.
    pub async fn get_all(&self, user_id: &str) -> Result<Vec<Credential>, CredentialError> {
        let mut all = Vec::new();
        for provider in Provider::ALL {
            if let Some(credential) = self.get(user_id, provider).await? {
                all.push(credential);
            }
        }
        Ok(all)
    }

    /// Apply `patch` to the (user, provider) row, creating it if absent.
    /// The read, patch and save happen as one atomic update.
    pub async fn upsert(
        &self,
        user_id: &str,
        provider: Provider,
        patch: CredentialPatch,
    ) -> Result<Credential, CredentialError> {
        let now = Utc::now();
        let owner = user_id.to_string();
        self.persistence
            .update_credential(user_id, provider, move |current| {
                let mut credential = match current {
                    Some(c) => {
                        check_identity(&c, &owner, provider)?;
                        c
                    }
                    None => Credential::new(owner, provider, now),
                };
                patch.apply(&mut credential);
                credential.updated_at = now;
                credential.check_invariants()?;
                Ok(Some(credential))
            })
            .await?
            .ok_or_else(|| {
                CredentialError::InvariantViolation(format!(
                    "persistence dropped the {provider} row for user {user_id}"
                ))
            })
    }

    /// Record a revalidation result, but only while the row still holds
    /// `ciphertext`. Returns `None` when the key was replaced or deleted
    /// after it was read.
    pub async fn record_validation(
        &self,
        user_id: &str,
        provider: Provider,
        ciphertext: &str,
        status: ValidationStatus,
    ) -> Result<Option<Credential>, CredentialError> {
        let now = Utc::now();
        let owner = user_id.to_string();
        let ciphertext = ciphertext.to_string();
        self.persistence
            .update_credential(user_id, provider, move |current| {
                let Some(mut credential) = current else {
                    return Ok(None);
                };
                check_identity(&credential, &owner, provider)?;
                if credential.encrypted_api_key.as_deref() != Some(ciphertext.as_str()) {
                    return Ok(None);
                }
                CredentialPatch::revalidated(status, now).apply(&mut credential);
                credential.updated_at = now;
                credential.check_invariants()?;
                Ok(Some(credential))
            })
            .await
    }

    /// Soft-delete the row. Returns `None` when no row existed.
    pub async fn clear(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<Credential>, CredentialError> {
        let now = Utc::now();
        let owner = user_id.to_string();
        self.persistence
            .update_credential(user_id, provider, move |current| {
                let Some(mut credential) = current else {
                    return Ok(None);
                };
                check_identity(&credential, &owner, provider)?;
                CredentialPatch::cleared().apply(&mut credential);
                credential.updated_at = now;
                credential.check_invariants()?;
                Ok(Some(credential))
            })
            .await
    }
}

fn check_identity(credential: &Credential, user_id: &str, provider: Provider) -> Result<(), CredentialError> {
    if credential.user_id != user_id || credential.provider != provider {
        return Err(CredentialError::InvariantViolation(format!(
            "persistence returned a {} row for user {} when asked for {} / {}",
            credential.provider, credential.user_id, user_id, provider
        )));
    }
    Ok(())
}
