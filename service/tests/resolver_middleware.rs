//! Tests for the provider configuration resolver (key lifecycle and
//! snapshots).

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use common::{Mode, scripted_validator};
use keystone_service::middleware::persistence::{MemoryPersistence, Persistence};
use keystone_service::middleware::store::{Credential, ValidationStatus};
use keystone_service::middleware::{Cipher, ModelCatalog, ModelDescriptor, ProviderConfigResolver};
use keystone_service::providers::{Provider, ValidationOutcome};
use keystone_service::CredentialError;

const USER: &str = "user-1";

struct Harness {
    persistence: Arc<MemoryPersistence>,
    resolver: ProviderConfigResolver<MemoryPersistence>,
    mode: Arc<Mutex<Mode>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_persistence(Arc::new(MemoryPersistence::new()), [7u8; 32])
    }

    fn with_persistence(persistence: Arc<MemoryPersistence>, secret: [u8; 32]) -> Self {
        let mode = Arc::new(Mutex::new(Mode::Accept));
        let validator = scripted_validator(&mode);
        let resolver = ProviderConfigResolver::new(
            Arc::clone(&persistence),
            Arc::new(ModelCatalog::builtin()),
            Arc::new(Cipher::new(&secret)),
            Arc::new(validator),
        );
        Self {
            persistence,
            resolver,
            mode,
        }
    }

    fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    async fn stored(&self, provider: Provider) -> Option<Credential> {
        self.persistence.load_credential(USER, provider).await.unwrap()
    }
}

// ============================================================================
// Snapshots
// ============================================================================

#[tokio::test]
async fn unconfigured_provider_snapshot() {
    let h = Harness::new();
    let snapshot = h.resolver.resolve(USER, Provider::OpenAi).await.unwrap();
    assert!(!snapshot.is_enabled);
    assert!(!snapshot.has_api_key);
    assert!(!snapshot.api_key_valid);
    assert_eq!(snapshot.validation_status, ValidationStatus::Unvalidated);
    assert!(snapshot.available_models.is_empty());
}

#[tokio::test]
async fn resolve_all_covers_every_provider_in_order() {
    let h = Harness::new();
    let snapshots = h.resolver.resolve_all(USER).await;
    let providers: Vec<Provider> = snapshots.iter().map(|s| s.provider).collect();
    assert_eq!(providers, Provider::ALL.to_vec());
}

#[tokio::test]
async fn valid_key_exposes_static_then_custom_models() {
    let h = Harness::new();
    h.persistence
        .add_custom_model(USER, ModelDescriptor::new(Provider::Groq, "my-finetune", "Mine"))
        .await;

    let outcome = h.resolver.save_api_key(USER, Provider::Groq, "gsk-good").await.unwrap();
    assert!(outcome.is_valid());

    let snapshot = h.resolver.resolve(USER, Provider::Groq).await.unwrap();
    assert!(snapshot.is_enabled);
    assert!(snapshot.has_api_key);
    assert!(snapshot.api_key_valid);

    let statics = h.resolver.catalog().static_models(Provider::Groq);
    let (head, tail) = snapshot.available_models.split_at(statics.len());
    assert_eq!(head, statics.as_slice());
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].id, "my-finetune");
    assert!(tail[0].is_custom);
}

#[tokio::test]
async fn invalid_credential_keeps_key_but_lists_nothing() {
    let h = Harness::new();
    h.resolver.save_api_key(USER, Provider::OpenAi, "sk-good").await.unwrap();
    h.set_mode(Mode::Reject);
    h.resolver.revalidate_api_key(USER, Provider::OpenAi).await.unwrap();

    let snapshot = h.resolver.resolve(USER, Provider::OpenAi).await.unwrap();
    assert!(snapshot.has_api_key);
    assert!(!snapshot.api_key_valid);
    assert_eq!(snapshot.validation_status, ValidationStatus::Invalid);
    assert!(snapshot.available_models.is_empty());
}

#[tokio::test]
async fn disabled_provider_is_not_usable() {
    let h = Harness::new();
    h.resolver.save_api_key(USER, Provider::Anthropic, "sk-ant").await.unwrap();
    h.resolver.set_enabled(USER, Provider::Anthropic, false).await.unwrap();

    let snapshot = h.resolver.resolve(USER, Provider::Anthropic).await.unwrap();
    assert!(snapshot.api_key_valid);
    assert!(!snapshot.is_usable());
}

// ============================================================================
// Saving keys
// ============================================================================

#[tokio::test]
async fn rejected_key_is_not_stored() {
    let h = Harness::new();
    h.set_mode(Mode::Reject);

    let outcome = h.resolver.save_api_key(USER, Provider::OpenAi, "sk-bad").await.unwrap();
    assert!(matches!(outcome, ValidationOutcome::Invalid(_)));
    assert!(h.stored(Provider::OpenAi).await.is_none());
}

#[tokio::test]
async fn transient_failure_leaves_store_untouched() {
    let h = Harness::new();
    h.set_mode(Mode::Unreachable);

    let outcome = h.resolver.save_api_key(USER, Provider::OpenAi, "sk-x").await.unwrap();
    assert!(outcome.is_transient());
    assert_eq!(h.persistence.credential_count().await, 0);
}

#[tokio::test]
async fn transient_failure_does_not_replace_existing_key() {
    let h = Harness::new();
    h.resolver.save_api_key(USER, Provider::OpenAi, "sk-old").await.unwrap();
    let before = h.stored(Provider::OpenAi).await.unwrap();

    h.set_mode(Mode::Unreachable);
    h.resolver.save_api_key(USER, Provider::OpenAi, "sk-new").await.unwrap();

    assert_eq!(h.stored(Provider::OpenAi).await.unwrap(), before);
    assert_eq!(
        h.resolver.get_api_key(USER, Provider::OpenAi).await.unwrap().as_str(),
        "sk-old"
    );
}

#[tokio::test]
async fn stored_key_is_encrypted() {
    let h = Harness::new();
    h.resolver.save_api_key(USER, Provider::Mistral, "  mistral-secret  ").await.unwrap();

    let stored = h.stored(Provider::Mistral).await.unwrap();
    let envelope = stored.encrypted_api_key.as_deref().unwrap();
    assert!(envelope.starts_with("v1:"));
    assert!(!envelope.contains("mistral-secret"));
    assert!(stored.last_validated_at.is_some());
    assert!(stored.is_enabled);
}

// ============================================================================
// Reading keys
// ============================================================================

#[tokio::test]
async fn get_api_key_roundtrip_trims() {
    let h = Harness::new();
    h.resolver.save_api_key(USER, Provider::Google, " AIza-123 ").await.unwrap();
    let key = h.resolver.get_api_key(USER, Provider::Google).await.unwrap();
    assert_eq!(key.as_str(), "AIza-123");
}

#[tokio::test]
async fn get_api_key_without_credential() {
    let h = Harness::new();
    let err = h.resolver.get_api_key(USER, Provider::OpenRouter).await.unwrap_err();
    assert!(matches!(
        err,
        CredentialError::NoValidCredential {
            provider: Provider::OpenRouter
        }
    ));
}

#[tokio::test]
async fn get_api_key_refuses_invalid_credential() {
    let h = Harness::new();
    h.resolver.save_api_key(USER, Provider::OpenAi, "sk-good").await.unwrap();
    h.set_mode(Mode::Reject);
    h.resolver.revalidate_api_key(USER, Provider::OpenAi).await.unwrap();

    let err = h.resolver.get_api_key(USER, Provider::OpenAi).await.unwrap_err();
    assert_eq!(err.kind(), "no_valid_credential");
}

#[tokio::test]
async fn get_api_key_with_wrong_secret_reports_missing_key() {
    let persistence = Arc::new(MemoryPersistence::new());
    let writer = Harness::with_persistence(Arc::clone(&persistence), [1u8; 32]);
    writer.resolver.save_api_key(USER, Provider::OpenAi, "sk-good").await.unwrap();

    let reader = Harness::with_persistence(persistence, [2u8; 32]);
    let err = reader.resolver.get_api_key(USER, Provider::OpenAi).await.unwrap_err();
    assert!(matches!(err, CredentialError::NoValidCredential { .. }));
}

// ============================================================================
// Deleting and revalidating
// ============================================================================

#[tokio::test]
async fn delete_soft_deletes_and_is_idempotent() {
    let h = Harness::new();
    h.resolver.delete_api_key(USER, Provider::OpenAi).await.unwrap();
    assert!(h.stored(Provider::OpenAi).await.is_none());

    h.resolver.save_api_key(USER, Provider::OpenAi, "sk-good").await.unwrap();
    h.resolver.delete_api_key(USER, Provider::OpenAi).await.unwrap();
    h.resolver.delete_api_key(USER, Provider::OpenAi).await.unwrap();

    let stored = h.stored(Provider::OpenAi).await.unwrap();
    assert!(!stored.has_api_key());
    assert!(!stored.is_enabled);
    assert_eq!(stored.validation_status, ValidationStatus::Invalid);

    let snapshot = h.resolver.resolve(USER, Provider::OpenAi).await.unwrap();
    assert!(!snapshot.has_api_key);
    assert!(!snapshot.is_usable());
}

#[tokio::test]
async fn revalidate_without_key_fails() {
    let h = Harness::new();
    let err = h
        .resolver
        .revalidate_api_key(USER, Provider::Anthropic)
        .await
        .unwrap_err();
    assert!(matches!(err, CredentialError::NoValidCredential { .. }));
}

#[tokio::test]
async fn revalidate_transient_keeps_status() {
    let h = Harness::new();
    h.resolver.save_api_key(USER, Provider::OpenAi, "sk-good").await.unwrap();
    let before = h.stored(Provider::OpenAi).await.unwrap();

    h.set_mode(Mode::Unreachable);
    let outcome = h.resolver.revalidate_api_key(USER, Provider::OpenAi).await.unwrap();
    assert!(outcome.is_transient());
    assert_eq!(h.stored(Provider::OpenAi).await.unwrap(), before);
}

#[tokio::test]
async fn revalidate_recovers_invalid_key() {
    let h = Harness::new();
    h.resolver.save_api_key(USER, Provider::OpenAi, "sk-good").await.unwrap();
    h.set_mode(Mode::Reject);
    h.resolver.revalidate_api_key(USER, Provider::OpenAi).await.unwrap();

    h.set_mode(Mode::Accept);
    let outcome = h.resolver.revalidate_api_key(USER, Provider::OpenAi).await.unwrap();
    assert!(outcome.is_valid());
    assert!(h.resolver.get_api_key(USER, Provider::OpenAi).await.is_ok());
}

#[tokio::test]
async fn revalidate_all_only_touches_stored_keys() {
    let h = Harness::new();
    h.resolver.save_api_key(USER, Provider::OpenAi, "sk-a").await.unwrap();
    h.resolver.save_api_key(USER, Provider::Groq, "gsk-b").await.unwrap();
    h.resolver.set_enabled(USER, Provider::Google, true).await.unwrap();

    let results = h.resolver.revalidate_all(USER).await;
    let providers: Vec<Provider> = results.iter().map(|(p, _)| *p).collect();
    assert_eq!(providers, vec![Provider::OpenAi, Provider::Groq]);
    assert!(results.iter().all(|(_, r)| r.as_ref().unwrap().is_valid()));
}

// ============================================================================
// Preferences
// ============================================================================

#[tokio::test]
async fn preferences_survive_key_changes() {
    let h = Harness::new();
    h.resolver
        .set_default_model(USER, Provider::OpenAi, Some("gpt-4o-mini".into()))
        .await
        .unwrap();
    let mut settings = serde_json::Map::new();
    settings.insert("organization".into(), serde_json::json!("org-1"));
    h.resolver.update_settings(USER, Provider::OpenAi, settings.clone()).await.unwrap();

    h.resolver.save_api_key(USER, Provider::OpenAi, "sk-good").await.unwrap();

    let stored = h.stored(Provider::OpenAi).await.unwrap();
    assert_eq!(stored.default_model.as_deref(), Some("gpt-4o-mini"));
    assert_eq!(stored.settings, settings);

    let snapshot = h.resolver.resolve(USER, Provider::OpenAi).await.unwrap();
    assert_eq!(snapshot.default_model.as_deref(), Some("gpt-4o-mini"));
}

// ============================================================================
// Degraded persistence
// ============================================================================

/// Memory persistence whose custom model query fails for one provider.
struct BrokenModels {
    inner: MemoryPersistence,
    broken: Provider,
}

impl Persistence for BrokenModels {
    async fn load_credential(&self, user_id: &str, provider: Provider) -> anyhow::Result<Option<Credential>> {
        self.inner.load_credential(user_id, provider).await
    }

    async fn update_credential<F>(
        &self,
        user_id: &str,
        provider: Provider,
        f: F,
    ) -> Result<Option<Credential>, CredentialError>
    where
        F: FnOnce(Option<Credential>) -> Result<Option<Credential>, CredentialError> + Send,
    {
        self.inner.update_credential(user_id, provider, f).await
    }

    async fn list_models(&self, user_id: &str, provider: Provider) -> anyhow::Result<Vec<ModelDescriptor>> {
        if provider == self.broken {
            return Err(anyhow!("connection reset"));
        }
        self.inner.list_models(user_id, provider).await
    }
}

#[tokio::test]
async fn failing_provider_degrades_without_failing_the_rest() {
    let validator = scripted_validator(&Arc::new(Mutex::new(Mode::Accept)));
    let resolver = ProviderConfigResolver::new(
        Arc::new(BrokenModels {
            inner: MemoryPersistence::new(),
            broken: Provider::Anthropic,
        }),
        Arc::new(ModelCatalog::builtin()),
        Arc::new(Cipher::new(&[3u8; 32])),
        Arc::new(validator),
    );
    resolver.save_api_key(USER, Provider::OpenAi, "sk-a").await.unwrap();
    resolver.save_api_key(USER, Provider::Anthropic, "sk-ant").await.unwrap();

    assert!(resolver.resolve(USER, Provider::Anthropic).await.is_err());

    let snapshots = resolver.resolve_all(USER).await;
    let anthropic = snapshots.iter().find(|s| s.provider == Provider::Anthropic).unwrap();
    assert!(!anthropic.is_usable());
    assert_eq!(anthropic.error.as_deref(), Some("store"));

    let openai = snapshots.iter().find(|s| s.provider == Provider::OpenAi).unwrap();
    assert!(openai.is_usable());
    assert!(openai.error.is_none());
}

// ============================================================================
// Concurrent writes to one row
// ============================================================================

/// Memory persistence whose plain reads are slow, widening the window between
/// a read and the write that follows it.
struct SlowReads {
    inner: MemoryPersistence,
}

impl Persistence for SlowReads {
    async fn load_credential(&self, user_id: &str, provider: Provider) -> anyhow::Result<Option<Credential>> {
        let row = self.inner.load_credential(user_id, provider).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        row
    }

    async fn update_credential<F>(
        &self,
        user_id: &str,
        provider: Provider,
        f: F,
    ) -> Result<Option<Credential>, CredentialError>
    where
        F: FnOnce(Option<Credential>) -> Result<Option<Credential>, CredentialError> + Send,
    {
        self.inner.update_credential(user_id, provider, f).await
    }

    async fn list_models(&self, user_id: &str, provider: Provider) -> anyhow::Result<Vec<ModelDescriptor>> {
        self.inner.list_models(user_id, provider).await
    }
}

fn slow_resolver(mode: &Arc<Mutex<Mode>>) -> ProviderConfigResolver<SlowReads> {
    ProviderConfigResolver::new(
        Arc::new(SlowReads {
            inner: MemoryPersistence::new(),
        }),
        Arc::new(ModelCatalog::builtin()),
        Arc::new(Cipher::new(&[5u8; 32])),
        Arc::new(scripted_validator(mode)),
    )
}

#[tokio::test]
async fn delete_during_revalidation_stays_deleted() {
    let resolver = slow_resolver(&Arc::new(Mutex::new(Mode::Accept)));
    resolver.save_api_key(USER, Provider::OpenAi, "sk-a").await.unwrap();

    let (revalidated, deleted) = tokio::join!(
        resolver.revalidate_api_key(USER, Provider::OpenAi),
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            resolver.delete_api_key(USER, Provider::OpenAi).await
        }
    );
    assert!(revalidated.unwrap().is_valid());
    deleted.unwrap();

    let row = resolver.store().get(USER, Provider::OpenAi).await.unwrap().unwrap();
    assert!(!row.has_api_key());
    assert!(!row.is_enabled);
    assert_eq!(row.validation_status, ValidationStatus::Invalid);
    assert!(resolver.get_api_key(USER, Provider::OpenAi).await.is_err());
}

#[tokio::test]
async fn replaced_key_keeps_its_status_after_stale_revalidation() {
    let mode = Arc::new(Mutex::new(Mode::Accept));
    let resolver = slow_resolver(&mode);
    resolver.save_api_key(USER, Provider::Groq, "gsk-old").await.unwrap();

    // A new key lands while the old one is being rechecked, and the provider
    // rejects the old one.
    let (revalidated, saved) = tokio::join!(
        resolver.revalidate_api_key(USER, Provider::Groq),
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let saved = resolver.save_api_key(USER, Provider::Groq, "gsk-new").await;
            *mode.lock().unwrap() = Mode::Reject;
            saved
        }
    );
    assert!(saved.unwrap().is_valid());
    assert_eq!(revalidated.unwrap().kind(), "invalid");

    let row = resolver.store().get(USER, Provider::Groq).await.unwrap().unwrap();
    assert_eq!(row.validation_status, ValidationStatus::Valid);
    let key = resolver.get_api_key(USER, Provider::Groq).await.unwrap();
    assert_eq!(key.as_str(), "gsk-new");
}

#[tokio::test]
async fn concurrent_save_and_preference_both_land() {
    let resolver = slow_resolver(&Arc::new(Mutex::new(Mode::Accept)));

    let (saved, preferred) = tokio::join!(
        resolver.save_api_key(USER, Provider::OpenAi, "sk-new"),
        resolver.set_default_model(USER, Provider::OpenAi, Some("gpt-4o-mini".into()))
    );
    assert!(saved.unwrap().is_valid());
    preferred.unwrap();

    let row = resolver.store().get(USER, Provider::OpenAi).await.unwrap().unwrap();
    assert!(row.has_valid_key());
    assert_eq!(row.default_model.as_deref(), Some("gpt-4o-mini"));
}
