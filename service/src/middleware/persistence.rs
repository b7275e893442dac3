//! Persistence collaborators for credentials and custom models.
//!
//! The engine only needs three narrow queries, expressed by [`Persistence`].
//! Two implementations ship with the crate: [`MemoryPersistence`] for tests
//! and embedding, and [`FilePersistence`], a JSON document on disk.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::CredentialError;
use crate::middleware::catalog::ModelDescriptor;
use crate::middleware::store::Credential;
use crate::providers::Provider;

const STORE_DIR: &str = "keystone";
const STORE_FILE: &str = "credentials.json";

/// Storage queries the credential engine depends on.
pub trait Persistence: Send + Sync {
    fn load_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> impl Future<Output = Result<Option<Credential>>> + Send;

    /// Atomic read-modify-write of one (user, provider) row.
    ///
    /// `f` receives the current row and returns the row to save, or `None`
    /// to leave storage untouched. No other write to the same row may land
    /// between the read and the save. Returns what was saved.
    fn update_credential<F>(
        &self,
        user_id: &str,
        provider: Provider,
        f: F,
    ) -> impl Future<Output = Result<Option<Credential>, CredentialError>> + Send
    where
        F: FnOnce(Option<Credential>) -> Result<Option<Credential>, CredentialError> + Send;

    /// Custom model rows the user defined for `provider`.
    fn list_models(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> impl Future<Output = Result<Vec<ModelDescriptor>>> + Send;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

type RowKey = (String, Provider);

/// Process-local persistence backed by hash maps.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    credentials: RwLock<HashMap<RowKey, Credential>>,
    custom_models: RwLock<HashMap<String, Vec<ModelDescriptor>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a custom model for `user_id`, replacing one with the same id.
    pub async fn add_custom_model(&self, user_id: &str, model: ModelDescriptor) {
        let mut models = self.custom_models.write().await;
        let list = models.entry(user_id.to_string()).or_default();
        list.retain(|m| !(m.provider == model.provider && m.id == model.id));
        list.push(model);
    }

    pub async fn remove_custom_model(&self, user_id: &str, provider: Provider, model_id: &str) {
        if let Some(list) = self.custom_models.write().await.get_mut(user_id) {
            list.retain(|m| !(m.provider == provider && m.id == model_id));
        }
    }

    /// Number of stored credential rows, across all users.
    pub async fn credential_count(&self) -> usize {
        self.credentials.read().await.len()
    }
}

impl Persistence for MemoryPersistence {
    async fn load_credential(&self, user_id: &str, provider: Provider) -> Result<Option<Credential>> {
        Ok(self
            .credentials
            .read()
            .await
            .get(&(user_id.to_string(), provider))
            .cloned())
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
        let mut rows = self.credentials.write().await;
        let key = (user_id.to_string(), provider);
        let Some(next) = f(rows.get(&key).cloned())? else {
            return Ok(None);
        };
        rows.insert(key, next.clone());
        Ok(Some(next))
    }

    async fn list_models(&self, user_id: &str, provider: Provider) -> Result<Vec<ModelDescriptor>> {
        Ok(self
            .custom_models
            .read()
            .await
            .get(user_id)
            .map(|list| list.iter().filter(|m| m.provider == provider).cloned().collect())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// The document stored by [`FilePersistence`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreData {
    /// Credential rows, at most one per (user, provider).
    #[serde(default)]
    pub credentials: Vec<Credential>,
    /// Custom models per user id.
    #[serde(default)]
    pub custom_models: HashMap<String, Vec<ModelDescriptor>>,
}

/// Persistence in a single JSON file.
///
/// Writes are serialized through a mutex and land via write-then-rename, so
/// readers always see a complete document.
#[derive(Debug)]
pub struct FilePersistence {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<config dir>/keystone/credentials.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(STORE_DIR)
            .join(STORE_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the whole document. A missing file is an empty store.
    pub async fn load(&self) -> Result<StoreData> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Corrupt credential store {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreData::default()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read credential store {}", self.path.display())),
        }
    }

    /// Read-modify-write the document under the write lock.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut StoreData),
    {
        let _guard = self.write_lock.lock().await;
        let mut data = self.load().await?;
        f(&mut data);
        self.write(&data).await
    }

    /// Replace the document. Callers hold `write_lock`.
    async fn write(&self, data: &StoreData) -> Result<()> {
        let serialized = serde_json::to_vec_pretty(data)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &serialized)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Add a custom model for `user_id`, replacing one with the same id.
    pub async fn add_custom_model(&self, user_id: &str, model: ModelDescriptor) -> Result<()> {
        self.update(|data| {
            let list = data.custom_models.entry(user_id.to_string()).or_default();
            list.retain(|m| !(m.provider == model.provider && m.id == model.id));
            list.push(model);
        })
        .await
    }
}

impl Persistence for FilePersistence {
    async fn load_credential(&self, user_id: &str, provider: Provider) -> Result<Option<Credential>> {
        let data = self.load().await?;
        Ok(data
            .credentials
            .into_iter()
            .find(|c| c.user_id == user_id && c.provider == provider))
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
        let _guard = self.write_lock.lock().await;
        let mut data = self.load().await?;

        let idx = data
            .credentials
            .iter()
            .position(|c| c.user_id == user_id && c.provider == provider);
        let Some(next) = f(idx.map(|i| data.credentials[i].clone()))? else {
            return Ok(None);
        };

        match idx {
            Some(i) => data.credentials[i] = next.clone(),
            None => data.credentials.push(next.clone()),
        }
        self.write(&data).await?;
        Ok(Some(next))
    }

    async fn list_models(&self, user_id: &str, provider: Provider) -> Result<Vec<ModelDescriptor>> {
        let mut data = self.load().await?;
        Ok(data
            .custom_models
            .remove(user_id)
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.provider == provider)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn memory_roundtrip() {
        let p = MemoryPersistence::new();
        assert!(p.load_credential("u", Provider::OpenAi).await.unwrap().is_none());

        let c = Credential::new("u", Provider::OpenAi, Utc::now());
        let saved = p
            .update_credential("u", Provider::OpenAi, |_| Ok(Some(c.clone())))
            .await
            .unwrap();
        assert_eq!(saved.as_ref(), Some(&c));
        assert_eq!(p.load_credential("u", Provider::OpenAi).await.unwrap(), Some(c));
        assert_eq!(p.credential_count().await, 1);
    }

    #[tokio::test]
    async fn update_returning_none_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let p = FilePersistence::new(dir.path().join("store.json"));

        let saved = p
            .update_credential("u", Provider::Groq, |current| {
                assert!(current.is_none());
                Ok(None)
            })
            .await
            .unwrap();
        assert!(saved.is_none());
        assert!(!p.path().exists());
    }

    #[tokio::test]
    async fn update_error_writes_nothing() {
        let p = MemoryPersistence::new();
        let err = p
            .update_credential("u", Provider::Groq, |_| {
                Err(CredentialError::InvariantViolation("refused".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invariant_violation");
        assert_eq!(p.credential_count().await, 0);
    }

    #[tokio::test]
    async fn memory_custom_models_filter_by_provider() {
        let p = MemoryPersistence::new();
        p.add_custom_model("u", ModelDescriptor::new(Provider::Groq, "my-ft", "Mine"))
            .await;
        p.add_custom_model("u", ModelDescriptor::new(Provider::OpenAi, "ft:gpt", "FT"))
            .await;

        let groq = p.list_models("u", Provider::Groq).await.unwrap();
        assert_eq!(groq.len(), 1);
        assert_eq!(groq[0].id, "my-ft");

        p.remove_custom_model("u", Provider::Groq, "my-ft").await;
        assert!(p.list_models("u", Provider::Groq).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let p = FilePersistence::new(dir.path().join("nested").join("store.json"));
        let data = p.load().await.unwrap();
        assert!(data.credentials.is_empty());
    }
}
