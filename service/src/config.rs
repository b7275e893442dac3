//! Engine configuration, read from `KEYSTONE_*` environment variables.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;
use zeroize::Zeroizing;

use crate::middleware::cipher::SECRET_LEN;
use crate::middleware::persistence::FilePersistence;
use crate::providers::{Provider, Validator};

pub const ENV_ENCRYPTION_KEY: &str = "KEYSTONE_ENCRYPTION_KEY";
pub const ENV_VALIDATION_TIMEOUT: &str = "KEYSTONE_VALIDATION_TIMEOUT_SECS";
pub const ENV_MAX_CONCURRENT: &str = "KEYSTONE_MAX_CONCURRENT_VALIDATIONS";
pub const ENV_STORE_PATH: &str = "KEYSTONE_STORE_PATH";
pub const ENV_CATALOG_PATH: &str = "KEYSTONE_CATALOG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
    #[error("encryption secret unavailable: {0}")]
    Secret(String),
    #[error("failed to load model catalog: {0}")]
    Catalog(String),
}

impl ConfigError {
    fn invalid(var: &str, reason: impl fmt::Display) -> Self {
        Self::InvalidValue {
            var: var.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Immutable process-wide configuration.
#[derive(Clone)]
pub struct EngineConfig {
    /// Hex-encoded 32-byte secret. `None` means "use the OS keychain".
    pub encryption_key: Option<Zeroizing<String>>,
    /// Upper bound for one validation request.
    pub validation_timeout: Duration,
    /// Validation requests allowed in flight at once.
    pub max_concurrent_validations: usize,
    /// Location of the JSON credential store.
    pub store_path: PathBuf,
    /// Optional models.dev-format catalog replacing the built-in one.
    pub catalog_path: Option<PathBuf>,
    /// Per-provider endpoint overrides.
    pub base_urls: HashMap<Provider, Url>,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "<redacted>"),
            )
            .field("validation_timeout", &self.validation_timeout)
            .field("max_concurrent_validations", &self.max_concurrent_validations)
            .field("store_path", &self.store_path)
            .field("catalog_path", &self.catalog_path)
            .field("base_urls", &self.base_urls)
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            encryption_key: None,
            validation_timeout: Validator::DEFAULT_TIMEOUT,
            max_concurrent_validations: Validator::DEFAULT_MAX_CONCURRENT,
            store_path: FilePersistence::default_path(),
            catalog_path: None,
            base_urls: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(key) = get(ENV_ENCRYPTION_KEY) {
            let key = Zeroizing::new(key.trim().to_string());
            let mut decoded = Zeroizing::new([0u8; SECRET_LEN]);
            hex::decode_to_slice(key.as_str(), &mut decoded[..]).map_err(|e| {
                ConfigError::invalid(
                    ENV_ENCRYPTION_KEY,
                    format!("expected {} hex characters ({e})", SECRET_LEN * 2),
                )
            })?;
            config.encryption_key = Some(key);
        }

        if let Some(secs) = get(ENV_VALIDATION_TIMEOUT) {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(ENV_VALIDATION_TIMEOUT, e))?;
            if secs == 0 {
                return Err(ConfigError::invalid(ENV_VALIDATION_TIMEOUT, "must be positive"));
            }
            config.validation_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = get(ENV_MAX_CONCURRENT) {
            let n: usize = n
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(ENV_MAX_CONCURRENT, e))?;
            config.max_concurrent_validations = n.max(1);
        }

        if let Some(path) = get(ENV_STORE_PATH) {
            config.store_path = PathBuf::from(path);
        }

        config.catalog_path = get(ENV_CATALOG_PATH).map(PathBuf::from);

        for provider in Provider::ALL {
            let var = format!("KEYSTONE_{}_BASE_URL", provider.env_name());
            if let Some(raw) = get(&var) {
                let url = Url::parse(raw.trim()).map_err(|e| ConfigError::invalid(&var, e))?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(ConfigError::invalid(&var, "scheme must be http or https"));
                }
                config.base_urls.insert(provider, url);
            }
        }

        Ok(config)
    }

    /// Endpoint for `provider`, honouring overrides.
    pub fn base_url(&self, provider: Provider) -> String {
        self.base_urls
            .get(&provider)
            .map(|u| u.as_str().trim_end_matches('/').to_string())
            .unwrap_or_else(|| provider.default_base_url().to_string())
    }
}
