//! Provider key validation.
//!
//! Wraps every provider auth check with a timeout and a concurrency cap, and folds
//! the result into exactly one of three outcomes. The split between
//! [`ValidationOutcome::Invalid`] and [`ValidationOutcome::TransientFailure`]
//! decides whether a status change may be persisted, so nothing here ever
//! collapses the two.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::EngineConfig;
use crate::error::CredentialError;
use crate::providers::anthropic::AnthropicCheck;
use crate::providers::google::GoogleCheck;
use crate::providers::openai::OpenAiCompatibleCheck;
use crate::providers::openrouter::OpenRouterCheck;
use crate::providers::{AuthCheck, AuthCheckDyn, Provider, ProviderError};

/// Result of validating one raw key against one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// The provider accepted the key.
    Valid,
    /// The provider refused the key; safe to persist as `invalid`.
    Invalid(String),
    /// The provider could not be reached; must never be persisted.
    TransientFailure(String),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFailure(_))
    }

    /// User-facing error message, if the key was not accepted.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Valid => None,
            Self::Invalid(msg) | Self::TransientFailure(msg) => Some(msg),
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid(_) => "invalid",
            Self::TransientFailure(_) => "transient_failure",
        }
    }

    /// Convert into the error taxonomy for callers that prefer `?`.
    pub fn into_result(self, provider: Provider) -> Result<(), CredentialError> {
        match self {
            Self::Valid => Ok(()),
            Self::Invalid(message) => Err(CredentialError::ValidationRejected { provider, message }),
            Self::TransientFailure(message) => {
                Err(CredentialError::ValidationTransientFailure { provider, message })
            }
        }
    }

    fn rejected(provider: Provider, detail: impl std::fmt::Display) -> Self {
        Self::Invalid(format!(
            "{} rejected the API key ({detail})",
            provider.display_name()
        ))
    }

    fn transient(provider: Provider, detail: impl std::fmt::Display) -> Self {
        Self::TransientFailure(format!(
            "could not reach {} to verify the API key ({detail}); try again later",
            provider.display_name()
        ))
    }
}

/// Validates raw keys through the registered per-provider auth checks.
pub struct Validator {
    checks: HashMap<Provider, Arc<dyn AuthCheckDyn>>,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl Validator {
    /// Default upper bound for one auth check.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default number of auth checks allowed in flight at once.
    pub const DEFAULT_MAX_CONCURRENT: usize = 4;

    /// Create a validator with no auth checks registered.
    pub fn new(timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            checks: HashMap::new(),
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Register (or replace) the auth check for `check.provider()`.
    pub fn with_check<C: AuthCheck + 'static>(mut self, check: C) -> Self {
        self.checks.insert(check.provider(), Arc::new(check));
        self
    }

    /// Build a validator with the HTTP auth check of every supported provider,
    /// honouring base-URL overrides from the configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.validation_timeout)
            .build()
            .unwrap_or_default();

        let validator = Self::new(config.validation_timeout, config.max_concurrent_validations);

        Provider::ALL.into_iter().fold(validator, |v, provider| {
            let base_url = config.base_url(provider);
            let client = client.clone();
            match provider {
                Provider::OpenAi | Provider::Mistral | Provider::Groq => v.with_check(
                    OpenAiCompatibleCheck::with_base_url(provider, client, base_url),
                ),
                Provider::Anthropic => v.with_check(AnthropicCheck::with_base_url(client, base_url)),
                Provider::Google => v.with_check(GoogleCheck::with_base_url(client, base_url)),
                Provider::OpenRouter => {
                    v.with_check(OpenRouterCheck::with_base_url(client, base_url))
                }
            }
        })
    }

    /// Per-check timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Validate `raw_key` against `provider`. Never retries.
    pub async fn validate(&self, provider: Provider, raw_key: &str) -> ValidationOutcome {
        let outcome = self.run_check(provider, raw_key).await;

        metrics::counter!(
            "keystone_validations_total",
            "provider" => provider.as_str(),
            "outcome" => outcome.kind()
        )
        .increment(1);

        match &outcome {
            ValidationOutcome::Valid => {
                tracing::debug!(provider = %provider, "API key accepted");
            }
            ValidationOutcome::Invalid(_) => {
                tracing::info!(provider = %provider, outcome = outcome.kind(), "API key rejected");
            }
            ValidationOutcome::TransientFailure(msg) => {
                tracing::warn!(
                    provider = %provider,
                    outcome = outcome.kind(),
                    reason = %msg,
                    "API key validation did not complete"
                );
            }
        }

        outcome
    }

    async fn run_check(&self, provider: Provider, raw_key: &str) -> ValidationOutcome {
        let raw_key = raw_key.trim();
        if raw_key.is_empty() {
            return ValidationOutcome::Invalid("API key is empty".to_string());
        }

        let Some(check) = self.checks.get(&provider) else {
            return ValidationOutcome::transient(provider, "no validation endpoint configured");
        };

        let Ok(_permit) = self.permits.acquire().await else {
            return ValidationOutcome::transient(provider, "validator is shutting down");
        };

        match tokio::time::timeout(self.timeout, check.check_auth_dyn(raw_key)).await {
            Ok(Ok(())) => ValidationOutcome::Valid,
            Ok(Err(e @ ProviderError::Auth(_))) => ValidationOutcome::rejected(provider, e),
            Ok(Err(e)) => ValidationOutcome::transient(provider, e),
            Err(_) => ValidationOutcome::transient(
                provider,
                format!("timed out after {}s", self.timeout.as_secs_f64()),
            ),
        }
    }
}
