pub mod anthropic;
pub mod google;
pub mod openai;
pub mod openrouter;
pub mod retry;
pub mod validator;

// Re-export for convenience
pub use openai::OpenAiCompatibleCheck;
pub use retry::{RetryConfig, with_retry};
pub use validator::{ValidationOutcome, Validator};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CredentialError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced by a provider's authentication check.
///
/// Messages never carry response bodies: several providers echo a masked
/// fragment of the submitted key back in their error payloads.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("provider unavailable: HTTP {0}")]
    Unavailable(u16),
    #[error("unexpected response: HTTP {0}")]
    UnexpectedStatus(u16),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether the provider positively refused the credential.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e.without_url().to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Provider identifiers
// ---------------------------------------------------------------------------

/// Closed set of supported model providers.
///
/// Declaration order is the catalog order used by every fallback algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "mistral")]
    Mistral,
    #[serde(rename = "groq")]
    Groq,
    #[serde(rename = "openrouter")]
    OpenRouter,
}

impl Provider {
    /// Every supported provider, in catalog order.
    pub const ALL: [Provider; 6] = [
        Self::OpenAi,
        Self::Anthropic,
        Self::Google,
        Self::Mistral,
        Self::Groq,
        Self::OpenRouter,
    ];

    /// Canonical slug (`"openai"`, `"anthropic"`, …).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Mistral => "mistral",
            Self::Groq => "groq",
            Self::OpenRouter => "openrouter",
        }
    }

    /// Human-readable name for messages shown to users.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Google => "Google Gemini",
            Self::Mistral => "Mistral",
            Self::Groq => "Groq",
            Self::OpenRouter => "OpenRouter",
        }
    }

    /// Upper-case token used in environment variable names.
    pub fn env_name(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI",
            Self::Anthropic => "ANTHROPIC",
            Self::Google => "GOOGLE",
            Self::Mistral => "MISTRAL",
            Self::Groq => "GROQ",
            Self::OpenRouter => "OPENROUTER",
        }
    }

    /// Public API endpoint used when no override is configured.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Google => "https://generativelanguage.googleapis.com/v1beta",
            Self::Mistral => "https://api.mistral.ai/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let slug = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == slug)
            .ok_or_else(|| CredentialError::UnknownProvider(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Authentication capability
// ---------------------------------------------------------------------------

/// The single capability the engine needs from a provider: prove that a raw
/// key is accepted, using the cheapest authenticated call available.
///
/// Implementations must not retry; retry policy belongs to the caller.
pub trait AuthCheck: Send + Sync {
    /// Provider this check talks to.
    fn provider(&self) -> Provider;

    /// Perform one authenticated request with `raw_key`.
    fn check_auth(&self, raw_key: &str) -> impl Future<Output = Result<(), ProviderError>> + Send;
}

/// Boxed future alias for an authentication check.
type AuthFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send + 'a>>;

/// Object-safe version of [`AuthCheck`], using boxed futures.
///
/// Auto-implemented for every `T: AuthCheck + 'static`.
pub trait AuthCheckDyn: Send + Sync {
    fn check_auth_dyn<'a>(&'a self, raw_key: &'a str) -> AuthFuture<'a>;
}

impl<T: AuthCheck + 'static> AuthCheckDyn for T {
    fn check_auth_dyn<'a>(&'a self, raw_key: &'a str) -> AuthFuture<'a> {
        Box::pin(self.check_auth(raw_key))
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Join a base URL and a path without doubling slashes.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Map an HTTP status from an auth check into the engine's outcome classes.
pub(crate) fn classify_status(response: &reqwest::Response) -> Result<(), ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    match status.as_u16() {
        401 | 403 => Err(ProviderError::Auth(format!("HTTP {}", status.as_u16()))),
        429 => {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0);
            Err(ProviderError::RateLimited { retry_after_secs })
        }
        code if status.is_server_error() => Err(ProviderError::Unavailable(code)),
        code => Err(ProviderError::UnexpectedStatus(code)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
