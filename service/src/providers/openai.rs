use crate::providers::{AuthCheck, Provider, ProviderError, classify_status, endpoint};

/// Authentication check for the OpenAI API and OpenAI-compatible endpoints.
///
/// Used for OpenAI, Mistral and Groq, all of which expose `GET /models`
/// behind a bearer token.
pub struct OpenAiCompatibleCheck {
    provider: Provider,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiCompatibleCheck {
    /// Create a check against the provider's default endpoint.
    pub fn new(provider: Provider, client: reqwest::Client) -> Self {
        Self::with_base_url(provider, client, provider.default_base_url().to_string())
    }

    /// Create a check with a custom base URL.
    pub fn with_base_url(provider: Provider, client: reqwest::Client, base_url: String) -> Self {
        Self {
            provider,
            client,
            base_url,
        }
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl AuthCheck for OpenAiCompatibleCheck {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn check_auth(&self, raw_key: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(endpoint(&self.base_url, "models"))
            .bearer_auth(raw_key)
            .send()
            .await?;

        classify_status(&response)
    }
}
