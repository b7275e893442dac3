use crate::providers::{AuthCheck, Provider, ProviderError, classify_status, endpoint};

/// API version header required on every Anthropic request.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Authentication check for Anthropic's Claude API.
pub struct AnthropicCheck {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicCheck {
    /// Create a check against the public Anthropic endpoint.
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, Provider::Anthropic.default_base_url().to_string())
    }

    /// Create a check with a custom base URL.
    pub fn with_base_url(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl AuthCheck for AnthropicCheck {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn check_auth(&self, raw_key: &str) -> Result<(), ProviderError> {
        // Listing a single model is the cheapest authenticated call.
        let response = self
            .client
            .get(endpoint(&self.base_url, "models"))
            .query(&[("limit", "1")])
            .header("x-api-key", raw_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await?;

        classify_status(&response)
    }
}
