use crate::providers::{AuthCheck, Provider, ProviderError, classify_status, endpoint};

/// Authentication check for OpenRouter.
///
/// OpenRouter's model list is public, so the check asks for the current
/// key's metadata instead.
pub struct OpenRouterCheck {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterCheck {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, Provider::OpenRouter.default_base_url().to_string())
    }

    pub fn with_base_url(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl AuthCheck for OpenRouterCheck {
    fn provider(&self) -> Provider {
        Provider::OpenRouter
    }

    async fn check_auth(&self, raw_key: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(endpoint(&self.base_url, "key"))
            .bearer_auth(raw_key)
            .send()
            .await?;

        classify_status(&response)
    }
}
