use crate::providers::{AuthCheck, Provider, ProviderError, classify_status, endpoint};

/// Error reason Google returns (with HTTP 400) for unknown or revoked keys.
const INVALID_KEY_REASON: &str = "API_KEY_INVALID";

/// Authentication check for the Gemini API.
///
/// The key travels in the `x-goog-api-key` header rather than the query
/// string so it never shows up in request URLs.
pub struct GoogleCheck {
    client: reqwest::Client,
    base_url: String,
}

impl GoogleCheck {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, Provider::Google.default_base_url().to_string())
    }

    pub fn with_base_url(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl AuthCheck for GoogleCheck {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn check_auth(&self, raw_key: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(endpoint(&self.base_url, "models"))
            .query(&[("pageSize", "1")])
            .header("x-goog-api-key", raw_key)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if body.contains(INVALID_KEY_REASON) {
                return Err(ProviderError::Auth(INVALID_KEY_REASON.to_string()));
            }
            return Err(ProviderError::UnexpectedStatus(400));
        }

        classify_status(&response)
    }
}
