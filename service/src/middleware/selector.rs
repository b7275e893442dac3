//! Model selection over provider snapshots.
//!
//! The pure functions in this module decide; [`ModelSelector`] only fetches
//! fresh snapshots and hands them over. "Nothing available" is always `None`,
//! never an error: the caller decides how to prompt for setup.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::middleware::catalog::{Capabilities, ModelDescriptor};
use crate::middleware::persistence::Persistence;
use crate::middleware::resolver::{ProviderConfigResolver, ProviderSnapshot};
use crate::providers::Provider;

/// A provider + model pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelChoice {
    pub provider: Provider,
    pub model_id: String,
}

impl From<&ModelDescriptor> for ModelChoice {
    fn from(m: &ModelDescriptor) -> Self {
        Self {
            provider: m.provider,
            model_id: m.id.clone(),
        }
    }
}

/// Auxiliary jobs that want a cheap, fast model rather than the user's
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxiliaryTask {
    PromptRewrite,
    TitleGeneration,
}

impl AuxiliaryTask {
    /// Ordered id fragments, most preferred first.
    pub fn patterns(&self) -> &'static [&'static str] {
        match self {
            Self::PromptRewrite => &[
                "kimi-k2",
                "mistral-small",
                "gpt-4o-mini",
                "claude-3-5-haiku",
                "gemini-2.0-flash",
                "llama-3.3-70b",
            ],
            Self::TitleGeneration => &[
                "llama-3.1-8b",
                "gemini-2.0-flash-lite",
                "gpt-4o-mini",
                "mistral-small",
                "claude-3-5-haiku",
            ],
        }
    }
}

/// Usable snapshots, in catalog order.
fn usable(snapshots: &[ProviderSnapshot]) -> Vec<&ProviderSnapshot> {
    let mut usable: Vec<&ProviderSnapshot> = snapshots.iter().filter(|s| s.is_usable()).collect();
    usable.sort_by_key(|s| s.provider);
    usable
}

/// Providers that are enabled and hold a valid key.
pub fn available_providers(snapshots: &[ProviderSnapshot]) -> Vec<Provider> {
    usable(snapshots).into_iter().map(|s| s.provider).collect()
}

/// Every available model, providers in catalog order, models in list order.
pub fn available_models(snapshots: &[ProviderSnapshot]) -> Vec<&ModelDescriptor> {
    usable(snapshots)
        .into_iter()
        .flat_map(|s| s.available_models.iter())
        .collect()
}

/// The model a new conversation should use.
///
/// A stored preference that names an available model wins; otherwise the
/// first model of the first available provider.
pub fn default_model(snapshots: &[ProviderSnapshot]) -> Option<ModelChoice> {
    let usable = usable(snapshots);

    let preferred = usable.iter().find_map(|s| {
        let wanted = s.default_model.as_deref()?;
        s.available_models.iter().find(|m| m.id == wanted)
    });

    preferred
        .or_else(|| usable.iter().find_map(|s| s.available_models.first()))
        .map(ModelChoice::from)
}

/// First model whose id contains a pattern, trying patterns in order.
///
/// Pattern priority dominates provider and model order. Falls back to the
/// first available model when no pattern matches.
pub fn select_by_pattern<'a, S: AsRef<str>>(
    snapshots: &'a [ProviderSnapshot],
    patterns: &[S],
) -> Option<&'a ModelDescriptor> {
    let models = available_models(snapshots);

    patterns
        .iter()
        .find_map(|pattern| {
            let pattern = pattern.as_ref();
            models.iter().copied().find(|m| m.id.contains(pattern))
        })
        .or_else(|| models.first().copied())
}

/// Cheapest available model with at least the `required` capabilities.
/// Ties keep catalog order.
pub fn select_cheapest<'a>(
    snapshots: &'a [ProviderSnapshot],
    required: &Capabilities,
) -> Option<&'a ModelDescriptor> {
    available_models(snapshots)
        .into_iter()
        .filter(|m| m.capabilities.satisfies(required))
        .fold(None, |best: Option<&ModelDescriptor>, m| match best {
            Some(b) if b.blended_cost() <= m.blended_cost() => Some(b),
            _ => Some(m),
        })
}

/// Selection entry points that read fresh snapshots per call.
pub struct ModelSelector<P> {
    resolver: Arc<ProviderConfigResolver<P>>,
}

impl<P> Clone for ModelSelector<P> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
        }
    }
}

impl<P: Persistence> ModelSelector<P> {
    pub fn new(resolver: Arc<ProviderConfigResolver<P>>) -> Self {
        Self { resolver }
    }

    pub async fn get_available_providers(&self, user_id: &str) -> Vec<Provider> {
        available_providers(&self.resolver.resolve_all(user_id).await)
    }

    /// Models of one provider; empty when the provider is unusable or fails
    /// to resolve.
    pub async fn get_available_models(&self, user_id: &str, provider: Provider) -> Vec<ModelDescriptor> {
        match self.resolver.resolve(user_id, provider).await {
            Ok(snapshot) if snapshot.is_usable() => snapshot.available_models,
            Ok(_) => Vec::new(),
            Err(e) => {
                tracing::warn!(
                    user_id,
                    provider = %provider,
                    error_kind = e.kind(),
                    "Could not list models"
                );
                Vec::new()
            }
        }
    }

    pub async fn get_default_model(&self, user_id: &str) -> Option<ModelChoice> {
        let choice = default_model(&self.resolver.resolve_all(user_id).await);
        if choice.is_none() {
            tracing::debug!(user_id, "No provider available for default model");
        }
        choice
    }

    pub async fn select_by_pattern<S: AsRef<str>>(
        &self,
        user_id: &str,
        patterns: &[S],
    ) -> Option<ModelDescriptor> {
        let snapshots = self.resolver.resolve_all(user_id).await;
        select_by_pattern(&snapshots, patterns).cloned()
    }

    pub async fn select_for_task(&self, user_id: &str, task: AuxiliaryTask) -> Option<ModelDescriptor> {
        self.select_by_pattern(user_id, task.patterns()).await
    }

    pub async fn select_cheapest(
        &self,
        user_id: &str,
        required: &Capabilities,
    ) -> Option<ModelDescriptor> {
        let snapshots = self.resolver.resolve_all(user_id).await;
        select_cheapest(&snapshots, required).cloned()
    }
}
