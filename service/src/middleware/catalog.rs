//! Model catalog: the static registry of known models per provider plus the
//! user's custom models.
//!
//! The built-in table can be replaced at startup by a file in the
//! https://models.dev/api.json format.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::middleware::persistence::Persistence;
use crate::providers::Provider;

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Capability flags advertised by a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub vision: bool,
    pub tools: bool,
    pub audio: bool,
    pub video: bool,
    pub document: bool,
}

impl Capabilities {
    /// Text-only model.
    pub const TEXT: Self = Self {
        vision: false,
        tools: false,
        audio: false,
        video: false,
        document: false,
    };

    /// Whether every capability in `required` is present here.
    pub fn satisfies(&self, required: &Capabilities) -> bool {
        (!required.vision || self.vision)
            && (!required.tools || self.tools)
            && (!required.audio || self.audio)
            && (!required.video || self.video)
            && (!required.document || self.document)
    }
}

/// One selectable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub provider: Provider,
    pub display_name: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// USD per 1k input tokens.
    #[serde(default)]
    pub input_cost_per_1k: f64,
    /// USD per 1k output tokens.
    #[serde(default)]
    pub output_cost_per_1k: f64,
    #[serde(default)]
    pub is_custom: bool,
}

impl ModelDescriptor {
    pub fn new(provider: Provider, id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider,
            display_name: display_name.into(),
            capabilities: Capabilities::TEXT,
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
            is_custom: false,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_cost(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_cost_per_1k = input_per_1k;
        self.output_cost_per_1k = output_per_1k;
        self
    }

    /// Combined input + output price, used to rank "cheapest" picks.
    pub fn blended_cost(&self) -> f64 {
        self.input_cost_per_1k + self.output_cost_per_1k
    }
}

// ---------------------------------------------------------------------------
// Built-in table
// ---------------------------------------------------------------------------

struct BuiltinModel {
    provider: Provider,
    id: &'static str,
    name: &'static str,
    caps: Capabilities,
    input: f64,
    output: f64,
}

const fn caps(vision: bool, tools: bool, audio: bool, video: bool, document: bool) -> Capabilities {
    Capabilities {
        vision,
        tools,
        audio,
        video,
        document,
    }
}

const MULTIMODAL: Capabilities = caps(true, true, false, false, true);
const TOOLS: Capabilities = caps(false, true, false, false, false);
const GEMINI: Capabilities = caps(true, true, true, true, true);

/// Built-in models, grouped by provider in catalog order.
static BUILTIN: &[BuiltinModel] = &[
    // OpenAI
    BuiltinModel { provider: Provider::OpenAi, id: "gpt-4o", name: "GPT-4o", caps: MULTIMODAL, input: 0.0025, output: 0.01 },
    BuiltinModel { provider: Provider::OpenAi, id: "gpt-4o-mini", name: "GPT-4o mini", caps: MULTIMODAL, input: 0.00015, output: 0.0006 },
    BuiltinModel { provider: Provider::OpenAi, id: "gpt-4.1", name: "GPT-4.1", caps: MULTIMODAL, input: 0.002, output: 0.008 },
    BuiltinModel { provider: Provider::OpenAi, id: "o3-mini", name: "o3-mini", caps: TOOLS, input: 0.0011, output: 0.0044 },
    // Anthropic
    BuiltinModel { provider: Provider::Anthropic, id: "claude-3-7-sonnet-latest", name: "Claude 3.7 Sonnet", caps: MULTIMODAL, input: 0.003, output: 0.015 },
    BuiltinModel { provider: Provider::Anthropic, id: "claude-3-5-haiku-latest", name: "Claude 3.5 Haiku", caps: MULTIMODAL, input: 0.0008, output: 0.004 },
    BuiltinModel { provider: Provider::Anthropic, id: "claude-3-opus-latest", name: "Claude 3 Opus", caps: MULTIMODAL, input: 0.015, output: 0.075 },
    // Google
    BuiltinModel { provider: Provider::Google, id: "gemini-2.0-flash", name: "Gemini 2.0 Flash", caps: GEMINI, input: 0.0001, output: 0.0004 },
    BuiltinModel { provider: Provider::Google, id: "gemini-2.0-flash-lite", name: "Gemini 2.0 Flash-Lite", caps: caps(true, false, true, true, true), input: 0.000075, output: 0.0003 },
    BuiltinModel { provider: Provider::Google, id: "gemini-1.5-pro", name: "Gemini 1.5 Pro", caps: GEMINI, input: 0.00125, output: 0.005 },
    // Mistral
    BuiltinModel { provider: Provider::Mistral, id: "mistral-large-latest", name: "Mistral Large", caps: TOOLS, input: 0.002, output: 0.006 },
    BuiltinModel { provider: Provider::Mistral, id: "mistral-small-latest", name: "Mistral Small", caps: caps(true, true, false, false, false), input: 0.0001, output: 0.0003 },
    BuiltinModel { provider: Provider::Mistral, id: "pixtral-large-latest", name: "Pixtral Large", caps: caps(true, true, false, false, false), input: 0.002, output: 0.006 },
    BuiltinModel { provider: Provider::Mistral, id: "codestral-latest", name: "Codestral", caps: TOOLS, input: 0.0003, output: 0.0009 },
    // Groq
    BuiltinModel { provider: Provider::Groq, id: "moonshotai/kimi-k2-instruct", name: "Kimi K2", caps: TOOLS, input: 0.001, output: 0.003 },
    BuiltinModel { provider: Provider::Groq, id: "llama-3.3-70b-versatile", name: "Llama 3.3 70B", caps: TOOLS, input: 0.00059, output: 0.00079 },
    BuiltinModel { provider: Provider::Groq, id: "llama-3.1-8b-instant", name: "Llama 3.1 8B Instant", caps: TOOLS, input: 0.00005, output: 0.00008 },
    // OpenRouter
    BuiltinModel { provider: Provider::OpenRouter, id: "openai/gpt-4o-mini", name: "GPT-4o mini (OpenRouter)", caps: MULTIMODAL, input: 0.00015, output: 0.0006 },
    BuiltinModel { provider: Provider::OpenRouter, id: "anthropic/claude-3.5-sonnet", name: "Claude 3.5 Sonnet (OpenRouter)", caps: MULTIMODAL, input: 0.003, output: 0.015 },
    BuiltinModel { provider: Provider::OpenRouter, id: "meta-llama/llama-3.3-70b-instruct", name: "Llama 3.3 70B (OpenRouter)", caps: TOOLS, input: 0.00012, output: 0.0003 },
];

// ---------------------------------------------------------------------------
// models.dev import
// ---------------------------------------------------------------------------

/// Vendor entry of the models.dev metadata document.
#[derive(Debug, Deserialize)]
struct Vendor {
    #[serde(default)]
    models: BTreeMap<String, VendorModel>,
}

#[derive(Debug, Deserialize)]
struct VendorModel {
    id: String,
    name: String,
    #[serde(default)]
    attachment: bool,
    #[serde(default)]
    tool_call: bool,
    #[serde(default)]
    modalities: Option<Modalities>,
    /// Per million tokens, USD.
    #[serde(default)]
    cost: Option<Pricing>,
}

#[derive(Debug, Deserialize)]
struct Modalities {
    #[serde(default)]
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Pricing {
    #[serde(default)]
    input: f64,
    #[serde(default)]
    output: f64,
}

impl VendorModel {
    fn into_descriptor(self, provider: Provider) -> ModelDescriptor {
        let inputs = self.modalities.map(|m| m.input).unwrap_or_default();
        let has = |kind: &str| inputs.iter().any(|i| i == kind);
        let capabilities = Capabilities {
            vision: has("image"),
            tools: self.tool_call,
            audio: has("audio"),
            video: has("video"),
            document: self.attachment || has("pdf"),
        };
        let (input, output) = self
            .cost
            .map(|c| (c.input / 1000.0, c.output / 1000.0))
            .unwrap_or_default();

        ModelDescriptor::new(provider, self.id, self.name)
            .with_capabilities(capabilities)
            .with_cost(input, output)
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Immutable registry of catalog-defined models.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    /// Build a catalog from descriptors. Models are grouped by provider in
    /// catalog order; relative order within a provider is preserved.
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        let mut models: Vec<ModelDescriptor> = models
            .into_iter()
            .map(|mut m| {
                m.is_custom = false;
                m
            })
            .collect();
        models.sort_by_key(|m| m.provider);
        Self { models }
    }

    /// The compiled-in catalog.
    pub fn builtin() -> Self {
        Self::new(
            BUILTIN
                .iter()
                .map(|b| {
                    ModelDescriptor::new(b.provider, b.id, b.name)
                        .with_capabilities(b.caps)
                        .with_cost(b.input, b.output)
                })
                .collect(),
        )
    }

    /// Parse a models.dev-format document. Vendors that are not supported
    /// providers are skipped; models within a vendor are ordered by id.
    pub fn from_metadata_json(json: &str) -> Result<Self> {
        let vendors: BTreeMap<String, Vendor> =
            serde_json::from_str(json).context("Failed to parse model metadata JSON")?;

        let models = vendors
            .into_iter()
            .filter_map(|(vendor_id, vendor)| {
                let provider = vendor_id.parse::<Provider>().ok()?;
                Some(
                    vendor
                        .models
                        .into_values()
                        .map(move |m| m.into_descriptor(provider)),
                )
            })
            .flatten()
            .collect();

        Ok(Self::new(models))
    }

    /// Load a models.dev-format file from disk.
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read model catalog {}", path.display()))?;
        let catalog = Self::from_metadata_json(&json)?;
        tracing::info!(
            path = %path.display(),
            models = catalog.len(),
            "Loaded model catalog"
        );
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Catalog-defined models for `provider`, in catalog order.
    pub fn static_models(&self, provider: Provider) -> Vec<ModelDescriptor> {
        self.models
            .iter()
            .filter(|m| m.provider == provider)
            .cloned()
            .collect()
    }

    /// Look up a catalog-defined model.
    pub fn find(&self, provider: Provider, model_id: &str) -> Option<&ModelDescriptor> {
        self.models
            .iter()
            .find(|m| m.provider == provider && m.id == model_id)
    }

    /// The user's custom models for `provider`, as stored by the persistence
    /// collaborator.
    pub async fn custom_models<P: Persistence>(
        &self,
        persistence: &P,
        user_id: &str,
        provider: Provider,
    ) -> Result<Vec<ModelDescriptor>> {
        let rows = persistence.list_models(user_id, provider).await?;
        Ok(rows
            .into_iter()
            .filter(|m| m.provider == provider)
            .map(|mut m| {
                m.is_custom = true;
                m
            })
            .collect())
    }

    /// Static models followed by the user's custom models.
    pub async fn all_for<P: Persistence>(
        &self,
        persistence: &P,
        user_id: &str,
        provider: Provider,
    ) -> Result<Vec<ModelDescriptor>> {
        let mut models = self.static_models(provider);
        models.extend(self.custom_models(persistence, user_id, provider).await?);
        Ok(models)
    }
}
