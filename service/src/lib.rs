//! Keystone - Provider Credential & Model Resolution Engine
//!
//! Stores per-user LLM provider API keys encrypted at rest, validates them
//! against the provider before they are accepted, and answers:
//! - which providers a user can currently use
//! - which models each of them exposes (built-in catalog plus custom rows)
//! - which model a conversation or an auxiliary task should run on
//!
//! Raw keys leave the engine only through
//! [`ProviderConfigResolver::get_api_key`], and never appear in logs.

pub mod config;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod providers;

pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use error::CredentialError;
pub use middleware::{
    AuxiliaryTask, Capabilities, Cipher, Credential, FilePersistence, MemoryPersistence,
    ModelCatalog, ModelChoice, ModelDescriptor, ModelSelector, Persistence,
    ProviderConfigResolver, ProviderSnapshot, ValidationStatus,
};
pub use providers::{Provider, ValidationOutcome, Validator};
