//! Middleware layer of the keystone engine.
//!
//! This layer sits between callers and the provider checks, handling:
//! - **cipher**: AES-256-GCM envelopes for stored keys
//! - **keyring**: OS keychain access for the encryption secret
//! - **persistence**: storage collaborators (memory, JSON file)
//! - **store**: credential records and invariant-checked writes
//! - **catalog**: static and custom model descriptors
//! - **resolver**: per-provider snapshots and the key lifecycle
//! - **selector**: default and task-specific model choice

pub mod catalog;
pub mod cipher;
pub mod keyring;
pub mod persistence;
pub mod resolver;
pub mod selector;
pub mod store;

// Re-export commonly used types
pub use catalog::{Capabilities, ModelCatalog, ModelDescriptor};
pub use cipher::{Cipher, CryptoError};
pub use persistence::{FilePersistence, MemoryPersistence, Persistence};
pub use resolver::{ProviderConfigResolver, ProviderSnapshot};
pub use selector::{AuxiliaryTask, ModelChoice, ModelSelector};
pub use store::{Credential, CredentialPatch, CredentialStore, ValidationStatus};
