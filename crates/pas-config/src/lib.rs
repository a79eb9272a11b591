//! pas-config - Secret-aware configuration store for PAS tools
//!
//! Every tool keeps its per-service settings (account IDs, bot names, API
//! tokens, nested provider tables) through [`ConfigStore::load`] and
//! [`ConfigStore::save`]. Values whose key or shape marks them as secrets,
//! at any depth, go to the OS credential store; the JSON document under
//! `~/.pas/` only holds a reference and the time the secret was created, so
//! stale credentials can be flagged for rotation.
//!
//! Without an OS credential store, secrets stay inline in the documents.
//! That mode is logged, not refused. Plaintext secrets left on disk are
//! moved into the credential store the first time it becomes available.

pub mod backend;
pub mod classify;
pub mod document;
pub mod error;
pub mod keychain;
pub mod keypath;
pub mod migrate;
pub mod normalize;
pub mod persist;
pub mod rotation;
pub mod settings;
pub mod store;

pub use backend::{probe, Journal, MemoryBackend, Placement, PlaintextBackend, SecureBackend};
pub use classify::{Classifier, Sensitivity};
pub use document::{ServiceDocument, StoredValue};
pub use error::{BackendError, StoreError};
pub use keychain::KeychainBackend;
pub use keypath::KeyPath;
pub use migrate::{Migration, Migrator};
pub use normalize::KeyId;
pub use rotation::{RotationTracker, SecretAge};
pub use settings::{BackendChoice, StoreSettings};
pub use store::{ConfigStore, LoadedConfig, SecretInfo};
