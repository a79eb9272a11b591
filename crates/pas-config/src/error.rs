//! Store error kinds
//!
//! Raised through `anyhow` so callers that care can
//! `downcast_ref::<StoreError>()` and branch on the kind.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the configuration store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Secure backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Corrupt config document {path}: {reason}")]
    CorruptDocument { path: PathBuf, reason: String },

    #[error("Secret '{key}' of service '{service}' has no record in the secure backend (ref {key_id})")]
    MissingSecret {
        service: String,
        key: String,
        key_id: String,
    },

    #[error("Could not migrate '{key}' of service '{service}' to the secure backend: {reason}")]
    MigrationFailed {
        service: String,
        key: String,
        reason: String,
    },

    #[error("Invalid service name: {0}")]
    InvalidService(String),

    #[error("'{first}' and '{second}' of service '{service}' map to the same secret record ({key_id}) but hold different values")]
    KeyCollision {
        service: String,
        first: String,
        second: String,
        key_id: String,
    },
}

/// Errors at the secure backend boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("No record for {0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),
}
