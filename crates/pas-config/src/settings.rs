//! Store settings
//!
//! Configuration file: ~/.pas/pas-config.yaml
//!
//! ```yaml
//! sensitive_terms: [token, secret, password]
//! sensitive_keys: [key]
//! rotation_days: 30
//! backend: auto
//! keychain_service: pas-toolkit
//! keep_backups: 5
//! ```

use anyhow::{Context, Result};
use pas_core::Paths;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable overriding the configured backend
pub const BACKEND_ENV: &str = "PAS_SECRET_BACKEND";

/// Default staleness threshold
pub const DEFAULT_ROTATION_DAYS: i64 = 30;

/// Default number of document backups kept
pub const DEFAULT_KEEP_BACKUPS: usize = 5;

/// Which secure backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Probe the platform once and pick the best available
    #[default]
    Auto,
    /// Require the OS credential store
    Native,
    /// Keep secrets inline in the documents
    Plaintext,
}

impl BackendChoice {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "native" | "keychain" | "keyring" => Some(Self::Native),
            "plaintext" | "plain" | "none" => Some(Self::Plaintext),
            _ => None,
        }
    }
}

/// Settings for the configuration store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Case-insensitive substrings marking a key as sensitive
    pub sensitive_terms: Vec<String>,

    /// Case-insensitive exact key names marking a key as sensitive
    pub sensitive_keys: Vec<String>,

    /// Age in days after which a secret is reported stale
    pub rotation_days: i64,

    /// Secure backend selection
    pub backend: BackendChoice,

    /// Service name native records are filed under
    pub keychain_service: String,

    /// Timestamped backups kept per document (0 disables)
    pub keep_backups: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            sensitive_terms: [
                "token",
                "secret",
                "password",
                "passwd",
                "api_key",
                "apikey",
                "credential",
                "private_key",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            sensitive_keys: vec!["key".to_string()],
            rotation_days: DEFAULT_ROTATION_DAYS,
            backend: BackendChoice::Auto,
            keychain_service: "pas-toolkit".to_string(),
            keep_backups: DEFAULT_KEEP_BACKUPS,
        }
    }
}

impl StoreSettings {
    /// Load settings from the default location, applying env overrides
    pub fn load(paths: &Paths) -> Result<Self> {
        let mut settings = Self::load_from(&paths.store_settings())?;

        if let Ok(raw) = std::env::var(BACKEND_ENV) {
            match BackendChoice::parse(&raw) {
                Some(choice) => settings.backend = choice,
                None => tracing::warn!("Ignoring unknown {}={}", BACKEND_ENV, raw),
            }
        }

        Ok(settings)
    }

    /// Load settings from a specific path (missing file means defaults)
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read store settings from {:?}", path))?;
            let settings: Self = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse store settings from {:?}", path))?;
            Ok(settings)
        } else {
            Ok(Self::default())
        }
    }

    /// Staleness threshold as a duration
    pub fn rotation_threshold(&self) -> chrono::Duration {
        chrono::Duration::days(self.rotation_days)
    }
}
