//! Standard paths used by PAS tools

use std::path::{Path, PathBuf};

/// Environment variable that relocates the configuration root
pub const CONFIG_DIR_ENV: &str = "PAS_CONFIG_DIR";

/// Standard PAS paths
#[derive(Debug, Clone)]
pub struct Paths {
    /// Configuration root holding one JSON document per service (~/.pas)
    pub config: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let config = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join(".pas"),
        };

        Self { config }
    }

    /// Paths rooted at an explicit configuration directory
    pub fn with_config_root(root: impl AsRef<Path>) -> Self {
        Self {
            config: root.as_ref().to_path_buf(),
        }
    }

    /// Document file for a service (~/.pas/<service>.json)
    pub fn service_document(&self, service: &str) -> PathBuf {
        self.config.join(format!("{}.json", service))
    }

    /// Settings file for the configuration store itself
    pub fn store_settings(&self) -> PathBuf {
        self.config.join("pas-config.yaml")
    }
}
