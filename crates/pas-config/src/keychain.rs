//! Native secure backend over the OS credential store
//!
//! macOS Keychain, Windows Credential Manager, or on Linux the Secret
//! Service (GNOME Keyring, KWallet) with the kernel keyring as a session
//! cache, via the `keyring` crate. The kernel keyring alone does not survive
//! a reboot, so it is never used on its own. Every record is filed under one
//! service name (default `pas-toolkit`) with the [`KeyId`] as the account.
//!
//! Without a reachable Secret Service (headless hosts, no D-Bus session)
//! the capability check fails and `auto` falls back to plaintext.
//!
//! Calls may block on an OS approval prompt. A dismissed or denied prompt
//! comes back as [`BackendError::Unavailable`].

use crate::backend::{Placement, SecureBackend};
use crate::error::BackendError;
use crate::normalize::KeyId;

/// Account used by the capability probe
const PROBE_ACCOUNT: &str = "__pas_probe__";

#[derive(Debug, Clone)]
pub struct KeychainBackend {
    service: String,
}

impl KeychainBackend {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    /// Check that the platform store can be reached at all
    pub fn probe(&self) -> Result<(), String> {
        let entry = keyring::Entry::new(&self.service, PROBE_ACCOUNT)
            .map_err(|e| format!("keyring entry error: {e}"))?;
        match entry.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn entry(&self, id: &KeyId) -> Result<keyring::Entry, BackendError> {
        keyring::Entry::new(&self.service, id.as_str()).map_err(|e| map_error(id, e))
    }
}

fn map_error(id: &KeyId, err: keyring::Error) -> BackendError {
    match err {
        keyring::Error::NoEntry => BackendError::NotFound(id.to_string()),
        keyring::Error::NoStorageAccess(e) => {
            BackendError::Unavailable(format!("keyring access denied: {e}"))
        }
        keyring::Error::PlatformFailure(e) => {
            BackendError::Unavailable(format!("keyring platform failure: {e}"))
        }
        other => BackendError::Unavailable(format!("keyring error: {other}")),
    }
}

impl SecureBackend for KeychainBackend {
    fn name(&self) -> &'static str {
        "keychain"
    }

    fn is_secure(&self) -> bool {
        true
    }

    fn get(&self, id: &KeyId) -> Result<String, BackendError> {
        self.entry(id)?.get_password().map_err(|e| map_error(id, e))
    }

    fn set(&self, id: &KeyId, value: &str) -> Result<Placement, BackendError> {
        self.entry(id)?
            .set_password(value)
            .map_err(|e| map_error(id, e))?;
        Ok(Placement::Backend)
    }

    fn delete(&self, id: &KeyId) -> Result<(), BackendError> {
        self.entry(id)?
            .delete_credential()
            .map_err(|e| map_error(id, e))
    }
}
