//! Secure backends - where secret values actually live
//!
//! The store talks to exactly one [`SecureBackend`], chosen once per process
//! by [`probe`] and injected into [`crate::ConfigStore`].

use crate::error::{BackendError, StoreError};
use crate::keychain::KeychainBackend;
use crate::normalize::KeyId;
use crate::settings::{BackendChoice, StoreSettings};
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Where a value ended up after [`SecureBackend::set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Held by the backend; the document keeps a reference
    Backend,
    /// Not held by the backend; the document keeps the literal value
    Inline,
}

/// Storage for single secret values addressed by [`KeyId`]
pub trait SecureBackend {
    /// Short name for logs and `pas-config backend`
    fn name(&self) -> &'static str;

    /// Whether values set here are kept out of the documents
    fn is_secure(&self) -> bool;

    fn get(&self, id: &KeyId) -> Result<String, BackendError>;

    fn set(&self, id: &KeyId, value: &str) -> Result<Placement, BackendError>;

    fn delete(&self, id: &KeyId) -> Result<(), BackendError>;
}

/// Reduced-security mode: secrets stay inline in the service documents
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextBackend;

impl SecureBackend for PlaintextBackend {
    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn is_secure(&self) -> bool {
        false
    }

    fn get(&self, id: &KeyId) -> Result<String, BackendError> {
        Err(BackendError::NotFound(id.to_string()))
    }

    fn set(&self, _id: &KeyId, _value: &str) -> Result<Placement, BackendError> {
        Ok(Placement::Inline)
    }

    fn delete(&self, id: &KeyId) -> Result<(), BackendError> {
        Err(BackendError::NotFound(id.to_string()))
    }
}

/// Process-local secure backend
///
/// Behaves like a native store without touching the OS. Tools embed it for
/// dry runs; tests use [`MemoryBackend::deny`] to simulate a user refusing
/// an approval prompt.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<KeyId, String>>,
    denied: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or stop refusing) every call with `Unavailable`
    pub fn deny(&self, denied: bool) {
        self.denied.store(denied, Ordering::SeqCst);
    }

    /// Number of records held
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &KeyId) -> bool {
        self.records
            .lock()
            .map(|r| r.contains_key(id))
            .unwrap_or(false)
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("access denied".to_string()));
        }
        Ok(())
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<KeyId, String>>, BackendError> {
        self.records
            .lock()
            .map_err(|_| BackendError::Unavailable("memory backend poisoned".to_string()))
    }
}

impl SecureBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_secure(&self) -> bool {
        true
    }

    fn get(&self, id: &KeyId) -> Result<String, BackendError> {
        self.check()?;
        self.records()?
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    fn set(&self, id: &KeyId, value: &str) -> Result<Placement, BackendError> {
        self.check()?;
        self.records()?.insert(id.clone(), value.to_string());
        Ok(Placement::Backend)
    }

    fn delete(&self, id: &KeyId) -> Result<(), BackendError> {
        self.check()?;
        self.records()?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }
}

/// Backend writes made during one document update
///
/// Remembers what each touched record held before, so the writes can be
/// undone when the document that would reference them is never written.
#[derive(Default)]
pub struct Journal {
    /// Touched records and their previous values (`None` if newly created)
    touched: Vec<(KeyId, Option<String>)>,
    /// Values handed to the backend
    written: Vec<String>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// `backend.set`, recording the record's prior state first
    pub fn set(
        &mut self,
        backend: &dyn SecureBackend,
        id: &KeyId,
        value: &str,
    ) -> Result<Placement, BackendError> {
        let first_touch = !self.touched.iter().any(|(k, _)| k == id);
        let before = if first_touch {
            match backend.get(id) {
                Ok(existing) => Some(existing),
                Err(BackendError::NotFound(_)) => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let placement = backend.set(id, value)?;
        if placement == Placement::Backend {
            if first_touch {
                self.touched.push((id.clone(), before));
            }
            if !self.written.iter().any(|w| w == value) {
                self.written.push(value.to_string());
            }
        }
        Ok(placement)
    }

    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }

    /// Values now held by the backend because of this journal
    pub fn written(&self) -> &[String] {
        &self.written
    }

    /// Undo every recorded write, newest first
    pub fn rollback(self, backend: &dyn SecureBackend) {
        for (id, before) in self.touched.into_iter().rev() {
            let result = match &before {
                Some(previous) => backend.set(&id, previous).map(|_| ()),
                None => backend.delete(&id),
            };
            match result {
                Ok(()) | Err(BackendError::NotFound(_)) => {
                    tracing::debug!("Rolled back secret record {}", id);
                }
                Err(BackendError::Unavailable(reason)) => {
                    tracing::warn!(
                        "Could not roll back secret record {}: {}. It may no longer match its document.",
                        id,
                        reason
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.touched.iter().map(|(id, _)| id.as_str()).collect();
        f.debug_struct("Journal").field("touched", &ids).finish()
    }
}

/// Pick the backend for this process
///
/// `auto` falls back to [`PlaintextBackend`] when the OS store cannot be
/// reached; `native` refuses to.
pub fn probe(settings: &StoreSettings) -> Result<Arc<dyn SecureBackend>> {
    match settings.backend {
        BackendChoice::Plaintext => Ok(Arc::new(PlaintextBackend)),
        BackendChoice::Native => {
            let keychain = KeychainBackend::new(&settings.keychain_service);
            if let Err(reason) = keychain.probe() {
                bail!(StoreError::BackendUnavailable(reason));
            }
            Ok(Arc::new(keychain))
        }
        BackendChoice::Auto => {
            let keychain = KeychainBackend::new(&settings.keychain_service);
            match keychain.probe() {
                Ok(()) => {
                    tracing::debug!("Using native secure backend");
                    Ok(Arc::new(keychain))
                }
                Err(reason) => {
                    tracing::info!("Native secure backend unavailable ({}), using plaintext", reason);
                    Ok(Arc::new(PlaintextBackend))
                }
            }
        }
    }
}
