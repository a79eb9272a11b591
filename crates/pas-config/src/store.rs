//! ConfigStore - load and save per-service settings
//!
//! Each service owns one JSON document under the config root. Sensitive
//! values, at any depth, are handed to the secure backend and the document
//! keeps only a reference plus its creation time. Loading resolves every
//! reference and returns the settings with their literal values.

use crate::backend::{self, Journal, Placement, SecureBackend};
use crate::classify::Classifier;
use crate::document::{ServiceDocument, StoredValue};
use crate::error::{BackendError, StoreError};
use crate::keypath::{self, KeyPath};
use crate::migrate::Migrator;
use crate::normalize::{self, KeyId};
use crate::persist;
use crate::rotation::{RotationTracker, SecretAge};
use crate::settings::StoreSettings;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use pas_core::Paths;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Rotation metadata for one secret
#[derive(Debug, Clone, PartialEq)]
pub struct SecretInfo {
    /// Where the secret sits in the settings
    pub path: KeyPath,
    pub key_id: KeyId,
    pub created_at: Option<DateTime<Utc>>,
    pub age: SecretAge,
    pub stale: bool,
}

/// Result of [`ConfigStore::load_with_metadata`]
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    /// Resolved settings
    pub values: Map<String, Value>,
    /// Metadata for every value held in the secure backend, by dotted path
    pub secrets: BTreeMap<String, SecretInfo>,
}

impl LoadedConfig {
    /// Paths whose secrets are due for rotation
    pub fn stale_keys(&self) -> Vec<&str> {
        self.secrets
            .iter()
            .filter(|(_, info)| info.stale)
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

/// Validate a service name before it becomes a file name
fn validate_service(service: &str) -> Result<()> {
    if service.is_empty() {
        bail!(StoreError::InvalidService("Service name cannot be empty".to_string()));
    }

    if service.contains("..") || service.starts_with('.') {
        bail!(StoreError::InvalidService(format!(
            "Invalid service name: {}",
            service
        )));
    }

    for c in service.chars() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '-' && c != '.' {
            bail!(StoreError::InvalidService(format!(
                "Invalid character '{}' in service name",
                c
            )));
        }
    }

    Ok(())
}

/// The configuration store
pub struct ConfigStore {
    paths: Paths,
    settings: StoreSettings,
    classifier: Classifier,
    rotation: RotationTracker,
    backend: Arc<dyn SecureBackend>,
    degraded_warned: AtomicBool,
    #[cfg(test)]
    fail_writes: AtomicBool,
}

impl ConfigStore {
    pub fn new(paths: Paths, settings: StoreSettings, backend: Arc<dyn SecureBackend>) -> Self {
        let classifier = Classifier::from_settings(&settings);
        let rotation = RotationTracker::new(settings.rotation_threshold());

        Self {
            paths,
            settings,
            classifier,
            rotation,
            backend,
            degraded_warned: AtomicBool::new(false),
            #[cfg(test)]
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Open the store at the standard location with the probed backend
    pub fn open() -> Result<Self> {
        let paths = Paths::new();
        let settings = StoreSettings::load(&paths)?;
        let backend = backend::probe(&settings)?;
        Ok(Self::new(paths, settings, backend))
    }

    pub fn backend(&self) -> &dyn SecureBackend {
        self.backend.as_ref()
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn root(&self) -> &Path {
        &self.paths.config
    }

    /// Path of a service's document
    pub fn document_path(&self, service: &str) -> Result<PathBuf> {
        validate_service(service)?;
        Ok(self.paths.service_document(service))
    }

    /// Load a service's settings with every secret resolved
    pub fn load(&self, service: &str) -> Result<Map<String, Value>> {
        Ok(self.load_with_metadata(service)?.values)
    }

    /// Load into a typed settings struct
    pub fn load_as<T: DeserializeOwned>(&self, service: &str) -> Result<T> {
        let values = self.load(service)?;
        serde_json::from_value(Value::Object(values))
            .with_context(|| format!("Config for '{}' does not match the expected shape", service))
    }

    /// Load values along with rotation metadata for every secret
    pub fn load_with_metadata(&self, service: &str) -> Result<LoadedConfig> {
        let doc = self.prepare(service)?;
        let now = Utc::now();
        let mut loaded = LoadedConfig::default();

        for (key, stored) in doc.iter() {
            let value = self.resolve(service, &KeyPath::key(key), stored, now, &mut loaded.secrets)?;
            loaded.values.insert(key.clone(), value);
        }

        Ok(loaded)
    }

    /// Replace a service's settings with `data`
    pub fn save(&self, service: &str, data: &Map<String, Value>) -> Result<()> {
        let path = self.document_path(service)?;
        let previous = ServiceDocument::read(&path)?.unwrap_or_default();

        let entries: Vec<(KeyPath, &Value)> =
            data.iter().map(|(k, v)| (KeyPath::key(k), v)).collect();
        self.check_identities(service, &entries, &BTreeMap::new())?;

        let now = Utc::now();
        let mut journal = Journal::new();
        let mut next = ServiceDocument::new();
        for (key, value) in data {
            let stored = self.store_value(service, &KeyPath::key(key), value, previous.get(key), now, &mut journal);
            next.insert(key.clone(), stored);
        }

        self.commit(&path, &previous, &next, journal)
    }

    /// Save a typed settings struct (must serialize to a JSON object)
    pub fn save_as<T: Serialize>(&self, service: &str, data: &T) -> Result<()> {
        match serde_json::to_value(data)? {
            Value::Object(map) => self.save(service, &map),
            _ => bail!("Config for '{}' must serialize to a JSON object", service),
        }
    }

    /// Save one top-level key, leaving the rest of the document as is
    pub fn set_value(&self, service: &str, key: &str, value: Value) -> Result<()> {
        let path = self.document_path(service)?;
        let previous = ServiceDocument::read(&path)?.unwrap_or_default();

        // Records held by the other keys must not be overwritten
        let claimed: BTreeMap<KeyId, KeyPath> = previous
            .secrets()
            .into_iter()
            .filter(|(p, _)| p.head() != Some(key))
            .filter_map(|(p, stored)| stored.key_id().map(|id| (id.clone(), p)))
            .collect();
        self.check_identities(service, &[(KeyPath::key(key), &value)], &claimed)?;

        let mut journal = Journal::new();
        let stored = self.store_value(service, &KeyPath::key(key), &value, previous.get(key), Utc::now(), &mut journal);
        let mut next = previous.clone();
        next.insert(key, stored);

        self.commit(&path, &previous, &next, journal)
    }

    /// Remove one top-level key; returns false if it was not present
    pub fn remove_value(&self, service: &str, key: &str) -> Result<bool> {
        let path = self.document_path(service)?;
        let Some(previous) = ServiceDocument::read(&path)? else {
            return Ok(false);
        };

        let mut next = previous.clone();
        if next.remove(key).is_none() {
            return Ok(false);
        }

        self.commit(&path, &previous, &next, Journal::new())?;
        Ok(true)
    }

    /// Age of one secret, read from the document without touching the backend
    ///
    /// `key` is a top-level key or a dotted path such as `providers.openrouter.token`.
    pub fn secret_age(&self, service: &str, key: &str) -> Result<Option<SecretAge>> {
        let doc = self.read_document(service)?;
        Ok(doc.secret_at(key).and_then(|stored| self.rotation.age(stored)))
    }

    /// Rotation metadata for every secret of a service, by dotted path
    pub fn secret_report(&self, service: &str) -> Result<BTreeMap<String, SecretInfo>> {
        let doc = self.read_document(service)?;
        let now = Utc::now();
        Ok(doc
            .secrets()
            .into_iter()
            .filter_map(|(path, stored)| {
                self.secret_info(&path, stored, now)
                    .map(|info| (path.to_string(), info))
            })
            .collect())
    }

    /// Run migration for a service now; returns the promoted paths
    pub fn migrate(&self, service: &str) -> Result<Vec<String>> {
        let path = self.document_path(service)?;
        let Some(doc) = ServiceDocument::read(&path)? else {
            return Ok(vec![]);
        };

        let migration = Migrator::new(&self.classifier).migrate(service, doc, self.backend(), Utc::now());
        if migration.changed() {
            if let Err(e) = self.write_document(&path, &migration.document) {
                migration.journal.rollback(self.backend());
                return Err(e);
            }
            self.scrub_backups(&path, &migration.journal);
        }
        Ok(migration.migrated)
    }

    /// Names of all services with a document under the config root
    pub fn list_services(&self) -> Result<Vec<String>> {
        let root = &self.paths.config;
        if !root.exists() {
            return Ok(vec![]);
        }

        let mut services = vec![];
        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            // Backups sit next to the document they were taken from
            if persist::backup_source(&path).is_some_and(|source| source.is_file()) {
                continue;
            }
            services.push(stem);
        }

        services.sort();
        Ok(services)
    }

    /// Read a document; missing means empty
    fn read_document(&self, service: &str) -> Result<ServiceDocument> {
        let path = self.document_path(service)?;
        Ok(ServiceDocument::read(&path)?.unwrap_or_default())
    }

    /// Read a document, migrating and upgrading it on disk when possible
    ///
    /// Rewriting is best-effort: if the document cannot be written the
    /// backend writes are undone and the document is used as read.
    fn prepare(&self, service: &str) -> Result<ServiceDocument> {
        let path = self.document_path(service)?;
        let Some(doc) = ServiceDocument::read(&path)? else {
            return Ok(ServiceDocument::new());
        };

        if !self.backend.is_secure() {
            return Ok(doc);
        }

        let original = doc.clone();
        let upgraded = doc.is_upgraded();
        let migration = Migrator::new(&self.classifier).migrate(service, doc, self.backend(), Utc::now());

        if !migration.changed() && !upgraded {
            return Ok(migration.document);
        }

        if let Err(e) = self.write_document(&path, &migration.document) {
            for key in &migration.migrated {
                tracing::warn!(
                    "{}",
                    StoreError::MigrationFailed {
                        service: service.to_string(),
                        key: key.clone(),
                        reason: format!("{:#}", e),
                    }
                );
            }
            if !migration.changed() {
                tracing::warn!("Could not rewrite {:?} in the current format: {:#}", path, e);
            }
            migration.journal.rollback(self.backend());
            return Ok(original);
        }

        self.scrub_backups(&path, &migration.journal);
        Ok(migration.document)
    }

    /// Literal value of one stored entry, resolving references
    fn resolve(
        &self,
        service: &str,
        path: &KeyPath,
        stored: &StoredValue,
        now: DateTime<Utc>,
        secrets: &mut BTreeMap<String, SecretInfo>,
    ) -> Result<Value> {
        match stored {
            StoredValue::Plain(value) => Ok(value.clone()),
            StoredValue::Object(entries) => {
                let mut obj = Map::new();
                for (k, v) in entries {
                    obj.insert(k.clone(), self.resolve(service, &path.child(k), v, now, secrets)?);
                }
                Ok(Value::Object(obj))
            }
            StoredValue::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for (i, v) in items.iter().enumerate() {
                    resolved.push(self.resolve(service, &path.index(i), v, now, secrets)?);
                }
                Ok(Value::Array(resolved))
            }
            StoredValue::SecretRef { key_id, .. } => {
                let secret = match self.backend.get(key_id) {
                    Ok(secret) => secret,
                    Err(BackendError::NotFound(_)) => bail!(StoreError::MissingSecret {
                        service: service.to_string(),
                        key: path.to_string(),
                        key_id: key_id.to_string(),
                    }),
                    Err(BackendError::Unavailable(reason)) => {
                        bail!(StoreError::BackendUnavailable(reason))
                    }
                };

                if let Some(info) = self.secret_info(path, stored, now) {
                    if info.stale {
                        match info.age.days() {
                            Some(days) => tracing::warn!(
                                "The {} for {} is {} days old. Consider rotating it.",
                                path,
                                service,
                                days
                            ),
                            None => tracing::warn!(
                                "The {} for {} has no recorded creation time. Consider rotating it.",
                                path,
                                service
                            ),
                        }
                    }
                    secrets.insert(path.to_string(), info);
                }

                Ok(Value::String(secret))
            }
        }
    }

    fn secret_info(&self, path: &KeyPath, stored: &StoredValue, now: DateTime<Utc>) -> Option<SecretInfo> {
        let StoredValue::SecretRef { key_id, created_at } = stored else {
            return None;
        };
        let age = self.rotation.age_at(stored, now)?;
        Some(SecretInfo {
            path: path.clone(),
            key_id: key_id.clone(),
            created_at: *created_at,
            age,
            stale: self.rotation.is_stale_at(stored, now),
        })
    }

    /// Refuse writes where two different secrets would share one record
    ///
    /// `claimed` holds records already referenced by entries this write
    /// leaves in place.
    fn check_identities(
        &self,
        service: &str,
        entries: &[(KeyPath, &Value)],
        claimed: &BTreeMap<KeyId, KeyPath>,
    ) -> Result<()> {
        if !self.backend.is_secure() {
            return Ok(());
        }

        let mut leaves: Vec<(KeyPath, &str)> = vec![];
        for (path, value) in entries {
            keypath::visit_strings(path, *value, &mut |p, text| {
                if self.classifier.classify_text(p.name(), text).is_sensitive() {
                    leaves.push((p.clone(), text));
                }
            });
        }

        let mut seen: BTreeMap<KeyId, (KeyPath, &str)> = BTreeMap::new();
        for (path, text) in leaves {
            let id = normalize::key_id(service, &path.to_string(), &Value::String(text.to_string()));

            if let Some((other, other_text)) = seen.get(&id) {
                if *other_text != text {
                    bail!(StoreError::KeyCollision {
                        service: service.to_string(),
                        first: other.to_string(),
                        second: path.to_string(),
                        key_id: id.to_string(),
                    });
                }
                continue;
            }

            if let Some(other) = claimed.get(&id) {
                if let Ok(existing) = self.backend.get(&id) {
                    if existing != text {
                        bail!(StoreError::KeyCollision {
                            service: service.to_string(),
                            first: other.to_string(),
                            second: path.to_string(),
                            key_id: id.to_string(),
                        });
                    }
                }
            }

            seen.insert(id, (path, text));
        }

        Ok(())
    }

    /// Decide how one value is persisted, writing secrets to the backend
    fn store_value(
        &self,
        service: &str,
        path: &KeyPath,
        value: &Value,
        previous: Option<&StoredValue>,
        now: DateTime<Utc>,
        journal: &mut Journal,
    ) -> StoredValue {
        match value {
            Value::Object(obj) => {
                let mut entries = BTreeMap::new();
                for (k, v) in obj {
                    let before = previous.and_then(|p| p.member(k));
                    let stored = self.store_value(service, &path.child(k), v, before, now, journal);
                    entries.insert(k.clone(), stored);
                }
                StoredValue::object(entries)
            }
            Value::Array(items) => {
                let mut stored = Vec::with_capacity(items.len());
                for (i, v) in items.iter().enumerate() {
                    let before = previous.and_then(|p| p.item(i));
                    stored.push(self.store_value(service, &path.index(i), v, before, now, journal));
                }
                StoredValue::array(stored)
            }
            Value::String(text) if self.classifier.classify_text(path.name(), text).is_sensitive() => {
                self.store_secret(service, path, value, text, previous, now, journal)
            }
            _ => StoredValue::Plain(value.clone()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn store_secret(
        &self,
        service: &str,
        path: &KeyPath,
        value: &Value,
        text: &str,
        previous: Option<&StoredValue>,
        now: DateTime<Utc>,
        journal: &mut Journal,
    ) -> StoredValue {
        let key_id = normalize::key_id(service, &path.to_string(), value);

        // Unchanged value: keep the reference and its timestamp
        if let Some(StoredValue::SecretRef {
            key_id: old_id,
            created_at: old_created,
        }) = previous
        {
            let unchanged = self
                .backend
                .get(old_id)
                .map(|existing| existing == text)
                .unwrap_or(false);

            if unchanged {
                if *old_id == key_id {
                    return StoredValue::SecretRef {
                        key_id,
                        created_at: *old_created,
                    };
                }

                // Re-keyed record keeps its age
                return match self.place(service, path, &key_id, text, journal) {
                    Placement::Backend => StoredValue::SecretRef {
                        key_id,
                        created_at: *old_created,
                    },
                    Placement::Inline => StoredValue::Plain(value.clone()),
                };
            }
        }

        match self.place(service, path, &key_id, text, journal) {
            Placement::Backend => StoredValue::secret_ref(key_id, now),
            Placement::Inline => StoredValue::Plain(value.clone()),
        }
    }

    /// Hand a secret to the backend, degrading to inline storage if refused
    fn place(&self, service: &str, path: &KeyPath, key_id: &KeyId, text: &str, journal: &mut Journal) -> Placement {
        match journal.set(self.backend(), key_id, text) {
            Ok(Placement::Backend) => Placement::Backend,
            Ok(Placement::Inline) => {
                self.warn_degraded(&format!(
                    "No secure backend; '{}' of {} is stored in plaintext",
                    path, service
                ));
                Placement::Inline
            }
            Err(e) => {
                self.warn_degraded(&format!(
                    "{}; '{}' of {} is stored in plaintext",
                    StoreError::BackendUnavailable(e.to_string()),
                    path,
                    service
                ));
                Placement::Inline
            }
        }
    }

    fn warn_degraded(&self, message: &str) {
        if !self.degraded_warned.swap(true, Ordering::SeqCst) {
            tracing::warn!("{}", message);
        } else {
            tracing::debug!("{}", message);
        }
    }

    fn write_document(&self, path: &Path, doc: &ServiceDocument) -> Result<()> {
        self.check_writable()?;
        doc.write(path, self.settings.keep_backups)
    }

    #[cfg(test)]
    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("document writes disabled");
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_writable(&self) -> Result<()> {
        Ok(())
    }

    /// Drop backups that still hold secrets now kept by the backend
    fn scrub_backups(&self, path: &Path, journal: &Journal) {
        match persist::remove_backups_containing(path, journal.written()) {
            Ok(0) => {}
            Ok(n) => tracing::debug!("Removed {} backup(s) of {:?} holding secrets", n, path),
            Err(e) => tracing::warn!("Backups of {:?} may still hold secrets: {:#}", path, e),
        }
    }

    /// Write `next` over `previous` and delete backend records it dropped
    ///
    /// If the write fails, the backend writes in `journal` are undone.
    fn commit(&self, path: &Path, previous: &ServiceDocument, next: &ServiceDocument, journal: Journal) -> Result<()> {
        if let Err(e) = self.write_document(path, next) {
            journal.rollback(self.backend());
            return Err(e);
        }

        self.scrub_backups(path, &journal);

        for (key_path, stored) in previous.secrets() {
            let Some(id) = stored.key_id() else {
                continue;
            };
            if next.references(id) {
                continue;
            }
            match self.backend.delete(id) {
                Ok(()) | Err(BackendError::NotFound(_)) => {
                    tracing::debug!("Deleted secret record {} ({})", id, key_path);
                }
                Err(BackendError::Unavailable(reason)) => {
                    tracing::warn!(
                        "Could not delete secret record {} for '{}': {}. It is now orphaned.",
                        id,
                        key_path,
                        reason
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;
    use tempfile::TempDir;

    fn memory_store() -> (ConfigStore, Arc<MemoryBackend>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let store = ConfigStore::new(
            Paths::with_config_root(tmp.path()),
            StoreSettings::default(),
            backend.clone(),
        );
        (store, backend, tmp)
    }

    #[test]
    fn test_validate_service() {
        assert!(validate_service("cloudflare").is_ok());
        assert!(validate_service("gh-ops_2.x").is_ok());
        assert!(validate_service("").is_err());
        assert!(validate_service("../escape").is_err());
        assert!(validate_service(".hidden").is_err());
        assert!(validate_service("a/b").is_err());
    }

    #[test]
    fn test_missing_document_is_empty() -> Result<()> {
        let (store, _, _tmp) = memory_store();
        assert!(store.load("nothing")?.is_empty());
        assert!(!store.document_path("nothing")?.exists());
        Ok(())
    }

    #[test]
    fn test_set_and_remove_value() -> Result<()> {
        let (store, backend, _tmp) = memory_store();

        store.set_value("tg", "chat_id", json!(42))?;
        store.set_value("tg", "bot_token", json!("123:abc"))?;
        assert_eq!(backend.len(), 1);
        assert_eq!(store.load("tg")?.get("bot_token"), Some(&json!("123:abc")));

        assert!(store.remove_value("tg", "bot_token")?);
        assert!(backend.is_empty());
        assert!(!store.remove_value("tg", "bot_token")?);
        assert_eq!(store.load("tg")?, json!({"chat_id": 42}).as_object().unwrap().clone());
        Ok(())
    }

    #[test]
    fn test_changed_secret_rotates_timestamp() -> Result<()> {
        let (store, _, _tmp) = memory_store();
        let path = store.document_path("gh")?;

        // Old secret written a while ago
        let old = Utc::now() - chrono::Duration::days(40);
        let key_id = normalize::key_id("gh", "token", &json!("old"));
        store.backend().set(&key_id, "old").unwrap();
        let mut doc = ServiceDocument::new();
        doc.insert("token", StoredValue::secret_ref(key_id.clone(), old));
        doc.write(&path, 0)?;
        assert!(store.secret_report("gh")?["token"].stale);

        store.set_value("gh", "token", json!("new"))?;
        let report = store.secret_report("gh")?;
        assert!(!report["token"].stale);
        assert_eq!(report["token"].key_id, key_id);
        Ok(())
    }

    #[test]
    fn test_list_services_skips_backups() -> Result<()> {
        let (store, _, _tmp) = memory_store();
        store.set_value("cloudflare", "zone", json!("example.com"))?;
        store.set_value("cloudflare", "zone", json!("example.org"))?;
        store.set_value("gh", "org", json!("acme"))?;

        assert_eq!(store.list_services()?, vec!["cloudflare", "gh"]);
        Ok(())
    }

    #[test]
    fn test_list_services_keeps_timestamp_like_names() -> Result<()> {
        let (store, _, _tmp) = memory_store();
        store.set_value("nightly-20261016120000", "zone", json!("a"))?;
        assert_eq!(store.list_services()?, vec!["nightly-20261016120000"]);

        // Once the base document exists the same name reads as its backup
        store.set_value("nightly", "zone", json!("b"))?;
        assert_eq!(store.list_services()?, vec!["nightly"]);
        Ok(())
    }

    #[test]
    fn test_failed_write_on_load_keeps_plaintext() -> Result<()> {
        let (store, backend, _tmp) = memory_store();
        let path = store.document_path("api-ops")?;
        std::fs::write(&path, r#"{"api_token": "abc123", "region": "eu"}"#)?;

        store.fail_writes.store(true, Ordering::SeqCst);
        let loaded = store.load("api-ops")?;
        assert_eq!(loaded, json!({"api_token": "abc123", "region": "eu"}).as_object().unwrap().clone());

        // Records set for the migration are gone again
        assert!(backend.is_empty());
        assert_eq!(
            std::fs::read_to_string(&path)?,
            r#"{"api_token": "abc123", "region": "eu"}"#
        );

        store.fail_writes.store(false, Ordering::SeqCst);
        store.load("api-ops")?;
        assert_eq!(backend.len(), 1);
        Ok(())
    }

    #[test]
    fn test_failed_write_restores_rotated_record() -> Result<()> {
        let (store, backend, _tmp) = memory_store();
        store.set_value("gh", "token", json!("ghp_old"))?;
        let before = std::fs::read_to_string(store.document_path("gh")?)?;
        let key_id = normalize::key_id("gh", "token", &json!("ghp_old"));

        store.fail_writes.store(true, Ordering::SeqCst);
        assert!(store.set_value("gh", "token", json!("ghp_new")).is_err());
        assert!(store.set_value("gh", "deploy_token", json!("ghp_deploy")).is_err());

        // Backend and document still agree
        assert_eq!(backend.get(&key_id), Ok("ghp_old".to_string()));
        assert_eq!(backend.len(), 1);
        assert_eq!(std::fs::read_to_string(store.document_path("gh")?)?, before);

        store.fail_writes.store(false, Ordering::SeqCst);
        assert_eq!(store.load("gh")?.get("token"), Some(&json!("ghp_old")));
        Ok(())
    }

    #[test]
    fn test_failed_explicit_migrate_rolls_back() -> Result<()> {
        let (store, backend, _tmp) = memory_store();
        let path = store.document_path("py-publish")?;
        std::fs::write(&path, r#"{"pypi_token": "pypi-x"}"#)?;

        store.fail_writes.store(true, Ordering::SeqCst);
        assert!(store.migrate("py-publish").is_err());
        assert!(backend.is_empty());
        Ok(())
    }

    #[test]
    fn test_typed_round_trip() -> Result<()> {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Tunnel {
            account_id: String,
            tunnel_token: String,
        }

        let (store, backend, _tmp) = memory_store();
        let tunnel = Tunnel {
            account_id: "acc-1".to_string(),
            tunnel_token: "eyJhIjoi".to_string(),
        };
        store.save_as("cf-tunnel", &tunnel)?;
        assert_eq!(backend.len(), 1);
        assert_eq!(store.load_as::<Tunnel>("cf-tunnel")?, tunnel);
        Ok(())
    }
}
