//! Service documents - the on-disk JSON for one service
//!
//! ```json
//! {
//!   "account_id": "1234",
//!   "api_token": { "__secret_ref": "pas-3f2a...", "created_at": "2026-10-01T09:00:00Z" },
//!   "providers": {
//!     "openrouter": { "token": { "__secret_ref": "pas-91bc...", "created_at": "2026-10-02T11:30:00Z" } }
//!   }
//! }
//! ```
//!
//! References may sit at any depth, inside objects or arrays.
//!
//! Documents written by older tool versions hold `"SEC:<account>"` strings
//! with a sibling `"<key>_meta"` object instead. Those are read as secret
//! references and the document is flagged for rewriting.

use crate::error::StoreError;
use crate::keypath::KeyPath;
use crate::normalize::KeyId;
use crate::persist;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Field marking an object as a secret reference
pub const SECRET_REF_FIELD: &str = "__secret_ref";

/// Timestamp field of a secret reference
pub const CREATED_AT_FIELD: &str = "created_at";

const LEGACY_REF_PREFIX: &str = "SEC:";
const LEGACY_META_SUFFIX: &str = "_meta";

/// One entry of a service document
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    /// Literal JSON value with no reference inside
    Plain(Value),
    /// Pointer to a record in the secure backend
    SecretRef {
        key_id: KeyId,
        /// `None` for references written before timestamps were tracked
        created_at: Option<DateTime<Utc>>,
    },
    /// Object holding at least one reference below it
    Object(BTreeMap<String, StoredValue>),
    /// Array holding at least one reference below it
    Array(Vec<StoredValue>),
}

impl StoredValue {
    pub fn secret_ref(key_id: KeyId, created_at: DateTime<Utc>) -> Self {
        Self::SecretRef {
            key_id,
            created_at: Some(created_at),
        }
    }

    /// Build an object entry, collapsing to `Plain` when it holds no reference
    pub fn object(entries: BTreeMap<String, StoredValue>) -> Self {
        if entries.values().all(|v| matches!(v, Self::Plain(_))) {
            let obj = entries
                .into_iter()
                .filter_map(|(k, v)| v.into_plain().map(|v| (k, v)))
                .collect();
            Self::Plain(Value::Object(obj))
        } else {
            Self::Object(entries)
        }
    }

    /// Build an array entry, collapsing to `Plain` when it holds no reference
    pub fn array(items: Vec<StoredValue>) -> Self {
        if items.iter().all(|v| matches!(v, Self::Plain(_))) {
            Self::Plain(Value::Array(
                items.into_iter().filter_map(Self::into_plain).collect(),
            ))
        } else {
            Self::Array(items)
        }
    }

    fn into_plain(self) -> Option<Value> {
        match self {
            Self::Plain(value) => Some(value),
            _ => None,
        }
    }

    /// Identifier of a reference; `None` for everything else
    pub fn key_id(&self) -> Option<&KeyId> {
        match self {
            Self::SecretRef { key_id, .. } => Some(key_id),
            _ => None,
        }
    }

    /// Child entry under an object key
    pub fn member(&self, key: &str) -> Option<&StoredValue> {
        match self {
            Self::Object(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Child entry at an array index
    pub fn item(&self, index: usize) -> Option<&StoredValue> {
        match self {
            Self::Array(items) => items.get(index),
            _ => None,
        }
    }

    /// Collect every reference at or below this value
    pub fn collect_secrets<'a>(&'a self, path: &KeyPath, out: &mut Vec<(KeyPath, &'a StoredValue)>) {
        match self {
            Self::Plain(_) => {}
            Self::SecretRef { .. } => out.push((path.clone(), self)),
            Self::Object(entries) => {
                for (k, v) in entries {
                    v.collect_secrets(&path.child(k), out);
                }
            }
            Self::Array(items) => {
                for (i, v) in items.iter().enumerate() {
                    v.collect_secrets(&path.index(i), out);
                }
            }
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Plain(value) => value.clone(),
            Self::SecretRef { key_id, created_at } => {
                let mut obj = Map::new();
                obj.insert(SECRET_REF_FIELD.to_string(), Value::String(key_id.to_string()));
                if let Some(ts) = created_at {
                    obj.insert(
                        CREATED_AT_FIELD.to_string(),
                        Value::String(format_timestamp(ts)),
                    );
                }
                Value::Object(obj)
            }
            Self::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

/// Render a timestamp the way documents store it
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an ISO-8601 timestamp; naive timestamps are taken as local time
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Decoding state for one document
#[derive(Default)]
struct Decoder {
    /// A legacy reference was seen
    upgraded: bool,
}

impl Decoder {
    fn value(&mut self, path: &KeyPath, value: &Value) -> std::result::Result<StoredValue, String> {
        match value {
            Value::Object(obj) if obj.contains_key(SECRET_REF_FIELD) => reference(path, obj),
            Value::Object(obj) => Ok(StoredValue::object(self.members(path, obj)?)),
            Value::Array(items) => {
                let mut decoded = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    decoded.push(self.value(&path.index(i), item)?);
                }
                Ok(StoredValue::array(decoded))
            }
            _ => match legacy_account(value) {
                Some(account) => {
                    self.upgraded = true;
                    Ok(StoredValue::SecretRef {
                        key_id: KeyId::new(account),
                        created_at: None,
                    })
                }
                None => Ok(StoredValue::Plain(value.clone())),
            },
        }
    }

    /// Decode one object, pairing legacy references with their `_meta` siblings
    fn members(
        &mut self,
        path: &KeyPath,
        obj: &Map<String, Value>,
    ) -> std::result::Result<BTreeMap<String, StoredValue>, String> {
        let mut entries = BTreeMap::new();

        for (key, value) in obj {
            if let Some(base) = key.strip_suffix(LEGACY_META_SUFFIX) {
                if obj.get(base).and_then(legacy_account).is_some() {
                    continue;
                }
            }

            let stored = match legacy_account(value) {
                Some(account) => {
                    self.upgraded = true;
                    let created_at = obj
                        .get(&format!("{}{}", key, LEGACY_META_SUFFIX))
                        .and_then(|meta| meta.get(CREATED_AT_FIELD))
                        .and_then(Value::as_str)
                        .and_then(parse_timestamp);
                    StoredValue::SecretRef {
                        key_id: KeyId::new(account),
                        created_at,
                    }
                }
                None => self.value(&path.child(key), value)?,
            };

            entries.insert(key.clone(), stored);
        }

        Ok(entries)
    }
}

/// Decode a `{"__secret_ref": ..., "created_at": ...}` object
fn reference(path: &KeyPath, obj: &Map<String, Value>) -> std::result::Result<StoredValue, String> {
    let Some(id) = obj.get(SECRET_REF_FIELD).and_then(Value::as_str) else {
        return Err(format!("'{}' has a non-string {}", path, SECRET_REF_FIELD));
    };

    let created_at = match obj.get(CREATED_AT_FIELD) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let parsed = parse_timestamp(s);
            if parsed.is_none() {
                tracing::warn!("Unreadable created_at for '{}': {}", path, s);
            }
            parsed
        }
        Some(_) => return Err(format!("'{}' has a non-string {}", path, CREATED_AT_FIELD)),
    };

    Ok(StoredValue::SecretRef {
        key_id: KeyId::new(id),
        created_at,
    })
}

/// All entries of one service, keyed by top-level key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceDocument {
    entries: BTreeMap<String, StoredValue>,
    /// Read from a legacy layout; the on-disk form is out of date
    upgraded: bool,
}

impl ServiceDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret a parsed JSON document
    pub fn from_json(value: Value) -> std::result::Result<Self, String> {
        let Value::Object(obj) = value else {
            return Err("top level is not a JSON object".to_string());
        };

        let mut decoder = Decoder::default();
        let entries = decoder.members(&KeyPath::default(), &obj)?;

        Ok(Self {
            entries,
            upgraded: decoder.upgraded,
        })
    }

    pub fn to_json(&self) -> Value {
        let obj: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(obj)
    }

    /// Read a document from disk; a missing file is `None`
    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config document {:?}", path))?;

        let value: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => bail!(StoreError::CorruptDocument {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        };

        match Self::from_json(value) {
            Ok(doc) => Ok(Some(doc)),
            Err(reason) => bail!(StoreError::CorruptDocument {
                path: path.to_path_buf(),
                reason,
            }),
        }
    }

    /// Atomically replace the document on disk, backing up the old one
    pub fn write(&self, path: &Path, keep_backups: usize) -> Result<()> {
        let mut content = serde_json::to_string_pretty(&self.to_json())?;
        content.push('\n');
        persist::backup_with_timestamp(path, keep_backups)?;
        persist::atomic_write(path, &content)
    }

    pub fn get(&self, key: &str) -> Option<&StoredValue> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: StoredValue) -> Option<StoredValue> {
        self.entries.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<StoredValue> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StoredValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every secret reference in the document, with its path
    pub fn secrets(&self) -> Vec<(KeyPath, &StoredValue)> {
        let mut out = vec![];
        for (key, value) in &self.entries {
            value.collect_secrets(&KeyPath::key(key), &mut out);
        }
        out
    }

    /// The secret reference at a dotted path such as `providers.openrouter.token`
    pub fn secret_at(&self, path: &str) -> Option<&StoredValue> {
        self.secrets()
            .into_iter()
            .find(|(p, _)| p.to_string() == path)
            .map(|(_, stored)| stored)
    }

    /// True if any reference points at `key_id`
    pub fn references(&self, key_id: &KeyId) -> bool {
        self.secrets()
            .iter()
            .any(|(_, stored)| stored.key_id() == Some(key_id))
    }

    pub fn is_upgraded(&self) -> bool {
        self.upgraded
    }
}

fn legacy_account(value: &Value) -> Option<&str> {
    value
        .as_str()
        .and_then(|s| s.strip_prefix(LEGACY_REF_PREFIX))
        .filter(|account| !account.is_empty())
}
