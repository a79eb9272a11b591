//! Key normalization and key identifiers
//!
//! `canonical = service + "/" + key`, except that URL-shaped keys (or keys
//! holding a URL-shaped value) lose a single trailing `/` first. The backend
//! identifier is a hash of the canonical key, so formatting variants of the
//! same key always land on one record.
//!
//! Nested values are identified by their dotted path
//! ([`crate::keypath::KeyPath`]), e.g. `providers.openrouter.token`.

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

/// Prefix of derived key identifiers
const KEY_ID_PREFIX: &str = "pas-";

/// Hex characters of the digest kept in a key identifier
const KEY_ID_HEX_LEN: usize = 32;

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://\S+$").expect("URL pattern is valid")
    })
}

/// True if `s` is shaped like a URL (`scheme://...`)
pub fn is_url_shaped(s: &str) -> bool {
    url_pattern().is_match(s)
}

/// Opaque identifier of a record in the secure backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(String);

impl KeyId {
    /// Wrap an identifier read from disk
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the identifier for a canonical key
    pub fn derive(canonical: &str) -> Self {
        let digest = Sha256::digest(canonical.as_bytes());
        let hex = hex::encode(digest);
        Self(format!("{}{}", KEY_ID_PREFIX, &hex[..KEY_ID_HEX_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical form of `(service, key)`
pub fn normalize(service: &str, key: &str, value: &Value) -> String {
    let url_valued = value.as_str().map(|v| is_url_shaped(v.trim())).unwrap_or(false);

    let key = if url_valued || is_url_shaped(key) {
        key.strip_suffix('/').unwrap_or(key)
    } else {
        key
    };

    format!("{}/{}", service, key)
}

/// Backend identifier for `(service, key)`
pub fn key_id(service: &str, key: &str, value: &Value) -> KeyId {
    KeyId::derive(&normalize(service, key, value))
}
