//! Key classification - decides which config values are secrets
//!
//! Rules, first match wins:
//! 1. Only string values can carry a secret
//! 2. Key name contains a sensitive term, or equals a sensitive key name
//! 3. Value is a URL / connection string with embedded `user:password@`
//!
//! Connection strings count with or without a scheme, and with an empty
//! user (`redis://:pw@host`). A scheme-less value must end in a host name,
//! optionally with a port and path.
//!
//! Terms and key names come from [`StoreSettings`], never from this module.

use crate::settings::StoreSettings;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Classifier verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    Sensitive,
    NotSensitive,
}

impl Sensitivity {
    pub fn is_sensitive(&self) -> bool {
        matches!(self, Self::Sensitive)
    }
}

fn credential_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r"^(?:[A-Za-z][A-Za-z0-9+.\-]*://[^/\s:@]*:[^/\s@]+@\S+",
            r"|[^/\s:@]+:[^/\s@]+@[A-Za-z0-9.\-]+(?::\d+)?(?:/\S*)?)$",
        ))
        .expect("credential URL pattern is valid")
    })
}

/// True if `value` looks like a URL or connection string carrying credentials
pub fn has_embedded_credentials(value: &str) -> bool {
    credential_url_pattern().is_match(value.trim())
}

/// Fold a key name so `API-Key`, `api key` and `api_key` compare equal
fn fold(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' | '.' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Pure classifier over `(key, value)` pairs
#[derive(Debug, Clone)]
pub struct Classifier {
    terms: Vec<String>,
    exact_keys: Vec<String>,
}

impl Classifier {
    pub fn new<T, K>(terms: T, exact_keys: K) -> Self
    where
        T: IntoIterator,
        T::Item: AsRef<str>,
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|t| fold(t.as_ref()))
            .filter(|t| !t.is_empty())
            .collect();
        let exact_keys = exact_keys
            .into_iter()
            .map(|k| fold(k.as_ref()))
            .filter(|k| !k.is_empty())
            .collect();
        Self { terms, exact_keys }
    }

    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self::new(&settings.sensitive_terms, &settings.sensitive_keys)
    }

    /// True if the key name alone marks the entry sensitive
    pub fn is_sensitive_name(&self, key: &str) -> bool {
        let folded = fold(key);
        self.exact_keys.iter().any(|k| *k == folded)
            || self.terms.iter().any(|t| folded.contains(t.as_str()))
    }

    pub fn classify(&self, key: &str, value: &Value) -> Sensitivity {
        match value.as_str() {
            Some(text) => self.classify_text(key, text),
            None => Sensitivity::NotSensitive,
        }
    }

    /// Verdict for a string value under `key`
    ///
    /// For nested values `key` is the nearest object key, not the full path.
    pub fn classify_text(&self, key: &str, text: &str) -> Sensitivity {
        if self.is_sensitive_name(key) || has_embedded_credentials(text) {
            Sensitivity::Sensitive
        } else {
            Sensitivity::NotSensitive
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::from_settings(&StoreSettings::default())
    }
}
