//! Secret age tracking

use crate::document::StoredValue;
use chrono::{DateTime, Duration, Utc};

/// How old a secret is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretAge {
    Known(Duration),
    /// Reference carries no `created_at`; always stale until backfilled
    Unknown,
}

impl SecretAge {
    pub fn days(&self) -> Option<i64> {
        match self {
            Self::Known(d) => Some(d.num_days()),
            Self::Unknown => None,
        }
    }
}

/// Flags secrets older than a threshold
#[derive(Debug, Clone, Copy)]
pub struct RotationTracker {
    threshold: Duration,
}

impl Default for RotationTracker {
    fn default() -> Self {
        Self::new(Duration::days(crate::settings::DEFAULT_ROTATION_DAYS))
    }
}

impl RotationTracker {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Age of a secret reference; `None` for anything else
    pub fn age_at(&self, value: &StoredValue, now: DateTime<Utc>) -> Option<SecretAge> {
        match value {
            StoredValue::SecretRef {
                created_at: Some(ts),
                ..
            } => Some(SecretAge::Known(now.signed_duration_since(*ts))),
            StoredValue::SecretRef {
                created_at: None, ..
            } => Some(SecretAge::Unknown),
            _ => None,
        }
    }

    pub fn age(&self, value: &StoredValue) -> Option<SecretAge> {
        self.age_at(value, Utc::now())
    }

    pub fn is_stale_at(&self, value: &StoredValue, now: DateTime<Utc>) -> bool {
        match self.age_at(value, now) {
            None => false,
            Some(SecretAge::Unknown) => true,
            Some(SecretAge::Known(age)) => age > self.threshold,
        }
    }

    pub fn is_stale(&self, value: &StoredValue) -> bool {
        self.is_stale_at(value, Utc::now())
    }
}
