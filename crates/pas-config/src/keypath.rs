//! Paths to values inside a service document
//!
//! Top-level keys are bare names. Object members below them are joined with
//! `.` and array items use `[i]`, so a token nested under a provider reads
//! `providers.openrouter.token` and one inside a list reads
//! `organizations[0].access_token`.

use serde_json::{Map, Value};
use std::fmt;

/// One step of a [`KeyPath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Location of a value inside a service document
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPath(Vec<Segment>);

impl KeyPath {
    /// Path of a top-level key
    pub fn key(name: &str) -> Self {
        Self(vec![Segment::Key(name.to_string())])
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Key(name.to_string()));
        Self(segments)
    }

    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Index(index));
        Self(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Top-level key this path starts from
    pub fn head(&self) -> Option<&str> {
        match self.0.first() {
            Some(Segment::Key(k)) => Some(k),
            _ => None,
        }
    }

    /// Nearest object key; array items are named after their enclosing key
    pub fn name(&self) -> &str {
        self.0
            .iter()
            .rev()
            .find_map(|s| match s {
                Segment::Key(k) => Some(k.as_str()),
                Segment::Index(_) => None,
            })
            .unwrap_or("")
    }

    /// Value at this path inside `root`
    pub fn lookup_mut<'a>(&self, root: &'a mut Map<String, Value>) -> Option<&'a mut Value> {
        let (first, rest) = self.0.split_first()?;
        let Segment::Key(first) = first else {
            return None;
        };

        let mut current = root.get_mut(first)?;
        for segment in rest {
            current = match (segment, current) {
                (Segment::Key(k), Value::Object(obj)) => obj.get_mut(k)?,
                (Segment::Index(i), Value::Array(items)) => items.get_mut(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Key(k) if i == 0 => f.write_str(k)?,
                Segment::Key(k) => write!(f, ".{}", k)?,
                Segment::Index(n) => write!(f, "[{}]", n)?,
            }
        }
        Ok(())
    }
}

/// Call `f` for every string below `value`, with its path
pub fn visit_strings<'v, F>(path: &KeyPath, value: &'v Value, f: &mut F)
where
    F: FnMut(&KeyPath, &'v str),
{
    match value {
        Value::String(s) => f(path, s),
        Value::Object(obj) => {
            for (k, v) in obj {
                visit_strings(&path.child(k), v, f);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                visit_strings(&path.index(i), v, f);
            }
        }
        _ => {}
    }
}
