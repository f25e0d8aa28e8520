//! [`Container`] is the engine's ordered, tree-shaped configuration value: a
//! mapping from string keys to scalars, nested containers, or ordered
//! sequences, with dotted-path access and a deep-merge operation.
//!
//! Cyclic container graphs are impossible by construction here — `Value` is
//! a plain recursive enum with no shared-ownership edges, so there is
//! nothing to validate against at construction time the way spec'd for a
//! reference-graph representation.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single value stored in a [`Container`].
///
/// Closed, tree-only variant set per the engine's data model: no shared
/// references, no cycles possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Filesystem paths round-trip as strings at the JSON/YAML boundary;
    /// this variant exists so in-process code can distinguish "this is a
    /// path" from "this happens to be a string" without re-parsing.
    Path(PathBuf),
    List(Vec<Value>),
    Map(Container),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Container> {
        match self {
            Value::Map(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<PathBuf> for Value {
    fn from(p: PathBuf) -> Self {
        Value::Path(p)
    }
}

/// An insertion-ordered mapping from string keys to [`Value`]s.
///
/// Keys are always strings; the ordering of insertion is preserved for
/// round-tripping and for deterministic iteration, the same way
/// `shipper`'s config layer preserves the declared order of table entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Container(IndexMap<String, Value>);

impl Container {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Resolves a dotted path like `"executor.cpus"` against nested maps.
    /// Returns `None` if any segment is missing or the path walks into a
    /// non-map value before reaching the end.
    pub fn get_path(&self, dotted: &str) -> Option<&Value> {
        let mut segments = dotted.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_map()?.0.get(segment)?;
        }
        Some(current)
    }

    /// Sets a dotted path, creating intermediate maps as needed. Errors if
    /// an intermediate segment already holds a non-map value.
    pub fn set_path(&mut self, dotted: &str, value: Value) -> Result<(), PathConflict> {
        let segments: Vec<&str> = dotted.split('.').collect();
        Self::set_path_segments(&mut self.0, &segments, value)
    }

    fn set_path_segments(
        map: &mut IndexMap<String, Value>,
        segments: &[&str],
        value: Value,
    ) -> Result<(), PathConflict> {
        let (head, rest) = segments
            .split_first()
            .expect("set_path called with an empty dotted path");
        if rest.is_empty() {
            map.insert((*head).to_string(), value);
            return Ok(());
        }
        match map.entry((*head).to_string()).or_insert_with(|| Value::Map(Container::new())) {
            Value::Map(nested) => Self::set_path_segments(&mut nested.0, rest, value),
            _ => Err(PathConflict {
                segment: (*head).to_string(),
            }),
        }
    }

    /// Deep-merges `other` on top of `self`, returning a new `Container`.
    /// Nested maps merge key-by-key recursively; ordered sequences
    /// concatenate (`self`'s elements first); any other value in `other`
    /// overwrites the corresponding value in `self`.
    pub fn deep_merge(&self, other: &Container) -> Container {
        let mut result = self.clone();
        for (key, incoming) in other.0.iter() {
            match (result.0.get(key), incoming) {
                (Some(Value::Map(base)), Value::Map(overlay)) => {
                    result.0.insert(key.clone(), Value::Map(base.deep_merge(overlay)));
                }
                (Some(Value::List(base)), Value::List(overlay)) => {
                    let mut combined = base.clone();
                    combined.extend(overlay.clone());
                    result.0.insert(key.clone(), Value::List(combined));
                }
                _ => {
                    result.0.insert(key.clone(), incoming.clone());
                }
            }
        }
        result
    }
}

impl FromIterator<(String, Value)> for Container {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(IndexMap::from_iter(iter))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot descend into non-map value at segment {segment:?}")]
pub struct PathConflict {
    pub segment: String,
}
