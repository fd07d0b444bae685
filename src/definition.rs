//! Cluster definition preparation
//!
//! The generated public key has to end up in the definition's key list.
//! Where that list lives differs between definition versions (top level
//! `publicKeys` or nested `spec.publicKeys`), so the location is a
//! configurable dotted path.

use std::fmt;
use std::str::FromStr;

use serde_yaml::{Mapping, Value};

use crate::{Error, Result};

/// Dotted location inside a YAML mapping, e.g. `spec.publicKeys`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// Path segments from the root
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl Default for KeyPath {
    fn default() -> Self {
        Self {
            segments: vec!["publicKeys".to_string()],
        }
    }
}

impl FromStr for KeyPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let segments: Vec<String> = s.trim().split('.').map(str::to_string).collect();
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(Error::config(format!("invalid public key path '{}'", s)));
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Append `public_key` to the list at `path` in `definition`.
///
/// Missing mappings along the path are created; a value at `path` that is
/// not a list is replaced by a list holding just the key.
pub fn inject_public_key(definition: &str, path: &KeyPath, public_key: &str) -> Result<String> {
    let mut doc: Value = serde_yaml::from_str(definition)?;
    if doc.is_null() {
        doc = Value::Mapping(Mapping::new());
    }

    let (last, parents) = path
        .segments
        .split_last()
        .ok_or_else(|| Error::config("empty public key path"))?;

    let mut node = &mut doc;
    for segment in parents {
        let map = node.as_mapping_mut().ok_or_else(|| {
            Error::config(format!(
                "cannot place public key at '{}': '{}' is not inside a mapping",
                path, segment
            ))
        })?;
        node = map
            .entry(Value::String(segment.clone()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }

    let map = node.as_mapping_mut().ok_or_else(|| {
        Error::config(format!("cannot place public key at '{}': parent is not a mapping", path))
    })?;
    let key = Value::String(public_key.to_string());
    match map.get_mut(last.as_str()) {
        Some(Value::Sequence(keys)) => keys.push(key),
        Some(other) => *other = Value::Sequence(vec![key]),
        None => {
            map.insert(Value::String(last.clone()), Value::Sequence(vec![key]));
        }
    }

    Ok(serde_yaml::to_string(&doc)?)
}
