//! Flag sets and their JSON schema.
//!
//! A flag set maps service names to an enabled state. Payloads coming from
//! the cache or the remote endpoint must be a JSON object whose values are
//! all booleans; anything else is rejected with a [`FlagSetError`] instead of
//! being coerced.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Services shipped enabled/disabled when no configuration could be loaded.
static DEFAULT_FLAGS: Lazy<FlagSet> = Lazy::new(|| {
    FlagSet::from_iter([
        ("home", true),
        ("about", false),
        ("services", false),
        ("projects", false),
        ("contact", false),
        ("newsletter", false),
        ("chat", false),
    ])
});

/// Rejections produced while validating a flag payload.
#[derive(Debug, Error)]
pub enum FlagSetError {
    #[error("invalid json: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("expected a json object of booleans, found {0}")]
    NotAnObject(&'static str),
    #[error("service '{service}' maps to {found}, expected a boolean")]
    NonBoolean { service: String, found: &'static str },
}

/// Mapping of service name to enabled state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagSet(BTreeMap<String, bool>);

impl FlagSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// The documented fallback set: only `home` is enabled.
    pub fn defaults() -> Self {
        DEFAULT_FLAGS.clone()
    }

    /// Parse and validate a JSON payload.
    pub fn from_json(raw: &str) -> Result<Self, FlagSetError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    /// Validate an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, FlagSetError> {
        let object = match value {
            Value::Object(object) => object,
            other => return Err(FlagSetError::NotAnObject(kind_of(&other))),
        };

        let mut flags = BTreeMap::new();
        for (service, value) in object {
            match value {
                Value::Bool(enabled) => {
                    flags.insert(service, enabled);
                }
                other => {
                    return Err(FlagSetError::NonBoolean {
                        service,
                        found: kind_of(&other),
                    });
                }
            }
        }
        Ok(Self(flags))
    }

    pub fn to_json(&self) -> String {
        // A map of strings to booleans always serializes.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// Enabled state of `service`; absent services are disabled.
    pub fn is_active(&self, service: &str) -> bool {
        self.0.get(service).copied().unwrap_or(false)
    }

    pub fn get(&self, service: &str) -> Option<bool> {
        self.0.get(service).copied()
    }

    pub fn set(&mut self, service: impl Into<String>, enabled: bool) {
        self.0.insert(service.into(), enabled);
    }

    pub fn with(mut self, service: impl Into<String>, enabled: bool) -> Self {
        self.set(service, enabled);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(name, enabled)| (name.as_str(), *enabled))
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for FlagSet {
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
