//! Model identity
//!
//! The key shared by a cache entry and its loaded module. Identities are
//! namespaced (`model/<name>`) so they never collide with other entries kept
//! under the same cache root.

use crate::error::Error;
use std::fmt;

/// Namespace prefix of every model identity
pub const MODEL_NAMESPACE: &str = "model";

/// Stable key for a compiled model.
///
/// Distinct program text must be given distinct identities: the cache does
/// not hash program source to decide whether an entry is reusable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelIdentity {
    name: String,
}

impl ModelIdentity {
    /// Create an identity from a user-chosen model name.
    ///
    /// The name doubles as the translator's `--name`, a file stem and a
    /// directory name, so only ASCII alphanumerics, `_` and `-` are accepted.
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Config("model name must not be empty".to_string()));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(Error::Config(format!(
                "invalid model name {:?}: only ASCII letters, digits, '_' and '-' are allowed",
                name
            )));
        }
        Ok(Self { name })
    }

    /// Parse a namespaced key (`model/<name>`) back into an identity
    pub fn from_key(key: &str) -> Result<Self, Error> {
        match key.split_once('/') {
            Some((MODEL_NAMESPACE, name)) => Self::new(name),
            _ => Err(Error::Config(format!("not a model identity: {:?}", key))),
        }
    }

    /// The user-chosen model name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The namespaced key, e.g. `model/eight_schools`
    pub fn key(&self) -> String {
        format!("{}/{}", MODEL_NAMESPACE, self.name)
    }

    /// Translator model name. Stan model names may not start with a digit or
    /// contain '-', so those are mapped to underscores.
    pub fn translator_name(&self) -> String {
        let mut out: String = self.name.chars().map(|c| if c == '-' { '_' } else { c }).collect();
        if out.starts_with(|c: char| c.is_ascii_digit()) {
            out.insert(0, '_');
        }
        format!("{}_model", out)
    }
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", MODEL_NAMESPACE, self.name)
    }
}
