//! Model data payload

use crate::error::Error;
use serde_json::{Map, Value};
use std::path::Path;

/// Data handed to a model, in Stan's JSON data format (an object mapping
/// variable names to numbers or nested arrays).
#[derive(Debug, Clone, PartialEq)]
pub struct ModelData {
    values: Map<String, Value>,
    json: String,
}

impl ModelData {
    /// Empty data, for models without a data block
    pub fn empty() -> Self {
        Self::from_map(Map::new())
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        let json = Value::Object(values.clone()).to_string();
        Self { values, json }
    }

    /// Parse a JSON object
    pub fn from_json_str(text: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid data JSON: {}", e)))?;
        Self::try_from(value)
    }

    /// Read a JSON data file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Serialized form passed across the module boundary
    pub fn as_json(&self) -> &str {
        &self.json
    }
}

impl Default for ModelData {
    fn default() -> Self {
        Self::empty()
    }
}

impl TryFrom<Value> for ModelData {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            Value::Null => Ok(Self::empty()),
            other => Err(Error::Config(format!(
                "model data must be a JSON object, got {}",
                match other {
                    Value::Bool(_) => "a boolean",
                    Value::Number(_) => "a number",
                    Value::String(_) => "a string",
                    Value::Array(_) => "an array",
                    _ => "a value",
                }
            ))),
        }
    }
}
