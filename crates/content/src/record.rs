//! Component records as produced by the upstream watchers.

use crate::canonical;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::Value;

/// Field holding a record's component id.
pub const ID_FIELD: &str = "name";

/// Arbitrary structured metadata for one component at one version.
///
/// The only structural requirement is that the top level is a mapping;
/// everything else is carried verbatim. Whether the record can be
/// canonicalized is only checked when it is hashed.
#[derive(Debug, Clone, PartialEq)]
pub struct Record(Value);

impl Record {
    pub fn new(value: Value) -> Result<Self> {
        match value {
            Value::Mapping(_) => Ok(Self(value)),
            other => exn::bail!(ErrorKind::MalformedRecord(format!("expected a mapping, found {}", kind_of(&other)))),
        }
    }

    /// Parse a record from YAML or JSON text (JSON is a subset of YAML).
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_yaml::from_slice(bytes)
            .or_raise(|| ErrorKind::MalformedRecord("unparseable record document".to_string()))?;
        Self::new(value)
    }

    /// Parse a record from strict JSON, e.g. a published artifact file.
    ///
    /// Prefer this over [`from_slice`](Self::from_slice) for JSON input:
    /// escaped surrogate pairs (`\ud83d\ude00`) are valid JSON but not
    /// valid YAML.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .or_raise(|| ErrorKind::MalformedRecord("unparseable JSON record".to_string()))?;
        Self::from_json(value)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let value = serde_yaml::to_value(value)
            .or_raise(|| ErrorKind::MalformedRecord("unconvertible JSON record".to_string()))?;
        Self::new(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// String value of a top-level field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// The record's component id, if it declares one.
    pub fn name(&self) -> Option<&str> {
        self.get_str(ID_FIELD)
    }

    /// Canonical bytes used for hashing. See [`canonical`].
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical::canonicalize(&self.0)
    }

    /// The bytes written to an artifact file.
    pub fn to_pretty_json(&self) -> Result<Vec<u8>> {
        canonical::to_pretty(&self.0)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::new(value).map_err(|e| serde::de::Error::custom(&*e))
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
