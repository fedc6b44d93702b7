//! Tagged document values (Design Note §9: replace open `map<string, any>`
//! documents with a closed variant; JSON <-> Value conversion happens only
//! at this boundary).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Object(BTreeMap<String, Value>),
    Array(Vec<Value>),
}

impl Value {
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
        }
    }

    /// Converts a parsed JSON document into the engine's closed `Value`
    /// representation. Numbers without a fractional part and within i64
    /// range become `Int`; everything else numeric becomes `Float`.
    pub fn from_json(json: &JsonValue) -> Result<Self, CoreError> {
        Ok(match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    return Err(CoreError::validation(format!("unrepresentable number: {n}")));
                }
            }
            JsonValue::String(s) => Self::String(s.clone()),
            JsonValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Self::from_json(item)?);
                }
                Self::Array(out)
            }
            JsonValue::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), Self::from_json(v)?);
                }
                Self::Object(out)
            }
        })
    }

    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(i) => JsonValue::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(JsonValue::Null, JsonValue::Number),
            Self::String(s) => JsonValue::String(s.clone()),
            Self::Bytes(b) => JsonValue::String(hex::encode(b)),
            Self::Object(map) => {
                JsonValue::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            Self::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
        }
    }
}
