use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

pub const ID_FIELD: &str = "id";
pub const BODY_FIELD: &str = "body";

/// Identifier shared by a content record and its template document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Accepts positive integers and non-empty strings; anything else is not an id.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number
                .as_i64()
                .filter(|id| *id > 0)
                .map(RecordId::Int),
            Value::String(text) if !text.trim().is_empty() => Some(RecordId::Text(text.clone())),
            _ => None,
        }
    }

    /// Parses an id recovered from a file name. Digits become integer ids.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        match key.parse::<i64>() {
            Ok(id) if id > 0 => Some(RecordId::Int(id)),
            Ok(_) => None,
            Err(_) => Some(RecordId::Text(key.to_string())),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

/// One blog/news item. Every field other than `body` is carried through untouched,
/// in its original key order.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRecord {
    id: RecordId,
    fields: Map<String, Value>,
}

impl ContentRecord {
    /// Returns `None` when the object has no usable `id`.
    pub fn from_fields(fields: Map<String, Value>) -> Option<Self> {
        let id = fields.get(ID_FIELD).and_then(RecordId::from_value)?;
        Some(Self { id, fields })
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn body(&self) -> Option<&str> {
        self.fields.get(BODY_FIELD).and_then(Value::as_str)
    }

    /// Absent, `null` and `""` all mean "not yet backfilled". Any other value,
    /// including whitespace or a non-string, is treated as present.
    pub fn needs_body(&self) -> bool {
        match self.fields.get(BODY_FIELD) {
            None | Some(Value::Null) => true,
            Some(Value::String(text)) => text.is_empty(),
            Some(_) => false,
        }
    }

    pub fn set_body(&mut self, body: String) {
        self.fields.insert(BODY_FIELD.to_string(), Value::String(body));
    }
}
