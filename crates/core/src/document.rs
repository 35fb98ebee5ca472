//! Persisted documents
//!
//! A document is a JSON object. Entity records (relations, applications, ...)
//! are converted to and from documents with serde; assertions and mutations
//! address fields by dotted path (`prepare_units.0.status`), where a numeric
//! segment indexes into an array.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FleetError, FleetResult};

/// A JSON object stored under one `(collection, id)` key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a record into a document
    ///
    /// Fails with `Serialization` if the record does not serialize to an object.
    pub fn from_record<T: Serialize>(record: &T) -> FleetResult<Self> {
        match serde_json::to_value(record)? {
            Value::Object(map) => Ok(Document(map)),
            other => Err(FleetError::Serialization(format!(
                "record serialized to {} instead of an object",
                kind_of(&other)
            ))),
        }
    }

    /// Convert this document into a record
    pub fn to_record<T: DeserializeOwned>(&self) -> FleetResult<T> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    /// Builder-style top-level field insert
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Look up a field by dotted path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Look up an integer field by dotted path
    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }

    /// Set a field by dotted path
    ///
    /// Missing intermediate object fields are created. Array segments must
    /// index an existing element.
    pub fn set(&mut self, path: &str, value: Value) -> FleetResult<()> {
        let slot = self.slot_mut(path)?;
        *slot = value;
        Ok(())
    }

    /// Add `delta` to an integer field; a missing field counts as zero
    pub fn inc(&mut self, path: &str, delta: i64) -> FleetResult<()> {
        let slot = self.slot_mut(path)?;
        let current = match &*slot {
            Value::Null => 0,
            Value::Number(n) => n.as_i64().ok_or_else(|| {
                FleetError::store(format!("cannot increment non-integer field {path:?}"))
            })?,
            other => {
                return Err(FleetError::store(format!(
                    "cannot increment {} field {path:?}",
                    kind_of(other)
                )))
            }
        };
        let next = current.checked_add(delta).ok_or_else(|| {
            FleetError::store(format!("increment of field {path:?} overflows"))
        })?;
        *slot = Value::from(next);
        Ok(())
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Number of top-level fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the document has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn slot_mut(&mut self, path: &str) -> FleetResult<&mut Value> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(FleetError::store(format!("malformed field path {path:?}")));
        }
        let (first, rest) = segments
            .split_first()
            .ok_or_else(|| FleetError::store("empty field path"))?;
        let mut current = self.0.entry(first.to_string()).or_insert(Value::Null);
        for segment in rest {
            if current.is_null() {
                *current = Value::Object(Map::new());
            }
            current = match current {
                Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
                Value::Array(items) => {
                    let index = segment.parse::<usize>().map_err(|_| {
                        FleetError::store(format!(
                            "path {path:?}: segment {segment:?} does not index an array"
                        ))
                    })?;
                    let len = items.len();
                    items.get_mut(index).ok_or_else(|| {
                        FleetError::store(format!(
                            "path {path:?}: index {index} out of bounds (len {len})"
                        ))
                    })?
                }
                other => {
                    return Err(FleetError::store(format!(
                        "path {path:?}: cannot descend into {}",
                        kind_of(other)
                    )))
                }
            };
        }
        Ok(current)
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Document(map)
    }
}

impl TryFrom<Value> for Document {
    type Error = FleetError;

    fn try_from(value: Value) -> FleetResult<Self> {
        match value {
            Value::Object(map) => Ok(Document(map)),
            other => Err(FleetError::store(format!(
                "document must be an object, got {}",
                kind_of(&other)
            ))),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
