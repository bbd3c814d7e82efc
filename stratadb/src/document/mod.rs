// Document values - the nested record type shared by every layer and backend

use crate::error::{StrataError, Result};
use serde_json::{Map, Value};

/// A single record. Keys are kept sorted, so serialized output is stable.
pub type Document = Map<String, Value>;

/// Name of the required identity field at the top level of every document.
pub const ID_FIELD: &str = "_id";

/// Get the `_id` of a document. It must be present and a string.
pub fn document_id(doc: &Document) -> Result<&str> {
    match doc.get(ID_FIELD) {
        Some(Value::String(id)) => Ok(id),
        Some(other) => Err(StrataError::InvalidDocument(format!(
            "_id must be a string, got {other}"
        ))),
        None => Err(StrataError::InvalidDocument(
            "document has no _id field".into(),
        )),
    }
}

/// A document matches when every filter field is present and exactly equal.
pub fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, expected)| doc.get(key) == Some(expected))
}

/// Merge two documents one level deep; fields from `overlay` win.
pub fn shallow_merge(base: &Document, overlay: &Document) -> Document {
    let mut merged = base.clone();
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Convert a serde_yaml::Value to serde_json::Value.
/// Unlike `serde_json::to_value`, non-string mapping keys are stringified
/// instead of rejected, and YAML tags are dropped instead of kept as `!tag` maps.
pub fn yaml_to_json(yaml: &serde_yaml::Value) -> Value {
    match yaml {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s.clone()),
        serde_yaml::Value::Sequence(seq) => Value::Array(seq.iter().map(yaml_to_json).collect()),
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::new();
            for (k, v) in mapping {
                map.insert(yaml_key_to_string(k), yaml_to_json(v));
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

fn yaml_key_to_string(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
