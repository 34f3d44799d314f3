//! Mango query document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A CouchDB Mango `_find` request body.
///
/// `selector` is always present; the other members are omitted when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MangoQuery {
    pub selector: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl MangoQuery {
    /// Query matching every document.
    pub fn match_all() -> Self {
        Self {
            selector: Value::Object(Map::new()),
            sort: Vec::new(),
            fields: None,
            limit: None,
        }
    }

    /// Build the JSON document.
    pub fn to_value(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("selector".to_string(), self.selector.clone());
        if !self.sort.is_empty() {
            doc.insert("sort".to_string(), Value::Array(self.sort.clone()));
        }
        if let Some(fields) = &self.fields {
            doc.insert(
                "fields".to_string(),
                Value::Array(fields.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(limit) = self.limit {
            doc.insert("limit".to_string(), Value::from(limit));
        }
        Value::Object(doc)
    }

    pub fn to_pretty_string(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:#}", self.to_value()))
    }
}

/// Compact JSON with members in `selector`, `sort`, `fields`, `limit` order.
impl fmt::Display for MangoQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Single-member JSON object.
pub(crate) fn object(key: impl Into<String>, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.into(), value);
    Value::Object(map)
}
