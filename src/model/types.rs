//! Document types shared by the mapper, the query planner and the store facade.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form metadata attached to a document.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Name of the required free-text field.
pub const PAGE_CONTENT: &str = "page_content";
/// Name of the unique key field.
pub const ID: &str = "id";

/// A generic inbound (or retrieved) document: free text plus metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Builder-style metadata insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The caller-supplied or stored id, if it is a non-empty string.
    pub fn id(&self) -> Option<&str> {
        self.metadata
            .get(ID)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Build a document from a flat dict: `page_content` becomes the text,
    /// every other key becomes metadata. Returns `None` when the value is not
    /// an object or has no string `page_content`.
    pub fn from_dict(value: serde_json::Value) -> Option<Self> {
        let serde_json::Value::Object(mut map) = value else {
            return None;
        };
        let page_content = match map.remove(PAGE_CONTENT)? {
            serde_json::Value::String(s) => s,
            _ => return None,
        };
        Some(Self {
            page_content,
            metadata: map,
        })
    }

    /// Flatten back into a dict with `page_content` alongside the metadata.
    pub fn to_dict(&self) -> Metadata {
        let mut map = self.metadata.clone();
        map.insert(
            PAGE_CONTENT.to_string(),
            serde_json::Value::String(self.page_content.clone()),
        );
        map
    }
}

/// A typed value after schema resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(DateTime<Utc>),
}

impl FieldValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Int(n) => serde_json::Value::from(*n),
            FieldValue::Float(f) => serde_json::Value::from(*f),
            FieldValue::Date(d) => serde_json::Value::String(d.to_rfc3339()),
        }
    }
}

/// A document after mapping: ready to hand to the index engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    pub page_content: String,
    /// Metadata keyed by resolved field name (original or suffixed).
    pub fields: BTreeMap<String, FieldValue>,
}

impl DocumentRecord {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}
