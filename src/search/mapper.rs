//! Document mapper: inbound [`Document`] to indexable [`DocumentRecord`].
//!
//! Mapping never fails. Metadata the schema cannot place, or values that do
//! not fit their field's kind, are dropped and logged at trace level.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use unicode_normalization::UnicodeNormalization;

use crate::model::types::{Document, DocumentRecord, FieldValue, ID, PAGE_CONTENT};
use crate::search::schema::{FieldKind, FieldTreatment, SchemaRegistry};

/// Exact-match fields that also get a stemmed, free-text shadow copy.
pub const SEARCH_MIRRORS: &[(&str, &str)] = &[
    ("source", "source_search"),
    ("filepath", "filepath_search"),
];

pub fn map_document(registry: &SchemaRegistry, doc: &Document) -> DocumentRecord {
    let mut fields = BTreeMap::new();
    for (key, value) in &doc.metadata {
        if key == PAGE_CONTENT || key == ID {
            continue;
        }
        let treatment = registry.resolve(key, value);
        let (Some(name), Some(kind)) = (treatment.target_name(key), treatment.kind()) else {
            tracing::trace!(field = key.as_str(), "metadata field dropped: no treatment");
            continue;
        };
        let declared = matches!(treatment, FieldTreatment::Declared(_));
        match coerce(kind, declared, value) {
            Some(v) => {
                fields.insert(name.to_string(), v);
            }
            None => {
                tracing::trace!(field = key.as_str(), ?kind, "metadata field dropped: value does not fit kind");
            }
        }
    }

    for (primary, mirror) in SEARCH_MIRRORS {
        if registry.kind_of(mirror).is_none() {
            continue;
        }
        if let Some(FieldValue::Text(value)) = fields.get(*primary) {
            let value = value.clone();
            fields.insert((*mirror).to_string(), FieldValue::Text(value));
        }
    }

    DocumentRecord {
        id: resolve_id(doc),
        page_content: normalize_text(&doc.page_content),
        fields,
    }
}

/// Caller-supplied id when present and non-empty, else a fresh random one.
fn resolve_id(doc: &Document) -> String {
    match doc.metadata.get(ID) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => generate_id(),
    }
}

/// 128 random bits as 32 lowercase hex chars.
pub fn generate_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// NFKC-normalize text so compatibility forms (ligatures, full-width digits,
/// decomposed accents) compare equal to their canonical spelling.
pub fn normalize_text(text: &str) -> String {
    text.nfkc().collect()
}

/// Fit a JSON value into a field kind. Declared numbers are integers.
pub fn coerce(kind: FieldKind, declared: bool, value: &serde_json::Value) -> Option<FieldValue> {
    use serde_json::Value;

    match kind {
        FieldKind::FreeText | FieldKind::ExactToken | FieldKind::MultiToken => match value {
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            Value::Number(n) => Some(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Some(FieldValue::Text(b.to_string())),
            _ => None,
        },
        FieldKind::Boolean => match value {
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            Value::String(s) => parse_bool(s).map(FieldValue::Bool),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Some(FieldValue::Bool(false)),
                Some(1) => Some(FieldValue::Bool(true)),
                _ => None,
            },
            _ => None,
        },
        FieldKind::Number => {
            let number = match value {
                Value::Number(n) => n
                    .as_i64()
                    .map(FieldValue::Int)
                    .or_else(|| n.as_f64().map(FieldValue::Float)),
                Value::String(s) => {
                    let s = s.trim();
                    s.parse::<i64>()
                        .map(FieldValue::Int)
                        .ok()
                        .or_else(|| s.parse::<f64>().ok().map(FieldValue::Float))
                }
                _ => None,
            }?;
            match number {
                FieldValue::Float(f) if !f.is_finite() => None,
                FieldValue::Float(f) if declared => {
                    (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then(|| FieldValue::Int(f as i64))
                }
                other => Some(other),
            }
        }
        FieldKind::DateTime => match value {
            Value::String(s) => parse_datetime(s).map(FieldValue::Date),
            _ => None,
        },
    }
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Accepts RFC 3339, naive `YYYY-MM-DD[T ]HH:MM:SS` (taken as UTC) and bare dates.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
