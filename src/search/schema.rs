//! Schema registry: declared fields, glob rules, and field-kind resolution.
//!
//! Metadata keys that are not declared are routed by naming convention to one
//! of the glob rules (`*_t`, `*_k`, `*_b`, `*_n`, `*_d`). Keys whose treatment
//! cannot be inferred are dropped rather than rejected: heterogeneous caller
//! metadata must never block ingestion.

use serde::{Deserialize, Serialize};

use crate::model::types::{ID, PAGE_CONTENT};

/// Name suffix that marks a string value as a date.
pub const DATE_MARKER: &str = "_date";

/// Storage/indexing treatment of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Stemmed, tokenized free text.
    FreeText,
    /// A single verbatim token (ids, extensions, hashes).
    ExactToken,
    /// Comma-separated verbatim tokens (paths, tags).
    MultiToken,
    Boolean,
    Number,
    DateTime,
}

impl FieldKind {
    /// Whether values of this kind are stored as text.
    pub fn is_text(self) -> bool {
        matches!(
            self,
            FieldKind::FreeText | FieldKind::ExactToken | FieldKind::MultiToken
        )
    }

    /// Whether the stemming analyzer applies.
    pub fn is_analyzed(self) -> bool {
        self == FieldKind::FreeText
    }
}

/// A declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub stored: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            stored: true,
        }
    }
}

/// A glob rule matching every undeclared name that ends with `suffix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobRule {
    pub suffix: String,
    pub kind: FieldKind,
}

impl GlobRule {
    pub fn new(suffix: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            suffix: suffix.into(),
            kind,
        }
    }

    pub fn pattern(&self) -> String {
        format!("*{}", self.suffix)
    }

    pub fn matches(&self, name: &str) -> bool {
        name.len() > self.suffix.len() && name.ends_with(&self.suffix)
    }
}

/// Outcome of resolving one metadata key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldTreatment {
    /// The key is a declared field and is kept as-is.
    Declared(FieldKind),
    /// The key is routed to a glob rule under `name` (possibly suffixed).
    Dynamic { name: String, kind: FieldKind },
    /// No treatment could be inferred; the pair is not indexed.
    Dropped,
}

impl FieldTreatment {
    /// Field name the value ends up under, if it is kept.
    pub fn target_name<'a>(&'a self, original: &'a str) -> Option<&'a str> {
        match self {
            FieldTreatment::Declared(_) => Some(original),
            FieldTreatment::Dynamic { name, .. } => Some(name),
            FieldTreatment::Dropped => None,
        }
    }

    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            FieldTreatment::Declared(kind) | FieldTreatment::Dynamic { kind, .. } => Some(*kind),
            FieldTreatment::Dropped => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRegistry {
    declared: Vec<FieldDef>,
    globs: Vec<GlobRule>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::default_schema()
    }
}

impl SchemaRegistry {
    /// Registry with only the two mandatory fields and no glob rules.
    pub fn minimal() -> Self {
        Self {
            declared: vec![
                FieldDef::new(PAGE_CONTENT, FieldKind::FreeText),
                FieldDef::new(ID, FieldKind::ExactToken),
            ],
            globs: Vec::new(),
        }
    }

    /// The canonical schema every new index starts from.
    pub fn default_schema() -> Self {
        use FieldKind::*;
        let mut registry = Self::minimal();
        for (name, kind) in [
            ("source", MultiToken),
            ("source_search", FreeText),
            ("filepath", MultiToken),
            ("filepath_search", FreeText),
            ("filename", ExactToken),
            ("ocr", Boolean),
            ("table", Boolean),
            ("markdown", Boolean),
            ("page", Number),
            ("document_title", FreeText),
            ("md5", ExactToken),
            ("mimetype", ExactToken),
            ("extension", ExactToken),
            ("filesize", Number),
            ("createdate", DateTime),
            ("modifydate", DateTime),
            ("tags", MultiToken),
            ("notes", FreeText),
            ("msg", FreeText),
        ] {
            registry.declared.push(FieldDef::new(name, kind));
        }
        registry.globs = vec![
            GlobRule::new("_t", FreeText),
            GlobRule::new("_k", MultiToken),
            GlobRule::new("_b", Boolean),
            GlobRule::new("_n", Number),
            GlobRule::new("_d", DateTime),
        ];
        registry
    }

    /// Assemble a registry from parts, e.g. when reattaching to a persisted index.
    pub fn from_parts(declared: Vec<FieldDef>, globs: Vec<GlobRule>) -> Self {
        Self { declared, globs }
    }

    /// The glob rules every default index carries.
    pub fn default_globs() -> Vec<GlobRule> {
        Self::default_schema().globs
    }

    /// Declare (or redeclare) a field.
    pub fn with_field(mut self, def: FieldDef) -> Self {
        self.declared.retain(|d| d.name != def.name);
        self.declared.push(def);
        self
    }

    pub fn with_glob(mut self, rule: GlobRule) -> Self {
        self.globs.retain(|g| g.suffix != rule.suffix);
        self.globs.push(rule);
        self
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.declared
    }

    pub fn globs(&self) -> &[GlobRule] {
        &self.globs
    }

    pub fn declared(&self, name: &str) -> Option<&FieldDef> {
        self.declared.iter().find(|d| d.name == name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared(name).is_some()
    }

    /// Glob rule for an undeclared name. Longer suffixes win.
    pub fn glob_for(&self, name: &str) -> Option<&GlobRule> {
        if self.is_declared(name) {
            return None;
        }
        self.globs
            .iter()
            .filter(|g| g.matches(name))
            .max_by_key(|g| g.suffix.len())
    }

    /// Kind of an already-resolved field name, declared or dynamic.
    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.declared(name)
            .map(|d| d.kind)
            .or_else(|| self.glob_for(name).map(|g| g.kind))
    }

    /// Resolve the treatment of a metadata key given its value.
    ///
    /// Declared names are kept verbatim. Otherwise the value's type picks a
    /// glob rule and the name is suffixed unless it already carries the suffix.
    pub fn resolve(&self, name: &str, value: &serde_json::Value) -> FieldTreatment {
        use serde_json::Value;

        if let Some(def) = self.declared(name) {
            return FieldTreatment::Declared(def.kind);
        }
        match value {
            Value::Bool(_) => self.suffixed(name, "_b"),
            Value::Number(_) => self.suffixed(name, "_n"),
            Value::String(_) => {
                if name.ends_with(DATE_MARKER) || self.rule_kind(name) == Some(FieldKind::DateTime)
                {
                    self.suffixed(name, "_d")
                } else if self.rule_kind(name) == Some(FieldKind::FreeText) {
                    self.suffixed(name, "_t")
                } else {
                    self.suffixed(name, "_k")
                }
            }
            _ => FieldTreatment::Dropped,
        }
    }

    fn rule_kind(&self, name: &str) -> Option<FieldKind> {
        self.glob_for(name).map(|g| g.kind)
    }

    fn suffixed(&self, name: &str, suffix: &str) -> FieldTreatment {
        let Some(rule) = self.globs.iter().find(|g| g.suffix == suffix) else {
            return FieldTreatment::Dropped;
        };
        let target = if rule.matches(name) {
            name.to_string()
        } else {
            format!("{name}{suffix}")
        };
        if self.is_declared(&target) {
            // Suffixing must not alias a declared field of another kind.
            return FieldTreatment::Dropped;
        }
        FieldTreatment::Dynamic {
            name: target,
            kind: rule.kind,
        }
    }
}
