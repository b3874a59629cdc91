//! Index engine adapter over tantivy.
//!
//! This is the only module that touches tantivy internals for index lifecycle
//! and writes. An index lives at `location/name/`; `meta.json` marks it as
//! present. Declared fields map one-to-one onto tantivy fields; glob-matched
//! dynamic fields are stored in two JSON object fields.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use parking_lot::{Mutex, MutexGuard};
use tantivy::collector::Count;
use tantivy::query::{Query, QueryParser, RegexQuery, TermQuery};
use tantivy::schema::{
    DateOptions, Field, FieldType, IndexRecordOption, JsonObjectOptions, NumericOptions,
    OwnedValue, Schema, TextFieldIndexing, TextOptions,
};
use tantivy::tokenizer::{RegexTokenizer, TextAnalyzer};
use tantivy::{
    DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term,
};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::model::types::{Document, DocumentRecord, FieldValue, ID, Metadata, PAGE_CONTENT};
use crate::search::mapper::coerce;
use crate::search::schema::{FieldDef, FieldKind, SchemaRegistry};

/// Stemming analyzer (built into tantivy).
pub const STEM_TOKENIZER: &str = "en_stem";
/// Whole value as one token (built into tantivy).
pub const RAW_TOKENIZER: &str = "raw";
/// Comma-separated, whitespace-trimmed tokens. Registered on every index.
pub const COMMA_TOKENIZER: &str = "commas";

/// JSON field holding `*_t` dynamic fields.
pub const DYNAMIC_TEXT: &str = "dynamic_text";
/// JSON field holding every other dynamic field.
pub const DYNAMIC_ATTRS: &str = "dynamic_attrs";

const META_FILE: &str = "meta.json";

#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub memory_budget_bytes: usize,
    pub num_threads: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 64 * 1024 * 1024,
            num_threads: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSlot {
    pub field: Field,
    pub kind: FieldKind,
}

/// Resolved tantivy handles for every declared field.
#[derive(Debug, Clone)]
pub struct Fields {
    declared: HashMap<String, FieldSlot>,
    pub id: Field,
    pub page_content: Field,
    pub dynamic_text: Field,
    pub dynamic_attrs: Field,
}

impl Fields {
    fn resolve(schema: &Schema, registry: &SchemaRegistry) -> Result<Self> {
        let mut declared = HashMap::new();
        for def in registry.fields() {
            let field = schema.get_field(&def.name)?;
            declared.insert(
                def.name.clone(),
                FieldSlot {
                    field,
                    kind: def.kind,
                },
            );
        }
        Ok(Self {
            declared,
            id: schema.get_field(ID)?,
            page_content: schema.get_field(PAGE_CONTENT)?,
            dynamic_text: schema.get_field(DYNAMIC_TEXT)?,
            dynamic_attrs: schema.get_field(DYNAMIC_ATTRS)?,
        })
    }

    pub fn get(&self, name: &str) -> Option<FieldSlot> {
        self.declared.get(name).copied()
    }
}

/// A live tantivy index plus its schema registry and single writer slot.
pub struct TantivyIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<Option<IndexWriter>>,
    registry: SchemaRegistry,
    fields: Fields,
    location: Option<PathBuf>,
    name: String,
    writer_options: WriterOptions,
}

impl std::fmt::Debug for TantivyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyIndex")
            .field("location", &self.location)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl TantivyIndex {
    pub fn index_path(location: &Path, name: &str) -> PathBuf {
        location.join(name)
    }

    pub fn exists(location: &Path, name: &str) -> bool {
        Self::index_path(location, name).join(META_FILE).exists()
    }

    /// Create a new persistent index. Fails if one already exists.
    pub fn create(
        location: &Path,
        name: &str,
        registry: &SchemaRegistry,
        writer_options: WriterOptions,
    ) -> Result<Self> {
        if Self::exists(location, name) {
            return Err(StoreError::AlreadyExists {
                location: location.to_path_buf(),
                name: name.to_string(),
            });
        }
        let dir = Self::index_path(location, name);
        std::fs::create_dir_all(&dir)?;
        let index = Index::create_in_dir(&dir, build_schema(registry))?;
        info!(path = %dir.display(), "created index");
        Self::from_index(
            index,
            registry.clone(),
            Some(location.to_path_buf()),
            name,
            writer_options,
        )
    }

    /// Attach to an existing persistent index. Fails if it is absent.
    pub fn open(location: &Path, name: &str, writer_options: WriterOptions) -> Result<Self> {
        if !Self::exists(location, name) {
            return Err(StoreError::NotFound {
                location: location.to_path_buf(),
                name: name.to_string(),
            });
        }
        let dir = Self::index_path(location, name);
        let index = Index::open_in_dir(&dir)?;
        let registry = registry_from_schema(&index.schema());
        info!(path = %dir.display(), fields = registry.fields().len(), "opened index");
        Self::from_index(
            index,
            registry,
            Some(location.to_path_buf()),
            name,
            writer_options,
        )
    }

    /// Ephemeral index that lives as long as the process.
    pub fn create_in_ram(registry: &SchemaRegistry, writer_options: WriterOptions) -> Result<Self> {
        let index = Index::create_in_ram(build_schema(registry));
        Self::from_index(index, registry.clone(), None, "", writer_options)
    }

    fn from_index(
        index: Index,
        registry: SchemaRegistry,
        location: Option<PathBuf>,
        name: &str,
        writer_options: WriterOptions,
    ) -> Result<Self> {
        register_tokenizers(&index)?;
        let fields = Fields::resolve(&index.schema(), &registry)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(None),
            registry,
            fields,
            location,
            name: name.to_string(),
            writer_options,
        })
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn writer_options(&self) -> &WriterOptions {
        &self.writer_options
    }

    /// Point-in-time snapshot; later commits are invisible to it.
    pub fn searcher(&self) -> Searcher {
        self.reader.searcher()
    }

    pub fn doc_count(&self, include_deleted: bool) -> u64 {
        let searcher = self.searcher();
        if include_deleted {
            searcher
                .segment_readers()
                .iter()
                .map(|segment| u64::from(segment.max_doc()))
                .sum()
        } else {
            searcher.num_docs()
        }
    }

    /// Open the single writer transaction, blocking while another is open.
    pub fn begin_write(&self) -> Result<WriteTxn<'_>> {
        let mut guard = self.writer.lock();
        if guard.is_none() {
            let writer = self
                .index
                .writer_with_num_threads(
                    self.writer_options.num_threads.max(1),
                    self.writer_options.memory_budget_bytes,
                )
                .map_err(|e| StoreError::mutation("open writer", e))?;
            *guard = Some(writer);
        }
        Ok(WriteTxn {
            guard,
            index: &self.index,
            reader: &self.reader,
            id_field: self.fields.id,
            committed: false,
        })
    }

    /// Drop the writer (and its directory lock). The next transaction reopens it.
    pub fn release_writer(&self) {
        self.writer.lock().take();
    }

    /// Lazily walk every live document in a snapshot taken now.
    pub fn enumerate_all(&self) -> DocumentStream<'_> {
        let searcher = self.searcher();
        let mut addresses = Vec::new();
        for (ord, segment) in searcher.segment_readers().iter().enumerate() {
            for doc_id in segment.doc_ids_alive() {
                addresses.push(DocAddress::new(ord as u32, doc_id));
            }
        }
        debug!(docs = addresses.len(), "opened read snapshot for enumeration");
        DocumentStream {
            index: self,
            searcher,
            addresses: addresses.into_iter(),
        }
    }

    pub fn count_matches(&self, query: &dyn Query) -> Result<usize> {
        Ok(self.searcher().search(query, &Count)?)
    }

    pub fn to_tantivy_doc(&self, record: &DocumentRecord) -> TantivyDocument {
        let mut doc = TantivyDocument::default();
        doc.add_text(self.fields.id, &record.id);
        doc.add_text(self.fields.page_content, &record.page_content);

        let mut dynamic_text = BTreeMap::new();
        let mut dynamic_attrs = BTreeMap::new();
        for (name, value) in &record.fields {
            if let Some(slot) = self.fields.get(name) {
                add_declared(&mut doc, slot, value);
            } else if let Some(kind) = self.registry.kind_of(name) {
                let bucket = if kind == FieldKind::FreeText {
                    &mut dynamic_text
                } else {
                    &mut dynamic_attrs
                };
                bucket.insert(name.clone(), owned_value(value));
            }
        }
        if !dynamic_text.is_empty() {
            doc.add_object(self.fields.dynamic_text, dynamic_text);
        }
        if !dynamic_attrs.is_empty() {
            doc.add_object(self.fields.dynamic_attrs, dynamic_attrs);
        }
        doc
    }

    /// Rebuild a caller-facing document from stored values.
    pub fn to_document(&self, doc: &TantivyDocument) -> Document {
        let mut metadata = Metadata::new();
        let mut page_content = String::new();
        for def in self.registry.fields() {
            let Some(slot) = self.fields.get(&def.name) else {
                continue;
            };
            let Some(value) = doc.get_first(slot.field) else {
                continue;
            };
            if def.name == PAGE_CONTENT {
                if let OwnedValue::Str(text) = value {
                    page_content = text.clone();
                }
                continue;
            }
            metadata.insert(def.name.clone(), owned_to_json(value));
        }
        for field in [self.fields.dynamic_text, self.fields.dynamic_attrs] {
            if let Some(OwnedValue::Object(entries)) = doc.get_first(field) {
                for (key, value) in entries.iter() {
                    metadata.insert(key.to_string(), owned_to_json(value));
                }
            }
        }
        Document {
            page_content,
            metadata,
        }
    }

    /// Exact-term match on `name`. Declared fields get a typed term; dynamic
    /// fields go through the JSON path of their bucket.
    pub fn exact_query(&self, name: &str, value: &serde_json::Value) -> Result<Box<dyn Query>> {
        let clause = format!("{name}:{value}");
        if let Some(slot) = self.fields.get(name) {
            let typed = coerce(slot.kind, true, value)
                .ok_or_else(|| StoreError::query(&clause, "value does not fit the field kind"))?;
            let term = match typed {
                FieldValue::Text(s) => Term::from_field_text(slot.field, &s),
                FieldValue::Bool(b) => Term::from_field_bool(slot.field, b),
                FieldValue::Int(n) => Term::from_field_i64(slot.field, n),
                FieldValue::Date(d) => Term::from_field_date(slot.field, tantivy_date(&d)),
                FieldValue::Float(_) => {
                    return Err(StoreError::query(&clause, "value does not fit the field kind"));
                }
            };
            return Ok(Box::new(TermQuery::new(term, IndexRecordOption::Basic)));
        }
        let Some(kind) = self.registry.kind_of(name) else {
            return Err(StoreError::query(&clause, format!("unknown field `{name}`")));
        };
        let literal = match coerce(kind, false, value) {
            Some(FieldValue::Text(s)) => quote(&s),
            Some(FieldValue::Bool(b)) => b.to_string(),
            Some(FieldValue::Int(n)) => n.to_string(),
            Some(FieldValue::Float(f)) => format!("{f:?}"),
            Some(FieldValue::Date(d)) => quote(&d.to_rfc3339_opts(SecondsFormat::Secs, true)),
            None => return Err(StoreError::query(&clause, "value does not fit the field kind")),
        };
        let text = format!("{}.{name}:{literal}", dynamic_bucket(kind));
        let parser = QueryParser::for_index(&self.index, Vec::new());
        parser
            .parse_query(&text)
            .map_err(|e| StoreError::query(&clause, e))
    }

    /// Token-prefix match on a declared text field.
    pub fn prefix_query(&self, name: &str, prefix: &str) -> Result<Box<dyn Query>> {
        let clause = format!("{name}:{prefix}*");
        let slot = self
            .fields
            .get(name)
            .filter(|slot| slot.kind.is_text())
            .ok_or_else(|| {
                StoreError::query(&clause, "prefix matching needs a declared text field")
            })?;
        let pattern = format!("{}.*", escape_regex(prefix));
        let query =
            RegexQuery::from_pattern(&pattern, slot.field).map_err(|e| StoreError::query(&clause, e))?;
        Ok(Box::new(query))
    }
}

/// The single open writer transaction.
///
/// Holding it holds the writer lock. Dropping it without [`WriteTxn::commit`]
/// rolls back every staged operation.
pub struct WriteTxn<'a> {
    guard: MutexGuard<'a, Option<IndexWriter>>,
    index: &'a Index,
    reader: &'a IndexReader,
    id_field: Field,
    committed: bool,
}

impl WriteTxn<'_> {
    fn writer(&mut self) -> Result<&mut IndexWriter> {
        self.guard
            .as_mut()
            .ok_or_else(|| StoreError::mutation("write", "writer was released"))
    }

    /// Replace whatever is stored under `id` with `doc`.
    pub fn update_by_key(&mut self, id: &str, doc: TantivyDocument) -> Result<()> {
        let term = Term::from_field_text(self.id_field, id);
        let writer = self.writer()?;
        writer.delete_term(term);
        writer
            .add_document(doc)
            .map_err(|e| StoreError::mutation("add document", e))?;
        Ok(())
    }

    pub fn delete_by_term(&mut self, term: Term) -> Result<()> {
        self.writer()?.delete_term(term);
        Ok(())
    }

    pub fn delete_by_doc_id(&mut self, id: &str) -> Result<()> {
        let term = Term::from_field_text(self.id_field, id);
        self.delete_by_term(term)
    }

    pub fn delete_query(&mut self, query: Box<dyn Query>) -> Result<()> {
        self.writer()?
            .delete_query(query)
            .map_err(|e| StoreError::mutation("delete", e))?;
        Ok(())
    }

    /// Make every staged operation durable and visible at once.
    pub fn commit(mut self, optimize: bool) -> Result<()> {
        let index = self.index;
        let reader = self.reader;
        let writer = self.writer()?;
        writer
            .commit()
            .map_err(|e| StoreError::mutation("commit", e))?;
        if optimize {
            let segments = index.searchable_segment_ids()?;
            if !segments.is_empty() {
                writer
                    .merge(&segments)
                    .wait()
                    .map_err(|e| StoreError::mutation("optimize", e))?;
            }
        }
        self.committed = true;
        reader.reload()?;
        Ok(())
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let Some(writer) = self.guard.as_mut() else {
            return;
        };
        match writer.rollback() {
            Ok(_) => debug!("writer transaction rolled back"),
            Err(e) => {
                warn!(error = %e, "rollback failed; discarding writer");
                self.guard.take();
            }
        }
    }
}

/// Lazy iterator over every live document of one snapshot.
///
/// The snapshot is released when the stream is dropped, exhausted or not.
pub struct DocumentStream<'a> {
    index: &'a TantivyIndex,
    searcher: Searcher,
    addresses: std::vec::IntoIter<DocAddress>,
}

impl DocumentStream<'_> {
    pub fn remaining(&self) -> usize {
        self.addresses.len()
    }

    /// Release the snapshot now.
    pub fn close(self) {}
}

impl Iterator for DocumentStream<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        let address = self.addresses.next()?;
        Some(
            self.searcher
                .doc::<TantivyDocument>(address)
                .map(|doc| self.index.to_document(&doc))
                .map_err(StoreError::from),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.addresses.size_hint()
    }
}

impl Drop for DocumentStream<'_> {
    fn drop(&mut self) {
        debug!(unread = self.addresses.len(), "released enumeration snapshot");
    }
}

pub fn build_schema(registry: &SchemaRegistry) -> Schema {
    let mut builder = Schema::builder();
    for def in registry.fields() {
        let name = def.name.as_str();
        match def.kind {
            FieldKind::FreeText => {
                builder.add_text_field(name, text_options(STEM_TOKENIZER, def.stored));
            }
            FieldKind::ExactToken => {
                builder.add_text_field(name, text_options(RAW_TOKENIZER, def.stored));
            }
            FieldKind::MultiToken => {
                builder.add_text_field(name, text_options(COMMA_TOKENIZER, def.stored));
            }
            FieldKind::Boolean => {
                builder.add_bool_field(name, numeric_options(def.stored));
            }
            FieldKind::Number => {
                builder.add_i64_field(name, numeric_options(def.stored));
            }
            FieldKind::DateTime => {
                let opts = DateOptions::default().set_indexed();
                builder.add_date_field(name, if def.stored { opts.set_stored() } else { opts });
            }
        }
    }
    builder.add_json_field(DYNAMIC_TEXT, json_options(STEM_TOKENIZER));
    builder.add_json_field(DYNAMIC_ATTRS, json_options(COMMA_TOKENIZER));
    builder.build()
}

/// Recover declared fields from a persisted tantivy schema.
pub fn registry_from_schema(schema: &Schema) -> SchemaRegistry {
    let mut declared = Vec::new();
    let mut has_dynamic = false;
    for (_, entry) in schema.fields() {
        let name = entry.name();
        if name == DYNAMIC_TEXT || name == DYNAMIC_ATTRS {
            has_dynamic = true;
            continue;
        }
        let kind = match entry.field_type() {
            FieldType::Str(opts) => match opts.get_indexing_options().map(|i| i.tokenizer()) {
                Some(STEM_TOKENIZER) => FieldKind::FreeText,
                Some(COMMA_TOKENIZER) => FieldKind::MultiToken,
                _ => FieldKind::ExactToken,
            },
            FieldType::Bool(_) => FieldKind::Boolean,
            FieldType::I64(_) | FieldType::U64(_) | FieldType::F64(_) => FieldKind::Number,
            FieldType::Date(_) => FieldKind::DateTime,
            _ => continue,
        };
        declared.push(FieldDef {
            name: name.to_string(),
            kind,
            stored: entry.is_stored(),
        });
    }
    let globs = if has_dynamic {
        SchemaRegistry::default_globs()
    } else {
        Vec::new()
    };
    SchemaRegistry::from_parts(declared, globs)
}

/// JSON bucket that holds dynamic fields of `kind`.
pub fn dynamic_bucket(kind: FieldKind) -> &'static str {
    if kind == FieldKind::FreeText {
        DYNAMIC_TEXT
    } else {
        DYNAMIC_ATTRS
    }
}

fn register_tokenizers(index: &Index) -> Result<()> {
    let commas = RegexTokenizer::new(r"[^,\s](?:[^,]*[^,\s])?")?;
    index
        .tokenizers()
        .register(COMMA_TOKENIZER, TextAnalyzer::builder(commas).build());
    Ok(())
}

fn text_options(tokenizer: &str, stored: bool) -> TextOptions {
    let opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(tokenizer)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    if stored { opts.set_stored() } else { opts }
}

fn numeric_options(stored: bool) -> NumericOptions {
    let opts = NumericOptions::default().set_indexed();
    if stored { opts.set_stored() } else { opts }
}

fn json_options(tokenizer: &str) -> JsonObjectOptions {
    JsonObjectOptions::default().set_stored().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(tokenizer)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    )
}

fn add_declared(doc: &mut TantivyDocument, slot: FieldSlot, value: &FieldValue) {
    match (slot.kind, value) {
        (kind, FieldValue::Text(s)) if kind.is_text() => doc.add_text(slot.field, s),
        (FieldKind::Boolean, FieldValue::Bool(b)) => doc.add_bool(slot.field, *b),
        (FieldKind::Number, FieldValue::Int(n)) => doc.add_i64(slot.field, *n),
        (FieldKind::DateTime, FieldValue::Date(d)) => doc.add_date(slot.field, tantivy_date(d)),
        (kind, other) => {
            debug!(?kind, value = ?other, "skipping value that does not fit declared field");
        }
    }
}

fn owned_value(value: &FieldValue) -> OwnedValue {
    match value {
        FieldValue::Text(s) => OwnedValue::Str(s.clone()),
        FieldValue::Bool(b) => OwnedValue::Bool(*b),
        FieldValue::Int(n) => OwnedValue::I64(*n),
        FieldValue::Float(f) => OwnedValue::F64(*f),
        FieldValue::Date(d) => OwnedValue::Date(tantivy_date(d)),
    }
}

pub fn owned_to_json(value: &OwnedValue) -> serde_json::Value {
    match value {
        OwnedValue::Str(s) => serde_json::Value::String(s.clone()),
        OwnedValue::Bool(b) => serde_json::Value::Bool(*b),
        OwnedValue::I64(n) => serde_json::Value::from(*n),
        OwnedValue::U64(n) => serde_json::Value::from(*n),
        OwnedValue::F64(f) => serde_json::Value::from(*f),
        OwnedValue::Date(d) => {
            chrono::DateTime::from_timestamp_micros(d.into_timestamp_micros())
                .map(|dt| serde_json::Value::String(dt.to_rfc3339()))
                .unwrap_or(serde_json::Value::Null)
        }
        OwnedValue::Array(items) => {
            serde_json::Value::Array(items.iter().map(owned_to_json).collect())
        }
        _ => serde_json::Value::Null,
    }
}

fn tantivy_date(d: &chrono::DateTime<chrono::Utc>) -> tantivy::DateTime {
    tantivy::DateTime::from_timestamp_micros(d.timestamp_micros())
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn escape_regex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
