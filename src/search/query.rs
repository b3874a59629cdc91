//! Query planner: text preprocessing, multi-field parsing, filters,
//! pagination and highlighting.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{
    AllQuery, BooleanQuery, ConstScoreQuery, Occur, Query, QueryParser, TermQuery,
};
use tantivy::schema::{Field, IndexRecordOption, OwnedValue};
use tantivy::snippet::SnippetGenerator;
use tantivy::{DocAddress, Searcher, TantivyDocument, Term};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::model::types::{Document, Metadata, PAGE_CONTENT};
use crate::search::tantivy::{DYNAMIC_ATTRS, DYNAMIC_TEXT, TantivyIndex, dynamic_bucket};

/// Prefix of highlight keys in dict/document output.
pub const HIGHLIGHT_PREFIX: &str = "hl_";

static WORD_QMARKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\w)\?+([\s"]|$)"#).expect("valid regex"));
static FIELD_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[\s(+\-])([A-Za-z_]\w*):").expect("valid regex"));

/// Tunables shared by every query against one store.
#[derive(Debug, Clone)]
pub struct PlannerOptions {
    /// Score weight of matches in every search field after the first
    /// (1 = all fields count the same).
    pub tie_breaker: f32,
    /// Upper bound on highlight fragment length.
    pub snippet_chars: usize,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            tie_breaker: 0.9,
            snippet_chars: 150,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub text: String,
    pub fields: Vec<String>,
    pub limit: usize,
    /// 1-based.
    pub page: usize,
    pub filters: BTreeMap<String, serde_json::Value>,
    pub sub_query: Option<String>,
    pub highlight: bool,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            fields: vec![PAGE_CONTENT.to_string()],
            limit: 10,
            page: 1,
            filters: BTreeMap::new(),
            sub_query: None,
            highlight: true,
        }
    }
}

impl QueryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn sub_query(mut self, sub_query: impl Into<String>) -> Self {
        self.sub_query = Some(sub_query.into());
        self
    }

    pub fn highlight(mut self, highlight: bool) -> Self {
        self.highlight = highlight;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub document: Document,
    pub score: f32,
    /// Highlighted fragment (or raw value) per searched string field.
    pub highlights: BTreeMap<String, String>,
}

impl SearchHit {
    /// Flat dict: `page_content`, metadata, and `hl_<field>` keys.
    pub fn to_dict(&self) -> Metadata {
        let mut map = self.document.to_dict();
        for (field, fragment) in &self.highlights {
            map.insert(
                format!("{HIGHLIGHT_PREFIX}{field}"),
                serde_json::Value::String(fragment.clone()),
            );
        }
        map
    }

    /// The document with highlights folded into its metadata.
    pub fn into_document(self) -> Document {
        let mut document = self.document;
        for (field, fragment) in self.highlights {
            document.metadata.insert(
                format!("{HIGHLIGHT_PREFIX}{field}"),
                serde_json::Value::String(fragment),
            );
        }
        document
    }
}

#[derive(Debug, Clone)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    /// Matches regardless of the page window.
    pub total_hits: usize,
    pub page: usize,
    pub limit: usize,
}

impl SearchResults {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn page_count(&self) -> usize {
        if self.limit == 0 {
            0
        } else {
            self.total_hits.div_ceil(self.limit)
        }
    }
}

/// Strip question marks that end a word, a quoted phrase, or the whole query.
pub fn preprocess_query(text: &str) -> String {
    let stripped = WORD_QMARKS.replace_all(text, "${1}${2}");
    stripped
        .trim_end_matches(|c: char| c == '?' || c.is_whitespace())
        .to_string()
}

/// `(text) AND (sub)`, or whichever side is non-empty.
pub fn compose_query(text: &str, sub_query: Option<&str>) -> String {
    let sub = sub_query.map(str::trim).filter(|s| !s.is_empty());
    match (text.trim().is_empty(), sub) {
        (false, Some(sub)) => format!("({text}) AND ({sub})"),
        (true, Some(sub)) => sub.to_string(),
        (_, None) => text.to_string(),
    }
}

/// Point `name:` references at dynamic fields to their JSON bucket path.
///
/// A `name:` that is no field at all (`ratio: what is it`, `http://..`) is
/// read as plain words.
pub fn rewrite_dynamic_refs(index: &TantivyIndex, text: &str) -> String {
    let registry = index.registry();
    FIELD_REF
        .replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[2];
            match registry.kind_of(name) {
                Some(kind) if !registry.is_declared(name) => {
                    format!("{}{}.{}:", &caps[1], dynamic_bucket(kind), name)
                }
                Some(_) => caps[0].to_string(),
                None if name == DYNAMIC_TEXT || name == DYNAMIC_ATTRS => caps[0].to_string(),
                None => format!("{}{} ", &caps[1], name),
            }
        })
        .into_owned()
}

struct Highlighter {
    name: String,
    field: Field,
    generator: SnippetGenerator,
}

/// Lazily materialized hits over one read snapshot.
///
/// The snapshot stays open until the stream is dropped; dropping early,
/// exhausting it, or calling [`HitStream::close`] all release it.
pub struct HitStream<'a> {
    index: &'a TantivyIndex,
    searcher: Searcher,
    scored: std::vec::IntoIter<(f32, DocAddress)>,
    highlighters: Vec<Highlighter>,
    pub total_hits: usize,
    pub page: usize,
    pub limit: usize,
}

impl HitStream<'_> {
    pub fn close(self) {}

    fn load(&self, score: f32, address: DocAddress) -> Result<SearchHit> {
        let doc: TantivyDocument = self.searcher.doc(address)?;
        let mut highlights = BTreeMap::new();
        for hl in &self.highlighters {
            let Some(OwnedValue::Str(raw)) = doc.get_first(hl.field) else {
                continue;
            };
            let snippet = hl.generator.snippet_from_doc(&doc);
            let fragment = if snippet.highlighted().is_empty() {
                raw.clone()
            } else {
                snippet.to_html()
            };
            highlights.insert(hl.name.clone(), fragment);
        }
        Ok(SearchHit {
            document: self.index.to_document(&doc),
            score,
            highlights,
        })
    }
}

impl Iterator for HitStream<'_> {
    type Item = Result<SearchHit>;

    fn next(&mut self) -> Option<Self::Item> {
        let (score, address) = self.scored.next()?;
        Some(self.load(score, address))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.scored.size_hint()
    }
}

impl Drop for HitStream<'_> {
    fn drop(&mut self) {
        debug!(unread = self.scored.len(), "released search snapshot");
    }
}

/// Build the full engine query for a request.
pub fn plan(
    index: &TantivyIndex,
    options: &PlannerOptions,
    request: &QueryRequest,
) -> Result<(Box<dyn Query>, Vec<(String, Field)>)> {
    let mut fields = Vec::with_capacity(request.fields.len());
    for name in &request.fields {
        let slot = index.fields().get(name).ok_or_else(|| {
            StoreError::query(&request.text, format!("search field `{name}` is not declared"))
        })?;
        fields.push((name.clone(), slot.field, slot.kind));
    }
    if fields.is_empty() {
        return Err(StoreError::query(&request.text, "no search fields given"));
    }

    let text = compose_query(&preprocess_query(&request.text), request.sub_query.as_deref());
    let text = rewrite_dynamic_refs(index, &text);

    let main: Box<dyn Query> = if text.trim().is_empty() {
        Box::new(AllQuery)
    } else {
        let default_fields = fields.iter().map(|(_, field, _)| *field).collect();
        let mut parser = QueryParser::for_index(index.index(), default_fields);
        for (_, field, _) in fields.iter().skip(1) {
            parser.set_field_boost(*field, options.tie_breaker);
        }
        parser
            .parse_query(&text)
            .map_err(|e| StoreError::query(&text, e))?
    };

    let query: Box<dyn Query> = if request.filters.is_empty() {
        main
    } else {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, main)];
        for (field, value) in &request.filters {
            let exact = index.exact_query(field, value)?;
            clauses.push((Occur::Must, Box::new(ConstScoreQuery::new(exact, 0.0))));
        }
        Box::new(BooleanQuery::new(clauses))
    };

    let searched = fields
        .into_iter()
        .filter(|(_, _, kind)| kind.is_text())
        .map(|(name, field, _)| (name, field))
        .collect();
    Ok((query, searched))
}

/// Execute a request and return its page as a lazy stream.
pub fn search_lazy<'a>(
    index: &'a TantivyIndex,
    options: &PlannerOptions,
    request: &QueryRequest,
) -> Result<HitStream<'a>> {
    if request.page == 0 {
        return Err(StoreError::query(&request.text, "pages are numbered from 1"));
    }
    debug!(
        query = request.text.as_str(),
        limit = request.limit,
        page = request.page,
        filters = request.filters.len(),
        "search_start"
    );
    let (query, searched) = plan(index, options, request)?;
    let searcher = index.searcher();

    let (scored, total_hits) = if request.limit == 0 {
        (Vec::new(), searcher.search(&*query, &Count)?)
    } else {
        let offset = (request.page - 1).saturating_mul(request.limit);
        let top = TopDocs::with_limit(request.limit).and_offset(offset);
        searcher.search(&*query, &(top, Count))?
    };

    let mut highlighters = Vec::new();
    if request.highlight {
        for (name, field) in searched {
            let mut generator = SnippetGenerator::create(&searcher, &*query, field)?;
            generator.set_max_num_chars(options.snippet_chars);
            highlighters.push(Highlighter {
                name,
                field,
                generator,
            });
        }
    }

    Ok(HitStream {
        index,
        searcher,
        scored: scored.into_iter(),
        highlighters,
        total_hits,
        page: request.page,
        limit: request.limit,
    })
}

/// Execute a request and materialize its page.
pub fn search(
    index: &TantivyIndex,
    options: &PlannerOptions,
    request: &QueryRequest,
) -> Result<SearchResults> {
    let stream = search_lazy(index, options, request)?;
    let total_hits = stream.total_hits;
    let hits = stream.collect::<Result<Vec<_>>>()?;
    Ok(SearchResults {
        hits,
        total_hits,
        page: request.page,
        limit: request.limit,
    })
}

/// Exact lookup by unique id.
pub fn get_document(index: &TantivyIndex, id: &str) -> Result<Option<Document>> {
    let searcher = index.searcher();
    let term = Term::from_field_text(index.fields().id, id);
    let query = TermQuery::new(term, IndexRecordOption::Basic);
    let top = searcher.search(&query, &TopDocs::with_limit(1))?;
    match top.first() {
        Some((_, address)) => {
            let doc: TantivyDocument = searcher.doc(*address)?;
            Ok(Some(index.to_document(&doc)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::mapper::map_document;
    use crate::search::schema::SchemaRegistry;
    use crate::search::tantivy::WriterOptions;
    use serde_json::json;

    fn index_with(docs: &[Document]) -> TantivyIndex {
        let index =
            TantivyIndex::create_in_ram(&SchemaRegistry::default_schema(), WriterOptions::default())
                .unwrap();
        let mut txn = index.begin_write().unwrap();
        for doc in docs {
            let record = map_document(index.registry(), doc);
            txn.update_by_key(&record.id, index.to_tantivy_doc(&record))
                .unwrap();
        }
        txn.commit(false).unwrap();
        index
    }

    fn ids(results: &SearchResults) -> Vec<String> {
        results
            .hits
            .iter()
            .map(|h| h.document.id().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn preprocess_strips_question_marks() {
        assert_eq!(preprocess_query("climate change?"), "climate change");
        assert_eq!(preprocess_query("what? why??"), "what why");
        assert_eq!(preprocess_query(r#""is it?" maybe"#), r#""is it" maybe"#);
        assert_eq!(preprocess_query("?"), "");
        assert_eq!(preprocess_query("te?t"), "te?t");
    }

    #[test]
    fn compose_handles_empty_sides() {
        assert_eq!(compose_query("a b", Some("c:d")), "(a b) AND (c:d)");
        assert_eq!(compose_query("", Some("c:d")), "c:d");
        assert_eq!(compose_query("a", None), "a");
        assert_eq!(compose_query("a", Some("  ")), "a");
    }

    #[test]
    fn dynamic_field_references_are_rewritten() {
        let index = index_with(&[]);
        assert_eq!(
            rewrite_dynamic_refs(&index, "color_k:red AND source:x"),
            "dynamic_attrs.color_k:red AND source:x"
        );
        assert_eq!(
            rewrite_dynamic_refs(&index, "(summary_t:rain)"),
            "(dynamic_text.summary_t:rain)"
        );
        assert_eq!(rewrite_dynamic_refs(&index, "ratio: what is it"), "ratio  what is it");
        assert_eq!(rewrite_dynamic_refs(&index, "note:solar"), "note solar");
    }

    #[test]
    fn unknown_field_prefix_is_plain_text() {
        let index = index_with(&[
            Document::new("the ratio of wind to solar").with("id", "a"),
            Document::new("coal").with("id", "b"),
        ]);
        let opts = PlannerOptions::default();
        let results = search(&index, &opts, &QueryRequest::new("ratio: what is it?")).unwrap();
        assert_eq!(ids(&results), vec!["a"]);
        let results = search(&index, &opts, &QueryRequest::new("note:solar")).unwrap();
        assert_eq!(ids(&results), vec!["a"]);
    }

    #[test]
    fn boolean_operators_span_every_search_field() {
        let index = index_with(&[
            Document::new("solar panels")
                .with("id", "a")
                .with("document_title", "annual report"),
            Document::new("solar farm")
                .with("id", "b")
                .with("document_title", "draft memo"),
            Document::new("wind report").with("id", "c"),
        ]);
        let opts = PlannerOptions::default();
        let both = QueryRequest::new("solar AND report").fields(["page_content", "document_title"]);
        let results = search(&index, &opts, &both).unwrap();
        assert_eq!(ids(&results), vec!["a"]);
        assert_eq!(results.total_hits, 1);

        let excluded = QueryRequest::new("solar -draft").fields(["page_content", "document_title"]);
        let results = search(&index, &opts, &excluded).unwrap();
        assert_eq!(ids(&results), vec!["a"]);
    }

    #[test]
    fn stemmed_free_text_matches_variants() {
        let index = index_with(&[
            Document::new("The rivers were flooding").with("id", "a"),
            Document::new("A dry summer").with("id", "b"),
        ]);
        let results = search(&index, &PlannerOptions::default(), &QueryRequest::new("flooded river"))
            .unwrap();
        assert_eq!(ids(&results), vec!["a"]);
        assert_eq!(results.total_hits, 1);
    }

    #[test]
    fn highlights_fall_back_to_raw_value() {
        let index = index_with(&[Document::new("solar panels on roofs")
            .with("id", "a")
            .with("document_title", "Energy report")]);
        let request = QueryRequest::new("solar").fields(["page_content", "document_title"]);
        let results = search(&index, &PlannerOptions::default(), &request).unwrap();
        let hit = &results.hits[0];
        assert!(hit.highlights["page_content"].contains("<b>solar</b>"));
        assert_eq!(hit.highlights["document_title"], "Energy report");
        let dict = hit.to_dict();
        assert!(dict.contains_key("hl_page_content"));

        let plain = search(&index, &PlannerOptions::default(), &request.highlight(false)).unwrap();
        assert!(plain.hits[0].highlights.is_empty());
    }

    #[test]
    fn filters_restrict_without_scoring() {
        let index = index_with(&[
            Document::new("tax report tax tax").with("id", "a").with("extension", "docx"),
            Document::new("tax report").with("id", "b").with("extension", "pdf"),
        ]);
        let request = QueryRequest::new("tax").filter("extension", "pdf");
        let results = search(&index, &PlannerOptions::default(), &request).unwrap();
        assert_eq!(ids(&results), vec!["b"]);
    }

    #[test]
    fn sub_query_is_anded() {
        let index = index_with(&[
            Document::new("budget").with("id", "a").with("tags", "finance, q1"),
            Document::new("budget").with("id", "b").with("tags", "hr"),
        ]);
        let request = QueryRequest::new("budget").sub_query("tags:finance");
        let results = search(&index, &PlannerOptions::default(), &request).unwrap();
        assert_eq!(ids(&results), vec!["a"]);

        let only_sub = QueryRequest::new("").sub_query("tags:hr");
        let results = search(&index, &PlannerOptions::default(), &only_sub).unwrap();
        assert_eq!(ids(&results), vec!["b"]);
    }

    #[test]
    fn dynamic_filters_and_refs() {
        let index = index_with(&[
            Document::new("paint").with("id", "a").with("color", "red"),
            Document::new("paint").with("id", "b").with("color", "blue"),
        ]);
        let request = QueryRequest::new("paint").filter("color_k", "blue");
        let results = search(&index, &PlannerOptions::default(), &request).unwrap();
        assert_eq!(ids(&results), vec!["b"]);

        let request = QueryRequest::new("paint AND color_k:red");
        let results = search(&index, &PlannerOptions::default(), &request).unwrap();
        assert_eq!(ids(&results), vec!["a"]);
    }

    #[test]
    fn invalid_requests_are_query_errors() {
        let index = index_with(&[]);
        let opts = PlannerOptions::default();
        assert!(matches!(
            search(&index, &opts, &QueryRequest::new("x").page(0)),
            Err(StoreError::Query { .. })
        ));
        assert!(matches!(
            search(&index, &opts, &QueryRequest::new("x").fields(["nope"])),
            Err(StoreError::Query { .. })
        ));
        assert!(matches!(
            search(&index, &opts, &QueryRequest::new("page:abc")),
            Err(StoreError::Query { .. })
        ));
        assert!(matches!(
            search(&index, &opts, &QueryRequest::new("x").filter("nope", "y")),
            Err(StoreError::Query { .. })
        ));
    }

    #[test]
    fn limit_zero_counts_only() {
        let index = index_with(&[Document::new("alpha"), Document::new("alpha beta")]);
        let results = search(&index, &PlannerOptions::default(), &QueryRequest::new("alpha").limit(0))
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(results.total_hits, 2);
    }

    #[test]
    fn empty_text_matches_everything() {
        let index = index_with(&[Document::new("one"), Document::new("two")]);
        let results = search(&index, &PlannerOptions::default(), &QueryRequest::new("")).unwrap();
        assert_eq!(results.total_hits, 2);
    }

    #[test]
    fn get_document_by_id() {
        let index = index_with(&[Document::new("x").with("id", "k1").with("page", 3)]);
        let doc = get_document(&index, "k1").unwrap().unwrap();
        assert_eq!(doc.metadata["page"], json!(3));
        assert!(get_document(&index, "missing").unwrap().is_none());
    }

    #[test]
    fn lazy_stream_can_stop_early() {
        let docs: Vec<Document> = (0..5).map(|i| Document::new(format!("note {i}"))).collect();
        let index = index_with(&docs);
        let mut stream =
            search_lazy(&index, &PlannerOptions::default(), &QueryRequest::new("note")).unwrap();
        assert_eq!(stream.total_hits, 5);
        assert!(stream.next().unwrap().is_ok());
        stream.close();
        // A writer can still commit after the reader went away.
        let mut txn = index.begin_write().unwrap();
        txn.delete_by_doc_id("nothing").unwrap();
        txn.commit(false).unwrap();
    }
}
