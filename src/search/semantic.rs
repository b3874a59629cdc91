//! Semantic rerank over a lexical candidate pool.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::model::types::Document;
use crate::search::embedder::{Embedder, cosine_similarity};
use crate::search::query::{self, PlannerOptions, QueryRequest};
use crate::search::tantivy::TantivyIndex;

/// Metadata key the similarity is attached under.
pub const SCORE_KEY: &str = "score";

#[derive(Debug, Clone)]
pub struct SemanticRequest {
    pub text: String,
    /// Results to keep.
    pub k: usize,
    /// Size of the lexical candidate pool.
    pub n_candidates: usize,
    pub filters: BTreeMap<String, serde_json::Value>,
    pub sub_query: Option<String>,
}

impl SemanticRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            k: 4,
            n_candidates: 50,
            filters: BTreeMap::new(),
            sub_query: None,
        }
    }

    pub fn k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn n_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n;
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

    fn lexical(&self) -> QueryRequest {
        QueryRequest {
            text: self.text.clone(),
            limit: self.n_candidates,
            filters: self.filters.clone(),
            sub_query: self.sub_query.clone(),
            highlight: false,
            ..QueryRequest::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticHit {
    /// Carries the similarity under metadata `score` as well.
    pub document: Document,
    pub score: f32,
}

/// Re-score `candidates` by cosine similarity to `text` and keep the best `k`.
pub fn rerank(
    embedder: &dyn Embedder,
    text: &str,
    candidates: Vec<Document>,
    k: usize,
) -> Result<Vec<SemanticHit>> {
    if candidates.is_empty() || k == 0 {
        return Ok(Vec::new());
    }
    let query_vec = embedder.embed(text)?;
    let texts: Vec<&str> = candidates.iter().map(|d| d.page_content.as_str()).collect();
    let doc_vecs = embedder.embed_batch(&texts)?;

    let mut hits: Vec<SemanticHit> = candidates
        .into_iter()
        .zip(doc_vecs)
        .map(|(mut document, vector)| {
            let score = cosine_similarity(&query_vec, &vector);
            document
                .metadata
                .insert(SCORE_KEY.to_string(), serde_json::Value::from(f64::from(score)));
            SemanticHit { document, score }
        })
        .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    hits.truncate(k);
    Ok(hits)
}

/// Lexical pool from the query planner, then [`rerank`].
pub fn semantic_search(
    index: &TantivyIndex,
    options: &PlannerOptions,
    embedder: impl FnOnce() -> Result<std::sync::Arc<dyn Embedder>>,
    request: &SemanticRequest,
) -> Result<Vec<SemanticHit>> {
    if query::preprocess_query(&request.text).trim().is_empty() {
        debug!("blank semantic query, nothing to compare against");
        return Ok(Vec::new());
    }
    let pool = query::search(index, options, &request.lexical())?;
    debug!(
        query = request.text.as_str(),
        candidates = pool.hits.len(),
        k = request.k,
        "semantic_rerank"
    );
    if pool.is_empty() {
        return Ok(Vec::new());
    }
    let candidates = pool.hits.into_iter().map(|h| h.document).collect();
    let embedder = embedder()?;
    rerank(embedder.as_ref(), &request.text, candidates, request.k)
}
