//! Embedder trait for semantic reranking.
//!
//! Implementations turn text into fixed-length vectors. The store only ever
//! compares vectors produced by the same embedder, so `id()` and
//! `dimension()` must be stable for the lifetime of an instance.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedderError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("embedder unavailable: {0}")]
    Unavailable(String),
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

pub type EmbedderResult<T> = Result<T, EmbedderError>;

/// Summary of an embedder for display and logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedderInfo {
    pub id: String,
    pub dimension: usize,
    pub is_semantic: bool,
}

pub trait Embedder: Send + Sync {
    /// Embed a single query text.
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>>;

    /// Embed several document texts, one vector per input, in order.
    fn embed_batch(&self, texts: &[&str]) -> EmbedderResult<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize;

    fn id(&self) -> &str;

    /// False for lexical stand-ins such as feature hashing.
    fn is_semantic(&self) -> bool;

    fn info(&self) -> EmbedderInfo {
        EmbedderInfo {
            id: self.id().to_string(),
            dimension: self.dimension(),
            is_semantic: self.is_semantic(),
        }
    }
}

/// Cosine similarity of two vectors. Zero when lengths differ or either is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
