//! Store configuration with environment overrides.

use std::path::PathBuf;

use crate::error::{Result, StoreError};
use crate::search::query::PlannerOptions;
use crate::search::tantivy::WriterOptions;

pub const DEFAULT_INDEX_NAME: &str = "myindex";

/// Configuration for [`crate::store::SparseStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Parent directory of the index. `None` keeps the index in memory.
    pub persist_dir: Option<PathBuf>,
    pub index_name: String,
    pub writer_memory_mb: usize,
    pub writer_threads: usize,
    /// Score weight of secondary search fields.
    pub tie_breaker: f32,
    pub snippet_chars: usize,
    /// Embedder name; `None` picks the best one compiled in.
    pub embedder: Option<String>,
    /// Where ML embedders cache model files.
    pub model_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persist_dir: None,
            index_name: DEFAULT_INDEX_NAME.to_string(),
            writer_memory_mb: 64,
            writer_threads: 1,
            tie_breaker: 0.9,
            snippet_chars: 150,
            embedder: None,
            model_dir: None,
        }
    }
}

impl StoreConfig {
    pub fn persistent(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            persist_dir: Some(dir.into()),
            index_name: name.into(),
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load config from environment variables (and `.env`).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(val) = dotenvy::var("SPARSE_PERSIST_DIR")
            && !val.trim().is_empty()
        {
            cfg.persist_dir = Some(PathBuf::from(val));
        }

        if let Ok(val) = dotenvy::var("SPARSE_INDEX_NAME") {
            cfg.index_name = val;
        }

        if let Ok(val) = dotenvy::var("SPARSE_WRITER_MEMORY_MB")
            && let Ok(mb) = val.parse()
        {
            cfg.writer_memory_mb = mb;
        }

        if let Ok(val) = dotenvy::var("SPARSE_WRITER_THREADS")
            && let Ok(threads) = val.parse()
        {
            cfg.writer_threads = threads;
        }

        if let Ok(val) = dotenvy::var("SPARSE_TIE_BREAKER")
            && let Ok(tie) = val.parse()
        {
            cfg.tie_breaker = tie;
        }

        if let Ok(val) = dotenvy::var("SPARSE_SNIPPET_CHARS")
            && let Ok(chars) = val.parse()
        {
            cfg.snippet_chars = chars;
        }

        if let Ok(val) = dotenvy::var("SPARSE_EMBEDDER")
            && !val.trim().is_empty()
        {
            cfg.embedder = Some(val);
        }

        if let Ok(val) = dotenvy::var("SPARSE_MODEL_DIR")
            && !val.trim().is_empty()
        {
            cfg.model_dir = Some(PathBuf::from(val));
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.persist_dir.is_some() && self.index_name.trim().is_empty() {
            return Err(StoreError::Configuration(
                "a persistent store needs a non-empty index name".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tie_breaker) {
            return Err(StoreError::Configuration(format!(
                "tie breaker must be within 0..=1, got {}",
                self.tie_breaker
            )));
        }
        Ok(())
    }

    pub fn writer_options(&self) -> WriterOptions {
        let threads = self.writer_threads.max(1);
        // tantivy requires at least 15MB of arena per indexing thread.
        let per_thread = (self.writer_memory_mb / threads).max(15);
        WriterOptions {
            memory_budget_bytes: per_thread * threads * 1024 * 1024,
            num_threads: threads,
        }
    }

    pub fn planner_options(&self) -> PlannerOptions {
        PlannerOptions {
            tie_breaker: self.tie_breaker,
            snippet_chars: self.snippet_chars,
        }
    }

    /// Model cache directory, falling back to `<persist_dir>/models` and then
    /// the system temp dir.
    pub fn model_cache_dir(&self) -> PathBuf {
        self.model_dir
            .clone()
            .or_else(|| self.persist_dir.as_ref().map(|d| d.join("models")))
            .unwrap_or_else(|| std::env::temp_dir().join("sparse-store-models"))
    }
}
