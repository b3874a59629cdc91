//! FastEmbed-backed MiniLM embedder.
//!
//! Compiled only with the `fastembed` feature. Model files are fetched into
//! `cache_dir` on first load.

use std::path::Path;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use tracing::info;

use super::embedder::{Embedder, EmbedderError, EmbedderResult};

pub const MINILM_ID: &str = "minilm-384";
pub const MINILM_DIMENSION: usize = 384;

pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
}

impl FastEmbedder {
    pub fn load_minilm(cache_dir: &Path) -> EmbedderResult<Self> {
        info!(cache_dir = %cache_dir.display(), "loading MiniLM embedder");
        let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_cache_dir(cache_dir.to_path_buf())
            .with_show_download_progress(false);
        let model =
            TextEmbedding::try_new(options).map_err(|e| EmbedderError::ModelLoad(e.to_string()))?;
        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        let mut out = self.embed_batch(&[text])?;
        out.pop()
            .ok_or_else(|| EmbedderError::Inference("model returned no vectors".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> EmbedderResult<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbedderError::InvalidInput("empty text".to_string()));
        }
        let mut model = self.model.lock();
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbedderError::Inference(e.to_string()))
    }

    fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    fn id(&self) -> &str {
        MINILM_ID
    }

    fn is_semantic(&self) -> bool {
        true
    }
}
