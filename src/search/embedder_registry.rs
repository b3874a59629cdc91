//! Embedder registry for model selection.
//!
//! | Name | ID | Dimension | Type | Notes |
//! |------|-----|-----------|------|-------|
//! | minilm | minilm-384 | 384 | ML | Needs the `fastembed` feature |
//! | hash | fnv1a-384 | 384 | Hash | Always available fallback |

use std::path::Path;
use std::sync::Arc;

use super::embedder::{Embedder, EmbedderError, EmbedderInfo, EmbedderResult};
use super::hash_embedder::HashEmbedder;

/// Preferred embedder name.
pub const DEFAULT_EMBEDDER: &str = "minilm";

/// Hash embedder name (always available).
pub const HASH_EMBEDDER: &str = "hash";

#[derive(Debug, Clone)]
pub struct RegisteredEmbedder {
    /// Short name for CLI/config.
    pub name: &'static str,
    pub id: &'static str,
    pub dimension: usize,
    pub is_semantic: bool,
    pub description: &'static str,
    /// Whether this build can construct it.
    pub compiled_in: bool,
}

impl RegisteredEmbedder {
    pub fn info(&self) -> EmbedderInfo {
        EmbedderInfo {
            id: self.id.to_string(),
            dimension: self.dimension,
            is_semantic: self.is_semantic,
        }
    }
}

pub static EMBEDDERS: &[RegisteredEmbedder] = &[
    RegisteredEmbedder {
        name: "minilm",
        id: "minilm-384",
        dimension: 384,
        is_semantic: true,
        description: "MiniLM L6 v2 sentence embeddings",
        compiled_in: cfg!(feature = "fastembed"),
    },
    RegisteredEmbedder {
        name: "hash",
        id: "fnv1a-384",
        dimension: 384,
        is_semantic: false,
        description: "FNV-1a feature hashing, lexical fallback",
        compiled_in: true,
    },
];

/// Look up by short name or id, case-insensitively.
pub fn lookup(name: &str) -> Option<&'static RegisteredEmbedder> {
    let name = name.to_ascii_lowercase();
    EMBEDDERS.iter().find(|e| e.name == name || e.id == name)
}

/// The semantic embedder when compiled in, else the hash fallback.
pub fn best_available() -> &'static RegisteredEmbedder {
    EMBEDDERS
        .iter()
        .find(|e| e.is_semantic && e.compiled_in)
        .or_else(|| EMBEDDERS.iter().find(|e| e.name == HASH_EMBEDDER))
        .unwrap_or(&EMBEDDERS[EMBEDDERS.len() - 1])
}

/// Load an embedder by name, or the best available one when `name` is `None`.
///
/// `cache_dir` is where model files are downloaded to, if the embedder needs any.
pub fn get_embedder(name: Option<&str>, cache_dir: &Path) -> EmbedderResult<Arc<dyn Embedder>> {
    let entry = match name {
        Some(n) => lookup(n).ok_or_else(|| {
            EmbedderError::Unavailable(format!(
                "unknown embedder '{}'. Available: {}",
                n,
                EMBEDDERS
                    .iter()
                    .map(|e| e.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?,
        None => best_available(),
    };
    if !entry.compiled_in {
        return Err(EmbedderError::Unavailable(format!(
            "embedder '{}' requires building with the `fastembed` feature",
            entry.name
        )));
    }
    load_embedder_by_name(entry.name, cache_dir)
}

fn load_embedder_by_name(name: &str, cache_dir: &Path) -> EmbedderResult<Arc<dyn Embedder>> {
    match name {
        "hash" => Ok(Arc::new(HashEmbedder::default())),
        #[cfg(feature = "fastembed")]
        "minilm" => Ok(Arc::new(
            super::fastembed_embedder::FastEmbedder::load_minilm(cache_dir)?,
        )),
        _ => {
            let _ = cache_dir;
            Err(EmbedderError::Unavailable(format!(
                "embedder '{}' not implemented",
                name
            )))
        }
    }
}
