//! Error taxonomy for the retrieval store.
//!
//! The Schema Registry and Document Mapper never produce errors; they drop
//! fields they cannot place. Everything else surfaces one of these variants
//! unchanged, with no internal retries.

use std::path::PathBuf;

use thiserror::Error;

use crate::search::embedder::EmbedderError;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid store configuration (e.g. a persistent directory without an index name).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `create` was asked for an index that is already present.
    #[error("index `{name}` already exists in {}; delete it or open it instead", .location.display())]
    AlreadyExists { location: PathBuf, name: String },

    /// Query text (or a filter value) could not be turned into an engine query.
    #[error("invalid query `{query}`: {message}")]
    Query { query: String, message: String },

    /// A writer transaction failed; nothing from the batch is visible.
    #[error("{op} failed: {message}")]
    Mutation { op: &'static str, message: String },

    /// `open` was asked for an index that does not exist.
    #[error("index `{name}` not found in {}", .location.display())]
    NotFound { location: PathBuf, name: String },

    /// I/O failure on persisted storage.
    #[error("I/O error: {0}")]
    Resource(#[from] std::io::Error),

    /// Read-side failure reported by the index engine.
    #[error("index engine error: {0}")]
    Engine(#[from] tantivy::TantivyError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),
}

impl StoreError {
    pub(crate) fn query(query: impl Into<String>, message: impl ToString) -> Self {
        StoreError::Query {
            query: query.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn mutation(op: &'static str, message: impl ToString) -> Self {
        StoreError::Mutation {
            op,
            message: message.to_string(),
        }
    }
}
