//! Search layer.
//!
//! - **[`schema`]**: declared fields, glob rules, field-kind resolution.
//! - **[`mapper`]**: inbound documents to indexable records.
//! - **[`tantivy`]**: index lifecycle, writer transactions, snapshots.
//! - **[`mutation`]**: upsert, exact and prefix deletion, erase.
//! - **[`query`]**: query text handling, filters, pagination, highlighting.
//! - **[`semantic`]**: cosine rerank of a lexical candidate pool.
//! - **[`embedder`]**, **[`embedder_registry`]**, **[`hash_embedder`]**,
//!   **[`fastembed_embedder`]**: embedding providers.

pub mod embedder;
pub mod embedder_registry;
#[cfg(feature = "fastembed")]
pub mod fastembed_embedder;
pub mod hash_embedder;
pub mod mapper;
pub mod mutation;
pub mod query;
pub mod schema;
pub mod semantic;
pub mod tantivy;
