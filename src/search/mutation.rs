//! Mutation manager: upsert, exact and prefix deletion, erase.
//!
//! Every operation runs inside one writer transaction and commits once, so a
//! batch is either fully visible or not at all.

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::model::types::{Document, ID};
use crate::search::mapper::map_document;
use crate::search::schema::SchemaRegistry;
use crate::search::tantivy::TantivyIndex;

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Merge all segments after commit.
    pub optimize: bool,
    /// Show a progress bar on stderr.
    pub progress: bool,
}

impl WriteOptions {
    pub fn optimized() -> Self {
        Self {
            optimize: true,
            ..Self::default()
        }
    }
}

fn progress_bar(len: usize, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message("indexing");
    pb
}

/// Insert or replace `docs` keyed on `id`. Returns the ids written, in order.
///
/// Documents with empty `page_content` reject the whole batch before the
/// writer is touched.
pub fn upsert(index: &TantivyIndex, docs: &[Document], options: &WriteOptions) -> Result<Vec<String>> {
    if let Some(pos) = docs.iter().position(|d| d.page_content.trim().is_empty()) {
        return Err(StoreError::mutation(
            "upsert",
            format!("document {pos} has empty page_content"),
        ));
    }
    if docs.is_empty() {
        return Ok(Vec::new());
    }

    let pb = progress_bar(docs.len(), options.progress);
    let mut txn = index.begin_write()?;
    let mut ids = Vec::with_capacity(docs.len());
    for doc in docs {
        let record = map_document(index.registry(), doc);
        let tdoc = index.to_tantivy_doc(&record);
        txn.update_by_key(&record.id, tdoc)?;
        ids.push(record.id);
        pb.inc(1);
    }
    pb.set_message("committing");
    txn.commit(options.optimize)?;
    pb.finish_and_clear();
    info!(docs = ids.len(), optimize = options.optimize, "committed upsert batch");
    Ok(ids)
}

/// Delete every record whose `field` holds exactly `value`. Returns the count.
pub fn delete_by_field(index: &TantivyIndex, field: &str, value: &serde_json::Value) -> Result<usize> {
    let query = index.exact_query(field, value)?;
    let mut txn = index.begin_write()?;
    let matched = index.count_matches(&*query)?;
    if matched == 0 {
        return Ok(0);
    }
    txn.delete_query(query)?;
    txn.commit(false)?;
    info!(field, deleted = matched, "committed delete");
    Ok(matched)
}

/// Delete every record whose `field` value starts with `prefix`. Returns the
/// count; no match is success with 0.
pub fn delete_by_prefix(index: &TantivyIndex, field: &str, prefix: &str) -> Result<usize> {
    let mut txn = index.begin_write()?;
    let deleted = match index.prefix_query(field, prefix) {
        Ok(query) => {
            let matched = index.count_matches(&*query)?;
            if matched > 0 {
                txn.delete_query(query)?;
            }
            matched
        }
        Err(_) if index.registry().kind_of(field).is_some() => {
            // Non-text or dynamic field: match on the stored value instead.
            let mut matched = 0;
            for doc in index.enumerate_all() {
                let doc = doc?;
                let hit = doc
                    .metadata
                    .get(field)
                    .and_then(|v| v.as_str())
                    .is_some_and(|v| v.starts_with(prefix));
                if !hit {
                    continue;
                }
                if let Some(id) = doc.metadata.get(ID).and_then(|v| v.as_str()) {
                    txn.delete_by_doc_id(id)?;
                    matched += 1;
                }
            }
            matched
        }
        Err(e) => return Err(e),
    };
    if deleted == 0 {
        return Ok(0);
    }
    txn.commit(false)?;
    info!(field, prefix, deleted, "committed prefix delete");
    Ok(deleted)
}

/// Destroy the index at `location/name` and create an empty one with the
/// default schema in its place.
pub fn recreate(index: &TantivyIndex, location: &Path, name: &str) -> Result<TantivyIndex> {
    index.release_writer();
    let dir = TantivyIndex::index_path(location, name);
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }
    warn!(path = %dir.display(), "erased index");
    TantivyIndex::create(
        location,
        name,
        &SchemaRegistry::default_schema(),
        index.writer_options().clone(),
    )
}

/// In-memory counterpart of [`recreate`].
pub fn recreate_in_ram(index: &TantivyIndex) -> Result<TantivyIndex> {
    index.release_writer();
    warn!("erased in-memory index");
    TantivyIndex::create_in_ram(
        &SchemaRegistry::default_schema(),
        index.writer_options().clone(),
    )
}
