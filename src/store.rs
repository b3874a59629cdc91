//! `SparseStore`: the public retrieval facade.
//!
//! The store owns one [`TantivyIndex`] and threads it explicitly through the
//! mutation, query and semantic modules. Several stores can live side by side
//! in one process, each with its own index.

use std::sync::Arc;

use dialoguer::Confirm;
use dialoguer::theme::ColorfulTheme;
use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::model::types::{Document, ID};
use crate::search::embedder::Embedder;
use crate::search::embedder_registry::get_embedder;
use crate::search::mutation::{self, WriteOptions};
use crate::search::query::{self, HitStream, PlannerOptions, QueryRequest, SearchResults};
use crate::search::schema::SchemaRegistry;
use crate::search::semantic::{self, SemanticHit, SemanticRequest};
use crate::search::tantivy::{DocumentStream, TantivyIndex};

pub struct SparseStore {
    config: StoreConfig,
    index: TantivyIndex,
    planner: PlannerOptions,
    embedder: OnceCell<Arc<dyn Embedder>>,
}

impl std::fmt::Debug for SparseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseStore")
            .field("config", &self.config)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

enum OpenMode {
    CreateOrAttach,
    Create,
    Attach,
}

impl SparseStore {
    /// Attach to the configured index, creating it when absent. Without a
    /// persist dir the index lives in memory.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::open_inner(config, &SchemaRegistry::default_schema(), OpenMode::CreateOrAttach)
    }

    /// Like [`SparseStore::open`], with a custom schema for a newly created index.
    pub fn open_with_schema(config: &StoreConfig, registry: &SchemaRegistry) -> Result<Self> {
        Self::open_inner(config, registry, OpenMode::CreateOrAttach)
    }

    /// Create a new index; fails if it already exists.
    pub fn create(config: &StoreConfig) -> Result<Self> {
        Self::open_inner(config, &SchemaRegistry::default_schema(), OpenMode::Create)
    }

    /// Attach to an existing index; fails if it is absent.
    pub fn attach(config: &StoreConfig) -> Result<Self> {
        Self::open_inner(config, &SchemaRegistry::default_schema(), OpenMode::Attach)
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(&StoreConfig::in_memory())
    }

    fn open_inner(config: &StoreConfig, registry: &SchemaRegistry, mode: OpenMode) -> Result<Self> {
        config.validate()?;
        let writer = config.writer_options();
        let index = match &config.persist_dir {
            None => {
                if matches!(mode, OpenMode::Attach) {
                    return Err(StoreError::Configuration(
                        "cannot attach to an in-memory index".to_string(),
                    ));
                }
                warn!("no persist dir configured; index lives in memory and is lost on exit");
                TantivyIndex::create_in_ram(registry, writer)?
            }
            Some(dir) => {
                let name = config.index_name.as_str();
                let present = TantivyIndex::exists(dir, name);
                match mode {
                    OpenMode::Create => TantivyIndex::create(dir, name, registry, writer)?,
                    OpenMode::Attach => TantivyIndex::open(dir, name, writer)?,
                    OpenMode::CreateOrAttach if present => TantivyIndex::open(dir, name, writer)?,
                    OpenMode::CreateOrAttach => TantivyIndex::create(dir, name, registry, writer)?,
                }
            }
        };
        info!(
            dir = ?config.persist_dir,
            name = config.index_name.as_str(),
            docs = index.doc_count(false),
            "store ready"
        );
        Ok(Self {
            config: config.clone(),
            index,
            planner: config.planner_options(),
            embedder: OnceCell::new(),
        })
    }

    /// Use `embedder` for semantic search instead of the configured one.
    pub fn with_embedder(self, embedder: Arc<dyn Embedder>) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(embedder);
        Self {
            embedder: cell,
            ..self
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn index(&self) -> &TantivyIndex {
        &self.index
    }

    pub fn registry(&self) -> &SchemaRegistry {
        self.index.registry()
    }

    /// Upsert `docs`. Returns their ids, generated where absent.
    pub fn add_documents(&self, docs: &[Document], options: &WriteOptions) -> Result<Vec<String>> {
        mutation::upsert(&self.index, docs, options)
    }

    /// Upsert from flat dicts (`page_content` plus metadata keys).
    pub fn update_documents(&self, dicts: Vec<serde_json::Value>) -> Result<Vec<String>> {
        let mut docs = Vec::with_capacity(dicts.len());
        for (pos, dict) in dicts.into_iter().enumerate() {
            let doc = Document::from_dict(dict).ok_or_else(|| {
                StoreError::mutation(
                    "update",
                    format!("entry {pos} is not an object with a string page_content"),
                )
            })?;
            docs.push(doc);
        }
        mutation::upsert(&self.index, &docs, &WriteOptions::default())
    }

    /// Delete every document whose `field` equals `value`.
    pub fn remove_document(&self, value: impl Into<serde_json::Value>, field: &str) -> Result<usize> {
        mutation::delete_by_field(&self.index, field, &value.into())
    }

    pub fn remove_by_id(&self, id: &str) -> Result<usize> {
        self.remove_document(id, ID)
    }

    /// Delete every document whose `source` starts with `prefix`.
    pub fn remove_source(&self, prefix: &str) -> Result<usize> {
        self.delete_by_prefix(prefix, "source")
    }

    pub fn delete_by_prefix(&self, prefix: &str, field: &str) -> Result<usize> {
        mutation::delete_by_prefix(&self.index, field, prefix)
    }

    /// Every live document, read lazily from one snapshot.
    pub fn get_all_documents(&self) -> DocumentStream<'_> {
        self.index.enumerate_all()
    }

    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        query::get_document(&self.index, id)
    }

    pub fn size(&self, include_deleted: bool) -> u64 {
        self.index.doc_count(include_deleted)
    }

    /// True when the index holds at least one live document.
    pub fn exists(&self) -> bool {
        self.size(false) > 0
    }

    pub fn query(&self, request: &QueryRequest) -> Result<SearchResults> {
        query::search(&self.index, &self.planner, request)
    }

    pub fn query_lazy(&self, request: &QueryRequest) -> Result<HitStream<'_>> {
        query::search_lazy(&self.index, &self.planner, request)
    }

    pub fn semantic_search(&self, request: &SemanticRequest) -> Result<Vec<SemanticHit>> {
        semantic::semantic_search(&self.index, &self.planner, || self.embedder(), request)
    }

    /// The embedder, loaded on first use.
    pub fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        let embedder = self.embedder.get_or_try_init(|| {
            get_embedder(
                self.config.embedder.as_deref(),
                &self.config.model_cache_dir(),
            )
        })?;
        Ok(Arc::clone(embedder))
    }

    /// Erase the index and start over with the default schema.
    ///
    /// With `confirm` the user is asked on the terminal first. Returns whether
    /// anything was erased.
    pub fn erase(&mut self, confirm: bool) -> Result<bool> {
        self.erase_with(confirm, |message| {
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(message)
                .default(false)
                .interact()
                .unwrap_or_else(|e| {
                    warn!(error = %e, "confirmation prompt failed; treating as no");
                    false
                })
        })
    }

    /// [`SparseStore::erase`] with the confirmation prompt supplied by the caller.
    pub fn erase_with(&mut self, confirm: bool, prompt: impl FnOnce(&str) -> bool) -> Result<bool> {
        let location = self.index.location().map(|p| p.to_path_buf());
        if let Some(dir) = &location
            && !TantivyIndex::exists(dir, self.index.name())
        {
            info!("nothing to erase");
            return Ok(false);
        }
        if confirm {
            let message = match &location {
                Some(dir) => format!(
                    "Erase index `{}` in {}? This cannot be undone",
                    self.index.name(),
                    dir.display()
                ),
                None => "Erase the in-memory index?".to_string(),
            };
            if !prompt(&message) {
                info!("erase declined");
                return Ok(false);
            }
        }
        let fresh = match &location {
            Some(dir) => mutation::recreate(&self.index, dir, self.index.name())?,
            None => mutation::recreate_in_ram(&self.index)?,
        };
        self.index = fresh;
        Ok(true)
    }
}
