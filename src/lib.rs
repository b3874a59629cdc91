pub mod config;
pub mod error;
pub mod model;
pub mod search;
pub mod store;

pub use config::StoreConfig;
pub use error::{Result as StoreResult, StoreError};
pub use model::types::Document;
pub use search::mutation::WriteOptions;
pub use search::query::{QueryRequest, SearchHit, SearchResults};
pub use search::semantic::{SemanticHit, SemanticRequest};
pub use store::SparseStore;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "sparse",
    version,
    about = "Hybrid lexical + semantic document store"
)]
pub struct Cli {
    /// Directory holding the index (defaults to SPARSE_PERSIST_DIR, then the platform data dir)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Index name inside the directory (defaults to SPARSE_INDEX_NAME, then "myindex")
    #[arg(long, global = true)]
    pub name: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upsert documents from JSON Lines files (one dict per line)
    Index {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Merge segments after commit
        #[arg(long)]
        optimize: bool,

        /// No progress bar
        #[arg(long)]
        quiet: bool,
    },
    /// Lexical search
    Query {
        text: String,

        /// Field to search (repeatable)
        #[arg(long = "field", default_value = "page_content")]
        fields: Vec<String>,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Exact filter as field=value (repeatable)
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, serde_json::Value)>,

        /// Raw query AND-ed with the text
        #[arg(long = "where")]
        sub_query: Option<String>,

        #[arg(long)]
        no_highlight: bool,
    },
    /// Lexical candidates reranked by embedding similarity
    Semantic {
        text: String,

        #[arg(short, default_value_t = 4)]
        k: usize,

        #[arg(long, default_value_t = 50)]
        candidates: usize,

        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, serde_json::Value)>,

        #[arg(long = "where")]
        sub_query: Option<String>,
    },
    /// Print one document by id
    Get { id: String },
    /// Delete documents whose field equals a value
    Remove {
        value: String,

        #[arg(long, default_value = "id")]
        field: String,
    },
    /// Delete documents whose source starts with a prefix
    RemoveSource { prefix: String },
    /// Number of documents
    Size {
        #[arg(long)]
        include_deleted: bool,
    },
    /// Print every document as JSON Lines
    Dump,
    /// Delete the index and start empty
    Erase {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

pub fn run() -> Result<()> {
    run_with(Cli::parse())
}

pub fn run_with(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "sparse", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = StoreConfig::from_env();
    if let Some(dir) = cli.dir {
        config.persist_dir = Some(dir);
    }
    if config.persist_dir.is_none() {
        config.persist_dir = Some(default_data_dir());
    }
    if let Some(name) = cli.name {
        config.index_name = name;
    }
    let mut store = SparseStore::open(&config).context("opening index")?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Index {
            files,
            optimize,
            quiet,
        } => {
            let mut docs = Vec::new();
            for file in &files {
                docs.extend(read_jsonl(file)?);
            }
            let options = WriteOptions {
                optimize,
                progress: !quiet,
            };
            let ids = store.add_documents(&docs, &options)?;
            emit(&mut out, &serde_json::json!({ "indexed": ids.len() }))?;
        }
        Commands::Query {
            text,
            fields,
            limit,
            page,
            filters,
            sub_query,
            no_highlight,
        } => {
            let mut request = QueryRequest::new(text)
                .fields(fields)
                .limit(limit)
                .page(page)
                .highlight(!no_highlight);
            request.filters = filters.into_iter().collect();
            request.sub_query = sub_query;
            let results = store.query(&request)?;
            let hits: Vec<serde_json::Value> = results
                .hits
                .iter()
                .map(|hit| {
                    let mut dict = hit.to_dict();
                    dict.insert("_score".to_string(), serde_json::Value::from(f64::from(hit.score)));
                    serde_json::Value::Object(dict)
                })
                .collect();
            emit(
                &mut out,
                &serde_json::json!({
                    "total_hits": results.total_hits,
                    "page": results.page,
                    "pages": results.page_count(),
                    "hits": hits,
                }),
            )?;
        }
        Commands::Semantic {
            text,
            k,
            candidates,
            filters,
            sub_query,
        } => {
            let mut request = SemanticRequest::new(text).k(k).n_candidates(candidates);
            request.filters = filters.into_iter().collect();
            request.sub_query = sub_query;
            for hit in store.semantic_search(&request)? {
                emit(&mut out, &serde_json::Value::Object(hit.document.to_dict()))?;
            }
        }
        Commands::Get { id } => match store.get_document(&id)? {
            Some(doc) => emit(&mut out, &serde_json::Value::Object(doc.to_dict()))?,
            None => bail!("no document with id `{id}`"),
        },
        Commands::Remove { value, field } => {
            let removed = store.remove_document(parse_scalar(&value), &field)?;
            emit(&mut out, &serde_json::json!({ "removed": removed }))?;
        }
        Commands::RemoveSource { prefix } => {
            let removed = store.remove_source(&prefix)?;
            emit(&mut out, &serde_json::json!({ "removed": removed }))?;
        }
        Commands::Size { include_deleted } => {
            emit(&mut out, &serde_json::json!({ "size": store.size(include_deleted) }))?;
        }
        Commands::Dump => {
            for doc in store.get_all_documents() {
                emit(&mut out, &serde_json::Value::Object(doc?.to_dict()))?;
            }
        }
        Commands::Erase { yes } => {
            let erased = store.erase(!yes)?;
            emit(&mut out, &serde_json::json!({ "erased": erased }))?;
        }
        Commands::Completions { .. } => {}
    }
    out.flush()?;
    Ok(())
}

fn emit(out: &mut impl Write, value: &serde_json::Value) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn read_jsonl(path: &Path) -> Result<Vec<Document>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut docs = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid JSON", path.display(), lineno + 1))?;
        let doc = Document::from_dict(value).with_context(|| {
            format!(
                "{}:{}: expected an object with a string page_content",
                path.display(),
                lineno + 1
            )
        })?;
        docs.push(doc);
    }
    Ok(docs)
}

/// `true`, `false` and numbers become JSON scalars; anything else is a string.
fn parse_scalar(raw: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v @ (serde_json::Value::Bool(_) | serde_json::Value::Number(_))) => v,
        _ => serde_json::Value::String(raw.to_string()),
    }
}

fn parse_filter(raw: &str) -> std::result::Result<(String, serde_json::Value), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got `{raw}`"))?;
    if field.trim().is_empty() {
        return Err(format!("empty field name in `{raw}`"));
    }
    Ok((field.trim().to_string(), parse_scalar(value)))
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "sparse-store", "sparse-store")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".sparse"))
}
