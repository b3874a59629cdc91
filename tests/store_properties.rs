//! Behavioral properties of the store, end to end through `SparseStore`.

mod util;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use sparse_store::search::hash_embedder::HashEmbedder;
use sparse_store::search::tantivy::TantivyIndex;
use sparse_store::{
    Document, QueryRequest, SemanticRequest, SparseStore, StoreConfig, StoreError, WriteOptions,
};
use tempfile::TempDir;
use util::{TestTracing, add, doc, temp_store};

#[test]
fn upsert_is_idempotent_per_id() {
    let (_dir, store) = temp_store();
    add(&store, &[doc("same", "first version")]);
    add(&store, &[doc("same", "second version")]);

    assert_eq!(store.size(false), 1);
    let stored = store.get_document("same").unwrap().unwrap();
    assert_eq!(stored.page_content, "second version");

    let hits = store.query(&QueryRequest::new("first")).unwrap();
    assert_eq!(hits.total_hits, 0);
}

#[test]
fn upsert_replaces_rather_than_merges() {
    let (_dir, store) = temp_store();
    add(&store, &[doc("m", "text").with("author", "ann")]);
    add(&store, &[doc("m", "text")]);
    let stored = store.get_document("m").unwrap().unwrap();
    assert!(!stored.metadata.contains_key("author_k"));
}

#[test]
fn generated_ids_are_unique() {
    let (_dir, store) = temp_store();
    let docs: Vec<Document> = (0..50).map(|i| Document::new(format!("doc {i}"))).collect();
    let first = add(&store, &docs);
    let second = add(&store, &docs);

    let all: HashSet<&String> = first.iter().chain(second.iter()).collect();
    assert_eq!(all.len(), 100);
    assert_eq!(store.size(false), 100);
}

#[test]
fn prefix_deletion_removes_exactly_the_subtree() {
    let (_dir, store) = temp_store();
    add(
        &store,
        &[
            Document::new("x").with("source", "/a/b/x.pdf"),
            Document::new("y").with("source", "/a/b/y.pdf"),
            Document::new("z").with("source", "/a/c/z.pdf"),
        ],
    );
    assert_eq!(store.size(false), 3);

    assert_eq!(store.delete_by_prefix("/a/b", "source").unwrap(), 2);
    assert_eq!(store.size(false), 1);
    let left: Vec<Document> = store.get_all_documents().map(|d| d.unwrap()).collect();
    assert_eq!(left[0].metadata["source"], "/a/c/z.pdf");

    assert_eq!(store.remove_source("/nothing/here").unwrap(), 0);
    assert_eq!(store.size(false), 1);
}

#[test]
fn prefix_deletion_treats_regex_characters_literally() {
    let (_dir, store) = temp_store();
    add(
        &store,
        &[
            Document::new("a").with("source", "/docs (v1)/a.pdf"),
            Document::new("b").with("source", "/docs v1/b.pdf"),
        ],
    );
    assert_eq!(store.remove_source("/docs (v1)/").unwrap(), 1);
    assert_eq!(store.size(false), 1);
}

#[test]
fn pagination_covers_every_hit_exactly_once() {
    let (_dir, store) = temp_store();
    let docs: Vec<Document> = (0..25)
        .map(|i| doc(&format!("d{i:02}"), &format!("quarterly report number {i}")))
        .collect();
    add(&store, &docs);

    let mut seen = Vec::new();
    for page in 1..=3 {
        let results = store
            .query(&QueryRequest::new("report").limit(10).page(page))
            .unwrap();
        assert_eq!(results.total_hits, 25);
        assert!(results.len() <= 10);
        seen.extend(results.hits.into_iter().map(|h| h.document.id().unwrap().to_string()));
    }
    assert_eq!(seen.len(), 25);
    assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 25);

    let beyond = store
        .query(&QueryRequest::new("report").limit(10).page(4))
        .unwrap();
    assert!(beyond.is_empty());
    assert_eq!(beyond.total_hits, 25);
    assert_eq!(beyond.page_count(), 3);
}

#[test]
fn trailing_question_marks_do_not_change_results() {
    let (_dir, store) = temp_store();
    add(
        &store,
        &[
            doc("a", "climate change is accelerating"),
            doc("b", "the climate of the region"),
            doc("c", "change management"),
            doc("d", "unrelated gardening notes"),
        ],
    );
    let plain = store.query(&QueryRequest::new("climate change")).unwrap();
    let question = store.query(&QueryRequest::new("climate change?")).unwrap();

    let ids = |r: &sparse_store::SearchResults| -> Vec<String> {
        r.hits.iter().map(|h| h.document.id().unwrap().to_string()).collect()
    };
    assert_eq!(ids(&plain), ids(&question));
    assert_eq!(plain.total_hits, 3);
}

#[test]
fn filters_never_let_other_values_through() {
    let (_dir, store) = temp_store();
    add(
        &store,
        &[
            doc("hot", "invoice invoice invoice invoice").with("extension", "docx"),
            doc("pdf1", "invoice").with("extension", "pdf"),
            doc("pdf2", "invoice for march").with("extension", "pdf"),
        ],
    );
    let results = store
        .query(&QueryRequest::new("invoice").filter("extension", "pdf"))
        .unwrap();
    assert_eq!(results.total_hits, 2);
    for hit in &results.hits {
        assert_eq!(hit.document.metadata["extension"], "pdf");
    }
}

#[test]
fn filters_on_typed_fields() {
    let (_dir, store) = temp_store();
    add(
        &store,
        &[
            doc("p1", "scan").with("page", 1).with("ocr", true),
            doc("p2", "scan").with("page", 2).with("ocr", false),
        ],
    );
    let by_page = store
        .query(&QueryRequest::new("scan").filter("page", 2))
        .unwrap();
    assert_eq!(by_page.hits[0].document.id(), Some("p2"));
    let by_ocr = store
        .query(&QueryRequest::new("scan").filter("ocr", true))
        .unwrap();
    assert_eq!(by_ocr.total_hits, 1);
    assert_eq!(by_ocr.hits[0].document.id(), Some("p1"));
}

#[test]
fn filters_on_dynamic_fields_of_every_kind() {
    let (_dir, store) = temp_store();
    add(
        &store,
        &[
            doc("d1", "review")
                .with("seen_date", "2024-05-01")
                .with("stars", 5)
                .with("draft", true),
            doc("d2", "review")
                .with("seen_date", "2023-01-15")
                .with("stars", 3)
                .with("draft", false),
        ],
    );
    let single = |field: &str, value: serde_json::Value| {
        let results = store
            .query(&QueryRequest::new("review").filter(field, value))
            .unwrap();
        results
            .hits
            .iter()
            .map(|h| h.document.id().unwrap().to_string())
            .collect::<Vec<_>>()
    };
    assert_eq!(single("seen_date_d", json!("2024-05-01")), vec!["d1"]);
    assert_eq!(single("seen_date_d", json!("2023-01-15T00:00:00Z")), vec!["d2"]);
    assert_eq!(single("stars_n", json!(3)), vec!["d2"]);
    assert_eq!(single("stars_n", json!("5")), vec!["d1"]);
    assert_eq!(single("draft_b", json!(true)), vec!["d1"]);
}

#[test]
fn multi_field_queries_combine_terms_across_fields() {
    let (_dir, store) = temp_store();
    add(
        &store,
        &[
            doc("a", "solar panels").with("document_title", "annual report"),
            doc("b", "solar farm").with("document_title", "draft memo"),
        ],
    );
    let fields = ["page_content", "document_title"];
    let both = store
        .query(&QueryRequest::new("solar AND report").fields(fields))
        .unwrap();
    assert_eq!(both.total_hits, 1);
    assert_eq!(both.hits[0].document.id(), Some("a"));

    let excluded = store
        .query(&QueryRequest::new("solar -draft").fields(fields))
        .unwrap();
    assert_eq!(excluded.total_hits, 1);
    assert_eq!(excluded.hits[0].document.id(), Some("a"));
}

#[test]
fn semantic_search_is_bounded_by_the_lexical_pool() {
    let (_dir, store) = temp_store();
    let store = store.with_embedder(Arc::new(HashEmbedder::default()));
    let mut docs: Vec<Document> = (0..30)
        .map(|i| doc(&format!("e{i}"), &format!("energy storage option {i}")))
        .collect();
    docs.push(doc("off", "a recipe for soup"));
    add(&store, &docs);

    let pool: HashSet<String> = store
        .query(&QueryRequest::new("energy storage").limit(50))
        .unwrap()
        .hits
        .into_iter()
        .map(|h| h.document.id().unwrap().to_string())
        .collect();

    let hits = store
        .semantic_search(&SemanticRequest::new("energy storage").k(4).n_candidates(50))
        .unwrap();
    assert!(hits.len() <= 4);
    assert!(!hits.is_empty());
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for hit in &hits {
        assert!(pool.contains(hit.document.id().unwrap()));
        assert_eq!(hit.document.metadata["score"], json!(f64::from(hit.score)));
    }
}

#[test]
fn semantic_search_with_no_candidates_is_empty() {
    let store = SparseStore::in_memory()
        .unwrap()
        .with_embedder(Arc::new(HashEmbedder::default()));
    add(&store, &[doc("a", "something")]);
    let hits = store
        .semantic_search(&SemanticRequest::new("absent"))
        .unwrap();
    assert!(hits.is_empty());
}

#[test]
fn blank_semantic_query_returns_nothing() {
    let store = SparseStore::in_memory()
        .unwrap()
        .with_embedder(Arc::new(HashEmbedder::default()));
    add(&store, &[doc("a", "something")]);
    for text in ["", "  ", "?"] {
        let hits = store.semantic_search(&SemanticRequest::new(text)).unwrap();
        assert!(hits.is_empty(), "{text:?}");
    }
}

#[test]
fn normalized_text_round_trips_by_id() {
    let (_dir, store) = temp_store();
    // "e" + combining acute, and the "ﬀ" ligature
    add(&store, &[doc("u", "cafe\u{301} o\u{FB00}ice")]);
    for _ in 0..3 {
        let stored = store.get_document("u").unwrap().unwrap();
        assert_eq!(stored.page_content, "caf\u{e9} office");
    }
    let hits = store.query(&QueryRequest::new("office")).unwrap();
    assert_eq!(hits.total_hits, 1);
}

#[test]
fn erase_requires_affirmative_confirmation() {
    let (_dir, mut store) = temp_store();
    add(&store, &[doc("a", "one"), doc("b", "two")]);

    assert!(!store.erase_with(true, |_| false).unwrap());
    assert_eq!(store.size(false), 2);

    assert!(store.erase_with(false, |_| panic!("no prompt expected")).unwrap());
    assert_eq!(store.size(false), 0);

    // The same instance keeps working on the fresh index.
    add(&store, &[doc("c", "three")]);
    assert_eq!(store.size(false), 1);
}

#[test]
fn erase_with_confirmation_accepted() {
    let (_dir, mut store) = temp_store();
    add(&store, &[doc("a", "one")]);
    let mut asked = String::new();
    assert!(store
        .erase_with(true, |msg| {
            asked = msg.to_string();
            true
        })
        .unwrap());
    assert!(asked.contains("test"));
    assert_eq!(store.size(false), 0);
}

#[test]
fn create_and_attach_modes() {
    let dir = TempDir::new().unwrap();
    let cfg = StoreConfig::persistent(dir.path(), "strict");
    assert!(matches!(SparseStore::attach(&cfg), Err(StoreError::NotFound { .. })));

    let store = SparseStore::create(&cfg).unwrap();
    add(&store, &[doc("a", "persisted text")]);
    drop(store);

    assert!(matches!(
        SparseStore::create(&cfg),
        Err(StoreError::AlreadyExists { .. })
    ));
    let reopened = SparseStore::attach(&cfg).unwrap();
    assert_eq!(reopened.size(false), 1);
    assert!(TantivyIndex::exists(dir.path(), "strict"));
}

#[test]
fn persistent_store_needs_a_name() {
    let dir = TempDir::new().unwrap();
    let cfg = StoreConfig::persistent(dir.path(), "");
    assert!(matches!(
        SparseStore::open(&cfg),
        Err(StoreError::Configuration(_))
    ));
}

#[test]
fn in_memory_store_warns() {
    let tracing = TestTracing::new();
    let _guard = tracing.install();
    let store = SparseStore::in_memory().unwrap();
    assert_eq!(store.size(false), 0);
    tracing.assert_contains("in memory");
}

#[test]
fn dynamic_metadata_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let cfg = StoreConfig::persistent(dir.path(), "dyn");
    {
        let store = SparseStore::open(&cfg).unwrap();
        add(
            &store,
            &[doc("a", "body").with("reviewer", "kim").with("stars", 5).with("draft", false)],
        );
    }
    let store = SparseStore::open(&cfg).unwrap();
    let stored = store.get_document("a").unwrap().unwrap();
    assert_eq!(stored.metadata["reviewer_k"], "kim");
    assert_eq!(stored.metadata["stars_n"], 5);
    assert_eq!(stored.metadata["draft_b"], false);

    let hits = store
        .query(&QueryRequest::new("body").filter("reviewer_k", "kim"))
        .unwrap();
    assert_eq!(hits.total_hits, 1);
}

#[test]
fn remove_document_by_any_field() {
    let (_dir, store) = temp_store();
    add(
        &store,
        &[
            doc("a", "one").with("md5", "abc"),
            doc("b", "two").with("md5", "def"),
        ],
    );
    assert_eq!(store.remove_document("abc", "md5").unwrap(), 1);
    assert_eq!(store.remove_document("b", "id").unwrap(), 1);
    assert!(!store.exists());
}

#[test]
fn lazy_results_release_their_snapshot() {
    let tracing = TestTracing::new();
    let _guard = tracing.install();
    let (_dir, store) = temp_store();
    add(&store, &[doc("a", "alpha"), doc("b", "alpha beta")]);
    {
        let mut stream = store.query_lazy(&QueryRequest::new("alpha")).unwrap();
        assert_eq!(stream.total_hits, 2);
        let _first = stream.next().unwrap().unwrap();
    }
    tracing.assert_contains("released search snapshot");

    let docs: Vec<_> = store.get_all_documents().collect();
    assert_eq!(docs.len(), 2);
    tracing.assert_contains("released enumeration snapshot");
}

#[test]
fn readers_see_a_stable_snapshot() {
    let (_dir, store) = temp_store();
    add(&store, &[doc("a", "alpha"), doc("b", "alpha")]);
    let stream = store.get_all_documents();
    add(&store, &[doc("c", "alpha")]);
    assert_eq!(stream.count(), 2);
    assert_eq!(store.size(false), 3);
}

#[test]
fn concurrent_writers_serialize() {
    let (_dir, store) = temp_store();
    std::thread::scope(|scope| {
        for t in 0..4 {
            let store = &store;
            scope.spawn(move || {
                let docs: Vec<Document> = (0..10)
                    .map(|i| doc(&format!("t{t}-{i}"), "parallel write"))
                    .collect();
                store.add_documents(&docs, &WriteOptions::default()).unwrap();
            });
        }
    });
    assert_eq!(store.size(false), 40);
    assert_eq!(
        store
            .query(&QueryRequest::new("parallel").limit(0))
            .unwrap()
            .total_hits,
        40
    );
}
