use sparse_store::{Document, SparseStore, StoreConfig, WriteOptions};
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A persistent store in a fresh temp dir. Keep the `TempDir` alive.
#[allow(dead_code)]
pub fn temp_store() -> (TempDir, SparseStore) {
    let dir = TempDir::new().unwrap();
    let store = SparseStore::open(&StoreConfig::persistent(dir.path(), "test")).unwrap();
    (dir, store)
}

#[allow(dead_code)]
pub fn add(store: &SparseStore, docs: &[Document]) -> Vec<String> {
    store.add_documents(docs, &WriteOptions::default()).unwrap()
}

#[allow(dead_code)]
pub fn doc(id: &str, text: &str) -> Document {
    Document::new(text).with("id", id)
}

/// Write `docs` as JSON Lines for the CLI.
#[allow(dead_code)]
pub fn write_jsonl(path: &std::path::Path, docs: &[serde_json::Value]) {
    let body: Vec<String> = docs.iter().map(|d| d.to_string()).collect();
    std::fs::write(path, body.join("\n")).unwrap();
}
