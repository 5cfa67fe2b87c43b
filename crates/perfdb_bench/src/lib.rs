//! Benchmark utilities.

use perfdb_storage::{Fields, InMemoryBackend, JsonFileBackend, SqliteBackend, StorageBackend};
use serde_json::json;
use tempfile::TempDir;

/// Backends exercised by the storage benchmarks.
pub const BACKENDS: [&str; 3] = ["memory", "json", "sqlite"];

/// Opens a fresh backend by name. On-disk backends live in the returned
/// directory, which must outlive the backend.
pub fn open_backend(name: &str) -> (Box<dyn StorageBackend>, Option<TempDir>) {
    match name {
        "json" => {
            let dir = TempDir::new().unwrap();
            let backend = JsonFileBackend::open(dir.path()).unwrap();
            (Box::new(backend), Some(dir))
        }
        "sqlite" => {
            let dir = TempDir::new().unwrap();
            let backend = SqliteBackend::open(dir.path()).unwrap();
            (Box::new(backend), Some(dir))
        }
        _ => (Box::new(InMemoryBackend::new()), None),
    }
}

/// Generates a trial-like record.
pub fn trial_fields(n: usize) -> Fields {
    json!({
        "number": n,
        "label": format!("trial-{}", n % 16),
        "data_size": n * 1024,
        "phases": [n % 4, n % 7],
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

/// Inserts `count` trial records into `table`.
pub fn populate(backend: &dyn StorageBackend, table: &str, count: usize) {
    backend.enter_transaction().unwrap();
    for n in 0..count {
        backend.insert(table, trial_fields(n)).unwrap();
    }
    backend.exit_transaction(true).unwrap();
}
