//! Cross-crate integration test helpers.
//!
//! Provides utilities for checking database-wide invariants and for
//! comparing backends by the transcripts they produce.

use crate::generators::OP_TABLE;
use crate::schemas::obj;
use perfdb_core::{Database, Query, StorageBackend, Value};
use perfdb_storage::StorageError;
use serde_json::json;

/// Returns a backend-independent name for a storage error.
pub fn storage_error_kind(err: &StorageError) -> &'static str {
    match err {
        StorageError::Io(_) => "io",
        StorageError::Json(_) => "json",
        StorageError::Sqlite(_) => "sqlite",
        StorageError::Corrupted(_) => "corrupted",
        StorageError::NoTransaction => "no_transaction",
        StorageError::InvalidIdentifier(_) => "invalid_identifier",
        StorageError::Remote { .. } => "remote",
        StorageError::Transport { .. } => "transport",
        StorageError::NotConnected => "not_connected",
        StorageError::Unauthorized(_) => "unauthorized",
    }
}

/// Asserts that [`Database::verify`] finds nothing.
///
/// # Panics
///
/// Panics listing every issue found, or if the check itself fails.
pub fn assert_integrity(db: &Database) {
    let issues = db.verify().expect("Failed to run integrity check");
    assert!(
        issues.is_empty(),
        "integrity issues:\n{}",
        issues
            .iter()
            .map(|issue| format!("  {issue}"))
            .collect::<Vec<_>>()
            .join("\n")
    );
}

/// Snapshot of every table: name, then records in EID order.
pub fn snapshot(backend: &dyn StorageBackend) -> Value {
    let mut tables = serde_json::Map::new();
    for name in backend.table_names().expect("Failed to list tables") {
        let records = backend
            .search(&name, &Query::all())
            .expect("Failed to read table");
        tables.insert(name, json!(records));
    }
    Value::Object(tables)
}

/// Runs the fixed contract script against a fresh backend and returns the
/// transcript of observable results.
///
/// The script inserts three records, updates one, removes one, searches
/// with AND and OR queries, searches inside a collection field, unsets a
/// field twice, closes a transaction that was never opened and stores
/// names that differ only in case.
pub fn contract_script(backend: &dyn StorageBackend) -> Vec<Value> {
    let mut out = Vec::new();
    let mut record = |label: &str, result: Result<Value, StorageError>| {
        let value = match result {
            Ok(value) => value,
            Err(err) => json!({ "error": storage_error_kind(&err) }),
        };
        let mut entry = serde_json::Map::new();
        entry.insert(label.to_string(), value);
        out.push(Value::Object(entry));
    };

    let inserted: Vec<_> = [
        json!({"label": "base", "size": 1, "tags": [1, 2]}),
        json!({"label": "opt", "size": 2, "tags": [2, 3]}),
        json!({"label": "opt", "size": 3, "tags": []}),
    ]
    .into_iter()
    .map(|fields| backend.insert(OP_TABLE, obj(fields)))
    .collect();
    let eids: Vec<_> = inserted
        .iter()
        .filter_map(|r| r.as_ref().ok().map(|record| record.eid))
        .collect();
    record("insert", Ok(json!(eids)));

    let first = eids.first().copied();
    let second = eids.get(1).copied();
    record(
        "update",
        first
            .map(|eid| backend.update(OP_TABLE, &obj(json!({"size": 10})), &Query::eid(eid)))
            .transpose()
            .map(|eids| json!(eids)),
    );
    record(
        "remove",
        second
            .map(|eid| backend.remove(OP_TABLE, &Query::eid(eid)))
            .transpose()
            .map(|eids| json!(eids)),
    );

    let eids_of = |records: Vec<perfdb_core::Record>| {
        json!(records.into_iter().map(|r| r.eid).collect::<Vec<_>>())
    };
    record(
        "search_and",
        backend
            .search(OP_TABLE, &Query::all_of(obj(json!({"label": "opt", "size": 3}))))
            .map(eids_of),
    );
    record(
        "search_or",
        backend
            .search(OP_TABLE, &Query::any_of(obj(json!({"label": "base", "size": 3}))))
            .map(eids_of),
    );
    record(
        "search_unknown_field",
        backend
            .search(OP_TABLE, &Query::all_of(obj(json!({"missing": 1}))))
            .map(eids_of),
    );
    record(
        "search_inside",
        backend.search_inside(OP_TABLE, "tags", &json!(2)).map(eids_of),
    );
    record(
        "get_any",
        backend
            .get(OP_TABLE, &Query::all())
            .map(|found| json!(found.is_some())),
    );
    for pass in ["unset_1", "unset_2"] {
        record(
            pass,
            backend
                .unset(OP_TABLE, &["tags".to_string()], &Query::all())
                .map(|eids| json!(eids)),
        );
    }
    record(
        "exit_without_enter",
        backend.exit_transaction(true).map(|()| Value::Null),
    );
    record("count", backend.count(OP_TABLE).map(|n| json!(n)));

    // Field and table names differing only in case are distinct
    let cased = backend
        .insert("Cased", obj(json!({"Name": 1, "name": 2, "EID": 5})))
        .and_then(|_| backend.insert("cased", obj(json!({"name": 3}))))
        .and_then(|_| backend.search("Cased", &Query::field("Name", 1)))
        .map(|found| json!(found));
    record("case_sensitive_names", cased);
    record("tables", backend.table_names().map(|names| json!(names)));
    record(
        "final",
        backend.search(OP_TABLE, &Query::all()).map(|r| json!(r)),
    );
    out
}
