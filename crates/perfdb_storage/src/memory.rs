//! In-memory table store.
//!
//! [`TableSet`] holds every table as an ordered map from EID to fields and
//! implements the query operations. [`SnapshotTables`] adds snapshot-copy
//! transactions on top of it. Both are shared with the JSON file backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::query::Query;
use crate::record::{Eid, Fields, Record};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

/// One table: EID to fields, in EID order.
pub(crate) type Table = BTreeMap<Eid, Fields>;

/// All tables of a store plus their EID counters.
#[derive(Debug, Clone, Default)]
pub(crate) struct TableSet {
    tables: BTreeMap<String, Table>,
    next_eids: BTreeMap<String, u64>,
}

impl TableSet {
    /// Builds a table set from loaded tables.
    pub(crate) fn from_tables(tables: BTreeMap<String, Table>) -> Self {
        Self {
            tables,
            next_eids: BTreeMap::new(),
        }
    }

    /// Returns the tables.
    pub(crate) fn tables(&self) -> &BTreeMap<String, Table> {
        &self.tables
    }

    /// Replaces the tables with freshly loaded ones.
    ///
    /// EID counters only move forward, so identifiers handed out earlier in
    /// this process are not reissued even if their records are gone.
    pub(crate) fn replace_tables(&mut self, tables: BTreeMap<String, Table>) {
        for (name, table) in &tables {
            let floor = table.keys().next_back().map_or(1, |eid| eid.as_u64() + 1);
            let next = self.next_eids.entry(name.clone()).or_insert(floor);
            *next = (*next).max(floor);
        }
        self.tables = tables;
    }

    pub(crate) fn count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, BTreeMap::len)
    }

    pub(crate) fn search(&self, table: &str, query: &Query) -> Vec<Record> {
        let Some(rows) = self.tables.get(table) else {
            return Vec::new();
        };
        match query.explicit_eids() {
            Some(eids) => {
                let mut eids = eids;
                eids.sort();
                eids.dedup();
                eids.into_iter()
                    .filter_map(|eid| rows.get(&eid).map(|f| Record::new(eid, f.clone())))
                    .collect()
            }
            None => rows
                .iter()
                .filter(|(eid, fields)| query.matches_parts(**eid, fields))
                .map(|(eid, fields)| Record::new(*eid, fields.clone()))
                .collect(),
        }
    }

    fn matching_eids(&self, table: &str, query: &Query) -> Vec<Eid> {
        self.search(table, query).into_iter().map(|r| r.eid).collect()
    }

    pub(crate) fn insert(&mut self, table: &str, fields: Fields) -> Record {
        let rows = self.tables.entry(table.to_string()).or_default();
        let floor = rows.keys().next_back().map_or(1, |eid| eid.as_u64() + 1);
        let next = self.next_eids.entry(table.to_string()).or_insert(floor);
        *next = (*next).max(floor);
        let eid = Eid::new(*next);
        *next += 1;
        rows.insert(eid, fields.clone());
        Record::new(eid, fields)
    }

    pub(crate) fn update(&mut self, table: &str, fields: &Fields, query: &Query) -> Vec<Eid> {
        let eids = self.matching_eids(table, query);
        if let Some(rows) = self.tables.get_mut(table) {
            for eid in &eids {
                if let Some(row) = rows.get_mut(eid) {
                    for (key, value) in fields {
                        row.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        eids
    }

    pub(crate) fn unset(&mut self, table: &str, field_names: &[String], query: &Query) -> Vec<Eid> {
        let eids = self.matching_eids(table, query);
        if let Some(rows) = self.tables.get_mut(table) {
            for eid in &eids {
                if let Some(row) = rows.get_mut(eid) {
                    for name in field_names {
                        row.remove(name);
                    }
                }
            }
        }
        eids
    }

    pub(crate) fn remove(&mut self, table: &str, query: &Query) -> Vec<Eid> {
        let eids = self.matching_eids(table, query);
        if let Some(rows) = self.tables.get_mut(table) {
            for eid in &eids {
                rows.remove(eid);
            }
        }
        eids
    }

    pub(crate) fn purge(&mut self, table: &str) {
        self.tables.entry(table.to_string()).or_default().clear();
    }

    pub(crate) fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}

/// Outcome of closing a transaction scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitOutcome {
    /// An inner scope closed; nothing happened.
    Nested,
    /// The outermost scope committed.
    Committed,
    /// The outermost scope rolled back to its snapshot.
    RolledBack,
}

/// A table set with reference-counted snapshot transactions.
#[derive(Debug, Default)]
pub(crate) struct SnapshotTables {
    pub(crate) current: TableSet,
    snapshot: Option<TableSet>,
    depth: usize,
}

impl SnapshotTables {
    pub(crate) fn new(current: TableSet) -> Self {
        Self {
            current,
            snapshot: None,
            depth: 0,
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn enter(&mut self) {
        if self.depth == 0 {
            self.snapshot = Some(self.current.clone());
        }
        self.depth += 1;
    }

    pub(crate) fn exit(&mut self, commit: bool) -> StorageResult<ExitOutcome> {
        self.exit_keep(commit).map(|(outcome, _)| outcome)
    }

    /// Closes a scope and hands back the pre-transaction state on commit,
    /// so a caller that fails to persist can restore it.
    pub(crate) fn exit_keep(&mut self, commit: bool) -> StorageResult<(ExitOutcome, Option<TableSet>)> {
        if self.depth == 0 {
            return Err(StorageError::NoTransaction);
        }
        self.depth -= 1;
        if self.depth > 0 {
            return Ok((ExitOutcome::Nested, None));
        }
        let snapshot = self.snapshot.take();
        if commit {
            Ok((ExitOutcome::Committed, snapshot))
        } else {
            if let Some(snapshot) = snapshot {
                self.current = snapshot;
            }
            Ok((ExitOutcome::RolledBack, None))
        }
    }
}

/// An in-memory table store.
///
/// This backend keeps all tables in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// Transactions copy the whole table set on the outermost
/// `enter_transaction`, which bounds this backend to small stores.
///
/// # Example
///
/// ```rust
/// use perfdb_storage::{InMemoryBackend, Query, StorageBackend};
/// use serde_json::json;
///
/// let backend = InMemoryBackend::new();
/// let fields = json!({"name": "m1"}).as_object().unwrap().clone();
/// let record = backend.insert("measurement", fields).unwrap();
/// assert_eq!(record.eid.as_u64(), 1);
/// assert_eq!(backend.count("measurement").unwrap(), 1);
/// assert!(backend.contains("measurement", &Query::field("name", "m1")).unwrap());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: RwLock<SnapshotTables>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for InMemoryBackend {
    fn count(&self, table: &str) -> StorageResult<usize> {
        Ok(self.state.read().current.count(table))
    }

    fn search(&self, table: &str, query: &Query) -> StorageResult<Vec<Record>> {
        Ok(self.state.read().current.search(table, query))
    }

    fn insert(&self, table: &str, fields: Fields) -> StorageResult<Record> {
        Ok(self.state.write().current.insert(table, fields))
    }

    fn update(&self, table: &str, fields: &Fields, query: &Query) -> StorageResult<Vec<Eid>> {
        Ok(self.state.write().current.update(table, fields, query))
    }

    fn unset(&self, table: &str, field_names: &[String], query: &Query) -> StorageResult<Vec<Eid>> {
        Ok(self.state.write().current.unset(table, field_names, query))
    }

    fn remove(&self, table: &str, query: &Query) -> StorageResult<Vec<Eid>> {
        Ok(self.state.write().current.remove(table, query))
    }

    fn purge(&self, table: &str) -> StorageResult<()> {
        self.state.write().current.purge(table);
        Ok(())
    }

    fn table_names(&self) -> StorageResult<Vec<String>> {
        Ok(self.state.read().current.table_names())
    }

    fn enter_transaction(&self) -> StorageResult<()> {
        self.state.write().enter();
        Ok(())
    }

    fn exit_transaction(&self, commit: bool) -> StorageResult<()> {
        let outcome = self.state.write().exit(commit)?;
        debug!(?outcome, "in-memory transaction scope closed");
        Ok(())
    }

    fn transaction_depth(&self) -> usize {
        self.state.read().depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FieldTest;
    use serde_json::{json, Value};

    fn fields(value: Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn insert_assigns_increasing_eids() {
        let backend = InMemoryBackend::new();
        let a = backend.insert("t", fields(json!({"n": 1}))).unwrap();
        let b = backend.insert("t", fields(json!({"n": 2}))).unwrap();
        assert_eq!(a.eid, Eid::new(1));
        assert_eq!(b.eid, Eid::new(2));

        // Tables count independently
        let c = backend.insert("u", fields(json!({}))).unwrap();
        assert_eq!(c.eid, Eid::new(1));
    }

    #[test]
    fn eids_not_reused_after_remove() {
        let backend = InMemoryBackend::new();
        backend.insert("t", fields(json!({}))).unwrap();
        let b = backend.insert("t", fields(json!({}))).unwrap();
        backend.remove("t", &Query::eid(b.eid)).unwrap();
        let c = backend.insert("t", fields(json!({}))).unwrap();
        assert_eq!(c.eid, Eid::new(3));
    }

    #[test]
    fn update_merges_fields() {
        let backend = InMemoryBackend::new();
        let r = backend.insert("t", fields(json!({"a": 1, "b": 2}))).unwrap();
        let touched = backend
            .update("t", &fields(json!({"b": 3, "c": 4})), &Query::eid(r.eid))
            .unwrap();
        assert_eq!(touched, vec![r.eid]);

        let stored = backend.get("t", &Query::eid(r.eid)).unwrap().unwrap();
        assert_eq!(Value::Object(stored.fields), json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn unset_removes_field_and_is_idempotent() {
        let backend = InMemoryBackend::new();
        let r = backend.insert("t", fields(json!({"a": 1, "b": 2}))).unwrap();
        let names = vec!["a".to_string()];
        backend.unset("t", &names, &Query::eid(r.eid)).unwrap();
        backend.unset("t", &names, &Query::eid(r.eid)).unwrap();

        let stored = backend.get("t", &Query::eid(r.eid)).unwrap().unwrap();
        assert!(!stored.contains("a"));
        assert!(stored.contains("b"));
    }

    #[test]
    fn purge_keeps_table() {
        let backend = InMemoryBackend::new();
        backend.insert("t", fields(json!({}))).unwrap();
        backend.purge("t").unwrap();
        assert_eq!(backend.count("t").unwrap(), 0);
        assert_eq!(backend.table_names().unwrap(), vec!["t".to_string()]);
    }

    #[test]
    fn search_inside_and_match_field() {
        let backend = InMemoryBackend::new();
        backend
            .insert("t", fields(json!({"name": "gcc", "ids": [1, 2]})))
            .unwrap();
        backend
            .insert("t", fields(json!({"name": "icc", "ids": 3})))
            .unwrap();

        assert_eq!(backend.search_inside("t", "ids", &json!(2)).unwrap().len(), 1);
        assert_eq!(backend.search_inside("t", "ids", &json!(3)).unwrap().len(), 1);
        assert!(backend.search_inside("t", "ids", &json!(4)).unwrap().is_empty());

        let test = FieldTest::regex("cc$").unwrap();
        assert_eq!(backend.match_field("t", "name", &test).unwrap().len(), 2);
        assert_eq!(backend.match_field("t", "missing", &FieldTest::Any).unwrap().len(), 0);
    }

    #[test]
    fn rollback_restores_snapshot() {
        let backend = InMemoryBackend::new();
        backend.insert("t", fields(json!({"a": 1}))).unwrap();

        backend.enter_transaction().unwrap();
        backend.insert("t", fields(json!({"a": 2}))).unwrap();
        backend.update("t", &fields(json!({"a": 9})), &Query::all()).unwrap();
        assert_eq!(backend.count("t").unwrap(), 2);
        backend.exit_transaction(false).unwrap();

        let all = backend.search("t", &Query::all()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get("a"), Some(&json!(1)));
    }

    #[test]
    fn nested_scopes_only_outermost_counts() {
        let backend = InMemoryBackend::new();
        backend.enter_transaction().unwrap();
        backend.enter_transaction().unwrap();
        backend.insert("t", fields(json!({}))).unwrap();
        backend.exit_transaction(true).unwrap();
        assert_eq!(backend.transaction_depth(), 1);

        // Inner writes are visible to the outer scope
        assert_eq!(backend.count("t").unwrap(), 1);

        backend.exit_transaction(false).unwrap();
        assert_eq!(backend.count("t").unwrap(), 0);
        assert_eq!(backend.transaction_depth(), 0);
    }

    #[test]
    fn exit_without_enter_fails() {
        let backend = InMemoryBackend::new();
        assert!(matches!(
            backend.exit_transaction(true),
            Err(StorageError::NoTransaction)
        ));
    }

    #[test]
    fn replace_tables_keeps_counters_monotonic() {
        let mut set = TableSet::default();
        set.insert("t", Fields::new());
        set.insert("t", Fields::new());
        set.remove("t", &Query::eid(Eid::new(2)));

        let reloaded = set.tables().clone();
        set.replace_tables(reloaded);
        assert_eq!(set.insert("t", Fields::new()).eid, Eid::new(3));
    }

    proptest::proptest! {
        #[test]
        fn eids_are_never_reused(ops in proptest::collection::vec(0u8..4, 1..40)) {
            let backend = InMemoryBackend::new();
            let mut last: Option<Eid> = None;
            for op in ops {
                match op {
                    0 | 1 => {
                        let eid = backend.insert("t", Fields::new()).unwrap().eid;
                        proptest::prop_assert!(last.map_or(true, |prev| eid > prev));
                        last = Some(eid);
                    }
                    2 => {
                        if let Some(eid) = last {
                            backend.remove("t", &Query::eid(eid)).unwrap();
                        }
                    }
                    _ => {
                        backend.enter_transaction().unwrap();
                        backend.insert("t", Fields::new()).unwrap();
                        backend.exit_transaction(false).unwrap();
                    }
                }
            }
        }
    }
}
