//! Storage backend trait definition.

use crate::error::StorageResult;
use crate::query::{contains_value, FieldTest, Query};
use crate::record::{Eid, Fields, Record};
use serde_json::Value;
use std::path::Path;

/// A durable table store.
///
/// Backends store schema-less records in named tables. They know nothing
/// about models, associations or validation; the controller layer owns all
/// of that.
///
/// # Invariants
///
/// - `insert` assigns an EID that is unique within the table and never
///   reused within the process lifetime
/// - `update` merges fields; fields not named are left untouched
/// - `unset` removes fields, so `Record::contains` is false afterwards
/// - `purge` empties a table without dropping it
/// - reading a table that was never written yields no records
///
/// # Transactions
///
/// `enter_transaction` / `exit_transaction` nest by reference count. Only
/// the outermost pair takes a snapshot and commits or rolls back; inner
/// pairs only adjust the depth. Reads inside a transaction always observe
/// its uncommitted writes.
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::JsonFileBackend`] - One JSON document per storage root
/// - [`super::SqliteBackend`] - One SQL table per model
pub trait StorageBackend: Send + Sync {
    /// Returns the number of records in a table.
    fn count(&self, table: &str) -> StorageResult<usize>;

    /// Returns one record matching the query.
    ///
    /// For field queries with several matches an arbitrary one is returned;
    /// callers that need uniqueness should use [`search`](Self::search).
    fn get(&self, table: &str, query: &Query) -> StorageResult<Option<Record>> {
        Ok(self.search(table, query)?.into_iter().next())
    }

    /// Returns all records matching the query, in EID order.
    fn search(&self, table: &str, query: &Query) -> StorageResult<Vec<Record>>;

    /// Returns records whose `field` is `value` or a collection containing it.
    fn search_inside(&self, table: &str, field: &str, value: &Value) -> StorageResult<Vec<Record>> {
        Ok(self
            .search(table, &Query::all())?
            .into_iter()
            .filter(|record| {
                record
                    .get(field)
                    .is_some_and(|field_value| contains_value(field_value, value))
            })
            .collect())
    }

    /// Returns records whose `field` passes the test.
    fn match_field(&self, table: &str, field: &str, test: &FieldTest) -> StorageResult<Vec<Record>> {
        Ok(self
            .search(table, &Query::all())?
            .into_iter()
            .filter(|record| test.test(record.get(field)))
            .collect())
    }

    /// Returns true if at least one record matches the query.
    fn contains(&self, table: &str, query: &Query) -> StorageResult<bool> {
        Ok(self.get(table, query)?.is_some())
    }

    /// Inserts a record, assigning its EID, and returns the stored record.
    fn insert(&self, table: &str, fields: Fields) -> StorageResult<Record>;

    /// Merges `fields` into every record matching the query.
    ///
    /// Returns the EIDs of the updated records.
    fn update(&self, table: &str, fields: &Fields, query: &Query) -> StorageResult<Vec<Eid>>;

    /// Removes the named fields from every record matching the query.
    ///
    /// Returns the EIDs of the matched records.
    fn unset(&self, table: &str, field_names: &[String], query: &Query) -> StorageResult<Vec<Eid>>;

    /// Removes every record matching the query.
    ///
    /// Returns the EIDs of the removed records.
    fn remove(&self, table: &str, query: &Query) -> StorageResult<Vec<Eid>>;

    /// Removes every record in a table. The table itself persists.
    fn purge(&self, table: &str) -> StorageResult<()>;

    /// Returns the names of all tables that have ever been written.
    fn table_names(&self) -> StorageResult<Vec<String>>;

    /// Opens a transaction scope.
    fn enter_transaction(&self) -> StorageResult<()>;

    /// Closes a transaction scope, committing if `commit` is true and
    /// rolling back otherwise. Only the outermost scope takes effect.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoTransaction`](crate::StorageError::NoTransaction)
    /// if no scope is open.
    fn exit_transaction(&self, commit: bool) -> StorageResult<()>;

    /// Returns the current transaction nesting depth (0 = none).
    fn transaction_depth(&self) -> usize;

    /// Returns the storage root directory, if the backend lives on disk.
    fn location(&self) -> Option<&Path> {
        None
    }
}
