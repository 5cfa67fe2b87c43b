//! Embedded SQL backend.
//!
//! One SQL table per model. The primary key is the EID; every attribute is
//! a TEXT column holding the JSON encoding of its value, and SQL `NULL`
//! means the attribute is unset. Columns are added the first time a record
//! carries a new key, so the SQL schema never needs to know the model
//! schema. Referential integrity is enforced by the controller layer, not
//! by foreign keys.
//!
//! SQLite matches identifiers without regard to ASCII case, while record
//! fields and table names are case-sensitive. Names are therefore stored
//! in an encoded form: a leading `.`, then every upper-case letter as `^`
//! plus its lower-case form and `^` as `^^`. `Name` becomes `.^name` and
//! never meets `.name`, nor the `eid` key column.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::query::Query;
use crate::record::{Eid, Fields, Record};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Database file name within the storage root.
pub const SQLITE_FILE: &str = "storage.db";

/// Name of the primary key column.
const EID_COLUMN: &str = "eid";

/// Leads every encoded table and attribute name.
const NAME_PREFIX: char = '.';

/// Escapes upper-case letters within encoded names.
const CASE_ESCAPE: char = '^';

/// Default time to wait on a busy database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

struct SqliteState {
    conn: Connection,
    depth: usize,
}

/// A table-per-model SQLite store.
///
/// # Transactions
///
/// The outermost scope maps to `BEGIN IMMEDIATE` / `COMMIT` / `ROLLBACK`.
/// Each individual operation additionally runs inside a savepoint, so a
/// failing multi-statement operation never leaves a partial write behind.
///
/// # Example
///
/// ```rust
/// use perfdb_storage::{Query, SqliteBackend, StorageBackend};
/// use serde_json::json;
///
/// let backend = SqliteBackend::open_in_memory().unwrap();
/// let fields = json!({"name": "p1", "measurements": [1, 2]});
/// let record = backend
///     .insert("project", fields.as_object().unwrap().clone())
///     .unwrap();
/// let found = backend.get("project", &Query::eid(record.eid)).unwrap().unwrap();
/// assert_eq!(found.fields, record.fields);
/// ```
pub struct SqliteBackend {
    root: Option<PathBuf>,
    state: Mutex<SqliteState>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Opens or creates a SQLite store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        Self::open_with_timeout(root, DEFAULT_BUSY_TIMEOUT)
    }

    /// Opens or creates a SQLite store with a custom busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created.
    pub fn open_with_timeout(root: &Path, busy_timeout: Duration) -> StorageResult<Self> {
        std::fs::create_dir_all(root)?;
        let conn = Connection::open(root.join(SQLITE_FILE))?;
        // Set first: switching the journal mode can meet a busy database
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        Ok(Self {
            root: Some(root.to_path_buf()),
            state: Mutex::new(SqliteState { conn, depth: 0 }),
        })
    }

    /// Opens a private in-memory SQLite store.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            root: None,
            state: Mutex::new(SqliteState { conn, depth: 0 }),
        })
    }

    /// Runs a mutation inside a savepoint.
    fn write<T>(&self, f: impl FnOnce(&Connection) -> StorageResult<T>) -> StorageResult<T> {
        let mut state = self.state.lock();
        let savepoint = state.conn.savepoint()?;
        let out = f(&savepoint)?;
        savepoint.commit()?;
        Ok(out)
    }
}

impl StorageBackend for SqliteBackend {
    fn count(&self, table: &str) -> StorageResult<usize> {
        let state = self.state.lock();
        if !table_exists(&state.conn, table)? {
            return Ok(0);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote(table)?);
        let count: i64 = state.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn search(&self, table: &str, query: &Query) -> StorageResult<Vec<Record>> {
        let state = self.state.lock();
        select(&state.conn, table, query)
    }

    fn insert(&self, table: &str, fields: Fields) -> StorageResult<Record> {
        self.write(|conn| {
            ensure_table(conn, table)?;
            let keys: Vec<&String> = fields.keys().collect();
            ensure_columns(conn, table, &keys)?;

            let sql = if keys.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES", quote(table)?)
            } else {
                let columns = keys
                    .iter()
                    .map(|k| quote(k))
                    .collect::<StorageResult<Vec<_>>>()?
                    .join(", ");
                let marks = vec!["?"; keys.len()].join(", ");
                format!("INSERT INTO {} ({columns}) VALUES ({marks})", quote(table)?)
            };
            let params = fields
                .values()
                .map(|v| Ok(SqlValue::Text(serde_json::to_string(v)?)))
                .collect::<StorageResult<Vec<_>>>()?;
            conn.execute(&sql, params_from_iter(params))?;

            let eid = Eid::new(u64::try_from(conn.last_insert_rowid()).map_err(|_| {
                StorageError::corrupted(format!("negative rowid in table {table:?}"))
            })?);
            Ok(Record::new(eid, fields))
        })
    }

    fn update(&self, table: &str, fields: &Fields, query: &Query) -> StorageResult<Vec<Eid>> {
        self.write(|conn| {
            let eids: Vec<Eid> = select(conn, table, query)?.into_iter().map(|r| r.eid).collect();
            if eids.is_empty() || fields.is_empty() {
                return Ok(eids);
            }
            let keys: Vec<&String> = fields.keys().collect();
            ensure_columns(conn, table, &keys)?;

            let assignments = keys
                .iter()
                .map(|k| Ok(format!("{} = ?", quote(k)?)))
                .collect::<StorageResult<Vec<_>>>()?
                .join(", ");
            let sql = format!(
                "UPDATE {} SET {assignments} WHERE {EID_COLUMN} = ?",
                quote(table)?
            );
            let mut stmt = conn.prepare(&sql)?;
            for eid in &eids {
                let mut params = fields
                    .values()
                    .map(|v| Ok(SqlValue::Text(serde_json::to_string(v)?)))
                    .collect::<StorageResult<Vec<_>>>()?;
                params.push(eid_param(*eid)?);
                stmt.execute(params_from_iter(params))?;
            }
            Ok(eids)
        })
    }

    fn unset(&self, table: &str, field_names: &[String], query: &Query) -> StorageResult<Vec<Eid>> {
        self.write(|conn| {
            let eids: Vec<Eid> = select(conn, table, query)?.into_iter().map(|r| r.eid).collect();
            if eids.is_empty() {
                return Ok(eids);
            }
            let existing = columns(conn, table)?;
            let present: Vec<&String> = field_names
                .iter()
                .filter(|name| existing.contains(name.as_str()))
                .collect();
            if present.is_empty() {
                return Ok(eids);
            }

            let assignments = present
                .iter()
                .map(|k| Ok(format!("{} = NULL", quote(k)?)))
                .collect::<StorageResult<Vec<_>>>()?
                .join(", ");
            let sql = format!(
                "UPDATE {} SET {assignments} WHERE {EID_COLUMN} = ?",
                quote(table)?
            );
            let mut stmt = conn.prepare(&sql)?;
            for eid in &eids {
                stmt.execute([eid_param(*eid)?])?;
            }
            Ok(eids)
        })
    }

    fn remove(&self, table: &str, query: &Query) -> StorageResult<Vec<Eid>> {
        self.write(|conn| {
            let eids: Vec<Eid> = select(conn, table, query)?.into_iter().map(|r| r.eid).collect();
            if eids.is_empty() {
                return Ok(eids);
            }
            let sql = format!("DELETE FROM {} WHERE {EID_COLUMN} = ?", quote(table)?);
            let mut stmt = conn.prepare(&sql)?;
            for eid in &eids {
                stmt.execute([eid_param(*eid)?])?;
            }
            Ok(eids)
        })
    }

    fn purge(&self, table: &str) -> StorageResult<()> {
        self.write(|conn| {
            ensure_table(conn, table)?;
            conn.execute(&format!("DELETE FROM {}", quote(table)?), [])?;
            Ok(())
        })
    }

    fn table_names(&self) -> StorageResult<Vec<String>> {
        let state = self.state.lock();
        let mut stmt = state.conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let idents = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut names: Vec<String> = idents.iter().filter_map(|ident| decode_name(ident)).collect();
        // Encoded order differs from name order once escapes appear
        names.sort();
        Ok(names)
    }

    fn enter_transaction(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.depth == 0 {
            state.conn.execute_batch("BEGIN IMMEDIATE")?;
            debug!(root = ?self.root, "sqlite transaction started");
        }
        state.depth += 1;
        Ok(())
    }

    fn exit_transaction(&self, commit: bool) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.depth == 0 {
            return Err(StorageError::NoTransaction);
        }
        state.depth -= 1;
        if state.depth > 0 {
            return Ok(());
        }

        if commit {
            if let Err(err) = state.conn.execute_batch("COMMIT") {
                // A failed COMMIT can leave the transaction open
                let _ = state.conn.execute_batch("ROLLBACK");
                return Err(err.into());
            }
            debug!(root = ?self.root, "sqlite transaction committed");
        } else {
            state.conn.execute_batch("ROLLBACK")?;
            debug!(root = ?self.root, "sqlite transaction rolled back");
        }
        Ok(())
    }

    fn transaction_depth(&self) -> usize {
        self.state.lock().depth
    }

    fn location(&self) -> Option<&Path> {
        self.root.as_deref()
    }
}

/// Encodes a table or field name into its SQL identifier.
fn encode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    out.push(NAME_PREFIX);
    for c in name.chars() {
        if c == CASE_ESCAPE {
            out.push(CASE_ESCAPE);
            out.push(CASE_ESCAPE);
        } else if c.is_ascii_uppercase() {
            out.push(CASE_ESCAPE);
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Reverses [`encode_name`]; `None` for identifiers it did not produce.
fn decode_name(ident: &str) -> Option<String> {
    let mut chars = ident.strip_prefix(NAME_PREFIX)?.chars();
    let mut out = String::with_capacity(ident.len());
    while let Some(c) = chars.next() {
        if c == CASE_ESCAPE {
            match chars.next()? {
                CASE_ESCAPE => out.push(CASE_ESCAPE),
                lower => out.push(lower.to_ascii_uppercase()),
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// Encodes a table or field name and double-quotes it.
fn quote(name: &str) -> StorageResult<String> {
    if name.contains('\0') {
        return Err(StorageError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", encode_name(name).replace('"', "\"\"")))
}

fn eid_param(eid: Eid) -> StorageResult<SqlValue> {
    i64::try_from(eid.as_u64())
        .map(SqlValue::Integer)
        .map_err(|_| StorageError::InvalidIdentifier(eid.to_string()))
}

fn table_exists(conn: &Connection, table: &str) -> StorageResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [encode_name(table)],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn ensure_table(conn: &Connection, table: &str) -> StorageResult<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({EID_COLUMN} INTEGER PRIMARY KEY AUTOINCREMENT)",
        quote(table)?
    );
    conn.execute_batch(&sql)?;
    Ok(())
}

/// Returns the decoded field names that have a column in `table`.
fn columns(conn: &Connection, table: &str) -> StorageResult<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)?))?;
    let idents = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(idents.iter().filter_map(|ident| decode_name(ident)).collect())
}

fn ensure_columns(conn: &Connection, table: &str, keys: &[&String]) -> StorageResult<()> {
    let existing = columns(conn, table)?;
    for key in keys {
        if !existing.contains(key.as_str()) {
            let sql = format!("ALTER TABLE {} ADD COLUMN {} TEXT", quote(table)?, quote(key)?);
            conn.execute_batch(&sql)?;
        }
    }
    Ok(())
}

/// Runs a query against one table.
fn select(conn: &Connection, table: &str, query: &Query) -> StorageResult<Vec<Record>> {
    if !table_exists(conn, table)? {
        return Ok(Vec::new());
    }

    let mut params: Vec<SqlValue> = Vec::new();
    let clause = match query {
        Query::Eid(eid) => match eid_param(*eid) {
            Ok(param) => {
                params.push(param);
                Some(format!("{EID_COLUMN} = ?"))
            }
            Err(_) => return Ok(Vec::new()),
        },
        Query::Eids(eids) => {
            params.extend(eids.iter().filter_map(|eid| eid_param(*eid).ok()));
            if params.is_empty() {
                return Ok(Vec::new());
            }
            Some(format!("{EID_COLUMN} IN ({})", vec!["?"; params.len()].join(", ")))
        }
        Query::Fields { fields, .. } if fields.is_empty() => None,
        Query::Fields { fields, match_any } => {
            let existing = columns(conn, table)?;
            let mut terms = Vec::new();
            for (key, value) in fields {
                if !existing.contains(key.as_str()) {
                    if *match_any {
                        continue;
                    }
                    // No record can hold a field that has no column
                    return Ok(Vec::new());
                }
                terms.push(format!("{} = ?", quote(key)?));
                params.push(SqlValue::Text(serde_json::to_string(value)?));
            }
            if terms.is_empty() {
                return Ok(Vec::new());
            }
            let joiner = if *match_any { " OR " } else { " AND " };
            Some(terms.join(joiner))
        }
    };

    let mut sql = format!("SELECT * FROM {}", quote(table)?);
    if let Some(clause) = clause {
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
    }
    sql.push_str(&format!(" ORDER BY {EID_COLUMN}"));

    let mut stmt = conn.prepare(&sql)?;
    let names: Vec<Option<String>> = stmt.column_names().into_iter().map(decode_name).collect();
    let mut rows = stmt.query(params_from_iter(params))?;

    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let raw_eid: i64 = row.get(0)?;
        let mut fields = Fields::new();
        for (index, name) in names.iter().enumerate().skip(1) {
            let Some(name) = name else {
                continue;
            };
            let text: Option<String> = row.get(index)?;
            if let Some(text) = text {
                fields.insert(name.clone(), serde_json::from_str(&text)?);
            }
        }
        let eid = u64::try_from(raw_eid)
            .map_err(|_| StorageError::corrupted(format!("negative EID in table {table:?}")))?;
        records.push(Record::new(Eid::new(eid), fields));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    fn fields(value: Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn round_trips_typed_values() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let input = fields(json!({
            "name": "p1",
            "count": 3,
            "flag": false,
            "tags": ["a", "b"],
            "nothing": null,
        }));
        let record = backend.insert("project", input.clone()).unwrap();
        let stored = backend.get("project", &Query::eid(record.eid)).unwrap().unwrap();
        assert_eq!(stored.fields, input);
    }

    #[test]
    fn missing_columns_are_absent_fields() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.insert("t", fields(json!({"a": 1}))).unwrap();
        let second = backend.insert("t", fields(json!({"b": 2}))).unwrap();

        let stored = backend.get("t", &Query::eid(second.eid)).unwrap().unwrap();
        assert!(!stored.contains("a"));
        assert_eq!(stored.get("b"), Some(&json!(2)));
    }

    #[test]
    fn unset_is_distinct_from_null() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let r = backend.insert("t", fields(json!({"a": null, "b": 1}))).unwrap();
        backend
            .unset("t", &["b".to_string(), "never".to_string()], &Query::eid(r.eid))
            .unwrap();

        let stored = backend.get("t", &Query::eid(r.eid)).unwrap().unwrap();
        assert!(stored.contains("a"));
        assert!(!stored.contains("b"));
    }

    #[test]
    fn field_queries_on_unknown_columns() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.insert("t", fields(json!({"a": 1}))).unwrap();

        let and = Query::all_of(fields(json!({"a": 1, "zzz": 2})));
        assert!(backend.search("t", &and).unwrap().is_empty());

        let or = Query::any_of(fields(json!({"a": 1, "zzz": 2})));
        assert_eq!(backend.search("t", &or).unwrap().len(), 1);

        assert!(backend.search("missing", &Query::all()).unwrap().is_empty());
        assert_eq!(backend.count("missing").unwrap(), 0);
    }

    #[test]
    fn eids_not_reused_after_purge() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.insert("t", Fields::new()).unwrap();
        backend.insert("t", Fields::new()).unwrap();
        backend.purge("t").unwrap();
        let next = backend.insert("t", Fields::new()).unwrap();
        assert_eq!(next.eid, Eid::new(3));
        assert_eq!(backend.table_names().unwrap(), vec!["t".to_string()]);
    }

    #[test]
    fn nested_transaction_rollback() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.insert("t", fields(json!({"a": 1}))).unwrap();

        backend.enter_transaction().unwrap();
        backend.enter_transaction().unwrap();
        backend.insert("t", fields(json!({"a": 2}))).unwrap();
        backend.exit_transaction(true).unwrap();
        assert_eq!(backend.count("t").unwrap(), 2);
        backend.exit_transaction(false).unwrap();

        assert_eq!(backend.count("t").unwrap(), 1);
        assert!(matches!(
            backend.exit_transaction(true),
            Err(StorageError::NoTransaction)
        ));
    }

    #[test]
    fn quoting_handles_odd_names() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let r = backend
            .insert("odd \"table\"", fields(json!({"with space": 1})))
            .unwrap();
        let stored = backend.get("odd \"table\"", &Query::eid(r.eid)).unwrap().unwrap();
        assert_eq!(stored.get("with space"), Some(&json!(1)));

        assert!(matches!(
            backend.insert("t", fields(json!({"bad\u{0000}name": 1}))),
            Err(StorageError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn names_differing_in_case_stay_apart() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let input = fields(json!({"Name": 1, "name": 2, "EID": 5, "eid": 6, "a^b": 7}));
        let r = backend.insert("t", input.clone()).unwrap();
        backend.insert("T", fields(json!({"name": "upper"}))).unwrap();

        let stored = backend.get("t", &Query::eid(r.eid)).unwrap().unwrap();
        assert_eq!(stored.fields, input);
        assert_eq!(backend.search("t", &Query::field("Name", 1)).unwrap().len(), 1);
        assert!(backend.search("t", &Query::field("Name", 2)).unwrap().is_empty());
        assert_eq!(backend.count("T").unwrap(), 1);
        assert_eq!(backend.count("t").unwrap(), 1);
        assert_eq!(backend.table_names().unwrap(), vec!["T".to_string(), "t".to_string()]);

        backend.unset("t", &["EID".to_string()], &Query::all()).unwrap();
        let stored = backend.get("t", &Query::eid(r.eid)).unwrap().unwrap();
        assert!(!stored.contains("EID"));
        assert_eq!(stored.get("eid"), Some(&json!(6)));
    }

    #[test]
    fn name_encoding_round_trips() {
        for name in ["", "name", "Name", "EID", "a^B^^c", "ÜBER", "sqlite_master"] {
            assert_eq!(decode_name(&encode_name(name)).as_deref(), Some(name));
        }
        assert_eq!(encode_name("Name"), ".^name");
        assert_eq!(decode_name(EID_COLUMN), None);
    }

    #[test]
    fn persists_on_disk() {
        let dir = tempdir().unwrap();
        {
            let backend = SqliteBackend::open(dir.path()).unwrap();
            backend.insert("t", fields(json!({"a": 1}))).unwrap();
        }
        let backend = SqliteBackend::open(dir.path()).unwrap();
        assert_eq!(backend.count("t").unwrap(), 1);
        assert_eq!(backend.location(), Some(dir.path()));
    }
}
