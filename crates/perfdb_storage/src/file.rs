//! JSON file backend for persistent storage.
//!
//! The storage root holds a single document:
//!
//! ```text
//! <root>/
//! ├─ storage.json      # {"<table>": {"<eid>": {<fields>}}}
//! └─ .lock             # Advisory lock, managed by the controller layer
//! ```

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::memory::{ExitOutcome, SnapshotTables, Table, TableSet};
use crate::query::Query;
use crate::record::{Eid, Fields, Record};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Document file name within the storage root.
pub const STORE_FILE: &str = "storage.json";
/// Temporary file for atomic document writes.
const STORE_TEMP: &str = "storage.json.tmp";

/// Modification stamp of the document file, used to spot foreign commits.
///
/// Every rewrite renames a fresh file into place, so the file id changes
/// even when the length and a coarse mtime do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
    file_id: (u64, u64),
}

#[derive(Debug)]
struct FileState {
    tables: SnapshotTables,
    stamp: Option<FileStamp>,
}

/// A JSON document store.
///
/// All tables live in memory and are written back as one JSON document.
///
/// # Durability
///
/// - Writes outside a transaction rewrite the document immediately
/// - Writes inside a transaction rewrite it once, on outermost commit
/// - Rewrites go through a temporary file and an atomic rename
///
/// # Freshness
///
/// Every outermost `enter_transaction` reloads the document, so a
/// transaction always starts from the latest commit of any process. Reads
/// and writes outside a transaction reload it when its stamp changed.
///
/// # Example
///
/// ```no_run
/// use perfdb_storage::{JsonFileBackend, StorageBackend};
/// use std::path::Path;
///
/// let backend = JsonFileBackend::open(Path::new(".perfdb")).unwrap();
/// backend.enter_transaction().unwrap();
/// backend.insert("project", serde_json::Map::new()).unwrap();
/// backend.exit_transaction(true).unwrap(); // storage.json rewritten here
/// ```
#[derive(Debug)]
pub struct JsonFileBackend {
    root: PathBuf,
    state: RwLock<FileState>,
}

impl JsonFileBackend {
    /// Opens or creates a JSON store rooted at `root`.
    ///
    /// The directory is created if needed. A missing document is treated as
    /// an empty store; it is written on the first mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the document
    /// cannot be read or parsed.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        let path = root.join(STORE_FILE);
        let tables = load_document(&path)?;
        let stamp = stamp_of(&path)?;

        Ok(Self {
            root: root.to_path_buf(),
            state: RwLock::new(FileState {
                tables: SnapshotTables::new(TableSet::from_tables(tables)),
                stamp,
            }),
        })
    }

    /// Returns the path to the JSON document.
    #[must_use]
    pub fn document_path(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    /// Reloads the document if another process rewrote it.
    fn refresh(&self) -> StorageResult<()> {
        self.reload(false)
    }

    /// Reloads the document, unconditionally when `force` is set.
    ///
    /// No-op while a transaction is open: the transaction works on its own
    /// view until it commits or rolls back.
    fn reload(&self, force: bool) -> StorageResult<()> {
        let path = self.document_path();
        let current = stamp_of(&path)?;
        {
            let state = self.state.read();
            if state.tables.depth() > 0 || (!force && state.stamp == current) {
                return Ok(());
            }
        }

        let mut state = self.state.write();
        if state.tables.depth() > 0 {
            return Ok(());
        }
        debug!(path = %path.display(), "reloading changed store document");
        let tables = load_document(&path)?;
        state.tables.current.replace_tables(tables);
        state.stamp = current;
        Ok(())
    }

    /// Writes the current tables back to disk.
    fn persist(&self, state: &mut FileState) -> StorageResult<()> {
        let path = self.document_path();
        let temp_path = self.root.join(STORE_TEMP);

        let document: BTreeMap<&str, BTreeMap<String, &Fields>> = state
            .tables
            .current
            .tables()
            .iter()
            .map(|(name, table)| {
                let rows = table
                    .iter()
                    .map(|(eid, fields)| (eid.to_string(), fields))
                    .collect();
                (name.as_str(), rows)
            })
            .collect();
        let data = serde_json::to_vec_pretty(&document)?;

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &path)?;
        self.sync_directory()?;

        state.stamp = stamp_of(&path)?;
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        let dir = File::open(&self.root)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&TableSet) -> T) -> StorageResult<T> {
        self.refresh()?;
        let state = self.state.read();
        Ok(f(&state.tables.current))
    }

    /// Applies a mutation, persisting it unless a transaction is open.
    ///
    /// A failed write restores the in-memory tables, so memory never runs
    /// ahead of the document outside a transaction.
    fn mutate<T>(&self, f: impl FnOnce(&mut TableSet) -> T) -> StorageResult<T> {
        self.refresh()?;
        let mut state = self.state.write();
        if state.tables.depth() > 0 {
            return Ok(f(&mut state.tables.current));
        }

        let backup = state.tables.current.clone();
        let out = f(&mut state.tables.current);
        if let Err(err) = self.persist(&mut state) {
            state.tables.current = backup;
            return Err(err);
        }
        Ok(out)
    }
}

impl StorageBackend for JsonFileBackend {
    fn count(&self, table: &str) -> StorageResult<usize> {
        self.read(|tables| tables.count(table))
    }

    fn search(&self, table: &str, query: &Query) -> StorageResult<Vec<Record>> {
        self.read(|tables| tables.search(table, query))
    }

    fn insert(&self, table: &str, fields: Fields) -> StorageResult<Record> {
        self.mutate(|tables| tables.insert(table, fields))
    }

    fn update(&self, table: &str, fields: &Fields, query: &Query) -> StorageResult<Vec<Eid>> {
        self.mutate(|tables| tables.update(table, fields, query))
    }

    fn unset(&self, table: &str, field_names: &[String], query: &Query) -> StorageResult<Vec<Eid>> {
        self.mutate(|tables| tables.unset(table, field_names, query))
    }

    fn remove(&self, table: &str, query: &Query) -> StorageResult<Vec<Eid>> {
        self.mutate(|tables| tables.remove(table, query))
    }

    fn purge(&self, table: &str) -> StorageResult<()> {
        self.mutate(|tables| tables.purge(table))
    }

    fn table_names(&self) -> StorageResult<Vec<String>> {
        self.read(TableSet::table_names)
    }

    fn enter_transaction(&self) -> StorageResult<()> {
        // Outermost scope starts from the latest committed document
        self.reload(true)?;
        self.state.write().tables.enter();
        Ok(())
    }

    fn exit_transaction(&self, commit: bool) -> StorageResult<()> {
        let mut state = self.state.write();
        let (outcome, previous) = state.tables.exit_keep(commit)?;
        match outcome {
            ExitOutcome::Nested => {}
            ExitOutcome::Committed => {
                if let Err(err) = self.persist(&mut state) {
                    warn!(error = %err, "commit failed, restoring pre-transaction state");
                    if let Some(previous) = previous {
                        state.tables.current = previous;
                    }
                    return Err(err);
                }
                debug!(path = %self.root.display(), "transaction committed");
            }
            ExitOutcome::RolledBack => {
                debug!(path = %self.root.display(), "transaction rolled back");
            }
        }
        Ok(())
    }

    fn transaction_depth(&self) -> usize {
        self.state.read().tables.depth()
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

fn stamp_of(path: &Path) -> StorageResult<Option<FileStamp>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(FileStamp {
            modified: meta.modified()?,
            len: meta.len(),
            file_id: file_id(&meta),
        })),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(unix)]
fn file_id(meta: &fs::Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (meta.dev(), meta.ino())
}

#[cfg(not(unix))]
fn file_id(_meta: &fs::Metadata) -> (u64, u64) {
    (0, 0)
}

fn load_document(path: &Path) -> StorageResult<BTreeMap<String, Table>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(err.into()),
    };
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }

    let raw: BTreeMap<String, BTreeMap<String, Fields>> = serde_json::from_slice(&data)?;
    let mut tables = BTreeMap::new();
    for (name, rows) in raw {
        let mut table = Table::new();
        for (key, fields) in rows {
            let eid: Eid = key.parse().map_err(|_| {
                StorageError::corrupted(format!("table {name:?} has non-numeric EID {key:?}"))
            })?;
            table.insert(eid, fields);
        }
        tables.insert(name, table);
    }
    Ok(tables)
}
