//! Database handle.
//!
//! A [`Database`] ties one storage backend to the schema registry, the
//! per-model lifecycle hooks and the storage lock. Controllers are borrowed
//! from it and never cache records.

use crate::config::{BackendConfig, Config};
use crate::controller::Controller;
use crate::error::{CoreError, CoreResult};
use crate::hooks::ModelHooks;
use crate::integrity::{self, IntegrityIssue};
use crate::lock::ProcessLock;
use crate::schema::SchemaRegistry;
use perfdb_storage::{InMemoryBackend, JsonFileBackend, SqliteBackend, StorageBackend};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An open record store.
///
/// # Example
///
/// ```rust
/// use perfdb_core::{Attribute, AttributeType, Config, Database, Schema, SchemaRegistry};
/// use serde_json::json;
///
/// let schema = Schema::builder("target")
///     .attribute(Attribute::scalar("name", AttributeType::String).required().unique())
///     .build()
///     .unwrap();
/// let registry = SchemaRegistry::new([schema]).unwrap();
/// let db = Database::open(Config::default(), registry).unwrap();
///
/// let targets = db.controller("target").unwrap();
/// let fields = json!({"name": "cluster"}).as_object().unwrap().clone();
/// let record = targets.create(fields).unwrap();
/// assert_eq!(targets.count().unwrap(), 1);
/// assert!(targets.one(record.eid).unwrap().is_some());
/// ```
pub struct Database {
    backend: Box<dyn StorageBackend>,
    registry: Arc<SchemaRegistry>,
    hooks: HashMap<String, Arc<dyn ModelHooks>>,
    lock: Option<ProcessLock>,
    config: Config,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("models", &self.registry.models().collect::<Vec<_>>())
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Opens the backend described by `config`.
    ///
    /// On-disk backends get a [`ProcessLock`] in their storage root.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage root is missing and
    /// `create_if_missing` is false, or the backend cannot be opened.
    pub fn open(config: Config, registry: impl Into<Arc<SchemaRegistry>>) -> CoreResult<Self> {
        if let Some(root) = config.backend.root() {
            if !root.exists() && !config.create_if_missing {
                return Err(CoreError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("storage root does not exist: {}", root.display()),
                )));
            }
        }

        let backend: Box<dyn StorageBackend> = match &config.backend {
            BackendConfig::InMemory => Box::new(InMemoryBackend::new()),
            BackendConfig::JsonFile { root } => Box::new(JsonFileBackend::open(root)?),
            BackendConfig::Sqlite { root } => Box::new(SqliteBackend::open_with_timeout(
                root,
                config.sqlite_busy_timeout,
            )?),
        };
        info!(backend = ?config.backend, "database opened");

        Ok(Self::with_backend(backend, registry, config))
    }

    /// Wraps an already constructed backend.
    ///
    /// A lock is created only when the backend reports an on-disk
    /// location; remote and in-memory backends run unlocked.
    #[must_use]
    pub fn with_backend(
        backend: Box<dyn StorageBackend>,
        registry: impl Into<Arc<SchemaRegistry>>,
        config: Config,
    ) -> Self {
        let lock = backend
            .location()
            .map(|root| ProcessLock::new(root, config.lock_timeout));
        Self {
            backend,
            registry: registry.into(),
            hooks: HashMap::new(),
            lock,
            config,
        }
    }

    /// Registers lifecycle hooks for a model, replacing earlier ones.
    #[must_use]
    pub fn with_hooks(mut self, model: impl Into<String>, hooks: impl ModelHooks + 'static) -> Self {
        self.hooks.insert(model.into(), Arc::new(hooks));
        self
    }

    /// Returns the schema registry.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Returns the storage backend.
    #[must_use]
    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    /// Returns the configuration the database was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the storage lock, if the backend lives on disk.
    #[must_use]
    pub fn lock(&self) -> Option<&ProcessLock> {
        self.lock.as_ref()
    }

    /// Returns a controller for `model`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownModel`] if the model is not registered.
    pub fn controller(&self, model: &str) -> CoreResult<Controller<'_>> {
        let schema = self.registry.schema(model)?;
        Ok(Controller::new(self, schema))
    }

    pub(crate) fn hooks_for(&self, model: &str) -> Option<&dyn ModelHooks> {
        self.hooks.get(model).map(|hooks| hooks.as_ref())
    }

    /// Runs `f` under the storage lock inside one storage transaction.
    ///
    /// Commits if `f` returns `Ok` and rolls back otherwise. Nested calls
    /// join the outer transaction.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or a lock/storage error.
    pub fn transaction<T>(&self, f: impl FnOnce(&Self) -> CoreResult<T>) -> CoreResult<T> {
        let _guard = self.lock.as_ref().map(ProcessLock::acquire).transpose()?;
        self.backend.enter_transaction()?;
        let depth = self.backend.transaction_depth();

        match f(self) {
            Ok(value) => {
                self.backend.exit_transaction(true)?;
                if depth == 1 {
                    debug!("transaction committed");
                }
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.backend.exit_transaction(false) {
                    warn!(%rollback, "rollback failed");
                }
                if depth == 1 {
                    warn!(error = %err, "transaction rolled back");
                }
                Err(err)
            }
        }
    }

    /// Empties a table under the storage lock.
    ///
    /// Associations are not propagated; callers purging a model that
    /// others reference should run [`verify`](Self::verify) afterwards.
    ///
    /// # Errors
    ///
    /// Returns a lock or storage error.
    pub fn purge(&self, table: &str) -> CoreResult<()> {
        self.transaction(|db| Ok(db.backend.purge(table)?))
    }

    /// Checks referential integrity across every registered model.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a table cannot be read.
    pub fn verify(&self) -> CoreResult<Vec<IntegrityIssue>> {
        integrity::check(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, AttributeType, Schema};
    use perfdb_storage::{Fields, Query};
    use serde_json::json;
    use tempfile::tempdir;

    fn registry() -> SchemaRegistry {
        let schema = Schema::builder("target")
            .attribute(Attribute::scalar("name", AttributeType::String).required())
            .build()
            .unwrap();
        SchemaRegistry::new([schema]).unwrap()
    }

    fn fields(name: &str) -> Fields {
        json!({ "name": name }).as_object().unwrap().clone()
    }

    #[test]
    fn transaction_commits_and_rolls_back() {
        let db = Database::open(Config::default(), registry()).unwrap();

        db.transaction(|db| Ok(db.backend().insert("target", fields("a"))?))
            .unwrap();
        let err = db
            .transaction(|db| {
                db.backend().insert("target", fields("b"))?;
                Err::<(), _>(CoreError::schema("target", "forced"))
            })
            .unwrap_err();

        assert_eq!(err.kind(), "schema");
        assert_eq!(db.backend().count("target").unwrap(), 1);
        assert_eq!(db.backend().transaction_depth(), 0);
    }

    #[test]
    fn on_disk_backends_are_locked() {
        let dir = tempdir().unwrap();
        let db = Database::open(Config::new().json_file(dir.path()), registry()).unwrap();
        let lock = db.lock().unwrap();

        db.transaction(|_| {
            assert!(lock.is_held());
            Ok(())
        })
        .unwrap();
        assert!(!lock.is_held());

        let memory = Database::open(Config::default(), registry()).unwrap();
        assert!(memory.lock().is_none());
    }

    #[test]
    fn missing_root_without_create() {
        let dir = tempdir().unwrap();
        let config = Config::new()
            .sqlite(dir.path().join("absent"))
            .create_if_missing(false);
        assert!(Database::open(config, registry()).is_err());
    }

    #[test]
    fn unknown_controller() {
        let db = Database::open(Config::default(), registry()).unwrap();
        assert!(matches!(
            db.controller("compiler"),
            Err(CoreError::UnknownModel { .. })
        ));
    }

    #[test]
    fn purge_keeps_table() {
        let db = Database::open(Config::default(), registry()).unwrap();
        db.backend().insert("target", fields("a")).unwrap();
        db.purge("target").unwrap();
        assert!(db.backend().search("target", &Query::all()).unwrap().is_empty());
        assert_eq!(db.backend().table_names().unwrap(), vec!["target".to_string()]);
    }
}
