//! Test fixtures and database helpers.
//!
//! Provides convenience functions for opening a database on each backend
//! kind with automatic cleanup of on-disk roots.

use perfdb_core::{Config, Database, ModelHooks, SchemaRegistry, StorageBackend};
use perfdb_remote::{BackendServer, LoopbackClient, RemoteBackend, RemoteConfig};
use perfdb_storage::{InMemoryBackend, JsonFileBackend, SqliteBackend};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Remote backend served in-process by a [`BackendServer`].
pub type LoopbackRemote = RemoteBackend<LoopbackClient<BackendServer<InMemoryBackend>>>;

/// Database name used by loopback remotes.
pub const REMOTE_DATABASE: &str = "testkit";

/// Bearer token used by loopback remotes.
pub const REMOTE_TOKEN: &str = "testkit-token";

/// The backend kinds a test can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    /// [`InMemoryBackend`].
    Memory,
    /// [`JsonFileBackend`] in a temporary directory.
    Json,
    /// [`SqliteBackend`] in a temporary directory.
    Sqlite,
    /// [`RemoteBackend`] talking to an in-process server.
    Remote,
}

impl BackendChoice {
    /// Every backend kind.
    pub const ALL: [Self; 4] = [Self::Memory, Self::Json, Self::Sqlite, Self::Remote];

    /// Backends that persist to disk.
    pub const ON_DISK: [Self; 2] = [Self::Json, Self::Sqlite];

    /// Returns the backend name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Json => "json",
            Self::Sqlite => "sqlite",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Creates a loopback remote backend over a fresh in-memory server.
pub fn loopback_remote() -> LoopbackRemote {
    let server = BackendServer::new(REMOTE_DATABASE, REMOTE_TOKEN, InMemoryBackend::new());
    let config = RemoteConfig::new("http://loopback.invalid", REMOTE_DATABASE, REMOTE_TOKEN);
    RemoteBackend::new(config, LoopbackClient::new(server))
}

/// A bare storage backend with automatic cleanup.
pub struct TestStore {
    /// The backend instance.
    pub backend: Box<dyn StorageBackend>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Opens a fresh, empty backend of the given kind.
    pub fn open(choice: BackendChoice) -> Self {
        let mut temp_dir = None;
        let backend: Box<dyn StorageBackend> = match choice {
            BackendChoice::Memory => Box::new(InMemoryBackend::new()),
            BackendChoice::Json => {
                let dir = TempDir::new().expect("Failed to create temp directory");
                let backend = JsonFileBackend::open(dir.path()).expect("Failed to open JSON store");
                temp_dir = Some(dir);
                Box::new(backend)
            }
            BackendChoice::Sqlite => {
                let dir = TempDir::new().expect("Failed to create temp directory");
                let backend = SqliteBackend::open(dir.path()).expect("Failed to open SQLite store");
                temp_dir = Some(dir);
                Box::new(backend)
            }
            BackendChoice::Remote => Box::new(loopback_remote()),
        };
        Self {
            backend,
            _temp_dir: temp_dir,
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = dyn StorageBackend;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// Which backend it runs on.
    pub choice: BackendChoice,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Opens a database of the given kind over `registry`.
    pub fn open(choice: BackendChoice, registry: Arc<SchemaRegistry>) -> Self {
        let (db, temp_dir) = match choice {
            BackendChoice::Memory => (
                Database::open(Config::default(), registry).expect("Failed to open database"),
                None,
            ),
            BackendChoice::Json | BackendChoice::Sqlite => {
                let dir = TempDir::new().expect("Failed to create temp directory");
                let config = if choice == BackendChoice::Json {
                    Config::new().json_file(dir.path())
                } else {
                    Config::new().sqlite(dir.path())
                };
                let db = Database::open(config, registry).expect("Failed to open database");
                (db, Some(dir))
            }
            BackendChoice::Remote => (
                Database::with_backend(Box::new(loopback_remote()), registry, Config::default()),
                None,
            ),
        };
        Self {
            db,
            choice,
            _temp_dir: temp_dir,
        }
    }

    /// Opens an in-memory database over `registry`.
    pub fn memory(registry: Arc<SchemaRegistry>) -> Self {
        Self::open(BackendChoice::Memory, registry)
    }

    /// Registers lifecycle hooks for a model.
    #[must_use]
    pub fn with_hooks(mut self, model: &str, hooks: impl ModelHooks + 'static) -> Self {
        self.db = self.db.with_hooks(model, hooks);
        self
    }

    /// Returns the storage root if on disk.
    pub fn path(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs `f` against a fresh scenario database on every backend kind.
///
/// # Example
///
/// ```rust
/// use perfdb_testkit::{for_each_backend, obj};
/// use serde_json::json;
///
/// for_each_backend(|choice, db| {
///     let app = db.controller("application").unwrap();
///     let record = app.create(obj(json!({"name": "lulesh"}))).unwrap();
///     assert_eq!(record.get("openmp"), Some(&json!(false)), "{choice}");
/// });
/// ```
pub fn for_each_backend<F>(mut f: F)
where
    F: FnMut(BackendChoice, &Database),
{
    let registry = crate::schemas::hpc_registry();
    for choice in BackendChoice::ALL {
        let test_db = TestDatabase::open(choice, Arc::clone(&registry));
        f(choice, &test_db.db);
    }
}

/// Runs `f` against a fresh scenario database held in memory.
pub fn with_scenario_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory(crate::schemas::hpc_registry());
    f(&test_db.db)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use crate::schemas::obj;
    use perfdb_core::{Eid, Record};
    use serde_json::json;

    /// EIDs of one fully linked experiment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExperimentIds {
        /// The project.
        pub project: Eid,
        /// The target.
        pub target: Eid,
        /// The application.
        pub application: Eid,
        /// The measurement.
        pub measurement: Eid,
        /// The experiment.
        pub experiment: Eid,
    }

    /// Creates a project with one target, application, measurement and
    /// an experiment combining them, plus `trials` trials.
    pub fn seeded_experiment(db: &Database, suffix: &str, trials: usize) -> ExperimentIds {
        let create = |model: &str, fields: serde_json::Value| -> Record {
            db.controller(model)
                .expect("model registered")
                .create(obj(fields))
                .expect("create")
        };

        let measurement = create("measurement", json!({ "name": format!("profile-{suffix}") }));
        let project = create(
            "project",
            json!({ "name": format!("proj-{suffix}"), "measurements": [measurement.eid] }),
        );
        let target = create("target", json!({ "name": format!("node-{suffix}") }));
        let application = create("application", json!({ "name": format!("app-{suffix}") }));
        let experiment = create(
            "experiment",
            json!({
                "name": format!("exp-{suffix}"),
                "project": project.eid,
                "target": target.eid,
                "application": application.eid,
                "measurement": measurement.eid,
            }),
        );
        for number in 0..trials {
            create(
                "trial",
                json!({ "number": number, "experiment": experiment.eid }),
            );
        }

        ExperimentIds {
            project: project.eid,
            target: target.eid,
            application: application.eid,
            measurement: measurement.eid,
            experiment: experiment.eid,
        }
    }
}
