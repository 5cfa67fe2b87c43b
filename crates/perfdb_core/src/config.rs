//! Database configuration.

use crate::level::StorageLevel;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Kind of on-disk backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// One JSON document per storage root.
    #[default]
    Json,
    /// Embedded SQLite database.
    Sqlite,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Sqlite => f.write_str("sqlite"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// Which backend [`Database::open`](crate::Database::open) builds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackendConfig {
    /// Ephemeral in-process tables.
    #[default]
    InMemory,
    /// JSON document store rooted at a directory.
    JsonFile {
        /// Storage root.
        root: PathBuf,
    },
    /// SQLite store rooted at a directory.
    Sqlite {
        /// Storage root.
        root: PathBuf,
    },
}

impl BackendConfig {
    /// Builds an on-disk backend config of the given kind.
    #[must_use]
    pub fn on_disk(kind: BackendKind, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        match kind {
            BackendKind::Json => Self::JsonFile { root },
            BackendKind::Sqlite => Self::Sqlite { root },
        }
    }

    /// Returns the storage root, if the backend lives on disk.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        match self {
            Self::InMemory => None,
            Self::JsonFile { root } | Self::Sqlite { root } => Some(root.as_path()),
        }
    }
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend to build.
    pub backend: BackendConfig,

    /// Maximum time to wait for the storage lock (`None` = wait forever).
    pub lock_timeout: Option<Duration>,

    /// Whether to create the storage root if it doesn't exist.
    pub create_if_missing: bool,

    /// How long SQLite waits on a busy database before failing.
    pub sqlite_busy_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::InMemory,
            lock_timeout: None,
            create_if_missing: true,
            sqlite_busy_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration for a storage level's root directory.
    #[must_use]
    pub fn for_level(level: StorageLevel, kind: BackendKind) -> Self {
        Self::new().backend(BackendConfig::on_disk(kind, level.default_root()))
    }

    /// Sets the backend.
    #[must_use]
    pub fn backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    /// Uses a JSON document store at `root`.
    #[must_use]
    pub fn json_file(self, root: impl Into<PathBuf>) -> Self {
        self.backend(BackendConfig::JsonFile { root: root.into() })
    }

    /// Uses a SQLite store at `root`.
    #[must_use]
    pub fn sqlite(self, root: impl Into<PathBuf>) -> Self {
        self.backend(BackendConfig::Sqlite { root: root.into() })
    }

    /// Bounds lock acquisition.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Sets whether to create the storage root if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the SQLite busy timeout.
    #[must_use]
    pub const fn sqlite_busy_timeout(mut self, timeout: Duration) -> Self {
        self.sqlite_busy_timeout = timeout;
        self
    }
}
