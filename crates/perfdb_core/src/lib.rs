//! # perfdb Core
//!
//! Schema-driven record store with association propagation.
//!
//! This crate sits on top of `perfdb_storage` and adds everything the
//! backends leave out: schemas, validation, relationship
//! maintenance, lifecycle hooks and inter-process locking.
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------------+
//! |  Controller (one per model, borrowed from Database)  |
//! |  validate -> lock -> transaction -> write            |
//! |           -> propagate associations -> hooks         |
//! +------------------------------------------------------+
//! |  SchemaRegistry (closure-checked, reverse refs)      |
//! +------------------------------------------------------+
//! |  StorageBackend (memory | JSON file | SQLite | remote)|
//! +------------------------------------------------------+
//! ```
//!
//! ## Invariants
//!
//! - Every stored field is declared by its model's schema
//! - Unique attributes hold each value at most once per model
//! - Two-way associations are recorded on both ends after every
//!   successful operation
//! - Associations never name a missing record outside an open transaction
//!
//! ## Example
//!
//! ```rust
//! use perfdb_core::{Attribute, AttributeType, Config, Database, Schema, SchemaRegistry};
//! use serde_json::json;
//!
//! let project = Schema::builder("project")
//!     .attribute(Attribute::scalar("name", AttributeType::String).required().unique())
//!     .attribute(Attribute::collection("measurements", "measurement", "projects"))
//!     .build()
//!     .unwrap();
//! let measurement = Schema::builder("measurement")
//!     .attribute(Attribute::scalar("name", AttributeType::String).required())
//!     .attribute(Attribute::collection("projects", "project", "measurements"))
//!     .build()
//!     .unwrap();
//! let db = Database::open(
//!     Config::default(),
//!     SchemaRegistry::new([project, measurement]).unwrap(),
//! )
//! .unwrap();
//!
//! let m = db
//!     .controller("measurement")
//!     .unwrap()
//!     .create(json!({"name": "m1"}).as_object().unwrap().clone())
//!     .unwrap();
//! let p = db
//!     .controller("project")
//!     .unwrap()
//!     .create(json!({"name": "p1", "measurements": [m.eid]}).as_object().unwrap().clone())
//!     .unwrap();
//!
//! let m = db.controller("measurement").unwrap().one(m.eid).unwrap().unwrap();
//! assert_eq!(m.eids("projects"), vec![p.eid]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod association;
mod config;
mod controller;
mod database;
mod error;
mod hooks;
mod integrity;
mod level;
mod lock;
mod schema;

pub use config::{BackendConfig, BackendKind, Config};
pub use controller::Controller;
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use hooks::{Change, ChangeSet, ModelHooks};
pub use integrity::IntegrityIssue;
pub use level::StorageLevel;
pub use lock::{LockGuard, ProcessLock, LOCK_FILE};
pub use schema::{
    Attribute, AttributeSpec, AttributeType, BackReference, CollectionRefSpec, ModelRefSpec,
    ScalarSpec, Schema, SchemaBuilder, SchemaRegistry, RESERVED_EID,
};

// Re-export storage types that appear in the public API
pub use perfdb_storage::{Eid, FieldTest, Fields, Query, Record, StorageBackend, Value};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
