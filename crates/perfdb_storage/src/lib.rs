//! # perfdb Storage
//!
//! Storage backend trait and table store implementations for perfdb.
//!
//! This crate provides the lowest-level storage abstraction for perfdb.
//! Storage backends are **schema-less table stores** - they hold records of
//! JSON values keyed by EID and know nothing about models, associations or
//! validation.
//!
//! ## Design Principles
//!
//! - One uniform contract: count, get, search, match, insert, update,
//!   unset, remove, purge and nested transactions
//! - Observable behavior is identical across backends
//! - Must be `Send + Sync` for shared access
//! - The controller layer owns all schema interpretation
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`JsonFileBackend`] - One JSON document per storage root
//! - [`SqliteBackend`] - Embedded SQL, one table per model
//!
//! ## Example
//!
//! ```rust
//! use perfdb_storage::{InMemoryBackend, Query, StorageBackend};
//! use serde_json::json;
//!
//! let backend = InMemoryBackend::new();
//! let fields = json!({"name": "m1"}).as_object().unwrap().clone();
//! let record = backend.insert("measurement", fields).unwrap();
//!
//! let found = backend.search("measurement", &Query::field("name", "m1")).unwrap();
//! assert_eq!(found[0].eid, record.eid);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod query;
mod record;
mod sqlite;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::{JsonFileBackend, STORE_FILE};
pub use memory::InMemoryBackend;
pub use query::{contains_value, FieldTest, Query};
pub use record::{Eid, Fields, Record};
pub use serde_json::Value;
pub use sqlite::{SqliteBackend, DEFAULT_BUSY_TIMEOUT, SQLITE_FILE};
