//! # perfdb Testkit
//!
//! Test utilities for perfdb.
//!
//! This crate provides:
//! - Fixtures opening a database on every backend kind
//! - The HPC scenario schemas used across the integration tests
//! - Property-based test generators using proptest
//! - Harness helpers for integrity and backend equivalence checks
//!
//! ## Usage
//!
//! ```rust
//! use perfdb_testkit::prelude::*;
//!
//! for_each_backend(|choice, db| {
//!     let target = db.controller("target").unwrap();
//!     target.create(obj(serde_json::json!({"name": "node"}))).unwrap();
//!     assert_eq!(target.count().unwrap(), 1, "{choice}");
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod schemas;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::schemas::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use schemas::*;
