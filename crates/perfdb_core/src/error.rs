//! Error types for perfdb core.

use perfdb_storage::{Eid, StorageError, Value};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in controller, schema and locking operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Data does not fit the model's schema.
    #[error("schema error in model {model:?}: {message}")]
    Schema {
        /// Model being written.
        model: String,
        /// What is wrong with the data.
        message: String,
    },

    /// A unique attribute value is already taken.
    #[error("{model}.{attribute} must be unique but {value} is already in use")]
    UniqueConstraint {
        /// Model being written.
        model: String,
        /// The unique attribute.
        attribute: String,
        /// The conflicting value.
        value: Value,
    },

    /// An association names a record that does not exist.
    #[error("{model}.{attribute} references missing {target_model} record {eid}")]
    Referential {
        /// Model holding the association.
        model: String,
        /// The association attribute.
        attribute: String,
        /// Model the association points at.
        target_model: String,
        /// The missing EID.
        eid: Eid,
    },

    /// A lifecycle hook refused the change.
    #[error("{model} record {eid} cannot be modified: {reason}")]
    ImmutableRecord {
        /// Model of the protected record.
        model: String,
        /// The protected record.
        eid: Eid,
        /// Why the hook refused.
        reason: String,
    },

    /// The storage lock could not be acquired in time.
    #[error("timed out after {waited:?} waiting for lock {}", path.display())]
    LockTimeout {
        /// Lock file path.
        path: PathBuf,
        /// How long acquisition was attempted.
        waited: Duration,
    },

    /// No schema is registered under this name.
    #[error("unknown model: {name}")]
    UnknownModel {
        /// The requested model name.
        name: String,
    },

    /// A schema or schema set is inconsistent.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the inconsistency.
        message: String,
    },
}

impl CoreError {
    /// Creates a schema error.
    pub fn schema(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Creates a uniqueness error.
    pub fn unique(model: impl Into<String>, attribute: impl Into<String>, value: Value) -> Self {
        Self::UniqueConstraint {
            model: model.into(),
            attribute: attribute.into(),
            value,
        }
    }

    /// Creates a referential error.
    pub fn referential(
        model: impl Into<String>,
        attribute: impl Into<String>,
        target_model: impl Into<String>,
        eid: Eid,
    ) -> Self {
        Self::Referential {
            model: model.into(),
            attribute: attribute.into(),
            target_model: target_model.into(),
            eid,
        }
    }

    /// Creates an immutable record error. Intended for hook implementations.
    pub fn immutable(model: impl Into<String>, eid: Eid, reason: impl Into<String>) -> Self {
        Self::ImmutableRecord {
            model: model.into(),
            eid,
            reason: reason.into(),
        }
    }

    /// Creates an unknown model error.
    pub fn unknown_model(name: impl Into<String>) -> Self {
        Self::UnknownModel { name: name.into() }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Returns a stable name for the error kind.
    ///
    /// Used to compare failures across backends, where messages differ.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage",
            Self::Io(_) => "io",
            Self::Schema { .. } => "schema",
            Self::UniqueConstraint { .. } => "unique_constraint",
            Self::Referential { .. } => "referential",
            Self::ImmutableRecord { .. } => "immutable_record",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::UnknownModel { .. } => "unknown_model",
            Self::InvalidSchema { .. } => "invalid_schema",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_carry_context() {
        let err = CoreError::unique("project", "name", json!("p1"));
        assert_eq!(
            err.to_string(),
            "project.name must be unique but \"p1\" is already in use"
        );

        let err = CoreError::referential("project", "measurements", "measurement", Eid::new(9));
        assert!(err.to_string().contains("missing measurement record 9"));
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(CoreError::schema("m", "x").kind(), "schema");
        assert_eq!(CoreError::from(StorageError::NoTransaction).kind(), "storage");
        assert_eq!(CoreError::immutable("m", Eid::new(1), "in use").kind(), "immutable_record");
    }
}
