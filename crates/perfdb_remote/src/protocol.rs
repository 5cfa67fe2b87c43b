//! JSON wire format.
//!
//! Every operation is a `POST {base}/v1/{database}/{operation}` whose body
//! is a [`RequestEnvelope`]. Responses are a [`ResponseEnvelope`]:
//!
//! ```text
//! {"ok": <result>}
//! {"error": {"kind": "no_transaction", "message": "..."}}
//! ```

use perfdb_storage::{Fields, Query, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One storage operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RemoteRequest {
    /// Count records in a table.
    Count {
        /// Table name.
        table: String,
    },
    /// Search a table.
    Search {
        /// Table name.
        table: String,
        /// Match condition.
        query: Query,
    },
    /// Insert a record.
    Insert {
        /// Table name.
        table: String,
        /// Record fields.
        fields: Fields,
    },
    /// Merge fields into matching records.
    Update {
        /// Table name.
        table: String,
        /// Fields to merge.
        fields: Fields,
        /// Match condition.
        query: Query,
    },
    /// Remove fields from matching records.
    Unset {
        /// Table name.
        table: String,
        /// Fields to remove.
        field_names: Vec<String>,
        /// Match condition.
        query: Query,
    },
    /// Remove matching records.
    Remove {
        /// Table name.
        table: String,
        /// Match condition.
        query: Query,
    },
    /// Empty a table.
    Purge {
        /// Table name.
        table: String,
    },
    /// List tables.
    TableNames,
    /// Open a server-side transaction.
    Begin,
    /// Commit the server-side transaction.
    Commit {
        /// Transaction issued by `Begin`.
        transaction: Uuid,
    },
    /// Roll back the server-side transaction.
    Rollback {
        /// Transaction issued by `Begin`.
        transaction: Uuid,
    },
}

impl RemoteRequest {
    /// Returns the operation name used in the endpoint path.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Count { .. } => "count",
            Self::Search { .. } => "search",
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Unset { .. } => "unset",
            Self::Remove { .. } => "remove",
            Self::Purge { .. } => "purge",
            Self::TableNames => "table_names",
            Self::Begin => "begin",
            Self::Commit { .. } => "commit",
            Self::Rollback { .. } => "rollback",
        }
    }
}

/// Request body: an operation plus the transaction it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Open transaction, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Uuid>,
    /// The operation.
    #[serde(flatten)]
    pub request: RemoteRequest,
}

/// Response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseEnvelope {
    /// Operation result.
    Ok(Value),
    /// Operation failure.
    Error(ErrorBody),
}

/// Error kind names on the wire.
pub mod kind {
    /// Exit without a matching enter.
    pub const NO_TRANSACTION: &str = "no_transaction";
    /// Stored data could not be decoded.
    pub const CORRUPTED: &str = "corrupted";
    /// Table or field name unusable by the server's store.
    pub const INVALID_IDENTIFIER: &str = "invalid_identifier";
    /// Missing or wrong token.
    pub const UNAUTHORIZED: &str = "unauthorized";
    /// No such database on the server.
    pub const UNKNOWN_DATABASE: &str = "unknown_database";
    /// Malformed request.
    pub const BAD_REQUEST: &str = "bad_request";
    /// Another client's transaction is open, or the id is stale.
    pub const TRANSACTION_CONFLICT: &str = "transaction_conflict";
    /// Any other server-side failure.
    pub const INTERNAL: &str = "internal";
}

/// Structured error returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable kind, see [`kind`].
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Creates an error body.
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    /// Describes a local storage error for the wire, with its HTTP status.
    #[must_use]
    pub fn from_storage(err: &StorageError) -> (u16, Self) {
        let message = err.to_string();
        match err {
            StorageError::NoTransaction => (409, Self::new(kind::NO_TRANSACTION, message)),
            StorageError::Corrupted(detail) => (500, Self::new(kind::CORRUPTED, detail.clone())),
            StorageError::InvalidIdentifier(name) => {
                (400, Self::new(kind::INVALID_IDENTIFIER, name.clone()))
            }
            StorageError::Unauthorized(detail) => {
                (401, Self::new(kind::UNAUTHORIZED, detail.clone()))
            }
            _ => (500, Self::new(kind::INTERNAL, message)),
        }
    }

    /// Turns a wire error back into the storage error it stands for.
    #[must_use]
    pub fn into_storage_error(self, status: u16) -> StorageError {
        match self.kind.as_str() {
            kind::NO_TRANSACTION => StorageError::NoTransaction,
            kind::CORRUPTED => StorageError::Corrupted(self.message),
            kind::INVALID_IDENTIFIER => StorageError::InvalidIdentifier(self.message),
            kind::UNAUTHORIZED => StorageError::Unauthorized(self.message),
            other => StorageError::Remote {
                status,
                message: format!("{other}: {}", self.message),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfdb_storage::Eid;
    use serde_json::json;

    #[test]
    fn request_shape() {
        let envelope = RequestEnvelope {
            transaction: None,
            request: RemoteRequest::Remove {
                table: "trial".into(),
                query: Query::eid(Eid::new(3)),
            },
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({"op": "remove", "table": "trial", "query": {"eid": 3}})
        );

        let back: RequestEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.request.operation(), "remove");
    }

    #[test]
    fn response_shape() {
        let ok = ResponseEnvelope::Ok(json!(4));
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"ok": 4}));

        let err = ResponseEnvelope::Error(ErrorBody::new(kind::BAD_REQUEST, "nope"));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"error": {"kind": "bad_request", "message": "nope"}})
        );
    }

    #[test]
    fn storage_errors_survive_the_wire() {
        let (status, body) = ErrorBody::from_storage(&StorageError::NoTransaction);
        assert_eq!(status, 409);
        assert!(matches!(
            body.into_storage_error(status),
            StorageError::NoTransaction
        ));

        let (status, body) = ErrorBody::from_storage(&StorageError::corrupted("bad eid"));
        assert!(matches!(
            body.into_storage_error(status),
            StorageError::Corrupted(msg) if msg == "bad eid"
        ));

        let unknown = ErrorBody::new(kind::UNKNOWN_DATABASE, "hpc").into_storage_error(404);
        assert!(matches!(unknown, StorageError::Remote { status: 404, .. }));
    }
}
