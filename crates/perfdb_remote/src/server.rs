//! Reference server exposing any [`StorageBackend`] over the wire format.
//!
//! The server is transport-agnostic: an HTTP framework (or a
//! [`LoopbackClient`](crate::LoopbackClient) in tests) hands it the request
//! path and body and sends back the returned [`HttpResponse`].

use crate::http::{HttpRequest, HttpResponse, LoopbackServer};
use crate::protocol::{kind, ErrorBody, RemoteRequest, RequestEnvelope, ResponseEnvelope};
use parking_lot::Mutex;
use perfdb_storage::{StorageBackend, StorageError, StorageResult};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

/// Serves one database backed by a local [`StorageBackend`].
///
/// At most one transaction is open at a time. While it is open, requests
/// that do not carry its id are rejected with `409 transaction_conflict`.
pub struct BackendServer<B: StorageBackend> {
    database: String,
    token: String,
    backend: B,
    active: Mutex<Option<Uuid>>,
}

impl<B: StorageBackend> BackendServer<B> {
    /// Creates a server for `database`, accepting requests bearing `token`.
    pub fn new(database: impl Into<String>, token: impl Into<String>, backend: B) -> Self {
        Self {
            database: database.into(),
            token: token.into(),
            backend,
            active: Mutex::new(None),
        }
    }

    /// Returns the database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the open transaction, if any.
    pub fn active_transaction(&self) -> Option<Uuid> {
        *self.active.lock()
    }

    /// Handles `POST {path}` with the given bearer header and body.
    ///
    /// `path` has the form `/v1/{database}/{operation}`.
    pub fn handle(&self, path: &str, authorization: Option<&str>, body: &[u8]) -> HttpResponse {
        let expected = format!("Bearer {}", self.token);
        if authorization != Some(expected.as_str()) {
            return error(401, kind::UNAUTHORIZED, "missing or invalid token");
        }

        let mut segments = path.trim_start_matches('/').split('/');
        let (Some("v1"), Some(database), Some(operation), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return error(400, kind::BAD_REQUEST, format!("malformed path: {path}"));
        };
        if database != self.database {
            return error(404, kind::UNKNOWN_DATABASE, database);
        }

        let envelope: RequestEnvelope = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(err) => return error(400, kind::BAD_REQUEST, err.to_string()),
        };
        if envelope.request.operation() != operation {
            return error(
                400,
                kind::BAD_REQUEST,
                format!(
                    "body says {} but path says {operation}",
                    envelope.request.operation()
                ),
            );
        }

        // Held for the whole request so that operations are serialized.
        let mut active = self.active.lock();
        if let Err(message) = check_transaction(*active, &envelope) {
            warn!(operation, %message, "rejected request");
            return error(409, kind::TRANSACTION_CONFLICT, message);
        }

        debug!(database, operation, "handling request");
        let result = self.dispatch(&mut active, envelope.request);
        match result {
            Ok(value) => respond(200, &ResponseEnvelope::Ok(value)),
            Err(err) => {
                let (status, body) = ErrorBody::from_storage(&err);
                respond(status, &ResponseEnvelope::Error(body))
            }
        }
    }

    fn dispatch(&self, active: &mut Option<Uuid>, request: RemoteRequest) -> StorageResult<Value> {
        let backend = &self.backend;
        match request {
            RemoteRequest::Count { table } => to_value(backend.count(&table)?),
            RemoteRequest::Search { table, query } => to_value(backend.search(&table, &query)?),
            RemoteRequest::Insert { table, fields } => to_value(backend.insert(&table, fields)?),
            RemoteRequest::Update {
                table,
                fields,
                query,
            } => to_value(backend.update(&table, &fields, &query)?),
            RemoteRequest::Unset {
                table,
                field_names,
                query,
            } => to_value(backend.unset(&table, &field_names, &query)?),
            RemoteRequest::Remove { table, query } => to_value(backend.remove(&table, &query)?),
            RemoteRequest::Purge { table } => to_value(backend.purge(&table)?),
            RemoteRequest::TableNames => to_value(backend.table_names()?),
            RemoteRequest::Begin => {
                backend.enter_transaction()?;
                let id = Uuid::new_v4();
                *active = Some(id);
                to_value(id)
            }
            RemoteRequest::Commit { .. } => {
                *active = None;
                to_value(backend.exit_transaction(true)?)
            }
            RemoteRequest::Rollback { .. } => {
                *active = None;
                to_value(backend.exit_transaction(false)?)
            }
        }
    }
}

impl<B: StorageBackend> LoopbackServer for BackendServer<B> {
    fn handle_post(&self, path: &str, request: &HttpRequest) -> HttpResponse {
        self.handle(path, request.header("Authorization"), &request.body)
    }
}

fn check_transaction(active: Option<Uuid>, envelope: &RequestEnvelope) -> Result<(), String> {
    match (&envelope.request, active) {
        (RemoteRequest::Begin, Some(open)) => Err(format!("transaction {open} is already open")),
        (RemoteRequest::Begin, None) => Ok(()),
        (RemoteRequest::Commit { transaction } | RemoteRequest::Rollback { transaction }, open)
            if open != Some(*transaction) =>
        {
            Err(format!("transaction {transaction} is not open"))
        }
        (_, open) if envelope.transaction != open => match open {
            Some(open) => Err(format!("transaction {open} is open")),
            None => Err("no transaction is open".to_string()),
        },
        _ => Ok(()),
    }
}

fn to_value<T: Serialize>(value: T) -> StorageResult<Value> {
    Ok(serde_json::to_value(value)?)
}

fn respond(status: u16, envelope: &ResponseEnvelope) -> HttpResponse {
    match serde_json::to_vec(envelope) {
        Ok(body) => HttpResponse { status, body },
        Err(err) => HttpResponse {
            status: 500,
            body: StorageError::from(err).to_string().into_bytes(),
        },
    }
}

fn error(status: u16, kind: &str, message: impl Into<String>) -> HttpResponse {
    respond(
        status,
        &ResponseEnvelope::Error(ErrorBody::new(kind, message)),
    )
}
