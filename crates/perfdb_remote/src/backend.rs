//! Storage backend that forwards every operation over HTTP.

use crate::config::RemoteConfig;
use crate::http::{HttpClient, HttpRequest};
use crate::protocol::{RemoteRequest, RequestEnvelope, ResponseEnvelope};
use parking_lot::{Mutex, RwLock};
use perfdb_storage::{Eid, Fields, Query, Record, StorageBackend, StorageError, StorageResult};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct TxnState {
    depth: usize,
    id: Option<Uuid>,
}

/// A [`StorageBackend`] served by a remote record store.
///
/// The server owns durability and transaction semantics. The client keeps
/// the nesting depth itself and only sends `begin`/`commit`/`rollback` for
/// the outermost scope, tagging every request in between with the
/// server-issued transaction id.
///
/// # Example
///
/// ```rust
/// use perfdb_remote::{BackendServer, LoopbackClient, RemoteBackend, RemoteConfig};
/// use perfdb_storage::{InMemoryBackend, Query, StorageBackend};
/// use serde_json::json;
///
/// let server = BackendServer::new("hpc", "secret", InMemoryBackend::new());
/// let config = RemoteConfig::new("http://records.local", "hpc", "secret");
/// let remote = RemoteBackend::new(config, LoopbackClient::new(server));
///
/// let fields = json!({"name": "m1"}).as_object().unwrap().clone();
/// let record = remote.insert("measurement", fields).unwrap();
/// assert!(remote.contains("measurement", &Query::eid(record.eid)).unwrap());
/// ```
pub struct RemoteBackend<C: HttpClient> {
    config: RemoteConfig,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
    txn: Mutex<TxnState>,
}

impl<C: HttpClient> RemoteBackend<C> {
    /// Creates a backend talking to the server described by `config`.
    pub fn new(config: RemoteConfig, client: C) -> Self {
        Self {
            config,
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
            txn: Mutex::new(TxnState::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Returns the HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns true if the backend is open and the client is healthy.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    /// Stops sending requests; every later call fails with
    /// [`StorageError::NotConnected`].
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn call<T: DeserializeOwned>(&self, request: RemoteRequest) -> StorageResult<T> {
        let transaction = self.txn.lock().id;
        self.send(transaction, request)
    }

    fn send<T: DeserializeOwned>(
        &self,
        transaction: Option<Uuid>,
        request: RemoteRequest,
    ) -> StorageResult<T> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(StorageError::NotConnected);
        }

        let operation = request.operation();
        let body = serde_json::to_vec(&RequestEnvelope {
            transaction,
            request,
        })?;
        let http = HttpRequest {
            url: self.config.endpoint(operation),
            headers: vec![
                (
                    "Authorization".to_string(),
                    format!("Bearer {}", self.config.token),
                ),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            body,
            timeout: self.config.timeout,
        };

        let response = self.client.post(http).map_err(|message| {
            warn!(operation, %message, "remote request failed");
            *self.last_error.write() = Some(message.clone());
            StorageError::transport_retryable(message)
        })?;
        *self.last_error.write() = None;

        let envelope: ResponseEnvelope = match serde_json::from_slice(&response.body) {
            Ok(envelope) => envelope,
            Err(err) if response.is_success() => return Err(err.into()),
            Err(_) => {
                return Err(StorageError::Remote {
                    status: response.status,
                    message: String::from_utf8_lossy(&response.body).into_owned(),
                })
            }
        };

        match envelope {
            ResponseEnvelope::Ok(value) => Ok(serde_json::from_value(value)?),
            ResponseEnvelope::Error(body) => Err(body.into_storage_error(response.status)),
        }
    }
}

impl<C: HttpClient> StorageBackend for RemoteBackend<C> {
    fn count(&self, table: &str) -> StorageResult<usize> {
        self.call(RemoteRequest::Count {
            table: table.to_string(),
        })
    }

    fn search(&self, table: &str, query: &Query) -> StorageResult<Vec<Record>> {
        self.call(RemoteRequest::Search {
            table: table.to_string(),
            query: query.clone(),
        })
    }

    fn insert(&self, table: &str, fields: Fields) -> StorageResult<Record> {
        self.call(RemoteRequest::Insert {
            table: table.to_string(),
            fields,
        })
    }

    fn update(&self, table: &str, fields: &Fields, query: &Query) -> StorageResult<Vec<Eid>> {
        self.call(RemoteRequest::Update {
            table: table.to_string(),
            fields: fields.clone(),
            query: query.clone(),
        })
    }

    fn unset(&self, table: &str, field_names: &[String], query: &Query) -> StorageResult<Vec<Eid>> {
        self.call(RemoteRequest::Unset {
            table: table.to_string(),
            field_names: field_names.to_vec(),
            query: query.clone(),
        })
    }

    fn remove(&self, table: &str, query: &Query) -> StorageResult<Vec<Eid>> {
        self.call(RemoteRequest::Remove {
            table: table.to_string(),
            query: query.clone(),
        })
    }

    fn purge(&self, table: &str) -> StorageResult<()> {
        self.call(RemoteRequest::Purge {
            table: table.to_string(),
        })
    }

    fn table_names(&self) -> StorageResult<Vec<String>> {
        self.call(RemoteRequest::TableNames)
    }

    fn enter_transaction(&self) -> StorageResult<()> {
        let mut txn = self.txn.lock();
        if txn.depth == 0 {
            let id: Uuid = self.send(None, RemoteRequest::Begin)?;
            debug!(%id, database = %self.config.database, "remote transaction started");
            txn.id = Some(id);
        }
        txn.depth += 1;
        Ok(())
    }

    fn exit_transaction(&self, commit: bool) -> StorageResult<()> {
        let mut txn = self.txn.lock();
        if txn.depth == 0 {
            return Err(StorageError::NoTransaction);
        }
        txn.depth -= 1;
        if txn.depth > 0 {
            return Ok(());
        }

        let id = txn.id.take().ok_or(StorageError::NoTransaction)?;
        let request = if commit {
            RemoteRequest::Commit { transaction: id }
        } else {
            RemoteRequest::Rollback { transaction: id }
        };
        self.send::<()>(Some(id), request)?;
        debug!(%id, commit, "remote transaction finished");
        Ok(())
    }

    fn transaction_depth(&self) -> usize {
        self.txn.lock().depth
    }
}
