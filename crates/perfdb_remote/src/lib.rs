//! # perfdb Remote
//!
//! A [`StorageBackend`](perfdb_storage::StorageBackend) that forwards every
//! operation to a record store over HTTP.
//!
//! ## Wire format
//!
//! Each operation is `POST {base_url}/v1/{database}/{operation}` with a JSON
//! body and a bearer token. See [`protocol`] for the envelope shapes.
//!
//! ## Transports
//!
//! No HTTP stack is bundled. Implement [`HttpClient`] on top of the HTTP
//! library of your choice, or use [`LoopbackClient`] to talk to an
//! in-process [`BackendServer`].
//!
//! ## Example
//!
//! ```rust
//! use perfdb_remote::{BackendServer, LoopbackClient, RemoteBackend, RemoteConfig};
//! use perfdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let server = BackendServer::new("hpc", "secret", InMemoryBackend::new());
//! let remote = RemoteBackend::new(
//!     RemoteConfig::new("http://records.local", "hpc", "secret"),
//!     LoopbackClient::new(server),
//! );
//! assert_eq!(remote.count("trial").unwrap(), 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod http;
pub mod protocol;
mod server;

pub use backend::RemoteBackend;
pub use config::RemoteConfig;
pub use http::{HttpClient, HttpRequest, HttpResponse, LoopbackClient, LoopbackServer};
pub use server::BackendServer;
