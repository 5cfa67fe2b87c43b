//! HTTP client abstraction.
//!
//! The crate ships no network stack of its own. Applications plug in any
//! HTTP library by implementing [`HttpClient`]; tests route requests
//! straight into a server with [`LoopbackClient`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// An outgoing POST request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
    /// Give up after this long.
    pub timeout: Duration,
}

impl HttpRequest {
    /// Returns the first header with this name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client trait for making requests.
///
/// Implementations should use their preferred HTTP library.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response.
    ///
    /// An `Err` means no response was received (connection refused,
    /// timeout and the like); HTTP error statuses are returned as `Ok`.
    fn post(&self, request: HttpRequest) -> Result<HttpResponse, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request. `path` starts at `/v1/`.
    fn handle_post(&self, path: &str, request: &HttpRequest) -> HttpResponse;
}

impl<S: LoopbackServer> LoopbackServer for Arc<S> {
    fn handle_post(&self, path: &str, request: &HttpRequest) -> HttpResponse {
        self.as_ref().handle_post(path, request)
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead. The client can be
/// switched offline to simulate connection failures.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    online: AtomicBool,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            online: AtomicBool::new(true),
        }
    }

    /// Returns the server behind this client.
    pub fn server(&self) -> &S {
        &self.server
    }

    /// Simulates losing or regaining the connection.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(format!("connection refused: {}", request.url));
        }

        // Extract path from URL
        let path = request
            .url
            .find("/v1/")
            .map_or(request.url.as_str(), |i| &request.url[i..]);

        Ok(self.server.handle_post(path, &request))
    }

    fn is_healthy(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl LoopbackServer for Echo {
        fn handle_post(&self, path: &str, _request: &HttpRequest) -> HttpResponse {
            HttpResponse {
                status: 200,
                body: path.as_bytes().to_vec(),
            }
        }
    }

    fn request(url: &str) -> HttpRequest {
        HttpRequest {
            url: url.into(),
            headers: vec![("Authorization".into(), "Bearer t".into())],
            body: Vec::new(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn loopback_strips_base_url() {
        let client = LoopbackClient::new(Echo);
        let response = client
            .post(request("https://records.example.com/v1/hpc/count"))
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.body, b"/v1/hpc/count");
    }

    #[test]
    fn offline_client_fails() {
        let client = LoopbackClient::new(Echo);
        client.set_online(false);
        assert!(!client.is_healthy());
        assert!(client.post(request("http://x/v1/a/b")).is_err());
    }

    #[test]
    fn header_lookup_ignores_case() {
        assert_eq!(request("u").header("authorization"), Some("Bearer t"));
        assert_eq!(request("u").header("cookie"), None);
    }
}
