//! Configuration for the remote backend.

use std::time::Duration;

/// Where and how to reach a remote record store.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Server URL (e.g., "https://records.example.com").
    pub base_url: String,
    /// Logical database name on the server.
    pub database: String,
    /// Bearer token sent with every request.
    pub token: String,
    /// Per-request timeout handed to the HTTP client.
    pub timeout: Duration,
}

impl RemoteConfig {
    /// Creates a new remote configuration.
    pub fn new(
        base_url: impl Into<String>,
        database: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            database: database.into(),
            token: token.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the endpoint URL for one operation.
    pub fn endpoint(&self, operation: &str) -> String {
        format!(
            "{}/v1/{}/{operation}",
            self.base_url.trim_end_matches('/'),
            self.database
        )
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::new("", "default", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_layout() {
        let config = RemoteConfig::new("https://records.example.com/", "hpc", "secret");
        assert_eq!(
            config.endpoint("search"),
            "https://records.example.com/v1/hpc/search"
        );
    }

    #[test]
    fn timeout_builder() {
        let config = RemoteConfig::default().with_timeout(Duration::from_secs(2));
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.database, "default");
    }
}
