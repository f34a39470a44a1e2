//! Connection configuration.

use std::fmt;
use std::time::Duration;

/// Base URL used when the caller supplies none.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5984";

/// Default request timeout handed to the transport.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A username/password pair used for basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Server-wide configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base URL (e.g., "http://127.0.0.1:5984").
    pub base_url: String,
    /// Credential sent with every request, if any.
    pub credentials: Option<Credentials>,
    /// Request timeout, forwarded to the transport.
    pub timeout: Duration,
}

impl ServerConfig {
    /// Creates a configuration for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the credential.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}

/// Per-database overrides of the server configuration.
#[derive(Debug, Clone, Default)]
pub struct DbOptions {
    /// Credential used instead of the server's.
    pub credentials: Option<Credentials>,
}

impl DbOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the credential for this database.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }
}
