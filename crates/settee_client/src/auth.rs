//! Authentication header construction.

use crate::config::Credentials;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Builds a basic authentication header as a `(name, value)` pair.
pub fn basic_auth_header(username: &str, password: &str) -> (String, String) {
    let token = STANDARD.encode(format!("{username}:{password}"));
    ("Authorization".to_string(), format!("Basic {token}"))
}

impl Credentials {
    /// Returns the basic authentication header for this credential.
    pub fn header(&self) -> (String, String) {
        basic_auth_header(&self.username, &self.password)
    }
}
