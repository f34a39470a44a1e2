//! Error types for client operations.

use settee_json::{JsonError, Wire};
use thiserror::Error;

/// Result type for client operations.
pub type CouchResult<T> = Result<T, CouchError>;

/// A failure reported by the transport collaborator.
///
/// The client never reinterprets these; they are surfaced as
/// [`CouchError::Transport`] exactly as the transport produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport error: {message}")]
pub struct TransportError {
    /// Error message.
    pub message: String,
    /// Whether repeating the request might succeed.
    pub retryable: bool,
}

impl TransportError {
    /// Creates a retryable transport error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Errors that can occur during client operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CouchError {
    /// The database, document or attachment does not exist.
    #[error("not found: {reason}")]
    NotFound {
        /// Reason given by the server.
        reason: String,
    },

    /// The supplied or resolved revision is not the current one.
    #[error("document update conflict: {reason}")]
    Conflict {
        /// Reason given by the server.
        reason: String,
    },

    /// The database already exists.
    #[error("database already exists: {name}")]
    AlreadyExists {
        /// Database name.
        name: String,
    },

    /// The operation needs a credential the handle does not carry.
    /// Detected locally, no request is sent.
    #[error("{operation} requires credentials")]
    AuthRequired {
        /// Name of the operation.
        operation: &'static str,
    },

    /// The server rejected the credential.
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Reason given by the server.
        reason: String,
    },

    /// The server rejected the request as malformed.
    #[error("bad request: {reason}")]
    BadRequest {
        /// Reason given by the server.
        reason: String,
    },

    /// Any other non-success status.
    #[error("server error {status}: {error}: {reason}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error tag from the response body.
        error: String,
        /// Reason from the response body.
        reason: String,
    },

    /// Transport failure, passed through unchanged.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The response body does not have the shape the operation expects.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The request body could not be encoded.
    #[error("json error: {0}")]
    Json(#[from] JsonError),
}

impl CouchError {
    /// Creates a malformed response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Maps a non-success response to an error.
    ///
    /// The server describes failures as `{"error": .., "reason": ..}`; a body
    /// that is not JSON still yields an error carrying the status.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let (error, reason) = error_fields(body);
        match status {
            400 => CouchError::BadRequest { reason },
            401 | 403 => CouchError::Unauthorized { reason },
            404 => CouchError::NotFound { reason },
            409 => CouchError::Conflict { reason },
            _ => CouchError::Server {
                status,
                error,
                reason,
            },
        }
    }

    /// Returns true for [`CouchError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, CouchError::NotFound { .. })
    }

    /// Returns true for [`CouchError::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, CouchError::Conflict { .. })
    }

    /// Returns true if repeating the call unchanged might succeed.
    ///
    /// The client never retries on its own; this is a hint for callers.
    /// Conflicts are not retryable: the caller must re-read first.
    pub fn is_retryable(&self) -> bool {
        match self {
            CouchError::Transport(e) => e.retryable,
            CouchError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

fn error_fields(body: &[u8]) -> (String, String) {
    let parsed: Option<Wire> = serde_json::from_slice(body).ok();
    let field = |name: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(Wire::as_str)
            .map(str::to_string)
    };
    let error = field("error").unwrap_or_else(|| "unknown".to_string());
    let reason = field("reason")
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    (error, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let body = br#"{"error":"not_found","reason":"missing"}"#;
        assert_eq!(
            CouchError::from_status(404, body),
            CouchError::NotFound {
                reason: "missing".into()
            }
        );

        let body = br#"{"error":"conflict","reason":"Document update conflict."}"#;
        assert!(CouchError::from_status(409, body).is_conflict());
        assert!(matches!(
            CouchError::from_status(401, b"{}"),
            CouchError::Unauthorized { .. }
        ));
        assert!(matches!(
            CouchError::from_status(400, b"{}"),
            CouchError::BadRequest { .. }
        ));
    }

    #[test]
    fn unparseable_body_keeps_status() {
        let err = CouchError::from_status(502, b"Bad Gateway");
        assert_eq!(
            err,
            CouchError::Server {
                status: 502,
                error: "unknown".into(),
                reason: "Bad Gateway".into(),
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn retryable_errors() {
        assert!(CouchError::from(TransportError::retryable("connection reset")).is_retryable());
        assert!(!CouchError::from(TransportError::fatal("bad certificate")).is_retryable());
        assert!(!CouchError::Conflict { reason: String::new() }.is_retryable());
        assert!(!CouchError::AuthRequired { operation: "all_dbs" }.is_retryable());
    }

    #[test]
    fn transport_errors_pass_through() {
        let transport = TransportError::fatal("dns failure");
        let err = CouchError::from(transport.clone());
        assert_eq!(err.to_string(), transport.to_string());
        assert_eq!(err, CouchError::Transport(transport));
    }
}
