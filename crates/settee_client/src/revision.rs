//! Revision resolution for mutating calls.
//!
//! Every write to an existing document must name its current revision.
//! Calls that accept an optional revision resolve a missing one here, in
//! one extra round-trip at most, and then write with it.
//!
//! Resolving and writing are two requests. Another writer may update the
//! document in between; the write then fails with
//! [`CouchError::Conflict`](crate::CouchError::Conflict). Callers that need
//! the write to apply to a specific revision pass it explicitly, obtained
//! with [`Database::lookup_doc_rev`] or from the document they read.

use crate::database::Database;
use crate::error::{CouchError, CouchResult};
use crate::path;
use crate::transport::Method;
use tracing::trace;

impl Database {
    /// `HEAD /{db}/{id}`: returns the current revision from the `ETag` header.
    pub fn lookup_doc_rev(&self, id: &str) -> CouchResult<String> {
        let request = self.request(Method::Head, path::doc_path(self.name(), id));
        let response = self.execute_raw(request)?;
        match response.status {
            200 => response
                .header("ETag")
                .map(|etag| etag.trim().trim_matches('"').to_string())
                .filter(|rev| !rev.is_empty())
                .ok_or_else(|| CouchError::malformed(format!("no ETag for document {id}"))),
            404 => Err(CouchError::NotFound {
                reason: format!("document {id} not found"),
            }),
            status => Err(CouchError::from_status(status, &response.body)),
        }
    }

    /// Returns the revision to write with.
    ///
    /// An explicit revision is returned unchanged without any request.
    /// Otherwise the current revision is looked up; lookup failures are the
    /// same `NotFound` or transport errors [`lookup_doc_rev`](Self::lookup_doc_rev) returns.
    pub fn resolve_rev(&self, id: &str, rev: Option<&str>) -> CouchResult<String> {
        match rev {
            Some(rev) => Ok(rev.to_string()),
            None => {
                let rev = self.lookup_doc_rev(id)?;
                trace!(db = %self.name(), id, rev = %rev, "resolved revision");
                Ok(rev)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ServerConfig;
    use crate::error::{CouchError, TransportError};
    use crate::server::Server;
    use crate::transport::{Method, MockTransport, Response, Transport};
    use std::sync::Arc;

    fn setup() -> (Arc<MockTransport>, crate::Database) {
        let mock = Arc::new(MockTransport::new());
        let server = Server::with_transport(
            ServerConfig::default(),
            Arc::clone(&mock) as Arc<dyn Transport>,
        );
        (mock, server.database("db"))
    }

    #[test]
    fn explicit_revision_needs_no_request() {
        let (mock, db) = setup();
        assert_eq!(db.resolve_rev("doc", Some("3-abc")).unwrap(), "3-abc");
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn missing_revision_is_looked_up_once() {
        let (mock, db) = setup();
        mock.push_response(Response::new(200, "").with_header("ETag", "\"2-def\""));

        assert_eq!(db.resolve_rev("doc", None).unwrap(), "2-def");
        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Head);
        assert_eq!(requests[0].path, "/db/doc");
    }

    #[test]
    fn lookup_failures_propagate_unchanged() {
        let (mock, db) = setup();
        mock.push_response(Response::new(404, ""));
        mock.push_error(TransportError::retryable("connection refused"));

        assert!(db.resolve_rev("doc", None).unwrap_err().is_not_found());
        assert_eq!(
            db.resolve_rev("doc", None).unwrap_err(),
            CouchError::Transport(TransportError::retryable("connection refused"))
        );
    }

    #[test]
    fn missing_etag_is_malformed() {
        let (mock, db) = setup();
        mock.push_response(Response::new(200, ""));
        assert!(matches!(
            db.lookup_doc_rev("doc"),
            Err(CouchError::MalformedResponse(_))
        ));
    }
}
