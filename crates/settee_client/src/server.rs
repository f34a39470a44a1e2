//! Server handle and server-level endpoints.

use crate::config::{Credentials, DbOptions, ServerConfig};
use crate::database::{Database, DeleteOutcome};
use crate::error::{CouchError, CouchResult};
use crate::transport::{ChunkStream, Method, Request, Response, Transport};
use settee_json::{expect_document, Document, Wire};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A CouchDB server: base URL, optional credential and the transport
/// used to reach it.
///
/// Immutable and cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct Server {
    config: Arc<ServerConfig>,
    transport: Arc<dyn Transport>,
}

impl Server {
    /// Creates a server handle.
    pub fn new(config: ServerConfig, transport: impl Transport + 'static) -> Self {
        Self::with_transport(config, Arc::new(transport))
    }

    /// Creates a server handle sharing an existing transport.
    pub fn with_transport(config: ServerConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Returns a handle to a database. No request is sent.
    pub fn database(&self, name: impl Into<String>) -> Database {
        Database::new(self, name)
    }

    /// Returns a handle to a database with per-database overrides.
    pub fn database_with(&self, name: impl Into<String>, options: DbOptions) -> Database {
        Database::with_options(self, name, options)
    }

    /// Creates a database and returns its handle.
    pub fn create_db(&self, name: impl Into<String>) -> CouchResult<Database> {
        let db = self.database(name);
        db.create()?;
        Ok(db)
    }

    /// Deletes a database.
    pub fn delete_db(&self, name: impl Into<String>) -> CouchResult<DeleteOutcome> {
        self.database(name).delete()
    }

    /// Returns true if the database exists.
    pub fn db_exists(&self, name: impl Into<String>) -> CouchResult<bool> {
        self.database(name).exists()
    }

    /// `GET /`
    pub fn server_info(&self) -> CouchResult<Document> {
        let response = self.execute(self.request(Method::Get, "/"), self.credentials())?;
        expect_document(&decode_body(&response)?).map_err(malformed)
    }

    /// `GET /_active_tasks`. Requires a credential.
    pub fn active_tasks(&self) -> CouchResult<Vec<Document>> {
        let creds = self.require_credentials("active_tasks")?;
        let response = self.execute(self.request(Method::Get, "/_active_tasks"), Some(creds))?;
        match decode_body(&response)? {
            Wire::Array(items) => items
                .iter()
                .map(|item| expect_document(item).map_err(malformed))
                .collect(),
            _ => Err(CouchError::malformed("expected a list of tasks")),
        }
    }

    /// `GET /_all_dbs`. Requires a credential.
    pub fn all_dbs(&self) -> CouchResult<Vec<String>> {
        let creds = self.require_credentials("all_dbs")?;
        let response = self.execute(self.request(Method::Get, "/_all_dbs"), Some(creds))?;
        string_list(&decode_body(&response)?, "expected a list of database names")
    }

    /// `GET /_uuids?count=N`
    pub fn uuids(&self, count: u32) -> CouchResult<Vec<String>> {
        let request = self
            .request(Method::Get, "/_uuids")
            .with_query("count", count.to_string());
        let response = self.execute(request, self.credentials())?;
        let body = decode_body(&response)?;
        let uuids = body
            .get("uuids")
            .ok_or_else(|| CouchError::malformed("missing uuids"))?;
        string_list(uuids, "expected a list of uuids")
    }

    pub(crate) fn credentials(&self) -> Option<&Credentials> {
        self.config.credentials.as_ref()
    }

    pub(crate) fn require_credentials(&self, operation: &'static str) -> CouchResult<&Credentials> {
        self.credentials()
            .ok_or(CouchError::AuthRequired { operation })
    }

    /// Starts a request against this server.
    pub(crate) fn request(&self, method: Method, path: impl Into<String>) -> Request {
        let mut request = Request::new(method, self.config.base_url.clone(), path)
            .with_header("Accept", "application/json");
        request.timeout = self.config.timeout;
        request
    }

    /// Sends a request and maps non-success statuses to errors.
    pub(crate) fn execute(
        &self,
        request: Request,
        creds: Option<&Credentials>,
    ) -> CouchResult<Response> {
        let response = self.execute_raw(request, creds)?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(CouchError::from_status(response.status, &response.body))
        }
    }

    /// Sends a request and returns the response whatever its status.
    pub(crate) fn execute_raw(
        &self,
        request: Request,
        creds: Option<&Credentials>,
    ) -> CouchResult<Response> {
        let request = authorize(request, creds);
        debug!(method = %request.method, path = %request.path, "sending request");
        let response = self.transport.send(&request)?;
        if !response.is_success() && response.status != 404 {
            warn!(
                method = %request.method,
                path = %request.path,
                status = response.status,
                "request failed"
            );
        }
        Ok(response)
    }

    /// Opens a streamed request. Non-success statuses are drained and mapped to errors.
    pub(crate) fn open_stream(
        &self,
        request: Request,
        creds: Option<&Credentials>,
    ) -> CouchResult<Box<dyn ChunkStream>> {
        let request = authorize(request, creds);
        debug!(method = %request.method, path = %request.path, "opening stream");
        let mut stream = self.transport.open_stream(&request)?;
        let status = stream.status();
        if (200..300).contains(&status) {
            return Ok(stream);
        }
        let mut body = Vec::new();
        while let Some(chunk) = stream.read_chunk()? {
            body.extend_from_slice(&chunk);
        }
        stream.close();
        Err(CouchError::from_status(status, &body))
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn authorize(request: Request, creds: Option<&Credentials>) -> Request {
    match creds {
        Some(creds) => {
            let (name, value) = creds.header();
            request.with_header(name, value)
        }
        None => request,
    }
}

/// Attaches a JSON body.
pub(crate) fn with_json(request: Request, body: &Wire) -> CouchResult<Request> {
    let bytes = settee_json::encode(body)?;
    Ok(request
        .with_header("Content-Type", "application/json")
        .with_body(bytes))
}

/// Decodes a JSON response body.
pub(crate) fn decode_body(response: &Response) -> CouchResult<Wire> {
    settee_json::decode(&response.body).map_err(malformed)
}

pub(crate) fn malformed(err: impl fmt::Display) -> CouchError {
    CouchError::malformed(err.to_string())
}

fn string_list(value: &Wire, expected: &str) -> CouchResult<Vec<String>> {
    value
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| CouchError::malformed(expected))
}

/// Reads `{"ok": true, "id": .., "rev": ..}`.
pub(crate) fn update_fields(body: &Wire) -> CouchResult<(String, String)> {
    let field = |name: &str| {
        body.get(name)
            .and_then(Wire::as_str)
            .map(str::to_string)
            .ok_or_else(|| CouchError::malformed(format!("missing {name} in update response")))
    };
    Ok((field("id")?, field("rev")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::json;

    fn server_with(mock: &Arc<MockTransport>, config: ServerConfig) -> Server {
        Server::with_transport(config, Arc::clone(mock) as Arc<dyn Transport>)
    }

    #[test]
    fn server_info_is_a_document() {
        let mock = Arc::new(MockTransport::new());
        mock.push_response(Response::json(200, &json!({"couchdb": "Welcome", "version": "3.3.3"})));
        let server = server_with(&mock, ServerConfig::default());

        let info = server.server_info().unwrap();
        assert_eq!(info.get("couchdb").and_then(|v| v.as_text()), Some("Welcome"));

        let request = mock.last_request().unwrap();
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.path, "/");
        assert_eq!(request.header("authorization"), None);
    }

    #[test]
    fn admin_endpoints_fail_locally_without_credentials() {
        let mock = Arc::new(MockTransport::new());
        let server = server_with(&mock, ServerConfig::default());

        assert_eq!(
            server.all_dbs().unwrap_err(),
            CouchError::AuthRequired { operation: "all_dbs" }
        );
        assert_eq!(
            server.active_tasks().unwrap_err(),
            CouchError::AuthRequired { operation: "active_tasks" }
        );
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn admin_endpoints_send_basic_auth() {
        let mock = Arc::new(MockTransport::new());
        mock.push_response(Response::json(200, &json!(["_users", "albums"])));
        mock.push_response(Response::json(200, &json!([{"type": "indexer", "pid": "<0.1.0>"}])));
        let server = server_with(
            &mock,
            ServerConfig::default().with_credentials("Aladdin", "open sesame"),
        );

        assert_eq!(server.all_dbs().unwrap(), vec!["_users", "albums"]);
        let tasks = server.active_tasks().unwrap();
        assert_eq!(tasks.len(), 1);

        for request in mock.requests() {
            assert_eq!(
                request.header("Authorization"),
                Some("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==")
            );
        }
    }

    #[test]
    fn malformed_bodies_are_surfaced() {
        let mock = Arc::new(MockTransport::new());
        mock.push_response(Response::new(200, "<html>"));
        mock.push_response(Response::json(200, &json!({"uuids": [1, 2]})));
        let server = server_with(&mock, ServerConfig::default());

        assert!(matches!(server.server_info(), Err(CouchError::MalformedResponse(_))));
        assert!(matches!(server.uuids(2), Err(CouchError::MalformedResponse(_))));
    }

    #[test]
    fn uuids_query() {
        let mock = Arc::new(MockTransport::new());
        mock.push_response(Response::json(200, &json!({"uuids": ["a", "b"]})));
        let server = server_with(&mock, ServerConfig::default());

        assert_eq!(server.uuids(2).unwrap(), vec!["a", "b"]);
        assert_eq!(mock.last_request().unwrap().query_param("count"), Some("2"));
    }
}
