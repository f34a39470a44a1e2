//! Database handle and database lifecycle.

use crate::changes::Seq;
use crate::config::{Credentials, DbOptions};
use crate::error::{CouchError, CouchResult};
use crate::path;
use crate::server::{decode_body, malformed, with_json, Server};
use crate::transport::{Method, Request};
use settee_json::{expect_document, Document, Wire};
use tracing::info;

/// A handle to one database on a server.
///
/// Creating a handle sends nothing; it is an immutable value that can be
/// created repeatedly and shared across threads.
#[derive(Debug, Clone)]
pub struct Database {
    server: Server,
    name: String,
    options: DbOptions,
}

/// Result of deleting a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The server acknowledged the deletion with `{"ok": true}`.
    Deleted,
}

/// Database metadata returned by `GET /{db}`.
#[derive(Debug, Clone, PartialEq)]
pub struct DbInfo {
    /// Database name.
    pub db_name: String,
    /// Number of live documents.
    pub doc_count: u64,
    /// Number of deleted documents.
    pub doc_del_count: u64,
    /// Current update sequence.
    pub update_seq: Seq,
    /// The full response.
    pub raw: Document,
}

impl Database {
    /// Creates a handle using the server's credential.
    pub fn new(server: &Server, name: impl Into<String>) -> Self {
        Self::with_options(server, name, DbOptions::default())
    }

    /// Creates a handle with per-database overrides.
    pub fn with_options(server: &Server, name: impl Into<String>, options: DbOptions) -> Self {
        Self {
            server: server.clone(),
            name: name.into(),
            options,
        }
    }

    /// Returns the database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the server this database lives on.
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// The credential in effect: the override, else the server's.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.options
            .credentials
            .as_ref()
            .or_else(|| self.server.credentials())
    }

    /// `PUT /{db}`
    ///
    /// Fails with [`CouchError::AlreadyExists`] if the database exists.
    pub fn create(&self) -> CouchResult<()> {
        let response = self.execute_raw(self.request(Method::Put, path::db_path(&self.name)))?;
        match response.status {
            201 | 202 => {
                info!(db = %self.name, "created database");
                Ok(())
            }
            412 => Err(CouchError::AlreadyExists {
                name: self.name.clone(),
            }),
            status => Err(CouchError::from_status(status, &response.body)),
        }
    }

    /// `DELETE /{db}`
    pub fn delete(&self) -> CouchResult<DeleteOutcome> {
        let response = self.execute(self.request(Method::Delete, path::db_path(&self.name)))?;
        match decode_body(&response)?.get("ok") {
            Some(Wire::Bool(true)) => {
                info!(db = %self.name, "deleted database");
                Ok(DeleteOutcome::Deleted)
            }
            _ => Err(CouchError::malformed("delete response without ok")),
        }
    }

    /// `HEAD /{db}`. The answer comes from the status code alone.
    pub fn exists(&self) -> CouchResult<bool> {
        let response = self.execute_raw(self.request(Method::Head, path::db_path(&self.name)))?;
        match response.status {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(CouchError::from_status(status, &response.body)),
        }
    }

    /// `GET /{db}`
    pub fn info(&self) -> CouchResult<DbInfo> {
        let response = self.execute(self.request(Method::Get, path::db_path(&self.name)))?;
        let raw = expect_document(&decode_body(&response)?).map_err(malformed)?;
        let count = |name: &str| {
            raw.get(name)
                .and_then(settee_json::Value::as_integer)
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| CouchError::malformed(format!("missing {name} in db info")))
        };
        let db_name = raw
            .get("db_name")
            .and_then(settee_json::Value::as_text)
            .ok_or_else(|| CouchError::malformed("missing db_name in db info"))?
            .to_string();
        let update_seq = raw
            .get("update_seq")
            .map(|v| Seq::from_wire(&settee_json::denormalize(v)))
            .ok_or_else(|| CouchError::malformed("missing update_seq in db info"))?;

        Ok(DbInfo {
            db_name,
            doc_count: count("doc_count")?,
            doc_del_count: count("doc_del_count")?,
            update_seq,
            raw,
        })
    }

    /// `POST /{db}/_compact`. Returns once compaction is accepted, not finished.
    pub fn compact(&self) -> CouchResult<()> {
        let request = with_json(
            self.request(Method::Post, path::endpoint_path(&self.name, "_compact")),
            &Wire::Object(serde_json::Map::new()),
        )?;
        self.execute(request).map(|_| ())
    }

    pub(crate) fn request(&self, method: Method, path: String) -> Request {
        self.server.request(method, path)
    }

    pub(crate) fn execute(&self, request: Request) -> CouchResult<crate::transport::Response> {
        self.server.execute(request, self.credentials())
    }

    pub(crate) fn execute_raw(&self, request: Request) -> CouchResult<crate::transport::Response> {
        self.server.execute_raw(request, self.credentials())
    }
}
