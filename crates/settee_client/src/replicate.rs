//! Server-driven replication.
//!
//! One-shot replication answers once the copy is done. Continuous
//! replication answers as soon as the server has accepted the job, so a
//! [`ReplicationResult::Started`] says nothing about progress.

use crate::changes::Seq;
use crate::error::{CouchError, CouchResult};
use crate::server::{decode_body, malformed, with_json, Server};
use crate::transport::Method;
use settee_json::{expect_document, Document, Wire};
use tracing::info;

/// What to replicate and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationRequest {
    /// Source database name or URL.
    pub source: String,
    /// Target database name or URL.
    pub target: String,
    /// Create the target if it does not exist.
    pub create_target: bool,
    /// Keep replicating new changes.
    pub continuous: bool,
}

impl ReplicationRequest {
    /// One-shot replication from `source` to `target`.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            create_target: false,
            continuous: false,
        }
    }

    /// Creates the target if missing.
    pub fn create_target(mut self) -> Self {
        self.create_target = true;
        self
    }

    /// Replicates continuously.
    pub fn continuous(mut self) -> Self {
        self.continuous = true;
        self
    }

    fn to_wire(&self) -> Wire {
        let mut body = serde_json::Map::new();
        body.insert("source".into(), Wire::String(self.source.clone()));
        body.insert("target".into(), Wire::String(self.target.clone()));
        if self.create_target {
            body.insert("create_target".into(), Wire::Bool(true));
        }
        if self.continuous {
            body.insert("continuous".into(), Wire::Bool(true));
        }
        Wire::Object(body)
    }
}

/// Report of a finished one-shot replication.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationSummary {
    /// Replication session id.
    pub session_id: Option<String>,
    /// Last source sequence replicated.
    pub source_last_seq: Option<Seq>,
    /// True if the source had nothing new.
    pub no_changes: bool,
    /// Per-session history records, newest first.
    pub history: Vec<Document>,
}

/// Answer to a replication request.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationResult {
    /// One-shot replication finished.
    Completed(ReplicationSummary),
    /// Continuous replication was accepted. Not a completion.
    Started {
        /// Replication id assigned by the server.
        local_id: Option<String>,
    },
}

impl ReplicationResult {
    fn from_wire(body: &Wire, continuous: bool) -> CouchResult<Self> {
        if body.get("ok").and_then(Wire::as_bool) != Some(true) {
            return Err(CouchError::malformed("replication response without ok"));
        }
        let text = |name: &str| body.get(name).and_then(Wire::as_str).map(str::to_string);
        if continuous {
            return Ok(ReplicationResult::Started {
                local_id: text("_local_id"),
            });
        }
        let history = match body.get("history") {
            None => Vec::new(),
            Some(Wire::Array(items)) => items
                .iter()
                .map(|item| expect_document(item).map_err(malformed))
                .collect::<CouchResult<_>>()?,
            Some(_) => return Err(CouchError::malformed("replication history is not a list")),
        };
        Ok(ReplicationResult::Completed(ReplicationSummary {
            session_id: text("session_id"),
            source_last_seq: body.get("source_last_seq").map(Seq::from_wire),
            no_changes: body.get("no_changes").and_then(Wire::as_bool).unwrap_or(false),
            history,
        }))
    }
}

impl Server {
    /// `POST /_replicate`
    pub fn replicate(&self, replication: &ReplicationRequest) -> CouchResult<ReplicationResult> {
        let request = with_json(self.request(Method::Post, "/_replicate"), &replication.to_wire())?;
        let response = self.execute(request, self.credentials())?;
        let result =
            ReplicationResult::from_wire(&decode_body(&response)?, replication.continuous)?;
        info!(
            source = %replication.source,
            target = %replication.target,
            continuous = replication.continuous,
            "replication accepted"
        );
        Ok(result)
    }
}
