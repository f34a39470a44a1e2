//! Document CRUD.

use crate::database::Database;
use crate::error::{CouchError, CouchResult};
use crate::path;
use crate::server::{decode_body, malformed, update_fields, with_json};
use crate::transport::Method;
use settee_json::{denormalize_document, expect_document, Document, Wire};
use tracing::debug;

/// The id and new revision produced by a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocUpdate {
    /// Document id.
    pub id: String,
    /// Revision assigned by the server.
    pub rev: String,
}

/// Per-document outcome of a bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkResult {
    /// The document was written.
    Saved(DocUpdate),
    /// The document was rejected; the others are unaffected.
    Failed {
        /// Document id, when the server reports one.
        id: Option<String>,
        /// Error tag, e.g. `conflict`.
        error: String,
        /// Human-readable reason.
        reason: String,
    },
}

impl BulkResult {
    fn from_wire(item: &Wire) -> CouchResult<Self> {
        let text = |name: &str| item.get(name).and_then(Wire::as_str).map(str::to_string);
        match (text("error"), text("id"), text("rev")) {
            (Some(error), id, _) => Ok(BulkResult::Failed {
                id,
                error,
                reason: text("reason").unwrap_or_default(),
            }),
            (None, Some(id), Some(rev)) => Ok(BulkResult::Saved(DocUpdate { id, rev })),
            _ => Err(CouchError::malformed("bulk result without rev or error")),
        }
    }
}

impl Database {
    /// Saves a document.
    ///
    /// With an `_id` the document is written with `PUT /{db}/{id}`; its
    /// `_rev` must be current if the document exists. Without an `_id`
    /// it is created with `POST /{db}` and the server picks the id.
    /// Returns the document with `_id` and `_rev` set from the response.
    pub fn save_doc(&self, mut doc: Document) -> CouchResult<Document> {
        let body = Wire::Object(denormalize_document(&doc));
        let request = match doc.id() {
            Some(id) => self.request(Method::Put, path::doc_path(self.name(), id)),
            None => self.request(Method::Post, path::db_path(self.name())),
        };
        let response = self.execute(with_json(request, &body)?)?;
        let (id, rev) = update_fields(&decode_body(&response)?)?;
        debug!(db = %self.name(), id = %id, rev = %rev, "saved document");
        doc.set_id(id);
        doc.set_rev(rev);
        Ok(doc)
    }

    /// `POST /{db}/_bulk_docs`. One result per input document, in order.
    pub fn save_docs(&self, docs: &[Document]) -> CouchResult<Vec<BulkResult>> {
        let docs: Vec<Wire> = docs
            .iter()
            .map(|doc| Wire::Object(denormalize_document(doc)))
            .collect();
        let body = serde_json::json!({ "docs": docs });
        let request = with_json(
            self.request(Method::Post, path::endpoint_path(self.name(), "_bulk_docs")),
            &body,
        )?;
        let response = self.execute(request)?;
        match decode_body(&response)? {
            Wire::Array(items) => items.iter().map(BulkResult::from_wire).collect(),
            _ => Err(CouchError::malformed("expected a list of bulk results")),
        }
    }

    /// `GET /{db}/{id}[?rev=]`
    pub fn open_doc(&self, id: &str, rev: Option<&str>) -> CouchResult<Document> {
        let mut request = self.request(Method::Get, path::doc_path(self.name(), id));
        if let Some(rev) = rev {
            request = request.with_query("rev", rev);
        }
        let response = self.execute(request)?;
        expect_document(&decode_body(&response)?).map_err(malformed)
    }

    /// `DELETE /{db}/{id}?rev=`. The revision is required and never looked up.
    pub fn delete_doc(&self, id: &str, rev: &str) -> CouchResult<DocUpdate> {
        let request = self
            .request(Method::Delete, path::doc_path(self.name(), id))
            .with_query("rev", rev);
        let response = self.execute(request)?;
        let (id, rev) = update_fields(&decode_body(&response)?)?;
        debug!(db = %self.name(), id = %id, rev = %rev, "deleted document");
        Ok(DocUpdate { id, rev })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::server::Server;
    use crate::transport::{MockTransport, Response, Transport};
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Arc<MockTransport>, Database) {
        let mock = Arc::new(MockTransport::new());
        let server = Server::with_transport(
            ServerConfig::default(),
            Arc::clone(&mock) as Arc<dyn Transport>,
        );
        (mock, server.database("db"))
    }

    #[test]
    fn save_without_id_posts() {
        let (mock, db) = setup();
        mock.push_response(Response::json(201, &json!({"ok": true, "id": "abc", "rev": "1-x"})));

        let saved = db.save_doc(Document::new().field("name", "Ann")).unwrap();
        assert_eq!(saved.id(), Some("abc"));
        assert_eq!(saved.rev(), Some("1-x"));

        let request = mock.last_request().unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/db");
        assert_eq!(request.header("Content-Type"), Some("application/json"));
        let body: Wire = serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"name": "Ann"}));
    }

    #[test]
    fn save_with_id_puts_revision_in_body() {
        let (mock, db) = setup();
        mock.push_response(Response::json(201, &json!({"ok": true, "id": "ann", "rev": "2-y"})));

        let mut doc = Document::with_id("ann");
        doc.set_rev("1-x");
        let saved = db.save_doc(doc).unwrap();
        assert_eq!(saved.rev(), Some("2-y"));

        let request = mock.last_request().unwrap();
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.path, "/db/ann");
        let body: Wire = serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["_rev"], json!("1-x"));
    }

    #[test]
    fn stale_revision_is_a_conflict() {
        let (mock, db) = setup();
        mock.push_response(Response::json(
            409,
            &json!({"error": "conflict", "reason": "Document update conflict."}),
        ));
        assert!(db.save_doc(Document::with_id("ann")).unwrap_err().is_conflict());
    }

    #[test]
    fn open_passes_revision() {
        let (mock, db) = setup();
        mock.push_response(Response::json(200, &json!({"_id": "ann", "_rev": "1-x", "n": 1})));

        let doc = db.open_doc("ann", Some("1-x")).unwrap();
        assert_eq!(doc.get("n").and_then(|v| v.as_integer()), Some(1));
        assert_eq!(mock.last_request().unwrap().query_param("rev"), Some("1-x"));
    }

    #[test]
    fn delete_requires_revision_in_query() {
        let (mock, db) = setup();
        mock.push_response(Response::json(200, &json!({"ok": true, "id": "ann", "rev": "3-z"})));

        let update = db.delete_doc("ann", "2-y").unwrap();
        assert_eq!(update, DocUpdate { id: "ann".into(), rev: "3-z".into() });

        let request = mock.last_request().unwrap();
        assert_eq!(request.method, Method::Delete);
        assert_eq!(request.query_param("rev"), Some("2-y"));
        assert_eq!(mock.requests().len(), 1);
    }

    #[test]
    fn bulk_results_keep_order() {
        let (mock, db) = setup();
        mock.push_response(Response::json(
            201,
            &json!([
                {"ok": true, "id": "a", "rev": "1-a"},
                {"id": "b", "error": "conflict", "reason": "Document update conflict."}
            ]),
        ));

        let results = db
            .save_docs(&[Document::with_id("a"), Document::with_id("b")])
            .unwrap();
        assert_eq!(
            results,
            vec![
                BulkResult::Saved(DocUpdate { id: "a".into(), rev: "1-a".into() }),
                BulkResult::Failed {
                    id: Some("b".into()),
                    error: "conflict".into(),
                    reason: "Document update conflict.".into(),
                },
            ]
        );
    }
}
