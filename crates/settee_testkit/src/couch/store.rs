//! Document storage for the in-memory server.

use serde_json::{json, Map};
use settee_client::Response;
use settee_json::Wire;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A CouchDB-style error reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fail {
    pub status: u16,
    pub error: &'static str,
    pub reason: String,
}

impl Fail {
    pub fn new(status: u16, error: &'static str, reason: impl Into<String>) -> Self {
        Self {
            status,
            error,
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(404, "not_found", reason)
    }

    pub fn no_db() -> Self {
        Self::not_found("Database does not exist.")
    }

    pub fn conflict() -> Self {
        Self::new(409, "conflict", "Document update conflict.")
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(400, "bad_request", reason)
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::new(401, "unauthorized", reason)
    }

    pub fn into_response(self) -> Response {
        Response::json(self.status, &json!({"error": self.error, "reason": self.reason}))
    }
}

pub(crate) type Handled = Result<Response, Fail>;

/// Lowercase hex of the first `len` bytes of a SHA-256 digest.
pub(crate) fn digest_hex(parts: &[&[u8]], len: usize) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher
        .finalize()
        .iter()
        .take(len)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredAttachment {
    pub content_type: String,
    pub data: Vec<u8>,
    pub revpos: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredDoc {
    pub rev: String,
    pub body: Map<String, Wire>,
    pub attachments: BTreeMap<String, StoredAttachment>,
    pub deleted: bool,
    pub seq: u64,
}

impl StoredDoc {
    fn generation(&self) -> u64 {
        generation(&self.rev)
    }

    /// The document as `GET /{db}/{id}` returns it.
    pub fn to_wire(&self, id: &str) -> Wire {
        let mut out = Map::new();
        out.insert("_id".into(), Wire::String(id.to_string()));
        out.insert("_rev".into(), Wire::String(self.rev.clone()));
        if self.deleted {
            out.insert("_deleted".into(), Wire::Bool(true));
        }
        out.extend(self.body.iter().map(|(k, v)| (k.clone(), v.clone())));
        if !self.attachments.is_empty() {
            let stubs = self
                .attachments
                .iter()
                .map(|(name, att)| {
                    let stub = json!({
                        "content_type": att.content_type,
                        "length": att.data.len(),
                        "revpos": att.revpos,
                        "stub": true,
                    });
                    (name.clone(), stub)
                })
                .collect();
            out.insert("_attachments".into(), Wire::Object(stubs));
        }
        Wire::Object(out)
    }
}

fn generation(rev: &str) -> u64 {
    rev.split_once('-')
        .and_then(|(n, _)| n.parse().ok())
        .unwrap_or(0)
}

/// One database.
#[derive(Debug, Default)]
pub(crate) struct MemDb {
    pub docs: BTreeMap<String, StoredDoc>,
    pub seq: u64,
}

impl MemDb {
    /// Live document, if any.
    pub fn live(&self, id: &str) -> Option<&StoredDoc> {
        self.docs.get(id).filter(|doc| !doc.deleted)
    }

    pub fn live_docs(&self) -> impl Iterator<Item = (&String, &StoredDoc)> {
        self.docs.iter().filter(|(_, doc)| !doc.deleted)
    }

    pub fn doc_count(&self) -> usize {
        self.live_docs().count()
    }

    pub fn del_count(&self) -> usize {
        self.docs.len() - self.doc_count()
    }

    /// Missing live documents, in the way `GET` reports them.
    pub fn missing(&self, id: &str) -> Fail {
        match self.docs.get(id) {
            Some(doc) if doc.deleted => Fail::not_found("deleted"),
            _ => Fail::not_found("missing"),
        }
    }

    fn check_rev(&self, id: &str, rev: Option<&str>) -> Result<(), Fail> {
        let ok = match self.docs.get(id) {
            Some(doc) if !doc.deleted => rev == Some(doc.rev.as_str()),
            Some(doc) => rev.map_or(true, |rev| rev == doc.rev),
            None => rev.is_none(),
        };
        if ok {
            Ok(())
        } else {
            Err(Fail::conflict())
        }
    }

    fn commit(
        &mut self,
        id: &str,
        body: Map<String, Wire>,
        attachments: BTreeMap<String, StoredAttachment>,
        deleted: bool,
    ) -> String {
        let (previous, gen) = match self.docs.get(id) {
            Some(doc) => (doc.rev.clone(), doc.generation() + 1),
            None => (String::new(), 1),
        };
        let encoded = Wire::Object(body.clone()).to_string();
        let marker: &[u8] = if deleted { b"deleted" } else { b"live" };
        let rev = format!(
            "{gen}-{}",
            digest_hex(&[previous.as_bytes(), id.as_bytes(), encoded.as_bytes(), marker], 16)
        );
        self.seq += 1;
        self.docs.insert(
            id.to_string(),
            StoredDoc {
                rev: rev.clone(),
                body,
                attachments,
                deleted,
                seq: self.seq,
            },
        );
        rev
    }

    /// Writes a document body. `_deleted: true` deletes it.
    pub fn put_doc(
        &mut self,
        id: &str,
        mut body: Map<String, Wire>,
        rev: Option<&str>,
    ) -> Result<String, Fail> {
        self.check_rev(id, rev)?;
        let deleted = matches!(body.remove("_deleted"), Some(Wire::Bool(true)));
        if deleted && self.live(id).is_none() {
            return Err(self.missing(id));
        }
        let kept: Vec<String> = match body.remove("_attachments") {
            Some(Wire::Object(stubs)) => stubs.keys().cloned().collect(),
            _ => Vec::new(),
        };
        body.remove("_id");
        body.remove("_rev");
        if let Some(field) = body.keys().find(|k| k.starts_with('_')) {
            return Err(Fail::new(
                400,
                "doc_validation",
                format!("Bad special document member: {field}"),
            ));
        }
        let attachments = match self.live(id) {
            Some(doc) if !deleted => doc
                .attachments
                .iter()
                .filter(|(name, _)| kept.contains(name))
                .map(|(name, att)| (name.clone(), att.clone()))
                .collect(),
            _ => BTreeMap::new(),
        };
        let body = if deleted { Map::new() } else { body };
        Ok(self.commit(id, body, attachments, deleted))
    }

    pub fn delete_doc(&mut self, id: &str, rev: Option<&str>) -> Result<String, Fail> {
        if self.live(id).is_none() {
            return Err(self.missing(id));
        }
        self.check_rev(id, rev)?;
        Ok(self.commit(id, Map::new(), BTreeMap::new(), true))
    }

    pub fn put_attachment(
        &mut self,
        id: &str,
        rev: Option<&str>,
        name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<String, Fail> {
        self.check_rev(id, rev)?;
        let (body, mut attachments, gen) = match self.live(id) {
            Some(doc) => (doc.body.clone(), doc.attachments.clone(), doc.generation()),
            None => (Map::new(), BTreeMap::new(), 0),
        };
        attachments.insert(
            name.to_string(),
            StoredAttachment {
                content_type: content_type.to_string(),
                data,
                revpos: gen + 1,
            },
        );
        Ok(self.commit(id, body, attachments, false))
    }

    /// Removes an attachment. A name that is already gone still produces
    /// a new revision.
    pub fn delete_attachment(
        &mut self,
        id: &str,
        rev: Option<&str>,
        name: &str,
    ) -> Result<String, Fail> {
        let Some(doc) = self.live(id) else {
            return Err(self.missing(id));
        };
        let (body, mut attachments) = (doc.body.clone(), doc.attachments.clone());
        self.check_rev(id, rev)?;
        attachments.remove(name);
        Ok(self.commit(id, body, attachments, false))
    }

    /// Changes after `since`, oldest first.
    pub fn changes_since(&self, since: u64) -> Vec<(&String, &StoredDoc)> {
        let mut changes: Vec<_> = self.docs.iter().filter(|(_, doc)| doc.seq > since).collect();
        changes.sort_by_key(|(_, doc)| doc.seq);
        changes
    }

    /// Stores a replicated revision. Returns false if the target already
    /// holds it.
    pub fn absorb(&mut self, id: &str, incoming: &StoredDoc) -> bool {
        if self.docs.get(id).is_some_and(|doc| doc.rev == incoming.rev) {
            return false;
        }
        self.seq += 1;
        let mut doc = incoming.clone();
        doc.seq = self.seq;
        self.docs.insert(id.to_string(), doc);
        true
    }
}

/// A `_changes` row.
pub(crate) fn change_row(id: &str, doc: &StoredDoc, include_docs: bool) -> Wire {
    let mut row = json!({
        "seq": doc.seq,
        "id": id,
        "changes": [{"rev": doc.rev}],
    });
    if doc.deleted {
        row["deleted"] = Wire::Bool(true);
    }
    if include_docs {
        row["doc"] = doc.to_wire(id);
    }
    row
}
