//! Attachment management.
//!
//! Attachment writes and deletes create a new document revision. When no
//! revision is given it is resolved first (see [`crate::revision`]).

use crate::database::Database;
use crate::document::DocUpdate;
use crate::error::CouchResult;
use crate::path;
use crate::server::{decode_body, update_fields};
use crate::transport::Method;
use tracing::debug;

/// Binary content stored alongside a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Attachment name.
    pub name: String,
    /// Raw content.
    pub content: Vec<u8>,
    /// MIME type sent as `Content-Type`.
    pub content_type: String,
}

impl Attachment {
    /// Creates an attachment.
    pub fn new(
        name: impl Into<String>,
        content: impl Into<Vec<u8>>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            content_type: content_type.into(),
        }
    }
}

impl Database {
    /// `PUT /{db}/{id}/{name}?rev=` with the attachment's content type.
    ///
    /// A missing revision is resolved first; a stale one fails with a conflict.
    pub fn put_attachment(
        &self,
        id: &str,
        rev: Option<&str>,
        attachment: &Attachment,
    ) -> CouchResult<DocUpdate> {
        let rev = self.resolve_rev(id, rev)?;
        let request = self
            .request(Method::Put, path::attachment_path(self.name(), id, &attachment.name))
            .with_query("rev", rev)
            .with_header("Content-Type", attachment.content_type.clone())
            .with_body(attachment.content.clone());
        let response = self.execute(request)?;
        let (id, rev) = update_fields(&decode_body(&response)?)?;
        debug!(
            db = %self.name(),
            id = %id,
            rev = %rev,
            name = %attachment.name,
            "stored attachment"
        );
        Ok(DocUpdate { id, rev })
    }

    /// `GET /{db}/{id}/{name}`. Returns the raw bytes.
    pub fn fetch_attachment(&self, id: &str, name: &str) -> CouchResult<Vec<u8>> {
        let request = self.request(Method::Get, path::attachment_path(self.name(), id, name));
        let response = self.execute(request)?;
        Ok(response.body)
    }

    /// `DELETE /{db}/{id}/{name}?rev=`
    ///
    /// A missing revision is resolved first. Deleting an attachment that is
    /// already gone still succeeds and still produces a new revision.
    pub fn delete_attachment(
        &self,
        id: &str,
        rev: Option<&str>,
        name: &str,
    ) -> CouchResult<DocUpdate> {
        let rev = self.resolve_rev(id, rev)?;
        let request = self
            .request(Method::Delete, path::attachment_path(self.name(), id, name))
            .with_query("rev", rev);
        let response = self.execute(request)?;
        let (id, rev) = update_fields(&decode_body(&response)?)?;
        debug!(db = %self.name(), id = %id, rev = %rev, name, "deleted attachment");
        Ok(DocUpdate { id, rev })
    }
}
