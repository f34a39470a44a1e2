//! Test fixtures.
//!
//! [`TestCouch`] pairs a [`MemoryCouch`] with a client [`Server`] pointing
//! at it, so a test can act through the client and inspect the server.

use crate::couch::MemoryCouch;
use settee_client::{Database, Server, ServerConfig, Transport};
use settee_json::{Document, Wire};
use std::sync::Arc;

/// Admin user configured by [`TestCouch::with_admin`].
pub const ADMIN_USER: &str = "admin";
/// Admin password configured by [`TestCouch::with_admin`].
pub const ADMIN_PASSWORD: &str = "relax";

/// An in-memory server and a client bound to it.
pub struct TestCouch {
    /// The server side.
    pub couch: Arc<MemoryCouch>,
    /// The client side.
    pub server: Server,
}

impl TestCouch {
    /// Open server, client without credentials.
    pub fn new() -> Self {
        Self::from_parts(MemoryCouch::new(), ServerConfig::default())
    }

    /// Server requiring [`ADMIN_USER`] for administration, client logged in as it.
    pub fn with_admin() -> Self {
        Self::from_parts(
            MemoryCouch::new().with_admin(ADMIN_USER, ADMIN_PASSWORD),
            ServerConfig::default().with_credentials(ADMIN_USER, ADMIN_PASSWORD),
        )
    }

    /// Binds a client with `config` to `couch`.
    pub fn from_parts(couch: MemoryCouch, config: ServerConfig) -> Self {
        let couch = Arc::new(couch);
        let server = Server::with_transport(config, Arc::clone(&couch) as Arc<dyn Transport>);
        Self { couch, server }
    }

    /// Another client for the same server.
    pub fn client(&self, config: ServerConfig) -> Server {
        Server::with_transport(config, Arc::clone(&self.couch) as Arc<dyn Transport>)
    }

    /// Creates a database through the client.
    pub fn create_db(&self, name: &str) -> Database {
        self.server
            .create_db(name)
            .expect("Failed to create database")
    }

    /// Creates a database holding `count` documents `doc-0`, `doc-1`, ...
    /// each with an `n` field.
    pub fn seeded_db(&self, name: &str, count: usize) -> Database {
        let db = self.create_db(name);
        for n in 0..count {
            let doc = Document::with_id(format!("doc-{n}")).field("n", n as i64);
            db.save_doc(doc).expect("Failed to seed document");
        }
        db
    }

    /// Registers a `by_field` view on `db` under design `app` that emits
    /// `(doc[field], null)` for documents that have the field.
    pub fn define_by_field(&self, db: &str, view: &str, field: &'static str) {
        self.couch.define_view(db, "app", view, move |doc: &Wire| {
            doc.get(field)
                .map(|key| vec![(key.clone(), Wire::Null)])
                .unwrap_or_default()
        });
    }
}

impl Default for TestCouch {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test against a fresh in-memory server.
///
/// # Example
///
/// ```rust,ignore
/// use settee_testkit::with_couch;
///
/// #[test]
/// fn my_test() {
///     with_couch(|couch| {
///         let db = couch.create_db("albums");
///         // ... test operations
///     });
/// }
/// ```
pub fn with_couch<F, R>(f: F) -> R
where
    F: FnOnce(&TestCouch) -> R,
{
    let couch = TestCouch::new();
    f(&couch)
}
