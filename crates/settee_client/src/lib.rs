//! # Settee Client
//!
//! Typed client for CouchDB-style document databases.
//!
//! This crate provides:
//! - Server and database handles with per-database credential overrides
//! - Document CRUD, bulk writes and attachments
//! - Revision resolution for writes that omit a revision
//! - View queries with normalized rows
//! - A cancellable changes feed, pull-based or on a background thread
//! - Server-driven replication
//!
//! ## Architecture
//!
//! The client only builds requests and interprets responses. Bytes move
//! through a [`Transport`], which the caller provides; an in-memory server
//! for tests lives in `settee_testkit`.
//!
//! ```rust,ignore
//! use settee_client::{Server, ServerConfig};
//! use settee_json::Document;
//!
//! let server = Server::new(ServerConfig::default(), my_transport);
//! let db = server.create_db("albums")?;
//! let saved = db.save_doc(Document::new().field("title", "Blue Train"))?;
//! let doc = db.open_doc(saved.id().unwrap_or_default(), None)?;
//! ```
//!
//! ## Key Invariants
//!
//! - Handles are immutable; creating one sends nothing
//! - A missing revision costs one extra lookup request before the write
//! - Nothing is retried automatically
//! - A malformed changes chunk is an event, not the end of the feed

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attachment;
mod auth;
mod changes;
mod config;
mod database;
mod document;
mod error;
mod path;
mod replicate;
mod revision;
mod server;
mod transport;
mod view;

pub use attachment::Attachment;
pub use auth::basic_auth_header;
pub use changes::{
    CancelHandle, Change, ChangeDecoder, ChangeEvent, ChangesFeed, ChangesOptions, FeedMode,
    FeedState, Seq,
};
pub use config::{Credentials, DbOptions, ServerConfig, DEFAULT_SERVER_URL, DEFAULT_TIMEOUT};
pub use database::{Database, DbInfo, DeleteOutcome};
pub use document::{BulkResult, DocUpdate};
pub use error::{CouchError, CouchResult, TransportError};
pub use replicate::{ReplicationRequest, ReplicationResult, ReplicationSummary};
pub use server::Server;
pub use transport::{
    ChunkStream, Method, MockTransport, Request, Response, ScriptedStream, StreamCloser,
    Transport,
};
pub use view::{ViewOptions, ViewQuery, ViewResult, ViewRow};
