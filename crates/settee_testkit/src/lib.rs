//! # Settee Testkit
//!
//! Test utilities for settee.
//!
//! This crate provides:
//! - [`MemoryCouch`], an in-memory CouchDB-style server implementing the
//!   client's `Transport`
//! - Fixtures pairing that server with a client
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use settee_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_server() {
//!     with_couch(|couch| {
//!         let db = couch.seeded_db("albums", 3);
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod couch;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::couch::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use couch::{collate, MapFn, MemoryCouch};
pub use fixtures::*;
pub use generators::*;
