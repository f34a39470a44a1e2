//! # Settee JSON
//!
//! JSON value model and response normalization for the settee client.
//!
//! The wire model is [`serde_json::Value`]. Responses are normalized into
//! [`Value`] trees whose objects are [`Document`]s, and query rows are
//! dispatched on their [`RowShape`] into typed [`Row`]s. Documents convert
//! to and from `serde` types with [`to_document`] and [`from_document`].
//!
//! ## Usage
//!
//! ```
//! use settee_json::{decode, normalize_response, Normalized, Value};
//!
//! let raw = decode(br#"{"id":"a","key":"a","value":null}"#).unwrap();
//! match normalize_response(&raw) {
//!     Normalized::Row(row) => assert_eq!(row.value, Value::Null),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod normalize;
mod typed;
mod value;

pub use error::{JsonError, JsonResult};
pub use normalize::{
    decode, denormalize, denormalize_document, encode, expect_document, normalize,
    normalize_response, Normalized, Row, RowShape,
};
pub use typed::{from_document, to_document};
pub use value::{Document, Value};

/// Re-export of the wire value model.
pub use serde_json::Value as Wire;
