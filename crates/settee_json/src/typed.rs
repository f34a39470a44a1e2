//! Conversion between documents and `serde` types.

use crate::error::{JsonError, JsonResult};
use crate::normalize::{denormalize_document, expect_document};
use crate::value::Document;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes a value into a document. The value must serialize to a
/// JSON object.
pub fn to_document<T: Serialize>(value: &T) -> JsonResult<Document> {
    let wire = serde_json::to_value(value).map_err(|e| JsonError::encode(e.to_string()))?;
    expect_document(&wire)
}

/// Deserializes a document into a value. `_id` and `_rev` are visible to
/// the target type like any other field.
pub fn from_document<T: DeserializeOwned>(doc: &Document) -> JsonResult<T> {
    let wire = serde_json::Value::Object(denormalize_document(doc));
    serde_json::from_value(wire).map_err(|e| JsonError::decode(e.to_string()))
}
