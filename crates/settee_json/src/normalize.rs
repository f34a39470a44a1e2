//! Conversion between wire JSON and normalized values.
//!
//! The server answers structurally different JSON for similar endpoints.
//! Query rows come in four shapes (see [`RowShape`]); everything else is
//! handled by one default handler that flattens key/value pairs into a
//! [`Document`] and keeps anything without pairs as a plain [`Value`].

use crate::error::{JsonError, JsonResult};
use crate::value::{Document, Value};
use serde_json::{Map, Number, Value as Wire};

/// Encodes a wire value to bytes.
pub fn encode(value: &Wire) -> JsonResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| JsonError::encode(e.to_string()))
}

/// Decodes bytes into a wire value.
pub fn decode(bytes: &[u8]) -> JsonResult<Wire> {
    serde_json::from_slice(bytes).map_err(|e| JsonError::decode(e.to_string()))
}

/// Converts a wire value into its normalized form.
///
/// Objects become [`Document`]s and lists recurse element by element.
pub fn normalize(raw: &Wire) -> Value {
    match raw {
        Wire::Null => Value::Null,
        Wire::Bool(b) => Value::Bool(*b),
        Wire::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or_default()),
        },
        Wire::String(s) => Value::Text(s.clone()),
        Wire::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Wire::Object(map) => Value::Object(normalize_object(map)),
    }
}

/// Converts a normalized value back to the wire model.
///
/// Non-finite floats have no JSON form and become `null`.
pub fn denormalize(value: &Value) -> Wire {
    match value {
        Value::Null => Wire::Null,
        Value::Bool(b) => Wire::Bool(*b),
        Value::Integer(i) => Wire::Number(Number::from(*i)),
        Value::Float(f) => Number::from_f64(*f).map_or(Wire::Null, Wire::Number),
        Value::Text(s) => Wire::String(s.clone()),
        Value::Array(items) => Wire::Array(items.iter().map(denormalize).collect()),
        Value::Object(doc) => Wire::Object(denormalize_document(doc)),
    }
}

/// Converts a document back to a wire object.
pub fn denormalize_document(doc: &Document) -> Map<String, Wire> {
    doc.iter()
        .map(|(k, v)| (k.clone(), denormalize(v)))
        .collect()
}

fn normalize_object(map: &Map<String, Wire>) -> Document {
    map.iter().map(|(k, v)| (k.clone(), normalize(v))).collect()
}

/// The row shapes returned by view and changes endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    /// `{id, key, value}` with a non-null value.
    Value,
    /// `{id, key, value, doc}` with a non-null value.
    ValueWithDoc,
    /// `{id, key, value: null}`.
    NullValue,
    /// `{id, key, value: null, doc}`.
    NullValueWithDoc,
}

impl RowShape {
    /// Classifies a wire value, returning `None` if it is not a query row.
    ///
    /// A row is an object with `key` and `value` members and an optional
    /// string `id` (reduce rows carry no id). A `doc` member must be an
    /// object or `null`; `null` counts as absent.
    pub fn classify(raw: &Wire) -> Option<Self> {
        let obj = raw.as_object()?;
        let value = obj.get("value")?;
        if !obj.contains_key("key") {
            return None;
        }
        if obj.get("id").is_some_and(|id| !id.is_string()) {
            return None;
        }
        let has_doc = match obj.get("doc") {
            None | Some(Wire::Null) => false,
            Some(Wire::Object(_)) => true,
            Some(_) => return None,
        };
        Some(match (value.is_null(), has_doc) {
            (false, false) => RowShape::Value,
            (false, true) => RowShape::ValueWithDoc,
            (true, false) => RowShape::NullValue,
            (true, true) => RowShape::NullValueWithDoc,
        })
    }

    /// Returns true if rows of this shape carry an included document.
    pub fn has_doc(self) -> bool {
        matches!(self, RowShape::ValueWithDoc | RowShape::NullValueWithDoc)
    }
}

/// A query result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Id of the document that emitted the row. Absent for reduce rows.
    pub id: Option<String>,
    /// Row key.
    pub key: Value,
    /// Row value, possibly `Null`.
    pub value: Value,
    /// Included document, present only when document inclusion was requested.
    pub doc: Option<Document>,
}

impl Row {
    /// Parses a wire row, dispatching on its shape.
    pub fn from_wire(raw: &Wire) -> JsonResult<Self> {
        let shape = RowShape::classify(raw)
            .ok_or_else(|| JsonError::unexpected_shape("a {id, key, value[, doc]} row"))?;
        // classify() guarantees an object with key and value
        let obj = raw
            .as_object()
            .ok_or_else(|| JsonError::unexpected_shape("an object row"))?;
        let id = obj.get("id").and_then(Wire::as_str).map(str::to_string);
        let key = obj.get("key").map_or(Value::Null, normalize);

        let value = match shape {
            RowShape::Value | RowShape::ValueWithDoc => {
                obj.get("value").map_or(Value::Null, normalize)
            }
            RowShape::NullValue | RowShape::NullValueWithDoc => Value::Null,
        };
        let doc = match shape {
            RowShape::ValueWithDoc | RowShape::NullValueWithDoc => obj
                .get("doc")
                .and_then(Wire::as_object)
                .map(normalize_object),
            RowShape::Value | RowShape::NullValue => None,
        };

        Ok(Self { id, key, value, doc })
    }

    /// Converts the row back to its wire form.
    pub fn to_wire(&self) -> Wire {
        let mut obj = Map::new();
        if let Some(id) = &self.id {
            obj.insert("id".into(), Wire::String(id.clone()));
        }
        obj.insert("key".into(), denormalize(&self.key));
        obj.insert("value".into(), denormalize(&self.value));
        if let Some(doc) = &self.doc {
            obj.insert("doc".into(), Wire::Object(denormalize_document(doc)));
        }
        Wire::Object(obj)
    }

    /// The shape this row would be serialized with.
    pub fn shape(&self) -> RowShape {
        match (self.value.is_null(), self.doc.is_some()) {
            (false, false) => RowShape::Value,
            (false, true) => RowShape::ValueWithDoc,
            (true, false) => RowShape::NullValue,
            (true, true) => RowShape::NullValueWithDoc,
        }
    }
}

/// Result of normalizing an arbitrary server response.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// A query row.
    Row(Row),
    /// Flattened key/value pairs of an object or of a list of pairs.
    Fields(Document),
    /// Well-formed JSON with no key/value pairs of its own.
    Other(Value),
}

impl Normalized {
    /// Returns the flattened fields, if this is not a row or bare value.
    pub fn into_fields(self) -> Option<Document> {
        match self {
            Normalized::Fields(doc) => Some(doc),
            _ => None,
        }
    }
}

/// Normalizes any server response without failing.
pub fn normalize_response(raw: &Wire) -> Normalized {
    if RowShape::classify(raw).is_some() {
        if let Ok(row) = Row::from_wire(raw) {
            return Normalized::Row(row);
        }
    }
    match raw {
        Wire::Object(map) => Normalized::Fields(normalize_object(map)),
        Wire::Array(items) => match flatten_pairs(items) {
            Some(doc) => Normalized::Fields(doc),
            None => Normalized::Other(normalize(raw)),
        },
        _ => Normalized::Other(normalize(raw)),
    }
}

/// Flattens `[[k, v], ...]` into a document. Returns `None` unless every
/// element is a two-element list with a string key.
fn flatten_pairs(items: &[Wire]) -> Option<Document> {
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|item| match item.as_array().map(Vec::as_slice) {
            Some([Wire::String(k), v]) => Some((k.clone(), normalize(v))),
            _ => None,
        })
        .collect()
}

/// Normalizes a response that must be an object.
pub fn expect_document(raw: &Wire) -> JsonResult<Document> {
    raw.as_object()
        .map(normalize_object)
        .ok_or_else(|| JsonError::unexpected_shape("a JSON object"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_lists_of_objects_recurse() {
        let raw = json!({"items": [{"a": 1}, {"b": [true, null, 2.5]}]});
        let value = normalize(&raw);
        let items = value.get("items").and_then(Value::as_array).unwrap();
        assert_eq!(items[0].get("a"), Some(&Value::Integer(1)));
        assert_eq!(
            items[1].get("b"),
            Some(&Value::Array(vec![
                Value::Bool(true),
                Value::Null,
                Value::Float(2.5)
            ]))
        );
        assert_eq!(denormalize(&value), raw);
    }

    #[test]
    fn large_unsigned_becomes_float() {
        let raw = json!(u64::MAX);
        assert!(matches!(normalize(&raw), Value::Float(_)));
    }

    #[test]
    fn non_finite_float_denormalizes_to_null() {
        assert_eq!(denormalize(&Value::Float(f64::NAN)), Wire::Null);
    }

    #[test]
    fn classify_row_shapes() {
        let cases = [
            (json!({"id": "a", "key": "k", "value": {"n": 1}}), RowShape::Value),
            (
                json!({"id": "a", "key": "k", "value": {"n": 1}, "doc": {"_id": "a"}}),
                RowShape::ValueWithDoc,
            ),
            (json!({"id": "a", "key": "k", "value": null}), RowShape::NullValue),
            (
                json!({"id": "a", "key": "k", "value": null, "doc": {"_id": "a"}}),
                RowShape::NullValueWithDoc,
            ),
        ];
        for (raw, expected) in cases {
            assert_eq!(RowShape::classify(&raw), Some(expected), "{raw}");
        }
    }

    #[test]
    fn reduce_row_without_id_is_a_row() {
        let raw = json!({"key": null, "value": 42});
        assert_eq!(RowShape::classify(&raw), Some(RowShape::Value));
        let row = Row::from_wire(&raw).unwrap();
        assert_eq!(row.id, None);
        assert_eq!(row.value, Value::Integer(42));
    }

    #[test]
    fn null_doc_counts_as_absent() {
        let raw = json!({"id": "a", "key": "a", "value": {"rev": "1-x"}, "doc": null});
        assert_eq!(RowShape::classify(&raw), Some(RowShape::Value));
        assert_eq!(Row::from_wire(&raw).unwrap().doc, None);
    }

    #[test]
    fn non_rows_are_not_classified() {
        assert_eq!(RowShape::classify(&json!({"key": "x", "error": "not_found"})), None);
        assert_eq!(RowShape::classify(&json!({"id": 3, "key": 1, "value": 1})), None);
        assert_eq!(RowShape::classify(&json!({"key": 1, "value": 1, "doc": 5})), None);
        assert_eq!(RowShape::classify(&json!([1, 2])), None);
    }

    #[test]
    fn row_with_doc_recurses_into_both() {
        let raw = json!({
            "id": "a", "key": ["x", 1],
            "value": {"tags": [{"t": "red"}]},
            "doc": {"_id": "a", "_rev": "1-x", "nested": {"deep": true}}
        });
        let row = Row::from_wire(&raw).unwrap();
        assert_eq!(row.id.as_deref(), Some("a"));
        let doc = row.doc.as_ref().unwrap();
        assert_eq!(doc.rev(), Some("1-x"));
        assert_eq!(
            doc.get("nested").and_then(|n| n.get("deep")),
            Some(&Value::Bool(true))
        );
        assert_eq!(row.to_wire(), raw);
    }

    #[test]
    fn default_handler_flattens_objects() {
        let raw = json!({"error": "not_found", "reason": "missing"});
        let doc = normalize_response(&raw).into_fields().unwrap();
        assert_eq!(doc.get("reason"), Some(&Value::from("missing")));
    }

    #[test]
    fn default_handler_flattens_pair_lists() {
        let raw = json!([["couchdb", "Welcome"], ["version", "3.3.3"]]);
        let doc = normalize_response(&raw).into_fields().unwrap();
        assert_eq!(doc.get("version"), Some(&Value::from("3.3.3")));
    }

    #[test]
    fn default_handler_keeps_everything_else() {
        let raw = json!(["_users", "db1"]);
        assert_eq!(
            normalize_response(&raw),
            Normalized::Other(Value::from(vec!["_users", "db1"]))
        );
        assert_eq!(normalize_response(&json!(7)), Normalized::Other(Value::Integer(7)));
        assert_eq!(normalize_response(&json!([])), Normalized::Other(Value::Array(vec![])));
    }

    #[test]
    fn expect_document_rejects_lists() {
        assert!(expect_document(&json!({"ok": true})).is_ok());
        assert!(matches!(
            expect_document(&json!([1])),
            Err(JsonError::UnexpectedShape { .. })
        ));
    }

    #[test]
    fn decode_errors_are_reported() {
        assert!(matches!(decode(b"{not json"), Err(JsonError::Decode { .. })));
        assert_eq!(decode(b"{\"a\":1}").unwrap(), json!({"a": 1}));
        assert_eq!(encode(&json!({"a": 1})).unwrap(), b"{\"a\":1}".to_vec());
    }
}
