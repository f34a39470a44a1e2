//! Property-based test generators using proptest.
//!
//! Values produced here survive a trip through JSON text unchanged:
//! floats are multiples of 1/8, so no precision is lost.

use proptest::prelude::*;
use settee_json::{Document, Row, Value};

/// Strategy for database names the server accepts.
pub fn db_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for ordinary document ids.
pub fn doc_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for user field names (no leading underscore).
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,9}").expect("Invalid regex")
}

/// Strategy for scalar values.
pub fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1_000_000i32..1_000_000).prop_map(|n| Value::Float(f64::from(n) / 8.0 + 0.125)),
        "[ -~]{0,16}".prop_map(Value::Text),
    ]
}

/// Strategy for nested values: lists and objects of leaves, a few levels deep.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    leaf_strategy().prop_recursive(3, 32, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
            prop::collection::btree_map(field_name_strategy(), inner, 0..5)
                .prop_map(|fields| Value::Object(fields.into_iter().collect())),
        ]
    })
}

/// Strategy for documents without `_id` or `_rev`.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::btree_map(field_name_strategy(), value_strategy(), 0..6)
        .prop_map(|fields| fields.into_iter().collect())
}

/// Strategy covering the four view-row shapes.
pub fn row_strategy() -> impl Strategy<Value = Row> {
    (
        doc_id_strategy(),
        value_strategy(),
        prop_oneof![Just(Value::Null), value_strategy()],
        prop::option::of(document_strategy()),
    )
        .prop_map(|(id, key, value, doc)| Row {
            id: Some(id),
            key,
            value,
            doc,
        })
}
