//! Normalized document values.

use std::collections::btree_map::{self, BTreeMap};

/// A normalized JSON value.
///
/// Leaves are typed (integers and floats are kept apart) and objects are
/// [`Document`]s, so key order coming off the wire never affects equality.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer that fits in an `i64`.
    Integer(i64),
    /// Any other number.
    Float(f64),
    /// Text string.
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Object.
    Object(Document),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float. Integers are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Get this value as a string, if it is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as an object, if it is one.
    pub fn as_object(&self) -> Option<&Document> {
        match self {
            Value::Object(doc) => Some(doc),
            _ => None,
        }
    }

    /// Look up a key in this object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|doc| doc.get(key))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

/// A normalized document: a string-keyed mapping of values.
///
/// Two keys are reserved by the server: `_id` (the document id) and `_rev`
/// (the opaque revision token issued on every successful write).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    /// Reserved key holding the document id.
    pub const ID: &'static str = "_id";
    /// Reserved key holding the revision token.
    pub const REV: &'static str = "_rev";

    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty document with the given id.
    pub fn with_id(id: impl Into<String>) -> Self {
        let mut doc = Self::new();
        doc.set_id(id);
        doc
    }

    /// Returns the document id, if set and textual.
    pub fn id(&self) -> Option<&str> {
        self.get(Self::ID).and_then(Value::as_text)
    }

    /// Returns the revision token, if set and textual.
    pub fn rev(&self) -> Option<&str> {
        self.get(Self::REV).and_then(Value::as_text)
    }

    /// Sets the document id.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.insert(Self::ID, Value::Text(id.into()));
    }

    /// Sets the revision token.
    pub fn set_rev(&mut self, rev: impl Into<String>) {
        self.insert(Self::REV, Value::Text(rev.into()));
    }

    /// Builder-style field insertion.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Looks up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Returns true if the field is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Number of fields, reserved keys included.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over fields in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.fields.iter()
    }

    /// Returns a copy without `_rev`, for comparing content across writes.
    pub fn without_rev(&self) -> Self {
        let mut doc = self.clone();
        doc.remove(Self::REV);
        doc
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
