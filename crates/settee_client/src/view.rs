//! View queries.
//!
//! Options are passed to the server as query parameters without checking
//! their meaning; the server validates them. Rows are normalized through
//! [`settee_json::Row`]. Keys asked for with `keys=` that have no row come
//! back as [`ViewRow::Missing`].

use crate::database::Database;
use crate::error::{CouchError, CouchResult};
use crate::path;
use crate::server::{decode_body, malformed};
use crate::transport::{Method, Request};
use settee_json::{normalize, Row, Value, Wire};

/// Ordered view query options.
///
/// Key-like options are JSON-encoded, as the server expects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewOptions {
    params: Vec<(String, String)>,
}

impl ViewOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an option verbatim, replacing an earlier value of the same name.
    pub fn raw(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    fn json(self, name: &str, value: &Wire) -> Self {
        self.raw(name, value.to_string())
    }

    /// `key=`
    pub fn key(self, key: &Wire) -> Self {
        self.json("key", key)
    }

    /// `keys=`
    pub fn keys(self, keys: &[Wire]) -> Self {
        self.json("keys", &Wire::Array(keys.to_vec()))
    }

    /// `startkey=`
    pub fn start_key(self, key: &Wire) -> Self {
        self.json("startkey", key)
    }

    /// `endkey=`
    pub fn end_key(self, key: &Wire) -> Self {
        self.json("endkey", key)
    }

    /// `limit=`
    pub fn limit(self, limit: u64) -> Self {
        self.raw("limit", limit.to_string())
    }

    /// `skip=`
    pub fn skip(self, skip: u64) -> Self {
        self.raw("skip", skip.to_string())
    }

    /// `descending=true`
    pub fn descending(self) -> Self {
        self.raw("descending", "true")
    }

    /// `group=true`
    pub fn group(self) -> Self {
        self.raw("group", "true")
    }

    /// `group_level=`
    pub fn group_level(self, level: u32) -> Self {
        self.raw("group_level", level.to_string())
    }

    /// `reduce=`
    pub fn reduce(self, reduce: bool) -> Self {
        self.raw("reduce", reduce.to_string())
    }

    /// `include_docs=true`
    pub fn include_docs(self) -> Self {
        self.raw("include_docs", "true")
    }

    /// `stale=ok`
    pub fn stale_ok(self) -> Self {
        self.raw("stale", "ok")
    }

    /// Looks up an option.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Options in the order they were set.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    fn apply(&self, mut request: Request) -> Request {
        request.query.extend(self.params.iter().cloned());
        request
    }
}

/// A view to query: design document, view name and options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewQuery {
    /// Design document name, without the `_design/` prefix.
    pub design: String,
    /// View name.
    pub view: String,
    /// Query options.
    pub options: ViewOptions,
}

impl ViewQuery {
    /// Creates a query with no options.
    pub fn new(design: impl Into<String>, view: impl Into<String>) -> Self {
        Self {
            design: design.into(),
            view: view.into(),
            options: ViewOptions::default(),
        }
    }

    /// Replaces the options.
    pub fn with_options(mut self, options: ViewOptions) -> Self {
        self.options = options;
        self
    }
}

/// One entry of a view or `_all_docs` response.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewRow {
    /// A row from the index.
    Found(Row),
    /// A requested key with no row, sent as `{"key": .., "error": ..}`.
    Missing {
        /// The requested key.
        key: Value,
        /// Error tag, e.g. `not_found`.
        error: String,
    },
}

impl ViewRow {
    fn from_wire(raw: &Wire) -> CouchResult<Self> {
        let error = raw.get("error").and_then(Wire::as_str);
        match (raw.get("key"), error, raw.get("value")) {
            (Some(key), Some(error), None) => Ok(ViewRow::Missing {
                key: normalize(key),
                error: error.to_string(),
            }),
            _ => Row::from_wire(raw).map(ViewRow::Found).map_err(malformed),
        }
    }

    /// Returns the row, or `None` for a missing key.
    pub fn into_row(self) -> Option<Row> {
        match self {
            ViewRow::Found(row) => Some(row),
            ViewRow::Missing { .. } => None,
        }
    }
}

/// A view response: the envelope plus rows, normalized on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewResult {
    /// `total_rows`, absent for reduce queries.
    pub total_rows: Option<u64>,
    /// `offset`, absent for reduce queries.
    pub offset: Option<u64>,
    rows: Vec<Wire>,
}

impl ViewResult {
    fn from_wire(body: Wire) -> CouchResult<Self> {
        let Wire::Object(mut envelope) = body else {
            return Err(CouchError::malformed("view response is not an object"));
        };
        let rows = match envelope.remove("rows") {
            Some(Wire::Array(rows)) => rows,
            _ => return Err(CouchError::malformed("view response without rows")),
        };
        Ok(Self {
            total_rows: envelope.get("total_rows").and_then(Wire::as_u64),
            offset: envelope.get("offset").and_then(Wire::as_u64),
            rows,
        })
    }

    /// Number of entries, missing keys included.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates over every entry in order, normalizing each as it is reached.
    pub fn entries(&self) -> impl Iterator<Item = CouchResult<ViewRow>> + '_ {
        self.rows.iter().map(ViewRow::from_wire)
    }

    /// Iterates over found rows, skipping missing keys.
    pub fn rows(&self) -> impl Iterator<Item = CouchResult<Row>> + '_ {
        self.entries()
            .filter_map(|entry| entry.map(ViewRow::into_row).transpose())
    }

    /// Normalizes every entry, failing on the first malformed one.
    pub fn into_entries(self) -> CouchResult<Vec<ViewRow>> {
        self.entries().collect()
    }

    /// Normalizes every found row, failing on the first malformed one.
    pub fn into_rows(self) -> CouchResult<Vec<Row>> {
        self.rows().collect()
    }
}

impl Database {
    /// `GET /{db}/_design/{design}/_view/{view}?{options}`
    pub fn fetch_view(&self, query: &ViewQuery) -> CouchResult<ViewResult> {
        let request = self.request(
            Method::Get,
            path::view_path(self.name(), &query.design, &query.view),
        );
        self.query_rows(query.options.apply(request))
    }

    /// Fetches a view and returns every found row's normalized value.
    pub fn fetch_view_values(&self, query: &ViewQuery) -> CouchResult<Vec<Value>> {
        Ok(self
            .fetch_view(query)?
            .into_rows()?
            .into_iter()
            .map(|row| row.value)
            .collect())
    }

    /// Fetches a view with `include_docs=true`, whatever the options say.
    pub fn fetch_view_docs(&self, query: &ViewQuery) -> CouchResult<Vec<Row>> {
        let query = query
            .clone()
            .with_options(query.options.clone().include_docs());
        self.fetch_view(&query)?.into_rows()
    }

    /// `GET /{db}/_all_docs?{options}`
    pub fn all_docs(&self, options: &ViewOptions) -> CouchResult<ViewResult> {
        let request = self.request(Method::Get, path::endpoint_path(self.name(), "_all_docs"));
        self.query_rows(options.apply(request))
    }

    fn query_rows(&self, request: Request) -> CouchResult<ViewResult> {
        let response = self.execute(request)?;
        ViewResult::from_wire(decode_body(&response)?)
    }
}
