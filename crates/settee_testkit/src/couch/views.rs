//! Key collation and row selection for views and `_all_docs`.

use super::store::Fail;
use settee_json::Wire;
use std::cmp::Ordering;
use std::sync::Arc;

/// A map function: takes a document as `GET` returns it and emits
/// `(key, value)` pairs.
pub type MapFn = Arc<dyn Fn(&Wire) -> Vec<(Wire, Wire)> + Send + Sync>;

fn rank(value: &Wire) -> u8 {
    match value {
        Wire::Null => 0,
        Wire::Bool(false) => 1,
        Wire::Bool(true) => 2,
        Wire::Number(_) => 3,
        Wire::String(_) => 4,
        Wire::Array(_) => 5,
        Wire::Object(_) => 6,
    }
}

/// Orders keys the way view indexes do: null, false, true, numbers,
/// strings, arrays, objects. Strings compare by code point.
pub fn collate(a: &Wire, b: &Wire) -> Ordering {
    match (a, b) {
        (Wire::Number(x), Wire::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Wire::String(x), Wire::String(y)) => x.cmp(y),
        (Wire::Array(x), Wire::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(x, y)| collate(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Wire::Object(x), Wire::Object(y)) => x
            .iter()
            .zip(y)
            .map(|((kx, vx), (ky, vy))| kx.cmp(ky).then_with(|| collate(vx, vy)))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// A row before selection.
#[derive(Debug, Clone)]
pub(crate) struct IndexRow {
    pub id: String,
    pub key: Wire,
    pub value: Wire,
    pub doc: Option<Wire>,
}

impl IndexRow {
    pub fn to_wire(&self) -> Wire {
        let mut row = serde_json::json!({"id": self.id, "key": self.key, "value": self.value});
        if let Some(doc) = &self.doc {
            row["doc"] = doc.clone();
        }
        row
    }
}

/// Query parameters understood by the index.
#[derive(Debug, Default)]
pub(crate) struct Selection {
    key: Option<Wire>,
    keys: Option<Vec<Wire>>,
    start: Option<Wire>,
    end: Option<Wire>,
    inclusive_end: bool,
    descending: bool,
    skip: usize,
    limit: Option<usize>,
    pub include_docs: bool,
}

fn json_param(name: &str, raw: &str) -> Result<Wire, Fail> {
    serde_json::from_str(raw).map_err(|_| Fail::bad_request(format!("invalid JSON for {name}")))
}

fn bool_param(name: &str, raw: &str) -> Result<bool, Fail> {
    raw.parse()
        .map_err(|_| Fail::bad_request(format!("invalid value for {name}")))
}

fn count_param(name: &str, raw: &str) -> Result<usize, Fail> {
    raw.parse()
        .map_err(|_| Fail::bad_request(format!("invalid value for {name}")))
}

impl Selection {
    pub fn from_query(query: &[(String, String)]) -> Result<Self, Fail> {
        let mut selection = Selection {
            inclusive_end: true,
            ..Selection::default()
        };
        for (name, raw) in query {
            match name.as_str() {
                "key" => selection.key = Some(json_param(name, raw)?),
                "keys" => match json_param(name, raw)? {
                    Wire::Array(keys) => selection.keys = Some(keys),
                    _ => return Err(Fail::bad_request("keys must be an array")),
                },
                "startkey" | "start_key" => selection.start = Some(json_param(name, raw)?),
                "endkey" | "end_key" => selection.end = Some(json_param(name, raw)?),
                "inclusive_end" => selection.inclusive_end = bool_param(name, raw)?,
                "descending" => selection.descending = bool_param(name, raw)?,
                "include_docs" => selection.include_docs = bool_param(name, raw)?,
                "skip" => selection.skip = count_param(name, raw)?,
                "limit" => selection.limit = Some(count_param(name, raw)?),
                _ => {}
            }
        }
        Ok(selection)
    }

    /// Keys requested with `keys=`, in request order.
    pub fn keys(&self) -> Option<&[Wire]> {
        self.keys.as_deref()
    }

    fn in_range(&self, key: &Wire) -> bool {
        let flip = |o: Ordering| if self.descending { o.reverse() } else { o };
        let after_start = self
            .start
            .as_ref()
            .map_or(true, |start| flip(collate(key, start)).is_ge());
        let before_end = self.end.as_ref().map_or(true, |end| {
            let o = flip(collate(key, end));
            if self.inclusive_end {
                o.is_le()
            } else {
                o.is_lt()
            }
        });
        after_start && before_end
    }

    fn matches(&self, key: &Wire) -> bool {
        match (&self.keys, &self.key) {
            (Some(keys), _) => keys.iter().any(|k| collate(key, k).is_eq()),
            (None, Some(k)) => collate(key, k).is_eq(),
            (None, None) => self.in_range(key),
        }
    }

    /// Sorts, filters and pages `rows`. Returns `(total_rows, offset, rows)`.
    pub fn apply(&self, mut rows: Vec<IndexRow>) -> (usize, usize, Vec<IndexRow>) {
        let total = rows.len();
        rows.sort_by(|a, b| collate(&a.key, &b.key).then_with(|| a.id.cmp(&b.id)));
        if self.descending {
            rows.reverse();
        }

        let first = rows
            .iter()
            .position(|row| self.matches(&row.key))
            .unwrap_or(total);
        let selected: Vec<IndexRow> = match (&self.keys, &self.key) {
            (Some(keys), _) => keys
                .iter()
                .flat_map(|k| rows.iter().filter(move |row| collate(&row.key, k).is_eq()))
                .cloned()
                .collect(),
            (None, _) => rows.into_iter().filter(|row| self.matches(&row.key)).collect(),
        };
        let limit = self.limit.unwrap_or(usize::MAX);
        let page = selected.into_iter().skip(self.skip).take(limit).collect();
        (total, (first + self.skip).min(total), page)
    }
}
