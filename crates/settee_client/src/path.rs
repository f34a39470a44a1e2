//! Request path and query-string construction.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left alone in path segments and query components (RFC 3986 unreserved).
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Prefixes whose slash is part of the path, not of the id.
const PREFIXED_IDS: [&str; 2] = ["_design/", "_local/"];

/// Percent-encodes one path segment. Slashes are encoded.
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, UNRESERVED).to_string()
}

/// `/{db}`
pub fn db_path(db: &str) -> String {
    format!("/{}", encode_segment(db))
}

/// `/{db}/{id}`, keeping the slash of `_design/` and `_local/` ids.
pub fn doc_path(db: &str, id: &str) -> String {
    for prefix in PREFIXED_IDS {
        if let Some(rest) = id.strip_prefix(prefix) {
            return format!("{}/{}{}", db_path(db), prefix, encode_segment(rest));
        }
    }
    format!("{}/{}", db_path(db), encode_segment(id))
}

/// `/{db}/{id}/{attachment}`
pub fn attachment_path(db: &str, id: &str, name: &str) -> String {
    format!("{}/{}", doc_path(db, id), encode_segment(name))
}

/// `/{db}/_design/{design}/_view/{view}`
pub fn view_path(db: &str, design: &str, view: &str) -> String {
    format!(
        "{}/_design/{}/_view/{}",
        db_path(db),
        encode_segment(design),
        encode_segment(view)
    )
}

/// `/{db}/{endpoint}` for underscore endpoints such as `_changes`.
pub fn endpoint_path(db: &str, endpoint: &str) -> String {
    format!("{}/{}", db_path(db), endpoint)
}

/// Encodes query parameters as `name=value&...`.
pub fn encode_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, UNRESERVED).to_string()
}
