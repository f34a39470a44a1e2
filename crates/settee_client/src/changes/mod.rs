//! The changes feed.
//!
//! A feed is an ordered sequence of [`ChangeEvent`]s read from
//! `GET /{db}/_changes`. In continuous mode the connection stays open and
//! events are decoded line by line as bytes arrive; otherwise the single
//! response body is decoded at once. Either way the caller sees the same
//! [`ChangesFeed`] iterator.
//!
//! ```rust,ignore
//! let mut feed = db.follow(ChangesOptions::continuous().heartbeat(Duration::from_secs(10)))?;
//! let cancel = feed.cancel_handle();
//! for event in &mut feed {
//!     match event {
//!         ChangeEvent::Change(change) => println!("{} -> {:?}", change.id, change.changes),
//!         ChangeEvent::Done { last_seq } => println!("caught up at {last_seq}"),
//!         ChangeEvent::Error(reason) => eprintln!("skipping bad chunk: {reason}"),
//!     }
//! }
//! ```

mod decoder;
mod feed;

pub use decoder::ChangeDecoder;
pub use feed::{CancelHandle, ChangesFeed, FeedState};

use settee_json::{expect_document, Document, JsonError, JsonResult, Wire};
use std::fmt;
use std::time::Duration;

/// An update sequence token.
///
/// Older servers use integers, newer ones opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Seq {
    /// Integer sequence.
    Number(u64),
    /// Opaque sequence token.
    Opaque(String),
}

impl Seq {
    /// Reads a sequence from the wire. Anything that is neither an integer
    /// nor a string is kept as its JSON text.
    pub fn from_wire(raw: &Wire) -> Self {
        match raw {
            Wire::Number(n) if n.is_u64() => Seq::Number(n.as_u64().unwrap_or_default()),
            Wire::String(s) => Seq::Opaque(s.clone()),
            other => Seq::Opaque(other.to_string()),
        }
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seq::Number(n) => write!(f, "{n}"),
            Seq::Opaque(s) => f.write_str(s),
        }
    }
}

impl From<u64> for Seq {
    fn from(n: u64) -> Self {
        Seq::Number(n)
    }
}

impl From<&str> for Seq {
    fn from(s: &str) -> Self {
        Seq::Opaque(s.to_string())
    }
}

/// One document mutation reported by the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Sequence of the mutation.
    pub seq: Seq,
    /// Document id.
    pub id: String,
    /// Leaf revisions after the mutation.
    pub changes: Vec<String>,
    /// True if the document was deleted.
    pub deleted: bool,
    /// The document, when `include_docs` was requested.
    pub doc: Option<Document>,
}

impl Change {
    /// Parses one change row.
    pub fn from_wire(raw: &Wire) -> JsonResult<Self> {
        let shape = JsonError::unexpected_shape;
        let obj = raw.as_object().ok_or_else(|| shape("a change row object"))?;
        let seq = obj
            .get("seq")
            .map(Seq::from_wire)
            .ok_or_else(|| shape("a change row with seq"))?;
        let id = obj
            .get("id")
            .and_then(Wire::as_str)
            .ok_or_else(|| shape("a change row with a string id"))?
            .to_string();
        let changes = obj
            .get("changes")
            .and_then(Wire::as_array)
            .ok_or_else(|| shape("a change row with a changes list"))?
            .iter()
            .map(|c| c.get("rev").and_then(Wire::as_str).map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| shape("a rev in every changes entry"))?;
        let deleted = obj.get("deleted").and_then(Wire::as_bool).unwrap_or(false);
        let doc = match obj.get("doc") {
            None | Some(Wire::Null) => None,
            Some(doc) => Some(expect_document(doc)?),
        };
        Ok(Self {
            seq,
            id,
            changes,
            deleted,
            doc,
        })
    }
}

/// An event delivered by a [`ChangesFeed`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A document changed.
    Change(Change),
    /// The feed reached its end; carries the last sequence.
    Done {
        /// Last sequence sent by the server.
        last_seq: Seq,
    },
    /// A chunk could not be understood. The feed carries on.
    Error(String),
}

/// How the server should deliver the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedMode {
    /// Return what is there now.
    #[default]
    Normal,
    /// Wait for at least one change, then return.
    Longpoll,
    /// Keep the connection open and stream changes as they happen.
    Continuous,
}

impl FeedMode {
    fn as_str(self) -> &'static str {
        match self {
            FeedMode::Normal => "normal",
            FeedMode::Longpoll => "longpoll",
            FeedMode::Continuous => "continuous",
        }
    }
}

/// Options for `GET /{db}/_changes`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangesOptions {
    /// Delivery mode.
    pub feed: FeedMode,
    /// Start after this sequence.
    pub since: Option<Seq>,
    /// Maximum number of changes.
    pub limit: Option<u64>,
    /// Newest changes first.
    pub descending: bool,
    /// Include the documents.
    pub include_docs: bool,
    /// Heartbeat interval for continuous and longpoll feeds.
    pub heartbeat: Option<Duration>,
    /// Server-side timeout after which the feed ends.
    pub timeout: Option<Duration>,
    /// Filter function, as `design/filter`.
    pub filter: Option<String>,
    /// Report all leaf revisions (`style=all_docs`).
    pub all_revs: bool,
    extra: Vec<(String, String)>,
}

impl ChangesOptions {
    /// Options for a single poll.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a continuous feed.
    pub fn continuous() -> Self {
        Self {
            feed: FeedMode::Continuous,
            ..Self::default()
        }
    }

    /// Sets the feed mode.
    pub fn feed(mut self, feed: FeedMode) -> Self {
        self.feed = feed;
        self
    }

    /// Starts after `since`.
    pub fn since(mut self, since: impl Into<Seq>) -> Self {
        self.since = Some(since.into());
        self
    }

    /// Limits the number of changes.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Newest changes first.
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Includes documents in change rows.
    pub fn include_docs(mut self) -> Self {
        self.include_docs = true;
        self
    }

    /// Asks the server for heartbeats at this interval.
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    /// Asks the server to end the feed after this long without changes.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Applies a filter function.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Reports all leaf revisions.
    pub fn all_revs(mut self) -> Self {
        self.all_revs = true;
        self
    }

    /// Adds a parameter verbatim.
    pub fn raw(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((name.into(), value.into()));
        self
    }

    /// Query parameters for this feed.
    pub fn query(&self) -> Vec<(String, String)> {
        let mut params = vec![("feed".to_string(), self.feed.as_str().to_string())];
        let mut push = |name: &str, value: String| params.push((name.to_string(), value));
        if let Some(since) = &self.since {
            push("since", since.to_string());
        }
        if let Some(limit) = self.limit {
            push("limit", limit.to_string());
        }
        if self.descending {
            push("descending", "true".into());
        }
        if self.include_docs {
            push("include_docs", "true".into());
        }
        if let Some(heartbeat) = self.heartbeat {
            push("heartbeat", heartbeat.as_millis().to_string());
        }
        if let Some(timeout) = self.timeout {
            push("timeout", timeout.as_millis().to_string());
        }
        if let Some(filter) = &self.filter {
            push("filter", filter.clone());
        }
        if self.all_revs {
            push("style", "all_docs".into());
        }
        params.extend(self.extra.iter().cloned());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seq_from_wire() {
        assert_eq!(Seq::from_wire(&json!(12)), Seq::Number(12));
        assert_eq!(Seq::from_wire(&json!("3-g1AAAA")), Seq::Opaque("3-g1AAAA".into()));
        assert_eq!(Seq::from_wire(&json!([3, "x"])), Seq::Opaque("[3,\"x\"]".into()));
        assert_eq!(Seq::Number(7).to_string(), "7");
    }

    #[test]
    fn change_from_wire() {
        let raw = json!({"seq": 4, "id": "doc", "changes": [{"rev": "2-b"}], "deleted": true});
        let change = Change::from_wire(&raw).unwrap();
        assert_eq!(change.seq, Seq::Number(4));
        assert_eq!(change.changes, vec!["2-b"]);
        assert!(change.deleted);
        assert_eq!(change.doc, None);

        assert_eq!(
            Change::from_wire(&json!({"seq": 1, "changes": []})).unwrap_err(),
            JsonError::unexpected_shape("a change row with a string id")
        );
        assert!(matches!(
            Change::from_wire(&json!({"seq": 1, "id": "a", "changes": [{}]})),
            Err(JsonError::UnexpectedShape { .. })
        ));
    }

    #[test]
    fn query_parameters() {
        let options = ChangesOptions::continuous()
            .since(10u64)
            .heartbeat(Duration::from_secs(5))
            .include_docs()
            .all_revs()
            .raw("conflicts", "true");
        assert_eq!(
            options.query(),
            vec![
                ("feed".to_string(), "continuous".to_string()),
                ("since".to_string(), "10".to_string()),
                ("include_docs".to_string(), "true".to_string()),
                ("heartbeat".to_string(), "5000".to_string()),
                ("style".to_string(), "all_docs".to_string()),
                ("conflicts".to_string(), "true".to_string()),
            ]
        );
        assert_eq!(ChangesOptions::new().query(), vec![("feed".to_string(), "normal".to_string())]);
    }
}
