//! Incremental decoding of `_changes` bodies.

use super::{Change, ChangeEvent, Seq};
use crate::error::{CouchError, CouchResult};
use settee_json::Wire;
use tracing::warn;

/// Turns continuous-feed bytes into events, one line at a time.
///
/// Chunk boundaries need not match line boundaries: a partial line is
/// kept until the rest of it arrives. Empty lines are heartbeats and
/// produce nothing.
#[derive(Debug, Default)]
pub struct ChangeDecoder {
    buffer: Vec<u8>,
}

impl ChangeDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the events of every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ChangeEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            events.extend(parse_line(&line));
        }
        events
    }

    /// Decodes whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<ChangeEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }

    /// Returns true if a partial line is buffered.
    pub fn has_partial(&self) -> bool {
        self.buffer.iter().any(|b| !b.is_ascii_whitespace())
    }
}

/// Decodes one continuous-feed line. Blank lines yield `None`.
pub(crate) fn parse_line(line: &[u8]) -> Option<ChangeEvent> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    let event = match settee_json::decode(line) {
        Ok(raw) => classify(&raw),
        Err(err) => ChangeEvent::Error(err.to_string()),
    };
    if let ChangeEvent::Error(reason) = &event {
        warn!(%reason, "malformed change line");
    }
    Some(event)
}

fn classify(raw: &Wire) -> ChangeEvent {
    if let Some(last_seq) = raw.get("last_seq") {
        return ChangeEvent::Done {
            last_seq: Seq::from_wire(last_seq),
        };
    }
    match Change::from_wire(raw) {
        Ok(change) => ChangeEvent::Change(change),
        Err(err) => ChangeEvent::Error(err.to_string()),
    }
}

/// Decodes a complete `{"results": [...], "last_seq": ..}` body.
///
/// Rows that cannot be read become [`ChangeEvent::Error`] in place; the
/// final event is always [`ChangeEvent::Done`].
pub(crate) fn parse_body(body: &[u8]) -> CouchResult<Vec<ChangeEvent>> {
    let raw = settee_json::decode(body).map_err(|e| CouchError::malformed(e.to_string()))?;
    let results = raw
        .get("results")
        .and_then(Wire::as_array)
        .ok_or_else(|| CouchError::malformed("changes response without results"))?;
    let last_seq = raw
        .get("last_seq")
        .map(Seq::from_wire)
        .ok_or_else(|| CouchError::malformed("changes response without last_seq"))?;

    let mut events: Vec<ChangeEvent> = results
        .iter()
        .map(|row| match Change::from_wire(row) {
            Ok(change) => ChangeEvent::Change(change),
            Err(err) => {
                warn!(%err, "malformed change row");
                ChangeEvent::Error(err.to_string())
            }
        })
        .collect();
    events.push(ChangeEvent::Done { last_seq });
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(events: &[ChangeEvent]) -> Vec<String> {
        events
            .iter()
            .map(|event| match event {
                ChangeEvent::Change(change) => change.id.clone(),
                ChangeEvent::Done { last_seq } => format!("done:{last_seq}"),
                ChangeEvent::Error(_) => "error".to_string(),
            })
            .collect()
    }

    #[test]
    fn lines_split_across_chunks() {
        let mut decoder = ChangeDecoder::new();
        assert!(decoder.push(br#"{"seq":1,"id":"a","chan"#).is_empty());
        assert!(decoder.has_partial());
        let events = decoder.push(
            br#"ges":[{"rev":"1-a"}]}
{"seq":2,"id":"b","changes":[{"rev":"1-b"}]}
"#,
        );
        assert_eq!(ids(&events), vec!["a", "b"]);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn heartbeats_are_silent() {
        let mut decoder = ChangeDecoder::new();
        assert!(decoder.push(b"\n\n\r\n").is_empty());
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn malformed_line_does_not_stop_decoding() {
        let mut decoder = ChangeDecoder::new();
        let events = decoder.push(
            b"{oops\n{\"seq\":3,\"id\":\"c\",\"changes\":[{\"rev\":\"1-c\"}]}\n{\"last_seq\":3}\n",
        );
        assert_eq!(ids(&events), vec!["error", "c", "done:3"]);
    }

    #[test]
    fn finish_decodes_unterminated_tail() {
        let mut decoder = ChangeDecoder::new();
        assert!(decoder.push(br#"{"last_seq":"9-x"}"#).is_empty());
        assert_eq!(
            decoder.finish(),
            Some(ChangeEvent::Done {
                last_seq: Seq::Opaque("9-x".into())
            })
        );
    }

    #[test]
    fn body_ends_with_done() {
        let body = br#"{"results":[
            {"seq":1,"id":"a","changes":[{"rev":"1-a"}]},
            {"seq":2,"changes":[]},
            {"seq":3,"id":"c","changes":[{"rev":"2-c"}],"deleted":true}
        ],"last_seq":3}"#;
        let events = parse_body(body).unwrap();
        assert_eq!(ids(&events), vec!["a", "error", "c", "done:3"]);
    }

    #[test]
    fn body_without_envelope_is_malformed() {
        assert!(matches!(parse_body(b"[]"), Err(CouchError::MalformedResponse(_))));
        assert!(matches!(
            parse_body(br#"{"results":[]}"#),
            Err(CouchError::MalformedResponse(_))
        ));
    }
}
