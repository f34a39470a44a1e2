//! Continuous `_changes` delivery.

use super::store::change_row;
use super::{ChangeFilter, Shared};
use settee_client::{ChunkStream, StreamCloser, TransportError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A live feed over one database.
///
/// Each change is one line. While caught up the stream blocks until the
/// next write, sending an empty line every `heartbeat` and ending with a
/// `last_seq` line once `timeout` passes without changes. Closing it from
/// another thread wakes a blocked read.
pub(crate) struct ContinuousStream {
    pub shared: Arc<Shared>,
    pub db: String,
    pub since: u64,
    pub include_docs: bool,
    pub filter: ChangeFilter,
    pub heartbeat: Option<Duration>,
    pub timeout: Option<Duration>,
    pub limit: Option<u64>,
    pub chunk_size: Option<usize>,
    sent: u64,
    idle_since: Instant,
    outbox: VecDeque<u8>,
    finished: bool,
    closed: Arc<AtomicBool>,
}

impl ContinuousStream {
    pub fn new(shared: Arc<Shared>, db: String, since: u64) -> Self {
        Self {
            shared,
            db,
            since,
            include_docs: false,
            filter: ChangeFilter::All,
            heartbeat: None,
            timeout: None,
            limit: None,
            chunk_size: None,
            sent: 0,
            idle_since: Instant::now(),
            outbox: VecDeque::new(),
            finished: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn push_line(&mut self, line: &str) {
        self.outbox.extend(line.as_bytes());
        self.outbox.push_back(b'\n');
    }

    fn timed_out(&self) -> bool {
        self.timeout
            .is_some_and(|timeout| self.idle_since.elapsed() >= timeout)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Blocks until there is something to send or the stream is closed.
    fn fill(&mut self) {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.lock();
        loop {
            if self.is_closed() {
                return;
            }
            let Some(db) = state.dbs.get(&self.db) else {
                self.finished = true;
                let done = serde_json::json!({"last_seq": self.since});
                self.push_line(&done.to_string());
                return;
            };
            let next = db
                .changes_since(self.since)
                .into_iter()
                .find(|(id, _)| self.filter.accepts(id));
            if let Some((id, doc)) = next {
                let row = change_row(id, doc, self.include_docs);
                self.since = doc.seq;
                self.sent += 1;
                self.idle_since = Instant::now();
                self.push_line(&row.to_string());
                if self.limit.is_some_and(|limit| self.sent >= limit) {
                    self.finished = true;
                    let done = serde_json::json!({"last_seq": self.since});
                    self.push_line(&done.to_string());
                }
                return;
            }
            // Nothing left that passes the filter.
            self.since = self.since.max(db.seq);
            if self.timed_out() {
                self.finished = true;
                let done = serde_json::json!({"last_seq": self.since});
                self.push_line(&done.to_string());
                return;
            }
            let remaining = self
                .timeout
                .map(|timeout| timeout.saturating_sub(self.idle_since.elapsed()));
            match self.heartbeat.into_iter().chain(remaining).min() {
                Some(wait) => {
                    let idle = shared.changed.wait_for(&mut state, wait).timed_out();
                    if idle && self.heartbeat.is_some() && !self.timed_out() {
                        self.outbox.push_back(b'\n');
                        return;
                    }
                }
                None => shared.changed.wait(&mut state),
            }
        }
    }
}

impl ChunkStream for ContinuousStream {
    fn status(&self) -> u16 {
        200
    }

    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.is_closed() {
            return Ok(None);
        }
        if self.outbox.is_empty() {
            if self.finished {
                return Ok(None);
            }
            self.fill();
            if self.is_closed() {
                return Ok(None);
            }
        }
        let take = self.chunk_size.unwrap_or(usize::MAX).min(self.outbox.len());
        Ok(Some(self.outbox.drain(..take).collect()))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.outbox.clear();
    }

    fn closer(&self) -> StreamCloser {
        let shared = Arc::clone(&self.shared);
        let closed = Arc::clone(&self.closed);
        Arc::new(move || {
            // Under the lock, so a reader between its check and its wait
            // cannot miss the wake-up.
            let _state = shared.state.lock();
            closed.store(true, Ordering::SeqCst);
            shared.changed.notify_all();
        })
    }
}
