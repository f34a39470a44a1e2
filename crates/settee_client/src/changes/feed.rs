//! The pull-based feed and its cancellation handle.

use super::decoder::{parse_body, ChangeDecoder};
use super::{ChangeEvent, ChangesOptions, FeedMode};
use crate::database::Database;
use crate::error::CouchResult;
use crate::path;
use crate::transport::{ChunkStream, Method, StreamCloser};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Lifecycle of a [`ChangesFeed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// Not started; nothing has been sent.
    Idle,
    /// Delivering events.
    Streaming,
    /// The server sent `last_seq` and every event was delivered.
    Completed,
    /// Stopped by the caller.
    Cancelled,
    /// The stream broke before `last_seq`.
    Failed,
}

impl FeedState {
    /// Returns true once no more events will be produced.
    pub fn is_terminal(self) -> bool {
        matches!(self, FeedState::Completed | FeedState::Cancelled | FeedState::Failed)
    }
}

/// Stops a feed from any thread.
///
/// After [`cancel`](Self::cancel) returns, the feed yields at most the
/// event it is currently handing out. The connection is closed right
/// away, so a read blocked on a silent server returns.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<CancelState>);

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    closer: Mutex<Option<StreamCloser>>,
}

impl CancelHandle {
    /// Requests cancellation and closes the feed's connection.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        let closer = self.0.closer.lock().take();
        if let Some(close) = closer {
            close();
        }
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Remembers how to close the open stream. Closes it at once if the
    /// feed was already cancelled.
    fn attach(&self, closer: StreamCloser) {
        let mut slot = self.0.closer.lock();
        if self.is_cancelled() {
            drop(slot);
            closer();
        } else {
            *slot = Some(closer);
        }
    }

    fn detach(&self) {
        self.0.closer.lock().take();
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// An ordered sequence of change events.
///
/// Iterating pulls from the connection: a new chunk is read only once
/// every event of the previous one was handed out.
pub struct ChangesFeed {
    db: Database,
    options: ChangesOptions,
    state: FeedState,
    stream: Option<Box<dyn ChunkStream>>,
    decoder: ChangeDecoder,
    pending: VecDeque<ChangeEvent>,
    truncated: bool,
    cancel: CancelHandle,
}

impl ChangesFeed {
    /// Creates an idle feed. Nothing is sent until the first event is
    /// requested or [`start`](Self::start) is called.
    pub fn new(db: &Database, options: ChangesOptions) -> Self {
        Self {
            db: db.clone(),
            options,
            state: FeedState::Idle,
            stream: None,
            decoder: ChangeDecoder::new(),
            pending: VecDeque::new(),
            truncated: false,
            cancel: CancelHandle::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> FeedState {
        self.state
    }

    /// Options the feed was created with.
    pub fn options(&self) -> &ChangesOptions {
        &self.options
    }

    /// A handle that cancels this feed from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancels the feed and closes its connection.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if !self.state.is_terminal() {
            self.finish(FeedState::Cancelled);
        }
    }

    /// Sends the request. Does nothing unless the feed is idle.
    ///
    /// A continuous feed opens a stream; any other mode reads one full
    /// response and queues its events.
    pub fn start(&mut self) -> CouchResult<()> {
        if self.state != FeedState::Idle {
            return Ok(());
        }
        let mut request = self.db.request(
            Method::Get,
            path::endpoint_path(self.db.name(), "_changes"),
        );
        request.query.extend(self.options.query());

        match self.options.feed {
            FeedMode::Continuous => {
                // Gaps between heartbeats are unbounded.
                request.timeout = Duration::MAX;
                let stream = self.db.server().open_stream(request, self.db.credentials())?;
                debug!(db = %self.db.name(), "changes stream open");
                self.cancel.attach(stream.closer());
                self.stream = Some(stream);
            }
            FeedMode::Normal | FeedMode::Longpoll => {
                if self.options.feed == FeedMode::Longpoll {
                    request.timeout = Duration::MAX;
                }
                let response = self.db.execute(request)?;
                self.pending.extend(parse_body(&response.body)?);
            }
        }
        self.state = FeedState::Streaming;
        Ok(())
    }

    /// Moves the feed to a background thread and delivers its events over
    /// a channel.
    ///
    /// The channel has no buffer: the thread reads ahead by at most the
    /// one event waiting to be received. It ends when the feed ends, when
    /// the handle cancels it, or when the receiver is dropped.
    pub fn spawn(self) -> (Receiver<ChangeEvent>, CancelHandle) {
        let handle = self.cancel_handle();
        let cancel = handle.clone();
        let (tx, rx) = mpsc::sync_channel(0);
        thread::spawn(move || {
            for event in self {
                if cancel.is_cancelled() || tx.send(event).is_err() {
                    break;
                }
            }
        });
        (rx, handle)
    }

    fn finish(&mut self, state: FeedState) {
        self.cancel.detach();
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        self.pending.clear();
        self.state = state;
        debug!(db = %self.db.name(), ?state, "changes feed finished");
    }

    fn read_more(&mut self) -> Option<ChangeEvent> {
        let Some(stream) = self.stream.as_mut() else {
            let state = if self.truncated {
                FeedState::Failed
            } else {
                FeedState::Completed
            };
            self.finish(state);
            return None;
        };
        match stream.read_chunk() {
            Ok(Some(chunk)) => {
                trace!(db = %self.db.name(), bytes = chunk.len(), "changes chunk");
                let events = self.decoder.push(&chunk);
                self.pending.extend(events);
                None
            }
            Ok(None) => {
                let tail = self.decoder.finish();
                self.cancel.detach();
                if let Some(mut stream) = self.stream.take() {
                    stream.close();
                }
                let done = matches!(tail, Some(ChangeEvent::Done { .. }));
                self.pending.extend(tail);
                if !done {
                    self.truncated = true;
                    self.pending.push_back(ChangeEvent::Error(
                        "changes stream ended before last_seq".to_string(),
                    ));
                }
                None
            }
            Err(err) => {
                self.finish(FeedState::Failed);
                Some(ChangeEvent::Error(err.to_string()))
            }
        }
    }
}

impl Iterator for ChangesFeed {
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            if self.state.is_terminal() {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.finish(FeedState::Cancelled);
                return None;
            }
            if self.state == FeedState::Idle {
                if let Err(err) = self.start() {
                    self.finish(FeedState::Failed);
                    return Some(ChangeEvent::Error(err.to_string()));
                }
            }
            if let Some(event) = self.pending.pop_front() {
                if matches!(event, ChangeEvent::Done { .. }) {
                    self.finish(FeedState::Completed);
                }
                return Some(event);
            }
            if let Some(event) = self.read_more() {
                return Some(event);
            }
        }
    }
}

impl Drop for ChangesFeed {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
    }
}

impl fmt::Debug for ChangesFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangesFeed")
            .field("db", &self.db.name())
            .field("options", &self.options)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Follows `GET /{db}/_changes` with the given options.
    ///
    /// The request is sent before this returns, so a missing database or a
    /// rejected credential surfaces here rather than as a feed event.
    pub fn follow(&self, options: ChangesOptions) -> CouchResult<ChangesFeed> {
        let mut feed = ChangesFeed::new(self, options);
        feed.start()?;
        Ok(feed)
    }

    /// Reads one `_changes` response and returns its events.
    ///
    /// A continuous mode in `options` is downgraded to a normal poll.
    pub fn follow_once(&self, options: ChangesOptions) -> CouchResult<ChangesFeed> {
        let options = match options.feed {
            FeedMode::Continuous => options.feed(FeedMode::Normal),
            _ => options,
        };
        self.follow(options)
    }
}
