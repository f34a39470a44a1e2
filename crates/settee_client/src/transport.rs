//! Transport layer abstraction.
//!
//! The client builds requests and interprets responses; moving bytes is
//! left to a [`Transport`] implementation (reqwest, hyper, ureq, or an
//! in-process server for tests).

use crate::error::TransportError;
use crate::path::encode_query;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// HTTP methods used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// HEAD
    Head,
    /// PUT
    Put,
    /// POST
    Post,
    /// DELETE
    Delete,
}

impl Method {
    /// Returns the method name as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Method.
    pub method: Method,
    /// Server base URL, without trailing slash.
    pub base_url: String,
    /// Percent-encoded path relative to the base URL, starting with `/`.
    pub path: String,
    /// Query parameters, not yet encoded.
    pub query: Vec<(String, String)>,
    /// Headers in the order they should be sent.
    pub headers: Vec<(String, String)>,
    /// Body, if any.
    pub body: Option<Vec<u8>>,
    /// Timeout hint for the transport. `Duration::MAX` means none.
    pub timeout: Duration,
}

impl Request {
    /// Creates a request with no query, headers or body.
    pub fn new(method: Method, base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method,
            base_url: base_url.into(),
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout: crate::config::DEFAULT_TIMEOUT,
        }
    }

    /// Appends a query parameter.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Appends a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Looks up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Looks up a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Path and encoded query string, as sent on the request line.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, encode_query(&self.query))
        }
    }

    /// Full URL.
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, self.path_and_query())
    }
}

/// A complete response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl Response {
    /// Creates a response with no headers.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Creates a JSON response.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string()).with_header("Content-Type", "application/json")
    }

    /// Appends a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Looks up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Closes a stream from another thread.
///
/// Calling it makes a `read_chunk` blocked on that stream return promptly
/// with `Ok(None)`. Calling it more than once is harmless.
pub type StreamCloser = Arc<dyn Fn() + Send + Sync>;

/// A response body read incrementally.
pub trait ChunkStream: Send {
    /// Status code of the response.
    fn status(&self) -> u16;

    /// Reads the next chunk. `Ok(None)` signals end of stream.
    ///
    /// May block for as long as the server stays silent; idleness is not
    /// an error at this layer.
    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Closes the connection. Further reads return `Ok(None)`.
    fn close(&mut self);

    /// Returns a closer that works while another thread is blocked in
    /// [`read_chunk`](Self::read_chunk).
    fn closer(&self) -> StreamCloser;
}

/// Moves requests to the server and responses back.
pub trait Transport: Send + Sync {
    /// Sends a request and waits for the complete response.
    fn send(&self, request: &Request) -> Result<Response, TransportError>;

    /// Sends a request and returns the body as a stream of chunks.
    fn open_stream(&self, request: &Request) -> Result<Box<dyn ChunkStream>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, request: &Request) -> Result<Response, TransportError> {
        (**self).send(request)
    }

    fn open_stream(&self, request: &Request) -> Result<Box<dyn ChunkStream>, TransportError> {
        (**self).open_stream(request)
    }
}

/// A chunk stream replaying a fixed script.
pub struct ScriptedStream {
    status: u16,
    chunks: VecDeque<Result<Vec<u8>, TransportError>>,
    closed: Arc<AtomicBool>,
}

impl ScriptedStream {
    /// Creates a stream that yields the given chunks, then ends.
    pub fn new(status: u16, chunks: Vec<Result<Vec<u8>, TransportError>>) -> Self {
        Self {
            status,
            chunks: chunks.into(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a flag that flips to true once the stream is closed.
    pub fn close_probe(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl ChunkStream for ScriptedStream {
    fn status(&self) -> u16 {
        self.status
    }

    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.chunks.pop_front().transpose()
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.chunks.clear();
    }

    fn closer(&self) -> StreamCloser {
        let closed = Arc::clone(&self.closed);
        Arc::new(move || closed.store(true, Ordering::SeqCst))
    }
}

enum Scripted {
    Response(Result<Response, TransportError>),
    Stream(ScriptedStream),
}

/// A transport that replays scripted responses and records requests.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<Request>>,
}

impl MockTransport {
    /// Creates a mock transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the next `send`.
    pub fn push_response(&self, response: Response) {
        self.script
            .lock()
            .push_back(Scripted::Response(Ok(response)));
    }

    /// Queues a transport failure for the next `send`.
    pub fn push_error(&self, error: TransportError) {
        self.script.lock().push_back(Scripted::Response(Err(error)));
    }

    /// Queues a stream for the next `open_stream`. Returns its close probe.
    pub fn push_stream(&self, stream: ScriptedStream) -> Arc<AtomicBool> {
        let probe = stream.close_probe();
        self.script.lock().push_back(Scripted::Stream(stream));
        probe
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Returns the most recent request.
    pub fn last_request(&self) -> Option<Request> {
        self.requests.lock().last().cloned()
    }

    fn next_scripted(&self, request: &Request) -> Option<Scripted> {
        self.requests.lock().push(request.clone());
        self.script.lock().pop_front()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: &Request) -> Result<Response, TransportError> {
        match self.next_scripted(request) {
            Some(Scripted::Response(result)) => result,
            Some(Scripted::Stream(_)) => Err(TransportError::fatal("scripted a stream, got send")),
            None => Err(TransportError::fatal("no scripted response")),
        }
    }

    fn open_stream(&self, request: &Request) -> Result<Box<dyn ChunkStream>, TransportError> {
        match self.next_scripted(request) {
            Some(Scripted::Stream(stream)) => Ok(Box::new(stream)),
            Some(Scripted::Response(Ok(response))) => Ok(Box::new(ScriptedStream::new(
                response.status,
                vec![Ok(response.body)],
            ))),
            Some(Scripted::Response(Err(e))) => Err(e),
            None => Err(TransportError::fatal("no scripted stream")),
        }
    }
}
