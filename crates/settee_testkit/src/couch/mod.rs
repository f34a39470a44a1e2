//! An in-memory CouchDB-style server.
//!
//! [`MemoryCouch`] implements [`Transport`] by answering requests from
//! in-process state, so the client can be exercised end to end without a
//! network. It covers databases, documents with revisions and conflicts,
//! attachments, `_bulk_docs`, `_all_docs`, views backed by Rust closures,
//! `_changes` (normal and continuous), `_replicate` and `_uuids`.
//!
//! ```rust,ignore
//! let couch = Arc::new(MemoryCouch::new());
//! couch.define_view("albums", "app", "by_year", |doc| {
//!     vec![(doc["year"].clone(), Wire::Null)]
//! });
//! let server = Server::with_transport(ServerConfig::default(), couch.clone());
//! ```

mod store;
mod stream;
mod views;

pub use views::{collate, MapFn};

use parking_lot::{Condvar, Mutex};
use percent_encoding::percent_decode_str;
use serde_json::{json, Map};
use settee_client::{
    basic_auth_header, ChunkStream, Method, Request, Response, ScriptedStream, Transport,
    TransportError,
};
use settee_json::Wire;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use store::{change_row, digest_hex, Fail, Handled, MemDb};
use stream::ContinuousStream;
use views::{IndexRow, Selection};

type ViewKey = (String, String, String);

/// Server state behind the lock.
#[derive(Default)]
pub(crate) struct CouchState {
    pub dbs: BTreeMap<String, MemDb>,
    views: HashMap<ViewKey, MapFn>,
    replications: Vec<(String, String)>,
    uuid_counter: u64,
    log: Vec<String>,
    failures: VecDeque<TransportError>,
}

impl CouchState {
    fn next_uuid(&mut self) -> String {
        self.uuid_counter += 1;
        digest_hex(&[b"uuid".as_slice(), self.uuid_counter.to_be_bytes().as_slice()], 16)
    }

    fn db(&self, name: &str) -> Result<&MemDb, Fail> {
        self.dbs.get(name).ok_or_else(Fail::no_db)
    }

    fn db_mut(&mut self, name: &str) -> Result<&mut MemDb, Fail> {
        self.dbs.get_mut(name).ok_or_else(Fail::no_db)
    }

    /// Copies every revision the target lacks. Returns `(read, written)`.
    fn replicate(&mut self, source: &str, target: &str) -> Result<(usize, usize), Fail> {
        let docs: Vec<_> = self
            .db(source)?
            .docs
            .iter()
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect();
        let target = self.db_mut(target)?;
        let written = docs
            .iter()
            .filter(|(id, doc)| target.absorb(id, doc))
            .count();
        Ok((docs.len(), written))
    }

    /// Brings every continuous replication up to date.
    fn run_replications(&mut self) {
        let jobs = self.replications.clone();
        for (source, target) in jobs {
            // A job whose database was deleted stays registered but idle.
            let _ = self.replicate(&source, &target);
        }
    }
}

pub(crate) struct Shared {
    pub state: Mutex<CouchState>,
    pub changed: Condvar,
}

/// Which changes a feed reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChangeFilter {
    All,
    Design,
}

impl ChangeFilter {
    fn parse(raw: Option<&str>) -> Result<Self, Fail> {
        match raw {
            None => Ok(ChangeFilter::All),
            Some("_design") => Ok(ChangeFilter::Design),
            Some(other) => Err(Fail::not_found(format!("missing filter {other}"))),
        }
    }

    pub fn accepts(&self, id: &str) -> bool {
        match self {
            ChangeFilter::All => true,
            ChangeFilter::Design => id.starts_with("_design/"),
        }
    }
}

/// In-memory server implementing [`Transport`].
pub struct MemoryCouch {
    shared: Arc<Shared>,
    admin: Option<(String, String)>,
    chunk_size: Option<usize>,
}

impl Default for MemoryCouch {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCouch {
    /// Creates an empty server where anyone may do anything.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CouchState::default()),
                changed: Condvar::new(),
            }),
            admin: None,
            chunk_size: None,
        }
    }

    /// Requires this admin credential for server administration:
    /// creating and deleting databases, `_all_dbs`, `_active_tasks` and
    /// `_compact`. Any request carrying a different credential is refused.
    pub fn with_admin(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.admin = Some((username.into(), password.into()));
        self
    }

    /// Splits continuous feed output into chunks of at most `size` bytes.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Registers a view. The map function sees every live, non-design
    /// document in `db`.
    pub fn define_view<F>(&self, db: &str, design: &str, view: &str, map: F)
    where
        F: Fn(&Wire) -> Vec<(Wire, Wire)> + Send + Sync + 'static,
    {
        let key = (db.to_string(), design.to_string(), view.to_string());
        self.shared.state.lock().views.insert(key, Arc::new(map));
    }

    /// Makes the next request fail with `error` before reaching the server.
    pub fn fail_next(&self, error: TransportError) {
        self.shared.state.lock().failures.push_back(error);
    }

    /// Every request received, as `METHOD /path`.
    pub fn request_log(&self) -> Vec<String> {
        self.shared.state.lock().log.clone()
    }

    /// Clears the request log.
    pub fn clear_log(&self) {
        self.shared.state.lock().log.clear();
    }

    /// Returns true if the database exists.
    pub fn has_db(&self, name: &str) -> bool {
        self.shared.state.lock().dbs.contains_key(name)
    }

    /// Current revision of a live document.
    pub fn current_rev(&self, db: &str, id: &str) -> Option<String> {
        let state = self.shared.state.lock();
        state.dbs.get(db)?.live(id).map(|doc| doc.rev.clone())
    }

    /// Number of live documents in a database.
    pub fn doc_count(&self, db: &str) -> Option<usize> {
        self.shared.state.lock().dbs.get(db).map(MemDb::doc_count)
    }

    fn admin_header(&self) -> Option<String> {
        self.admin
            .as_ref()
            .map(|(user, pass)| basic_auth_header(user, pass).1)
    }

    fn authenticate(&self, request: &Request, admin_only: bool) -> Result<(), Fail> {
        let Some(expected) = self.admin_header() else {
            return Ok(());
        };
        match request.header("Authorization") {
            Some(given) if given == expected => Ok(()),
            Some(_) => Err(Fail::unauthorized("Name or password is incorrect.")),
            None if admin_only => Err(Fail::unauthorized("You are not a server admin.")),
            None => Ok(()),
        }
    }

    fn record(&self, request: &Request) -> Option<TransportError> {
        let mut state = self.shared.state.lock();
        state.log.push(format!("{} {}", request.method, request.path));
        state.failures.pop_front()
    }

    fn handle(&self, request: &Request) -> Response {
        match self.route(request) {
            Ok(response) => response,
            Err(fail) => fail.into_response(),
        }
    }

    fn route(&self, request: &Request) -> Handled {
        let segments = split_path(&request.path);
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let admin_only = match segments.as_slice() {
            ["_all_dbs"] | ["_active_tasks"] => true,
            [_, "_compact"] => true,
            [name] if !name.starts_with('_') => {
                matches!(request.method, Method::Put | Method::Delete)
            }
            _ => false,
        };
        self.authenticate(request, admin_only)?;

        let method = request.method;
        match segments.as_slice() {
            [] => Ok(Response::json(200, &json!({"couchdb": "Welcome", "version": "memory"}))),
            ["_all_dbs"] => {
                let names: Vec<String> = self.shared.state.lock().dbs.keys().cloned().collect();
                Ok(Response::json(200, &json!(names)))
            }
            ["_active_tasks"] => Ok(self.active_tasks()),
            ["_uuids"] => self.uuids(request),
            ["_replicate"] if method == Method::Post => self.replicate(request),
            [db] => self.database(method, db, request),
            [db, "_all_docs"] => self.all_docs(db, request),
            [db, "_bulk_docs"] if method == Method::Post => self.bulk_docs(db, request),
            [db, "_changes"] => self.changes(db, request),
            [db, "_compact"] if method == Method::Post => {
                self.shared.state.lock().db(db)?;
                Ok(Response::json(202, &json!({"ok": true})))
            }
            [db, "_design", design, "_view", view] => self.view(db, design, view, request),
            [db, prefix @ ("_design" | "_local"), name, rest @ ..] => {
                let id = format!("{prefix}/{name}");
                self.document(method, db, &id, rest, request)
            }
            [db, id, rest @ ..] => self.document(method, db, id, rest, request),
        }
    }

    fn commit(&self, state: &mut CouchState) {
        state.run_replications();
        self.shared.changed.notify_all();
    }

    fn database(&self, method: Method, db: &str, request: &Request) -> Handled {
        let mut state = self.shared.state.lock();
        match method {
            Method::Put => {
                if !valid_db_name(db) {
                    return Err(Fail::new(
                        400,
                        "illegal_database_name",
                        format!(
                            "Name: '{db}'. Only lowercase characters (a-z), digits (0-9), \
                             and any of the characters _, $, (, ), +, -, and / are allowed. \
                             Must begin with a letter."
                        ),
                    ));
                }
                if state.dbs.contains_key(db) {
                    return Err(Fail::new(
                        412,
                        "file_exists",
                        "The database could not be created, the file already exists.",
                    ));
                }
                state.dbs.insert(db.to_string(), MemDb::default());
                self.commit(&mut state);
                Ok(Response::json(201, &json!({"ok": true})))
            }
            Method::Delete => {
                state.dbs.remove(db).ok_or_else(Fail::no_db)?;
                self.commit(&mut state);
                Ok(Response::json(200, &json!({"ok": true})))
            }
            Method::Head => {
                let status = if state.dbs.contains_key(db) { 200 } else { 404 };
                Ok(Response::new(status, ""))
            }
            Method::Get => {
                let mem = state.db(db)?;
                Ok(Response::json(
                    200,
                    &json!({
                        "db_name": db,
                        "doc_count": mem.doc_count(),
                        "doc_del_count": mem.del_count(),
                        "update_seq": mem.seq,
                        "compact_running": false,
                    }),
                ))
            }
            Method::Post => {
                let mut body = object_body(request)?;
                let id = match body.remove("_id") {
                    Some(Wire::String(id)) => id,
                    _ => state.next_uuid(),
                };
                let rev = rev_of(&body, request);
                let new_rev = state.db_mut(db)?.put_doc(&id, body, rev.as_deref())?;
                self.commit(&mut state);
                Ok(Response::json(201, &json!({"ok": true, "id": id, "rev": new_rev})))
            }
        }
    }

    fn document(
        &self,
        method: Method,
        db: &str,
        id: &str,
        rest: &[&str],
        request: &Request,
    ) -> Handled {
        if !rest.is_empty() {
            return self.attachment(method, db, id, &rest.join("/"), request);
        }
        let mut state = self.shared.state.lock();
        match method {
            Method::Get | Method::Head => {
                let mem = state.db(db)?;
                let doc = mem.live(id).ok_or_else(|| mem.missing(id))?;
                if let Some(rev) = request.query_param("rev") {
                    if rev != doc.rev {
                        return Err(Fail::not_found("missing"));
                    }
                }
                let etag = format!("\"{}\"", doc.rev);
                let body = if method == Method::Head {
                    Vec::new()
                } else {
                    doc.to_wire(id).to_string().into_bytes()
                };
                Ok(Response::new(200, body)
                    .with_header("Content-Type", "application/json")
                    .with_header("ETag", etag))
            }
            Method::Put => {
                let body = object_body(request)?;
                let rev = rev_of(&body, request);
                let new_rev = state.db_mut(db)?.put_doc(id, body, rev.as_deref())?;
                self.commit(&mut state);
                Ok(Response::json(201, &json!({"ok": true, "id": id, "rev": new_rev})))
            }
            Method::Delete => {
                let rev = request.query_param("rev");
                let new_rev = state.db_mut(db)?.delete_doc(id, rev)?;
                self.commit(&mut state);
                Ok(Response::json(200, &json!({"ok": true, "id": id, "rev": new_rev})))
            }
            Method::Post => Err(Fail::new(
                405,
                "method_not_allowed",
                "Only DELETE,GET,HEAD,PUT allowed",
            )),
        }
    }

    fn attachment(
        &self,
        method: Method,
        db: &str,
        id: &str,
        name: &str,
        request: &Request,
    ) -> Handled {
        let mut state = self.shared.state.lock();
        let rev = request.query_param("rev");
        match method {
            Method::Get | Method::Head => {
                let mem = state.db(db)?;
                let doc = mem.live(id).ok_or_else(|| mem.missing(id))?;
                let att = doc
                    .attachments
                    .get(name)
                    .ok_or_else(|| Fail::not_found("Document is missing attachment"))?;
                let body = if method == Method::Head { Vec::new() } else { att.data.clone() };
                Ok(Response::new(200, body).with_header("Content-Type", att.content_type.clone()))
            }
            Method::Put => {
                let content_type = request
                    .header("Content-Type")
                    .unwrap_or("application/octet-stream");
                let data = request.body.clone().unwrap_or_default();
                let new_rev = state
                    .db_mut(db)?
                    .put_attachment(id, rev, name, content_type, data)?;
                self.commit(&mut state);
                Ok(Response::json(201, &json!({"ok": true, "id": id, "rev": new_rev})))
            }
            Method::Delete => {
                let new_rev = state.db_mut(db)?.delete_attachment(id, rev, name)?;
                self.commit(&mut state);
                Ok(Response::json(200, &json!({"ok": true, "id": id, "rev": new_rev})))
            }
            Method::Post => Err(Fail::new(
                405,
                "method_not_allowed",
                "Only DELETE,GET,HEAD,PUT allowed",
            )),
        }
    }

    fn bulk_docs(&self, db: &str, request: &Request) -> Handled {
        let mut body = object_body(request)?;
        let Some(Wire::Array(docs)) = body.remove("docs") else {
            return Err(Fail::bad_request("POST body must include `docs` parameter."));
        };
        let mut state = self.shared.state.lock();
        state.db(db)?;
        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            let Wire::Object(mut doc) = doc else {
                results.push(json!({
                    "error": "bad_request",
                    "reason": "Document must be a JSON object"
                }));
                continue;
            };
            let id = match doc.remove("_id") {
                Some(Wire::String(id)) => id,
                _ => state.next_uuid(),
            };
            let rev = doc.get("_rev").and_then(Wire::as_str).map(str::to_string);
            let outcome = state.db_mut(db)?.put_doc(&id, doc, rev.as_deref());
            results.push(match outcome {
                Ok(rev) => json!({"ok": true, "id": id, "rev": rev}),
                Err(fail) => json!({"id": id, "error": fail.error, "reason": fail.reason}),
            });
        }
        self.commit(&mut state);
        Ok(Response::json(201, &Wire::Array(results)))
    }

    fn all_docs(&self, db: &str, request: &Request) -> Handled {
        let selection = Selection::from_query(&request.query)?;
        let state = self.shared.state.lock();
        let mem = state.db(db)?;
        if let Some(keys) = selection.keys() {
            // One entry per requested key, missing ones as error rows.
            let rows: Vec<Wire> = keys
                .iter()
                .map(|key| {
                    let live = key.as_str().and_then(|id| mem.live(id).map(|doc| (id, doc)));
                    match live {
                        Some((id, doc)) => IndexRow {
                            id: id.to_string(),
                            key: key.clone(),
                            value: json!({"rev": doc.rev}),
                            doc: selection.include_docs.then(|| doc.to_wire(id)),
                        }
                        .to_wire(),
                        None => json!({"key": key, "error": "not_found"}),
                    }
                })
                .collect();
            return Ok(Response::json(
                200,
                &json!({"total_rows": mem.doc_count(), "offset": 0, "rows": rows}),
            ));
        }
        let rows = mem
            .live_docs()
            .map(|(id, doc)| IndexRow {
                id: id.clone(),
                key: Wire::String(id.clone()),
                value: json!({"rev": doc.rev}),
                doc: selection.include_docs.then(|| doc.to_wire(id)),
            })
            .collect();
        Ok(rows_response(selection.apply(rows)))
    }

    fn view(&self, db: &str, design: &str, view: &str, request: &Request) -> Handled {
        let selection = Selection::from_query(&request.query)?;
        let state = self.shared.state.lock();
        let mem = state.db(db)?;
        let key = (db.to_string(), design.to_string(), view.to_string());
        let map = state
            .views
            .get(&key)
            .ok_or_else(|| Fail::not_found("missing_named_view"))?;
        let mut rows = Vec::new();
        for (id, doc) in mem.live_docs().filter(|(id, _)| !id.starts_with("_design/")) {
            let wire = doc.to_wire(id);
            for (key, value) in map(&wire) {
                rows.push(IndexRow {
                    id: id.clone(),
                    key,
                    value,
                    doc: selection.include_docs.then(|| wire.clone()),
                });
            }
        }
        Ok(rows_response(selection.apply(rows)))
    }

    fn changes(&self, db: &str, request: &Request) -> Handled {
        let params = ChangesParams::from_request(request)?;
        let state = self.shared.state.lock();
        let mem = state.db(db)?;
        let since = params.since.resolve(mem.seq);
        let mut changes: Vec<_> = mem
            .changes_since(since)
            .into_iter()
            .filter(|(id, _)| params.filter.accepts(id))
            .collect();
        if params.descending {
            changes.reverse();
        }
        if let Some(limit) = params.limit {
            changes.truncate(limit);
        }
        let last_seq = match changes.last() {
            Some((_, doc)) => doc.seq,
            None if params.descending => 0,
            None => since.max(mem.seq),
        };
        let results: Vec<Wire> = changes
            .iter()
            .map(|(id, doc)| change_row(id, doc, params.include_docs))
            .collect();
        Ok(Response::json(200, &json!({"results": results, "last_seq": last_seq})))
    }

    fn open_changes(&self, db: &str, request: &Request) -> Result<ContinuousStream, Fail> {
        let params = ChangesParams::from_request(request)?;
        let state = self.shared.state.lock();
        let since = params.since.resolve(state.db(db)?.seq);
        let mut stream = ContinuousStream::new(Arc::clone(&self.shared), db.to_string(), since);
        stream.include_docs = params.include_docs;
        stream.filter = params.filter;
        stream.heartbeat = params.heartbeat;
        stream.timeout = params.timeout;
        stream.limit = params.limit.map(|n| n as u64);
        stream.chunk_size = self.chunk_size;
        Ok(stream)
    }

    fn uuids(&self, request: &Request) -> Handled {
        let count: usize = match request.query_param("count") {
            Some(raw) => raw
                .parse()
                .map_err(|_| Fail::bad_request("count must be a positive integer"))?,
            None => 1,
        };
        if count > 1000 {
            return Err(Fail::new(400, "bad_request", "count parameter too large"));
        }
        let mut state = self.shared.state.lock();
        let uuids: Vec<String> = (0..count).map(|_| state.next_uuid()).collect();
        Ok(Response::json(200, &json!({"uuids": uuids})))
    }

    fn active_tasks(&self) -> Response {
        let state = self.shared.state.lock();
        let tasks: Vec<Wire> = state
            .replications
            .iter()
            .map(|(source, target)| {
                json!({
                    "type": "replication",
                    "source": source,
                    "target": target,
                    "continuous": true
                })
            })
            .collect();
        Response::json(200, &Wire::Array(tasks))
    }

    fn replicate(&self, request: &Request) -> Handled {
        let body = object_body(request)?;
        let text = |name: &str| {
            body.get(name)
                .and_then(Wire::as_str)
                .map(local_db_name)
                .ok_or_else(|| Fail::bad_request(format!("{name} is required")))
        };
        let flag = |name: &str| body.get(name).and_then(Wire::as_bool).unwrap_or(false);
        let (source, target) = (text("source")?, text("target")?);

        let mut state = self.shared.state.lock();
        if !state.dbs.contains_key(&source) {
            return Err(Fail::new(404, "db_not_found", format!("could not open {source}")));
        }
        if !state.dbs.contains_key(&target) {
            if !flag("create_target") {
                return Err(Fail::new(404, "db_not_found", format!("could not open {target}")));
            }
            state.dbs.insert(target.clone(), MemDb::default());
        }
        let (read, written) = state.replicate(&source, &target)?;
        let source_seq = state.db(&source)?.seq;
        let session_id = state.next_uuid();

        if flag("continuous") {
            let job = (source.clone(), target.clone());
            if !state.replications.contains(&job) {
                state.replications.push(job);
            }
            self.commit(&mut state);
            let local_id = digest_hex(&[source.as_bytes(), target.as_bytes()], 16);
            return Ok(Response::json(
                202,
                &json!({"ok": true, "_local_id": format!("{local_id}+continuous")}),
            ));
        }

        self.commit(&mut state);
        Ok(Response::json(
            200,
            &json!({
                "ok": true,
                "session_id": session_id,
                "source_last_seq": source_seq,
                "no_changes": written == 0,
                "history": [{
                    "session_id": session_id,
                    "start_last_seq": 0,
                    "end_last_seq": source_seq,
                    "recorded_seq": source_seq,
                    "missing_checked": read,
                    "missing_found": written,
                    "docs_read": written,
                    "docs_written": written,
                    "doc_write_failures": 0,
                }],
            }),
        ))
    }
}

impl Transport for MemoryCouch {
    fn send(&self, request: &Request) -> Result<Response, TransportError> {
        if let Some(error) = self.record(request) {
            return Err(error);
        }
        Ok(self.handle(request))
    }

    fn open_stream(&self, request: &Request) -> Result<Box<dyn ChunkStream>, TransportError> {
        if let Some(error) = self.record(request) {
            return Err(error);
        }
        let segments = split_path(&request.path);
        let continuous = request.query_param("feed") == Some("continuous");
        if let [db, endpoint] = segments.as_slice() {
            if endpoint == "_changes" && continuous && request.method == Method::Get {
                let opened = self
                    .authenticate(request, false)
                    .and_then(|()| self.open_changes(db, request));
                let stream: Box<dyn ChunkStream> = match opened {
                    Ok(stream) => Box::new(stream),
                    Err(fail) => Box::new(whole_body(fail.into_response())),
                };
                return Ok(stream);
            }
        }
        Ok(Box::new(whole_body(self.handle(request))))
    }
}

fn whole_body(response: Response) -> ScriptedStream {
    ScriptedStream::new(response.status, vec![Ok(response.body)])
}

/// `since` as the request gave it.
enum Since {
    Seq(u64),
    Now,
}

impl Since {
    fn resolve(&self, current: u64) -> u64 {
        match self {
            Since::Seq(seq) => *seq,
            Since::Now => current,
        }
    }
}

struct ChangesParams {
    since: Since,
    limit: Option<usize>,
    descending: bool,
    include_docs: bool,
    filter: ChangeFilter,
    heartbeat: Option<Duration>,
    timeout: Option<Duration>,
}

impl ChangesParams {
    fn from_request(request: &Request) -> Result<Self, Fail> {
        let number = |name: &str| -> Result<Option<u64>, Fail> {
            request
                .query_param(name)
                .map(|raw| {
                    raw.parse::<u64>()
                        .map_err(|_| Fail::bad_request(format!("invalid value for {name}")))
                })
                .transpose()
        };
        let flag = |name: &str| request.query_param(name) == Some("true");
        let since = match request.query_param("since") {
            Some("now") => Since::Now,
            _ => Since::Seq(number("since")?.unwrap_or(0)),
        };
        Ok(Self {
            since,
            limit: number("limit")?.map(|n| n as usize),
            descending: flag("descending"),
            include_docs: flag("include_docs"),
            filter: ChangeFilter::parse(request.query_param("filter"))?,
            heartbeat: number("heartbeat")?.map(Duration::from_millis),
            timeout: number("timeout")?.map(Duration::from_millis),
        })
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        .collect()
}

fn valid_db_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_$()+-/".contains(c))
}

/// Replication endpoints may be URLs; the last path segment names the database.
fn local_db_name(endpoint: &str) -> String {
    if endpoint.contains("://") {
        let name = endpoint.trim_end_matches('/').rsplit('/').next().unwrap_or(endpoint);
        percent_decode_str(name).decode_utf8_lossy().into_owned()
    } else {
        endpoint.to_string()
    }
}

fn object_body(request: &Request) -> Result<Map<String, Wire>, Fail> {
    let bytes = request.body.as_deref().unwrap_or_default();
    match serde_json::from_slice(bytes) {
        Ok(Wire::Object(body)) => Ok(body),
        Ok(_) => Err(Fail::bad_request("Document must be a JSON object")),
        Err(_) => Err(Fail::bad_request("invalid UTF-8 JSON")),
    }
}

fn rev_of(body: &Map<String, Wire>, request: &Request) -> Option<String> {
    body.get("_rev")
        .and_then(Wire::as_str)
        .or_else(|| request.query_param("rev"))
        .map(str::to_string)
}

fn rows_response((total, offset, rows): (usize, usize, Vec<IndexRow>)) -> Response {
    let rows: Vec<Wire> = rows.iter().map(IndexRow::to_wire).collect();
    Response::json(200, &json!({"total_rows": total, "offset": offset, "rows": rows}))
}
