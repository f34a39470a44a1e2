//! End-to-end tests against the in-memory server.

use proptest::prelude::*;
use settee_client::{
    Attachment, BulkResult, ChangeEvent, ChangesOptions, CouchError, DbOptions, DeleteOutcome,
    FeedState, ReplicationRequest, ReplicationResult, Seq, ServerConfig, TransportError,
    ViewOptions, ViewQuery, ViewRow,
};
use settee_json::{Document, Value};
use settee_testkit::prelude::*;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Duration;

fn init_tracing() {
    // Another test may have installed it first.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn generation(rev: &str) -> u64 {
    rev.split_once('-')
        .and_then(|(n, _)| n.parse().ok())
        .expect("revision without generation")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn saved_documents_open_unchanged(doc in document_strategy()) {
        let couch = TestCouch::new();
        let db = couch.create_db("props");

        let saved = db.save_doc(doc).unwrap();
        let id = saved.id().unwrap().to_string();
        prop_assert!(!id.is_empty());
        prop_assert!(!saved.rev().unwrap().is_empty());
        prop_assert_eq!(db.open_doc(&id, None).unwrap(), saved);
    }

    #[test]
    fn deleting_the_current_revision_hides_the_document(
        id in doc_id_strategy(),
        doc in document_strategy()
    ) {
        let couch = TestCouch::new();
        let db = couch.create_db("props");

        let mut doc = doc;
        doc.set_id(id.clone());
        let saved = db.save_doc(doc).unwrap();
        db.delete_doc(&id, saved.rev().unwrap()).unwrap();
        prop_assert!(db.open_doc(&id, None).unwrap_err().is_not_found());
    }
}

#[test]
fn stale_revisions_conflict_on_every_write() {
    let couch = TestCouch::new();
    let db = couch.create_db("albums");
    let first = db.save_doc(Document::with_id("train").field("n", 1)).unwrap();
    let stale = first.rev().unwrap().to_string();
    db.save_doc(first.clone().field("n", 2)).unwrap();

    let mut outdated = Document::with_id("train").field("n", 3);
    outdated.set_rev(stale.clone());
    assert!(db.save_doc(outdated).unwrap_err().is_conflict());
    assert!(db.delete_doc("train", &stale).unwrap_err().is_conflict());

    let note = Attachment::new("note.txt", b"hi".to_vec(), "text/plain");
    assert!(db.put_attachment("train", Some(stale.as_str()), &note).unwrap_err().is_conflict());
    assert!(db
        .delete_attachment("train", Some(stale.as_str()), "note.txt")
        .unwrap_err()
        .is_conflict());
}

#[test]
fn attachments_round_trip_and_delete_twice() {
    let couch = TestCouch::new();
    let db = couch.create_db("files");
    db.save_doc(Document::with_id("doc")).unwrap();

    let png = Attachment::new("pixel.png", vec![0x89, b'P', b'N', b'G'], "image/png");
    let stored = db.put_attachment("doc", None, &png).unwrap();
    assert_eq!(db.fetch_attachment("doc", "pixel.png").unwrap(), png.content);

    let opened = db.open_doc("doc", None).unwrap();
    assert!(opened.contains_key("_attachments"));

    let first = db.delete_attachment("doc", None, "pixel.png").unwrap();
    let second = db.delete_attachment("doc", None, "pixel.png").unwrap();
    assert!(generation(&first.rev) > generation(&stored.rev));
    assert!(generation(&second.rev) > generation(&first.rev));
    assert!(db.fetch_attachment("doc", "pixel.png").unwrap_err().is_not_found());
}

#[test]
fn explicit_revision_skips_lookup() {
    let couch = TestCouch::new();
    let db = couch.create_db("files");
    let saved = db.save_doc(Document::with_id("doc")).unwrap();
    let note = Attachment::new("a.txt", b"a".to_vec(), "text/plain");

    couch.couch.clear_log();
    db.put_attachment("doc", saved.rev(), &note).unwrap();
    assert_eq!(couch.couch.request_log(), vec!["PUT /files/doc/a.txt"]);

    couch.couch.clear_log();
    db.delete_attachment("doc", None, "a.txt").unwrap();
    assert_eq!(
        couch.couch.request_log(),
        vec!["HEAD /files/doc", "DELETE /files/doc/a.txt"]
    );
}

#[test]
fn resolved_revision_can_go_stale() {
    let couch = TestCouch::new();
    let db = couch.create_db("race");
    db.save_doc(Document::with_id("doc")).unwrap();

    let resolved = db.resolve_rev("doc", None).unwrap();
    let mut other_writer = db.open_doc("doc", None).unwrap();
    other_writer.insert("by", "someone else");
    db.save_doc(other_writer).unwrap();

    let note = Attachment::new("a.txt", b"a".to_vec(), "text/plain");
    assert!(db
        .put_attachment("doc", Some(resolved.as_str()), &note)
        .unwrap_err()
        .is_conflict());
    assert!(db.resolve_rev("missing", None).unwrap_err().is_not_found());
}

#[test]
fn design_documents_keep_their_slash() {
    let couch = TestCouch::new();
    let db = couch.create_db("app");
    let saved = db
        .save_doc(Document::with_id("_design/app").field("language", "javascript"))
        .unwrap();
    assert_eq!(saved.id(), Some("_design/app"));
    assert!(couch.couch.request_log().contains(&"PUT /app/_design/app".to_string()));
    assert_eq!(db.lookup_doc_rev("_design/app").unwrap(), saved.rev().unwrap());
}

#[test]
fn views_include_documents_only_when_asked() {
    let couch = TestCouch::new();
    let db = couch.seeded_db("numbers", 4);
    couch.define_by_field("numbers", "by_n", "n");

    let query = ViewQuery::new("app", "by_n");
    let plain = db.fetch_view(&query).unwrap();
    assert_eq!(plain.total_rows, Some(4));
    let rows = plain.into_rows().unwrap();
    assert!(rows.iter().all(|row| row.doc.is_none()));
    assert_eq!(rows[0].value, Value::Null);

    let rows = db.fetch_view_docs(&query).unwrap();
    assert_eq!(rows.len(), 4);
    for row in &rows {
        let doc = row.doc.as_ref().expect("row without doc");
        assert_eq!(doc.id(), row.id.as_deref());
    }

    let ranged = query.with_options(
        ViewOptions::new()
            .start_key(&serde_json::json!(2))
            .end_key(&serde_json::json!(1))
            .descending(),
    );
    let keys: Vec<Value> = db
        .fetch_view(&ranged)
        .unwrap()
        .into_rows()
        .unwrap()
        .into_iter()
        .map(|row| row.key)
        .collect();
    assert_eq!(keys, vec![Value::Integer(2), Value::Integer(1)]);
}

#[test]
fn missing_view_is_not_found() {
    let couch = TestCouch::new();
    let db = couch.create_db("numbers");
    assert!(db
        .fetch_view(&ViewQuery::new("app", "nope"))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn all_docs_lists_live_documents() {
    let couch = TestCouch::new();
    let db = couch.seeded_db("listing", 3);
    let gone = db.open_doc("doc-1", None).unwrap();
    db.delete_doc("doc-1", gone.rev().unwrap()).unwrap();

    let result = db.all_docs(&ViewOptions::new().include_docs()).unwrap();
    assert_eq!(result.total_rows, Some(2));
    let ids: Vec<String> = result
        .rows()
        .map(|row| row.unwrap().id.unwrap())
        .collect();
    assert_eq!(ids, vec!["doc-0", "doc-2"]);
}

#[test]
fn all_docs_by_keys_keeps_unknown_keys() {
    let couch = TestCouch::new();
    let db = couch.seeded_db("lookup", 2);

    let keys = [serde_json::json!("doc-1"), serde_json::json!("ghost")];
    let entries = db
        .all_docs(&ViewOptions::new().keys(&keys).include_docs())
        .unwrap()
        .into_entries()
        .unwrap();
    assert_eq!(entries.len(), 2);
    match &entries[0] {
        ViewRow::Found(row) => {
            assert_eq!(row.id.as_deref(), Some("doc-1"));
            assert!(row.doc.is_some());
        }
        other => panic!("expected doc-1, got {other:?}"),
    }
    assert_eq!(
        entries[1],
        ViewRow::Missing {
            key: Value::Text("ghost".into()),
            error: "not_found".into(),
        }
    );
}

#[test]
fn bulk_save_reports_each_document() {
    let couch = TestCouch::new();
    let db = couch.create_db("bulk");
    db.save_doc(Document::with_id("taken")).unwrap();

    let results = db
        .save_docs(&[
            Document::with_id("fresh").field("n", 1),
            Document::with_id("taken").field("n", 2),
            Document::new().field("n", 3),
        ])
        .unwrap();
    assert!(matches!(&results[0], BulkResult::Saved(update) if update.id == "fresh"));
    assert!(matches!(&results[1], BulkResult::Failed { error, .. } if error == "conflict"));
    assert!(matches!(&results[2], BulkResult::Saved(update) if !update.id.is_empty()));
    assert_eq!(couch.couch.doc_count("bulk"), Some(3));
}

#[test]
fn follow_once_reports_three_writes_then_done() {
    let couch = TestCouch::new();
    let db = couch.seeded_db("feed", 3);

    let mut feed = db.follow_once(ChangesOptions::new()).unwrap();
    let events: Vec<ChangeEvent> = feed.by_ref().collect();
    let changes = events
        .iter()
        .filter(|e| matches!(e, ChangeEvent::Change(_)))
        .count();
    assert_eq!(changes, 3);
    assert!(!events.iter().any(|e| matches!(e, ChangeEvent::Error(_))));
    assert_eq!(
        events.last(),
        Some(&ChangeEvent::Done {
            last_seq: Seq::Number(3)
        })
    );
    assert_eq!(feed.state(), FeedState::Completed);
}

#[test]
fn follow_once_with_docs_and_since() {
    let couch = TestCouch::new();
    let db = couch.seeded_db("feed", 3);

    let events: Vec<ChangeEvent> = db
        .follow_once(ChangesOptions::new().since(2u64).include_docs())
        .unwrap()
        .collect();
    let ChangeEvent::Change(change) = &events[0] else {
        panic!("expected a change, got {:?}", events[0]);
    };
    assert_eq!(change.id, "doc-2");
    assert_eq!(change.doc.as_ref().and_then(|d| d.id()), Some("doc-2"));
    assert_eq!(events.len(), 2);
}

#[test]
fn continuous_feed_ends_on_server_timeout() {
    init_tracing();
    let couch =
        TestCouch::from_parts(MemoryCouch::new().with_chunk_size(7), ServerConfig::default());
    let db = couch.seeded_db("stream", 2);

    let mut feed = db
        .follow(
            ChangesOptions::continuous()
                .heartbeat(Duration::from_millis(5))
                .timeout(Duration::from_millis(30)),
        )
        .unwrap();
    let events: Vec<ChangeEvent> = feed.by_ref().collect();
    assert_eq!(events.len(), 3);
    assert!(events[..2].iter().all(|e| matches!(e, ChangeEvent::Change(_))));
    assert_eq!(events[2], ChangeEvent::Done { last_seq: Seq::Number(2) });
    assert_eq!(feed.state(), FeedState::Completed);
}

#[test]
fn continuous_feed_sees_live_writes_until_cancelled() {
    init_tracing();
    let couch = TestCouch::new();
    let db = couch.create_db("live");

    let feed = db
        .follow(ChangesOptions::continuous().heartbeat(Duration::from_millis(10)))
        .unwrap();
    let (rx, cancel) = feed.spawn();

    db.save_doc(Document::with_id("first")).unwrap();
    db.save_doc(Document::with_id("second")).unwrap();
    for expected in ["first", "second"] {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(ChangeEvent::Change(change)) => assert_eq!(change.id, expected),
            other => panic!("expected change for {expected}, got {other:?}"),
        }
    }

    cancel.cancel();
    assert!(cancel.is_cancelled());
    db.save_doc(Document::with_id("third")).unwrap();
    db.save_doc(Document::with_id("fourth")).unwrap();

    let mut after_cancel = 0;
    loop {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(ChangeEvent::Change(_)) => after_cancel += 1,
            Ok(other) => panic!("unexpected event after cancel: {other:?}"),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => panic!("feed kept running after cancel"),
        }
    }
    assert!(after_cancel <= 1, "{after_cancel} events delivered after cancel");
}

#[test]
fn cancelling_an_idle_feed_without_heartbeat_disconnects() {
    init_tracing();
    let couch = TestCouch::new();
    let db = couch.create_db("quiet");

    let (rx, cancel) = db.follow(ChangesOptions::continuous()).unwrap().spawn();
    thread::sleep(Duration::from_millis(50));
    cancel.cancel();
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(2)),
        Err(RecvTimeoutError::Disconnected)
    );
}

#[test]
fn follow_on_missing_database_fails() {
    let couch = TestCouch::new();
    let db = couch.server.database("nowhere");
    assert!(db.follow(ChangesOptions::continuous()).unwrap_err().is_not_found());
    assert!(db.follow_once(ChangesOptions::new()).unwrap_err().is_not_found());
}

#[test]
fn creating_twice_reports_already_exists() {
    let couch = TestCouch::new();
    let db = couch.seeded_db("x", 1);

    assert_eq!(
        couch.server.create_db("x").unwrap_err(),
        CouchError::AlreadyExists { name: "x".into() }
    );
    assert!(couch.server.db_exists("x").unwrap());
    assert_eq!(db.info().unwrap().doc_count, 1);
}

#[test]
fn database_lifecycle() {
    let couch = TestCouch::with_admin();
    let db = couch.seeded_db("life", 2);

    let info = db.info().unwrap();
    assert_eq!(info.db_name, "life");
    assert_eq!(info.update_seq, Seq::Number(2));
    db.compact().unwrap();

    assert_eq!(couch.server.delete_db("life").unwrap(), DeleteOutcome::Deleted);
    assert!(!db.exists().unwrap());
    assert!(couch.server.delete_db("life").unwrap_err().is_not_found());
}

#[test]
fn one_shot_replication_copies_everything() {
    init_tracing();
    let couch = TestCouch::new();
    let source = couch.seeded_db("a", 3);

    let result = couch
        .server
        .replicate(&ReplicationRequest::new("a", "b").create_target())
        .unwrap();
    let ReplicationResult::Completed(summary) = result else {
        panic!("one-shot replication reported {result:?}");
    };
    assert!(!summary.history.is_empty());
    assert_eq!(summary.source_last_seq, Some(Seq::Number(3)));

    let target = couch.server.database("b");
    assert!(target.exists().unwrap());
    assert_eq!(target.info().unwrap().doc_count, 3);
    assert_eq!(
        target.open_doc("doc-0", None).unwrap(),
        source.open_doc("doc-0", None).unwrap()
    );
}

#[test]
fn replication_without_target_fails() {
    let couch = TestCouch::new();
    couch.seeded_db("a", 1);
    assert!(couch
        .server
        .replicate(&ReplicationRequest::new("a", "missing"))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn continuous_replication_only_reports_submission() {
    let couch = TestCouch::with_admin();
    let source = couch.seeded_db("a", 1);

    let result = couch
        .server
        .replicate(&ReplicationRequest::new("a", "b").create_target().continuous())
        .unwrap();
    assert!(matches!(result, ReplicationResult::Started { local_id: Some(_) }));

    let tasks = couch.server.active_tasks().unwrap();
    assert_eq!(tasks.len(), 1);

    source.save_doc(Document::with_id("later")).unwrap();
    assert!(couch.couch.current_rev("b", "later").is_some());
}

#[test]
fn admin_operations_need_credentials() {
    let couch = TestCouch::new();
    assert_eq!(
        couch.server.all_dbs().unwrap_err(),
        CouchError::AuthRequired { operation: "all_dbs" }
    );
    assert!(couch.couch.request_log().is_empty());

    let admin = TestCouch::with_admin();
    admin.create_db("one");
    assert_eq!(admin.server.all_dbs().unwrap(), vec!["one"]);

    let intruder = admin.server.database_with(
        "one",
        DbOptions::new().with_credentials(ADMIN_USER, "wrong"),
    );
    assert!(matches!(
        intruder.info(),
        Err(CouchError::Unauthorized { .. })
    ));
}

#[test]
fn transport_errors_pass_through() {
    init_tracing();
    let couch = TestCouch::new();
    let db = couch.create_db("flaky");
    couch.couch.fail_next(TransportError::retryable("connection reset"));

    let err = db.open_doc("doc", None).unwrap_err();
    assert_eq!(
        err,
        CouchError::Transport(TransportError::retryable("connection reset"))
    );
    assert!(err.is_retryable());
}

#[test]
fn uuids_are_distinct() {
    let couch = TestCouch::new();
    let mut uuids = couch.server.uuids(5).unwrap();
    assert_eq!(uuids.len(), 5);
    uuids.sort();
    uuids.dedup();
    assert_eq!(uuids.len(), 5);
}

#[test]
fn server_info_greets() {
    let couch = TestCouch::new();
    let info = couch.server.server_info().unwrap();
    assert_eq!(info.get("couchdb").and_then(Value::as_text), Some("Welcome"));
}
