//! End-to-end tests of the transfer loop against the in-memory backend.

use std::io::Cursor;
use std::path::PathBuf;

use lfs_swift::memory::MemoryBackend;
use lfs_swift::{
    Agent, Config, Error, ObjectAction, Outcome, TransferObject, TransferOptions, handshake,
};
use lfs_swift_proto::{Codec, Operation};
use serde_json::{Value, json};

type TestCodec = Codec<Cursor<Vec<u8>>, Vec<u8>>;

fn request(op: &str, oid: &str, size: u64, href: &str, token: &str) -> String {
    let mut msg = json!({
        "event": op,
        "oid": oid,
        "size": size,
        "action": {"href": href, "header": {"x-auth-token": token}},
    });
    if op == "upload" {
        msg["path"] = json!(format!("/path/to/{oid}"));
    }
    format!("{msg}\n")
}

fn session(op: &str, objects: &[(&str, u64)]) -> String {
    let mut input: String = objects
        .iter()
        .map(|(oid, size)| request(op, oid, *size, "url/container", "token"))
        .collect();
    input.push_str("{\"event\":\"terminate\"}\n");
    input
}

fn codec(input: &str) -> TestCodec {
    Codec::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
}

fn config(op: Operation) -> Config {
    Config::new(op, "tmpdir").segment_size(5)
}

/// Runs the loop and returns its result plus every emitted line as JSON.
fn run(op: Operation, backend: &MemoryBackend, input: &str) -> (Result<(), Error>, Vec<Value>) {
    let mut codec = codec(input);
    let result = Agent::new(config(op), backend.clone()).run(&mut codec);
    let (_, out) = codec.into_inner();
    (result, parse_lines(&out))
}

fn parse_lines(out: &[u8]) -> Vec<Value> {
    String::from_utf8(out.to_vec())
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn progress(oid: &str, so_far: u64, since_last: u64) -> Value {
    json!({"event": "progress", "oid": oid, "bytesSoFar": so_far, "bytesSinceLast": since_last})
}

fn complete(oid: &str) -> Value {
    json!({"event": "complete", "oid": oid})
}

fn failed(oid: &str, message: &str) -> Value {
    json!({"event": "complete", "oid": oid, "error": {"code": 2, "message": message}})
}

/// Sum of `bytesSinceLast` over all progress events for `oid`.
fn bytes_reported(events: &[Value], oid: &str) -> u64 {
    events
        .iter()
        .filter(|e| e["event"] == "progress" && e["oid"] == oid)
        .map(|e| e["bytesSinceLast"].as_u64().unwrap())
        .sum()
}

#[test]
fn upload_session_reports_segments_and_failures() {
    let backend = MemoryBackend::new();
    backend
        .respond([Outcome::done(ObjectAction::Upload, "obj1")])
        .respond([
            Outcome::segment("obj2", 5),
            Outcome::segment("obj2", 5),
            Outcome::done(ObjectAction::Upload, "obj2"),
        ])
        .respond([Outcome::failed(ObjectAction::Upload, "obj3", "failure")]);

    let input = session("upload", &[("obj1", 3), ("obj2", 10), ("obj3", 5)]);
    let (result, events) = run(Operation::Upload, &backend, &input);
    result.unwrap();

    assert_eq!(
        events,
        vec![
            progress("obj1", 3, 3),
            complete("obj1"),
            progress("obj2", 5, 5),
            progress("obj2", 10, 5),
            complete("obj2"),
            failed("obj3", "failure"),
        ]
    );
    assert_eq!(bytes_reported(&events, "obj1"), 3);
    assert_eq!(bytes_reported(&events, "obj2"), 10);
    assert_eq!(bytes_reported(&events, "obj3"), 0);

    let calls = backend.calls();
    assert_eq!(calls.len(), 3);
    for (call, oid) in calls.iter().zip(["obj1", "obj2", "obj3"]) {
        assert_eq!(call.container, "container");
        assert_eq!(
            call.object,
            TransferObject::Upload {
                path: PathBuf::from(format!("/path/to/{oid}")),
                name: oid.to_owned(),
            }
        );
    }
    assert_eq!(
        backend.connects(),
        vec![TransferOptions::new("url", "token", "container", 5, "tmpdir", false)]
    );
    assert_eq!(backend.releases(), 1);
}

#[test]
fn download_session_reports_path_and_failures() {
    let backend = MemoryBackend::new();
    backend
        .respond([Outcome::done(ObjectAction::Download, "obj1")])
        .respond([Outcome::failed(ObjectAction::Download, "obj2", "failure")]);

    let input = session("download", &[("obj1", 3), ("obj2", 10)]);
    let (result, events) = run(Operation::Download, &backend, &input);
    result.unwrap();

    assert_eq!(
        events,
        vec![
            progress("obj1", 3, 3),
            json!({"event": "complete", "oid": "obj1", "path": "tmpdir/obj1"}),
            failed("obj2", "failure"),
        ]
    );
    let objects: Vec<TransferObject> = backend.calls().into_iter().map(|c| c.object).collect();
    assert_eq!(
        objects,
        vec![
            TransferObject::Download { name: "obj1".into() },
            TransferObject::Download { name: "obj2".into() },
        ]
    );
    assert_eq!(backend.releases(), 1);
}

#[test]
fn terminate_before_any_request_opens_nothing() {
    for line in ["{\"event\":\"terminate\"}\n", "{\"type\":\"terminate\"}\n", ""] {
        let backend = MemoryBackend::new();
        let (result, events) = run(Operation::Upload, &backend, line);
        result.unwrap();
        assert!(events.is_empty());
        assert!(backend.connects().is_empty());
        assert_eq!(backend.releases(), 0);
    }
}

#[test]
fn end_of_input_ends_session_cleanly() {
    let backend = MemoryBackend::new();
    backend.respond([Outcome::done(ObjectAction::Upload, "obj1")]);

    let input = request("upload", "obj1", 4, "url/container", "token");
    let (result, events) = run(Operation::Upload, &backend, &input);
    result.unwrap();
    assert_eq!(events, vec![progress("obj1", 4, 4), complete("obj1")]);
    assert_eq!(backend.releases(), 1);
}

#[test]
fn call_fault_is_fatal_and_releases_session() {
    let backend = MemoryBackend::new();
    backend
        .respond([Outcome::done(ObjectAction::Upload, "obj1")])
        .fault("authentication rejected");

    let input = session("upload", &[("obj1", 3), ("obj2", 3), ("obj3", 3)]);
    let (result, events) = run(Operation::Upload, &backend, &input);

    assert!(matches!(result, Err(Error::Storage(ref m)) if m == "authentication rejected"));
    assert_eq!(events, vec![progress("obj1", 3, 3), complete("obj1")]);
    assert_eq!(backend.calls().len(), 2);
    assert_eq!(backend.releases(), 1);
}

#[test]
fn fault_mid_stream_is_fatal() {
    let backend = MemoryBackend::new();
    backend.respond_then_fail([Outcome::segment("obj1", 5)], "connection reset");

    let input = session("upload", &[("obj1", 10)]);
    let (result, events) = run(Operation::Upload, &backend, &input);

    assert!(matches!(result, Err(Error::Storage(_))));
    assert_eq!(events, vec![progress("obj1", 5, 5)]);
    assert_eq!(backend.releases(), 1);
}

#[test]
fn malformed_request_is_fatal() {
    let backend = MemoryBackend::new();
    backend.respond([Outcome::done(ObjectAction::Upload, "obj1")]);

    let mut input = request("upload", "obj1", 3, "url/container", "token");
    input.push_str("{\"event\":\"upload\",\"oid\":\"obj2\"}\n");
    let (result, events) = run(Operation::Upload, &backend, &input);

    assert!(matches!(
        result,
        Err(Error::Protocol(lfs_swift_proto::Error::Malformed { .. }))
    ));
    assert_eq!(events.len(), 2);
    assert_eq!(backend.releases(), 1);
}

#[test]
fn unexpected_message_is_fatal() {
    let backend = MemoryBackend::new();
    let (result, events) = run(Operation::Upload, &backend, "{\"event\":\"status\"}\n");
    assert!(matches!(
        result,
        Err(Error::Protocol(lfs_swift_proto::Error::Unexpected(_)))
    ));
    assert!(events.is_empty());
}

#[test]
fn request_against_session_direction_is_fatal() {
    let backend = MemoryBackend::new();
    let input = session("download", &[("obj1", 3)]);
    let (result, events) = run(Operation::Upload, &backend, &input);
    assert!(matches!(
        result,
        Err(Error::Protocol(lfs_swift_proto::Error::Unexpected(_)))
    ));
    assert!(events.is_empty());
    assert!(backend.calls().is_empty());
}

#[test]
fn invalid_href_is_fatal() {
    let backend = MemoryBackend::new();
    let input = request("download", "obj1", 3, "container", "token");
    let (result, _) = run(Operation::Download, &backend, &input);
    assert!(matches!(result, Err(Error::InvalidHref(_))));
    assert!(backend.connects().is_empty());
}

#[test]
fn each_request_brings_its_own_token() {
    let backend = MemoryBackend::new();
    backend
        .respond([Outcome::done(ObjectAction::Download, "obj1")])
        .respond([Outcome::done(ObjectAction::Download, "obj2")]);

    let mut input = request("download", "obj1", 1, "https://a/v1/AUTH_x/lfs", "first");
    input.push_str(&request("download", "obj2", 1, "https://b/v1/AUTH_x/other/", "second"));
    let (result, _) = run(Operation::Download, &backend, &input);
    result.unwrap();

    let calls = backend.calls();
    assert_eq!(calls[0].options.auth_token, "first");
    assert_eq!(calls[0].options.storage_url, "https://a/v1/AUTH_x");
    assert_eq!(calls[1].options.auth_token, "second");
    assert_eq!(calls[1].options.storage_url, "https://b/v1/AUTH_x");
    assert!(calls.iter().all(|c| c.container == "lfs"));
    assert_eq!(backend.connects().len(), 1);
}

#[test]
fn missing_object_result_still_completes() {
    let backend = MemoryBackend::new();
    backend.respond([Outcome::segment("obj1", 5)]);

    let input = session("upload", &[("obj1", 10), ("obj2", 2)]);
    let (result, events) = run(Operation::Upload, &backend, &input);
    result.unwrap();

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], progress("obj1", 5, 5));
    assert_eq!(events[1]["event"], "complete");
    assert_eq!(events[1]["oid"], "obj1");
    assert_eq!(events[1]["error"]["code"], 2);
    // Unscripted call: the backend yields nothing for obj2.
    assert_eq!(events[2]["oid"], "obj2");
    assert_eq!(events[2]["error"]["code"], 2);
}

#[test]
fn exactly_one_complete_per_request_and_it_comes_last() {
    let backend = MemoryBackend::new();
    backend
        .respond([
            Outcome::segment("a", 5),
            Outcome::segment("a", 5),
            Outcome::segment("a", 2),
            Outcome::done(ObjectAction::Upload, "a"),
        ])
        .respond([Outcome::done(ObjectAction::Upload, "b")])
        .respond([Outcome::done(ObjectAction::Upload, "c")]);

    let sizes = [("a", 12), ("b", 0), ("c", 5)];
    let (result, events) = run(Operation::Upload, &backend, &session("upload", &sizes));
    result.unwrap();

    for (oid, size) in sizes {
        let mine: Vec<&Value> = events.iter().filter(|e| e["oid"] == oid).collect();
        let completes = mine.iter().filter(|e| e["event"] == "complete").count();
        assert_eq!(completes, 1, "{oid}");
        assert_eq!(mine.last().unwrap()["event"], "complete", "{oid}");
        assert_eq!(bytes_reported(&events, oid), size, "{oid}");
    }
}

#[test]
fn handshake_acknowledges_init() {
    let mut codec = codec("{\"event\":\"init\",\"operation\":\"download\",\"remote\":\"origin\"}\n");
    assert_eq!(handshake(&mut codec).unwrap(), Operation::Download);
    let (_, out) = codec.into_inner();
    assert_eq!(out, b"{}\n");
}

#[test]
fn bad_handshake_writes_nothing() {
    for line in ["garbage\n", "{\"event\":\"upload\"}\n", ""] {
        let mut codec = codec(line);
        assert!(matches!(handshake(&mut codec), Err(Error::Protocol(_))), "{line}");
        let (_, out) = codec.into_inner();
        assert!(out.is_empty(), "{line}");
    }
}
