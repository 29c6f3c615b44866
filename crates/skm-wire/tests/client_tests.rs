// SPDX-License-Identifier: MIT OR Apache-2.0
use serde_json::{Value, json};
use skm_wire::{ClientConfig, JsonTcpClient, WireError};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

/// Accept one connection, read until one JSON value decodes, then answer with
/// `respond(request)`. Fragmenting the reply exercises the client's
/// accumulate-and-retry loop.
fn one_shot_server(
    respond: impl FnOnce(Value) -> Vec<Vec<u8>> + Send + 'static,
) -> (u16, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut accumulated = Vec::new();
        let mut chunk = [0u8; 1024];
        let request = loop {
            let n = stream.read(&mut chunk).unwrap();
            accumulated.extend_from_slice(&chunk[..n]);
            if let Ok(value) = serde_json::from_slice::<Value>(&accumulated) {
                break value;
            }
        };
        for fragment in respond(request) {
            stream.write_all(&fragment).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(20));
        }
    });
    (port, handle)
}

fn client(port: u16, timeout_ms: u64) -> JsonTcpClient {
    let config = ClientConfig::new("127.0.0.1", port)
        .with_read_timeout(Duration::from_millis(timeout_ms));
    JsonTcpClient::connect(&config).unwrap()
}

#[test]
fn round_trips_a_json_value() {
    let (port, handle) = one_shot_server(|req| vec![serde_json::to_vec(&req).unwrap()]);
    let mut client = client(port, 2000);
    let response = client.send(&json!({"foo": "bar"})).unwrap();
    assert_eq!(response, json!({"foo": "bar"}));
    handle.join().unwrap();
}

#[test]
fn reassembles_a_fragmented_response() {
    let (port, handle) = one_shot_server(|_| {
        let body = serde_json::to_vec(&json!({"use_count": {"os.path": 3}})).unwrap();
        let mid = body.len() / 2;
        vec![body[..mid].to_vec(), body[mid..].to_vec()]
    });
    let mut client = client(port, 2000);
    let response = client.send(&json!({"code": "aGk="})).unwrap();
    assert_eq!(response["use_count"]["os.path"], 3);
    handle.join().unwrap();
}

#[test]
fn times_out_when_no_complete_value_arrives() {
    // Server sends an undecodable prefix and then goes silent, keeping the
    // connection open past the client deadline.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut chunk = [0u8; 1024];
        let _ = stream.read(&mut chunk).unwrap();
        stream.write_all(b"{\"foo\":\"ba").unwrap();
        thread::sleep(Duration::from_millis(600));
    });
    let mut client = client(port, 200);
    let err = client.send(&json!({})).unwrap_err();
    assert!(matches!(err, WireError::Timeout { .. }), "got {err:?}");
    handle.join().unwrap();
}

#[test]
fn eof_before_value_is_a_protocol_error() {
    // Server closes the stream without replying.
    let (port, handle) = one_shot_server(|_| Vec::new());
    let mut client = client(port, 2000);
    let err = client.send(&json!({})).unwrap_err();
    assert!(matches!(err, WireError::Protocol { .. }), "got {err:?}");
    handle.join().unwrap();
}
