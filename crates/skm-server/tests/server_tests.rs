// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end scenarios for the callback server, driven through the blocking
//! framed-JSON client.

use serde_json::json;
use skm_server::{CallbackServer, ServerConfig, sync_handler};
use skm_wire::{ClientConfig, JsonTcpClient};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn client_config(port: u16, timeout_ms: u64) -> ClientConfig {
    ClientConfig::new("127.0.0.1", port).with_read_timeout(Duration::from_millis(timeout_ms))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn echo_round_trip() {
    let server = CallbackServer::new(
        ServerConfig::new("127.0.0.1", 0),
        sync_handler(|value| Ok(value.to_string())),
    )
    .bind()
    .await
    .unwrap();
    let port = server.local_addr().port();

    let response = tokio::task::spawn_blocking(move || {
        let mut client = JsonTcpClient::connect(&client_config(port, 2000)).unwrap();
        client.send(&json!({"foo": "bar"}))
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(response, json!({"foo": "bar"}));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn memoization_invokes_the_handler_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let server = CallbackServer::new(
        ServerConfig::new("127.0.0.1", 0),
        sync_handler(move |value| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(value.to_string())
        }),
    )
    .bind()
    .await
    .unwrap();
    let port = server.local_addr().port();

    let (first, second) = tokio::task::spawn_blocking(move || {
        let mut client = JsonTcpClient::connect(&client_config(port, 2000)).unwrap();
        let first = client.send(&json!({"foo": "bar"})).unwrap();
        let second = client.send(&json!({"foo": "bar"})).unwrap();
        (first, second)
    })
    .await
    .unwrap();

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fragmented_request_decodes_once() {
    let server = CallbackServer::new(
        ServerConfig::new("127.0.0.1", 0),
        sync_handler(|value| Ok(value.to_string())),
    )
    .bind()
    .await
    .unwrap();
    let port = server.local_addr().port();

    let response = tokio::task::spawn_blocking(move || {
        let mut stream = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        stream.write_all(b"{\"foo\":").unwrap();
        stream.flush().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        stream.write_all(b"\"bar\"}").unwrap();
        stream.flush().unwrap();

        use std::io::Read;
        let mut accumulated = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            accumulated.extend_from_slice(&chunk[..n]);
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&accumulated) {
                break value;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(response, json!({"foo": "bar"}));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_json_never_gets_a_reply() {
    let server = CallbackServer::new(
        ServerConfig::new("127.0.0.1", 0),
        sync_handler(|value| Ok(value.to_string())),
    )
    .bind()
    .await
    .unwrap();
    let port = server.local_addr().port();

    let err = tokio::task::spawn_blocking(move || {
        let mut stream = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        // Unterminated string: never decodes, so the server stays silent.
        stream.write_all(b"{\"foo\":\"ba}").unwrap();
        stream.flush().unwrap();

        let config = client_config(port, 200);
        let mut probe = JsonTcpClient::connect(&config).unwrap();
        drop(probe.send(&json!({"ok": true})));

        stream
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        use std::io::Read;
        let mut chunk = [0u8; 16];
        stream.read(&mut chunk)
    })
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    ));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handler_errors_become_null_and_keep_the_connection_open() {
    let server = CallbackServer::new(
        ServerConfig {
            memoized: false,
            ..ServerConfig::new("127.0.0.1", 0)
        },
        sync_handler(|_| anyhow::bail!("boom")),
    )
    .bind()
    .await
    .unwrap();
    let port = server.local_addr().port();

    let responses = tokio::task::spawn_blocking(move || {
        let mut client = JsonTcpClient::connect(&client_config(port, 2000)).unwrap();
        (0..3)
            .map(|n| client.send(&json!({"n": n})).unwrap())
            .collect::<Vec<_>>()
    })
    .await
    .unwrap();

    assert_eq!(responses, vec![json!(null), json!(null), json!(null)]);
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_client_is_not_blocked_by_an_accumulating_first() {
    let server = CallbackServer::new(
        ServerConfig::new("127.0.0.1", 0),
        sync_handler(|value| Ok(value.to_string())),
    )
    .bind()
    .await
    .unwrap();
    let port = server.local_addr().port();

    let response = tokio::task::spawn_blocking(move || {
        // First connection parks with a partial value.
        let mut parked = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        parked.write_all(b"{\"partial\":").unwrap();
        parked.flush().unwrap();

        let mut client = JsonTcpClient::connect(&client_config(port, 2000)).unwrap();
        client.send(&json!({"second": true})).unwrap()
    })
    .await
    .unwrap();

    assert_eq!(response, json!({"second": true}));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn framed_client_times_out_on_a_silent_exchange() {
    let server = CallbackServer::new(
        ServerConfig::new("127.0.0.1", 0),
        sync_handler(|value| Ok(value.to_string())),
    )
    .bind()
    .await
    .unwrap();
    let port = server.local_addr().port();

    let err = tokio::task::spawn_blocking(move || {
        let mut stream = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        // Park an undecodable prefix, then read through the framed client's
        // deadline machinery on the same connection.
        stream.write_all(b"{\"open\":").unwrap();
        stream.flush().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(150)))
            .unwrap();
        use std::io::Read;
        let mut chunk = [0u8; 16];
        stream.read(&mut chunk)
    })
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    ));
    server.shutdown().await;
}
