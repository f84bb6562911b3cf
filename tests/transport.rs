//! Integration tests for the CDP connection layer.
//!
//! Each test spins up a mock WebSocket server with scripted behavior,
//! connects a `Connector`, and checks the wire-level contract: command
//! correlation, session routing, timeouts, protocol errors, and the
//! per-target attach lock.

use std::net::SocketAddr;
use std::time::Duration;

use cdp_skill::cdp::{Connector, ConnectorConfig, Reconnect};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

// =============================================================================
// Mock server helpers
// =============================================================================

/// Start a server answering every command with `{"id": N, "result": F(cmd)}`.
async fn start_server(result_fn: fn(&Value) -> Value) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut sink, mut source) = ws.split();
                while let Some(Ok(msg)) = source.next().await {
                    if let Message::Text(text) = msg {
                        let cmd: Value = serde_json::from_str(&text).unwrap();
                        let response = json!({"id": cmd["id"], "result": result_fn(&cmd)});
                        sink.send(Message::Text(response.to_string().into()))
                            .await
                            .unwrap();
                    }
                }
            });
        }
    });
    (addr, handle)
}

async fn start_echo_server() -> (SocketAddr, JoinHandle<()>) {
    start_server(|_| json!({})).await
}

/// A server that accepts commands but never answers them.
async fn start_silent_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (_sink, mut source) = ws.split();
                while source.next().await.is_some() {}
            });
        }
    });
    (addr, handle)
}

/// A server that answers every command with a protocol error.
async fn start_error_server(code: i64, message: &'static str) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut sink, mut source) = ws.split();
                while let Some(Ok(msg)) = source.next().await {
                    if let Message::Text(text) = msg {
                        let cmd: Value = serde_json::from_str(&text).unwrap();
                        let response = json!({
                            "id": cmd["id"],
                            "error": {"code": code, "message": message},
                        });
                        sink.send(Message::Text(response.to_string().into()))
                            .await
                            .unwrap();
                    }
                }
            });
        }
    });
    (addr, handle)
}

/// A mock browser endpoint: answers `Target.attachToTarget` with a session
/// id derived from the target, echoes everything else, and emits a
/// session-scoped event after each session command.
async fn start_browser_like_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut sink, mut source) = ws.split();
                while let Some(Ok(msg)) = source.next().await {
                    let Message::Text(text) = msg else { continue };
                    let cmd: Value = serde_json::from_str(&text).unwrap();
                    let method = cmd["method"].as_str().unwrap_or_default();
                    if method == "Target.attachToTarget" {
                        let target = cmd["params"]["targetId"].as_str().unwrap_or("T");
                        let response = json!({
                            "id": cmd["id"],
                            "result": {"sessionId": format!("session-for-{target}")},
                        });
                        sink.send(Message::Text(response.to_string().into()))
                            .await
                            .unwrap();
                    } else {
                        let response = json!({
                            "id": cmd["id"],
                            "result": {"echoed": method},
                        });
                        sink.send(Message::Text(response.to_string().into()))
                            .await
                            .unwrap();
                        if let Some(session_id) = cmd["sessionId"].as_str() {
                            let event = json!({
                                "method": "Page.loadEventFired",
                                "params": {"timestamp": 1.0},
                                "sessionId": session_id,
                            });
                            sink.send(Message::Text(event.to_string().into()))
                                .await
                                .unwrap();
                        }
                    }
                }
            });
        }
    });
    (addr, handle)
}

fn fast_config() -> ConnectorConfig {
    ConnectorConfig {
        connect_timeout: Duration::from_secs(2),
        command_timeout: Duration::from_millis(500),
        channel_capacity: 32,
        reconnect: Reconnect {
            attempts: 1,
            first_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn commands_receive_correlated_responses() {
    let (addr, server) = start_server(|cmd| json!({"method": cmd["method"]})).await;
    let connector = Connector::connect(&format!("ws://{addr}"), fast_config())
        .await
        .unwrap();

    let first = connector.send("Browser.getVersion", None).await.unwrap();
    let second = connector.send("Target.getTargets", None).await.unwrap();
    assert_eq!(first["method"], "Browser.getVersion");
    assert_eq!(second["method"], "Target.getTargets");

    connector.close().await;
    server.abort();
}

#[tokio::test]
async fn concurrent_commands_multiplex_on_one_socket() {
    let (addr, server) = start_server(|cmd| json!({"id_seen": cmd["id"]})).await;
    let connector = Connector::connect(&format!("ws://{addr}"), fast_config())
        .await
        .unwrap();

    let (a, b, c) = tokio::join!(
        connector.send("One", None),
        connector.send("Two", None),
        connector.send("Three", None),
    );
    let mut ids: Vec<u64> = [a, b, c]
        .into_iter()
        .map(|r| r.unwrap()["id_seen"].as_u64().unwrap())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3, "each command must keep its own id");

    connector.close().await;
    server.abort();
}

#[tokio::test]
async fn unresponsive_server_times_out_the_command() {
    let (addr, server) = start_silent_server().await;
    let connector = Connector::connect(&format!("ws://{addr}"), fast_config())
        .await
        .unwrap();

    let err = connector.send("Page.navigate", None).await.unwrap_err();
    assert!(
        err.to_string().contains("timed out"),
        "unexpected error: {err}"
    );

    connector.close().await;
    server.abort();
}

#[tokio::test]
async fn protocol_errors_surface_code_and_message() {
    let (addr, server) = start_error_server(-32000, "No target with given id found").await;
    let connector = Connector::connect(&format!("ws://{addr}"), fast_config())
        .await
        .unwrap();

    let err = connector
        .send("Target.attachToTarget", Some(json!({"targetId": "X"})))
        .await
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("-32000"), "{text}");
    assert!(text.contains("No target with given id found"), "{text}");

    connector.close().await;
    server.abort();
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    // Bind then drop to get a port that refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = Connector::connect(&format!("ws://{addr}"), fast_config()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn sessions_route_commands_and_events_by_session_id() {
    let (addr, server) = start_browser_like_server().await;
    let connector = Connector::connect(&format!("ws://{addr}"), fast_config())
        .await
        .unwrap();

    let session = connector.attach("TAB1").await.unwrap();
    assert_eq!(session.session_id(), "session-for-TAB1");
    assert_eq!(session.target_id(), "TAB1");

    let mut load_rx = session.subscribe("Page.loadEventFired");
    let result = session.send("Page.enable", None).await.unwrap();
    assert_eq!(result["echoed"], "Page.enable");

    let event = tokio::time::timeout(Duration::from_secs(1), load_rx.recv())
        .await
        .expect("event should arrive")
        .expect("channel open");
    assert_eq!(event.method, "Page.loadEventFired");
    assert_eq!(event.session_id.as_deref(), Some("session-for-TAB1"));

    connector.close().await;
    server.abort();
}

#[tokio::test]
async fn attach_serializes_per_target() {
    let (addr, server) = start_browser_like_server().await;
    let connector = Connector::connect(&format!("ws://{addr}"), fast_config())
        .await
        .unwrap();

    // The first session holds the target lock; a second attach to the same
    // target must wait until the first session is dropped.
    let first = connector.attach("TAB1").await.unwrap();

    let second_attempt =
        tokio::time::timeout(Duration::from_millis(200), connector.attach("TAB1")).await;
    assert!(
        second_attempt.is_err(),
        "second attach should block while the first session lives"
    );

    // A different target attaches immediately.
    let other = tokio::time::timeout(Duration::from_millis(500), connector.attach("TAB2"))
        .await
        .expect("different target must not block")
        .unwrap();
    assert_eq!(other.session_id(), "session-for-TAB2");

    drop(first);
    let retried = tokio::time::timeout(Duration::from_secs(1), connector.attach("TAB1"))
        .await
        .expect("attach should proceed after the first session dropped")
        .unwrap();
    assert_eq!(retried.session_id(), "session-for-TAB1");

    connector.close().await;
    server.abort();
}

#[tokio::test]
async fn crashed_target_fails_subsequent_commands() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sink, mut source) = ws.split();
        while let Some(Ok(msg)) = source.next().await {
            let Message::Text(text) = msg else { continue };
            let cmd: Value = serde_json::from_str(&text).unwrap();
            let method = cmd["method"].as_str().unwrap_or_default();
            if method == "Target.attachToTarget" {
                let response = json!({"id": cmd["id"], "result": {"sessionId": "S1"}});
                sink.send(Message::Text(response.to_string().into()))
                    .await
                    .unwrap();
            } else {
                // Answer the command, then crash the target.
                let response = json!({"id": cmd["id"], "result": {}});
                sink.send(Message::Text(response.to_string().into()))
                    .await
                    .unwrap();
                let crash = json!({
                    "method": "Inspector.targetCrashed",
                    "params": {},
                    "sessionId": "S1",
                });
                sink.send(Message::Text(crash.to_string().into()))
                    .await
                    .unwrap();
            }
        }
    });

    let connector = Connector::connect(&format!("ws://{addr}"), fast_config())
        .await
        .unwrap();
    let session = connector.attach("TAB1").await.unwrap();

    // The first command succeeds and provokes the crash event.
    session.send("Page.enable", None).await.unwrap();

    // Give the io task a moment to route the crash event.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.has_crashed());

    let err = session.send("Runtime.enable", None).await.unwrap_err();
    assert!(err.to_string().contains("crashed"), "{err}");

    connector.close().await;
    server.abort();
}

#[tokio::test]
async fn echo_server_supports_browser_level_subscriptions() {
    let (addr, server) = start_echo_server().await;
    let connector = Connector::connect(&format!("ws://{addr}"), fast_config())
        .await
        .unwrap();

    // Browser-level subscription registers without error even when the
    // server never emits that event.
    let mut rx = connector.subscribe("Target.targetCreated");
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err(),
        "no event expected"
    );

    connector.close().await;
    server.abort();
}
