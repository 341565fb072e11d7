//! Stdio transport tests against real child processes.

use std::time::Duration;

use harbormcp_protocol::{JsonRpcMessage, JsonRpcRequest, RequestId};
use harbormcp_transport::{StdioConfig, StdioTransport, Transport, TransportEvent};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

fn fast_config(command: &str) -> StdioConfig {
    let mut config = StdioConfig::new(command);
    config.graceful_timeout = Duration::from_millis(300);
    config.sigterm_timeout = Duration::from_millis(300);
    config
}

async fn next_event(
    rx: &mut tokio::sync::mpsc::Receiver<TransportEvent>,
) -> Option<TransportEvent> {
    timeout(Duration::from_secs(5), rx.recv()).await.ok()?
}

#[tokio::test]
async fn cat_echoes_envelopes_line_by_line() {
    let mut transport = StdioTransport::new(fast_config("cat"));
    let mut events = transport.start().await.unwrap();

    let request = JsonRpcRequest::new(0, "initialize", None);
    transport
        .send(JsonRpcMessage::Request(request))
        .await
        .unwrap();

    match next_event(&mut events).await {
        Some(TransportEvent::Message(JsonRpcMessage::Request(echoed))) => {
            assert_eq!(echoed.id, RequestId::Number(0));
            assert_eq!(echoed.method, "initialize");
        }
        other => panic!("expected echoed request, got {other:?}"),
    }

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_lines_are_dropped_and_stream_continues() {
    // First line is not JSON; the transport must warn, drop it, and keep
    // parsing later lines.
    let mut transport = StdioTransport::new(
        fast_config("sh").with_args(["-c", "echo 'not json at all'; exec cat"]),
    );
    let mut events = transport.start().await.unwrap();

    transport
        .send(JsonRpcMessage::Request(JsonRpcRequest::new(
            1,
            "tools/list",
            None,
        )))
        .await
        .unwrap();

    match next_event(&mut events).await {
        Some(TransportEvent::Message(JsonRpcMessage::Request(echoed))) => {
            assert_eq!(echoed.method, "tools/list");
        }
        other => panic!("expected echoed request after malformed line, got {other:?}"),
    }

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn child_exit_emits_closed_event() {
    let mut transport = StdioTransport::new(fast_config("sh").with_args(["-c", "exit 0"]));
    let mut events = transport.start().await.unwrap();

    match next_event(&mut events).await {
        Some(TransportEvent::Closed { .. }) => {}
        other => panic!("expected closed event, got {other:?}"),
    }
    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_stage_one_stdin_close() {
    // cat exits as soon as its stdin closes: stage 1 succeeds well before
    // the graceful window elapses.
    let mut config = StdioConfig::new("cat");
    config.graceful_timeout = Duration::from_secs(2);
    config.sigterm_timeout = Duration::from_secs(2);
    let mut transport = StdioTransport::new(config);
    let _events = transport.start().await.unwrap();

    let started = std::time::Instant::now();
    transport.shutdown().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn shutdown_stage_two_sigterm() {
    // sleep ignores stdin close but dies on SIGTERM: stage 2.
    let mut transport = StdioTransport::new(fast_config("sleep").with_args(["30"]));
    let _events = transport.start().await.unwrap();

    let started = std::time::Instant::now();
    transport.shutdown().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "graceful stage must elapse first");
    assert!(elapsed < Duration::from_millis(600), "must not reach the SIGKILL stage");
}

#[tokio::test]
async fn shutdown_stage_three_sigkill() {
    // The child ignores both stdin close and SIGTERM, forcing SIGKILL.
    let mut transport = StdioTransport::new(
        fast_config("sh").with_args(["-c", "trap '' TERM; while :; do sleep 0.05; done"]),
    );
    let _events = transport.start().await.unwrap();

    let started = std::time::Instant::now();
    transport.shutdown().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(600), "both stages must elapse");
}

#[tokio::test]
async fn raw_streams_reassemble_partial_chunks() {
    let (mut outbound_tx, outbound_rx) = tokio::io::duplex(1024);
    let (inbound_tx, inbound_rx) = tokio::io::duplex(1024);
    drop(inbound_rx);

    let mut transport = StdioTransport::from_raw(outbound_rx, inbound_tx);
    let mut events = transport.start().await.unwrap();

    // One envelope split across three writes; the framing layer must hold
    // the partial tail until the newline arrives.
    let wire = r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#;
    let (a, rest) = wire.split_at(10);
    let (b, c) = rest.split_at(17);
    outbound_tx.write_all(a.as_bytes()).await.unwrap();
    outbound_tx.flush().await.unwrap();
    outbound_tx.write_all(b.as_bytes()).await.unwrap();
    outbound_tx.flush().await.unwrap();
    outbound_tx
        .write_all(format!("{c}\n").as_bytes())
        .await
        .unwrap();
    outbound_tx.flush().await.unwrap();

    match next_event(&mut events).await {
        Some(TransportEvent::Message(JsonRpcMessage::Request(request))) => {
            assert_eq!(request.id, RequestId::Number(9));
            assert_eq!(request.method, "ping");
        }
        other => panic!("expected reassembled request, got {other:?}"),
    }

    transport.shutdown().await.unwrap();
}
