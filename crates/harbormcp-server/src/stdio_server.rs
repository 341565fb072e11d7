//! Stdio server loop: the protocol channel is stdin/stdout, one JSON-RPC
//! envelope per line; stderr carries diagnostics.
//!
//! The loop owns a single synthetic session so subscription state and the
//! log level behave exactly as over HTTP, and forwards the session's
//! outbound event queue (list-changed announcements, log messages) to
//! stdout between inbound lines.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

use harbormcp_auth::clock::Clock;
use harbormcp_protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcResponse, jsonrpc_error, validate_message,
};

use crate::error::ServerResult;
use crate::service::McpService;

/// Run the service over arbitrary line-framed streams until the reader
/// closes.
pub async fn run_over<R, W>(service: McpService, reader: R, writer: W) -> ServerResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let session = service.sessions().allocate(None);
    let mut live = session.subscribe_live();

    let mut lines = FramedRead::new(BufReader::new(reader), LinesCodec::new());
    let mut out = FramedWrite::new(writer, LinesCodec::new());

    loop {
        tokio::select! {
            line = lines.next() => {
                let Some(line) = line else { break };
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "failed to read line from stdin");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                session.touch(service.sessions().clock().unix_millis());
                match validate_message(&line) {
                    Ok(JsonRpcMessage::Request(request)) => {
                        handle_request_line(&service, &session, request, &mut out).await?;
                    }
                    Ok(JsonRpcMessage::Notification(notification)) => {
                        service.handle_notification(notification, &session);
                    }
                    Ok(JsonRpcMessage::Response(response)) => {
                        debug!(id = %response.id, "dropping unexpected response from peer");
                    }
                    Err(e) => {
                        warn!(code = e.code, error = %e.message, "malformed inbound message");
                        // Parse failures are answered with a null-id error.
                        let body = serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": null,
                            "error": { "code": e.code, "message": e.message },
                        });
                        write_line(&mut out, body.to_string()).await?;
                    }
                }
            }
            event = live.recv() => {
                if let Ok(event) = event {
                    write_line(&mut out, event.data).await?;
                }
            }
        }
    }

    service.sessions().terminate(&session.id);
    debug!("stdio server loop finished");
    Ok(())
}

/// Run the service over this process's stdin/stdout.
pub async fn run(service: McpService) -> ServerResult<()> {
    run_over(service, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Dispatch one request, writing any progress frames as notification lines
/// ahead of the response line.
async fn handle_request_line<W>(
    service: &McpService,
    session: &Arc<crate::session::Session>,
    request: harbormcp_protocol::JsonRpcRequest,
    out: &mut FramedWrite<W, LinesCodec>,
) -> ServerResult<()>
where
    W: AsyncWrite + Unpin,
{
    let request_id = request.id.clone();
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let task_service = service.clone();
    let task_session = Arc::clone(session);
    let handler = tokio::spawn(async move {
        task_service
            .handle_request_streaming(request, &task_session, progress_tx)
            .await
    });

    // The sink closes when the handler finishes; every frame received
    // before that precedes the response on the wire.
    while let Some(params) = progress_rx.recv().await {
        let notification = JsonRpcNotification::new(
            "notifications/progress",
            serde_json::to_value(&params).ok(),
        );
        match serde_json::to_string(&notification) {
            Ok(json) => write_line(out, json).await?,
            Err(e) => warn!(error = %e, "failed to serialize progress notification"),
        }
    }

    let response = match handler.await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "request task failed");
            JsonRpcResponse::error(
                request_id,
                jsonrpc_error(-32603, "request handler failed", None),
            )
        }
    };
    match serde_json::to_string(&response) {
        Ok(json) => write_line(out, json).await?,
        Err(e) => warn!(error = %e, "failed to serialize reply"),
    }
    Ok(())
}

async fn write_line<W>(
    out: &mut FramedWrite<W, LinesCodec>,
    line: String,
) -> ServerResult<()>
where
    W: AsyncWrite + Unpin,
{
    out.send(line)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::demo_service;
    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as AsyncBufReader};

    #[tokio::test]
    async fn serves_the_handshake_and_answers_parse_errors_with_null_id() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let task = tokio::spawn(run_over(demo_service(), server_read, server_write));

        let (client_read, mut client_write) = tokio::io::split(client);
        let mut lines = AsyncBufReader::new(client_read).lines();

        client_write
            .write_all(
                concat!(
                    r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":"#,
                    r#"{"protocolVersion":"2025-06-18","capabilities":{},"#,
                    r#""clientInfo":{"name":"t","version":"0"}}}"#,
                    "\n"
                )
                .as_bytes(),
            )
            .await
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let reply: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(reply["id"], 0);
        assert_eq!(reply["result"]["serverInfo"]["name"], "harbormcp-demo");

        client_write.write_all(b"this is not json\n").await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let reply: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(reply["id"], Value::Null);
        assert_eq!(reply["error"]["code"], -32700);

        drop(client_write);
        task.await.unwrap().unwrap();
    }
}
