//! In-memory mock transport for connector and aggregator tests.
//!
//! Records every outbound message and answers requests through a
//! test-supplied responder closure, mirroring the shape a real server
//! would present on the other side of the channel.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use harbormcp_protocol::types::{
    Implementation, InitializeResult, PromptsCapability, ResourcesCapability, ServerCapabilities,
    ToolsCapability,
};
use harbormcp_protocol::{
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, LATEST_PROTOCOL_VERSION, RequestId,
    jsonrpc_error,
};
use harbormcp_transport::error::TransportResult;
use harbormcp_transport::{Transport, TransportEvent};

pub type Responder = Arc<dyn Fn(&JsonRpcRequest) -> Option<JsonRpcMessage> + Send + Sync>;

/// Shared control handle: inspect the sent log and inject inbound traffic.
#[derive(Clone)]
pub struct MockHandle {
    pub sent: Arc<Mutex<Vec<JsonRpcMessage>>>,
    tx: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
}

impl MockHandle {
    /// Push an inbound message to the connector.
    pub async fn inject(&self, message: JsonRpcMessage) {
        let tx = self.tx.lock().clone();
        if let Some(tx) = tx {
            tx.send(TransportEvent::Message(message)).await.unwrap();
        }
    }

    /// Simulate the peer closing the transport.
    pub async fn close(&self, reason: &str) {
        let tx = self.tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx
                .send(TransportEvent::Closed {
                    reason: Some(reason.to_string()),
                })
                .await;
        }
    }

    /// Outbound requests matching `method`.
    pub fn sent_requests(&self, method: &str) -> Vec<JsonRpcRequest> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                JsonRpcMessage::Request(r) if r.method == method => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    /// Outbound notifications matching `method`.
    pub fn sent_notification_count(&self, method: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| matches!(m, JsonRpcMessage::Notification(n) if n.method == method))
            .count()
    }

    /// Outbound responses (replies to server-initiated requests).
    pub fn sent_responses(&self) -> Vec<JsonRpcResponse> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                JsonRpcMessage::Response(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }
}

pub struct MockTransport {
    sent: Arc<Mutex<Vec<JsonRpcMessage>>>,
    tx: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
    responder: Responder,
}

impl MockTransport {
    pub fn with_responder(responder: Responder) -> (Self, MockHandle) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let tx = Arc::new(Mutex::new(None));
        let handle = MockHandle {
            sent: Arc::clone(&sent),
            tx: Arc::clone(&tx),
        };
        (
            Self {
                sent,
                tx,
                responder,
            },
            handle,
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start(&mut self) -> TransportResult<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(64);
        *self.tx.lock() = Some(tx);
        Ok(rx)
    }

    async fn send(&self, message: JsonRpcMessage) -> TransportResult<()> {
        self.sent.lock().push(message.clone());
        if let JsonRpcMessage::Request(request) = &message
            && let Some(reply) = (self.responder)(request)
        {
            let tx = self.tx.lock().clone();
            if let Some(tx) = tx {
                let _ = tx.send(TransportEvent::Message(reply)).await;
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> TransportResult<()> {
        *self.tx.lock() = None;
        Ok(())
    }

    fn endpoint(&self) -> String {
        "mock://".to_string()
    }
}

/// Capabilities advertising every `listChanged` flag.
pub fn full_capabilities() -> ServerCapabilities {
    ServerCapabilities {
        tools: Some(ToolsCapability {
            list_changed: Some(true),
        }),
        resources: Some(ResourcesCapability {
            list_changed: Some(true),
            subscribe: Some(true),
        }),
        prompts: Some(PromptsCapability {
            list_changed: Some(true),
        }),
        logging: None,
    }
}

pub fn initialize_result(capabilities: ServerCapabilities) -> InitializeResult {
    InitializeResult {
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
        server_info: Implementation::new("mock-server", "1.0.0"),
        capabilities,
        instructions: None,
    }
}

/// Responder answering initialize and ping; everything else gets `{}`.
pub fn basic_responder(capabilities: ServerCapabilities) -> Responder {
    Arc::new(move |request: &JsonRpcRequest| {
        let result = match request.method.as_str() {
            "initialize" => serde_json::to_value(initialize_result(capabilities.clone())).unwrap(),
            _ => json!({}),
        };
        Some(JsonRpcMessage::Response(JsonRpcResponse::success(
            request.id.clone(),
            result,
        )))
    })
}

/// Responder answering initialize but staying silent on everything else.
pub fn silent_responder() -> Responder {
    Arc::new(|request: &JsonRpcRequest| match request.method.as_str() {
        "initialize" => Some(JsonRpcMessage::Response(JsonRpcResponse::success(
            request.id.clone(),
            serde_json::to_value(initialize_result(ServerCapabilities::default())).unwrap(),
        ))),
        _ => None,
    })
}

/// Responder failing every non-initialize request with a protocol error.
pub fn failing_responder() -> Responder {
    Arc::new(|request: &JsonRpcRequest| {
        let message = match request.method.as_str() {
            "initialize" => {
                return Some(JsonRpcMessage::Response(JsonRpcResponse::success(
                    request.id.clone(),
                    serde_json::to_value(initialize_result(ServerCapabilities::default())).unwrap(),
                )));
            }
            _ => jsonrpc_error(-32603, "mock failure", None),
        };
        Some(JsonRpcMessage::Response(JsonRpcResponse::error(
            request.id.clone(),
            message,
        )))
    })
}

/// Shorthand for a numeric request id.
pub fn id(n: i64) -> RequestId {
    RequestId::Number(n)
}
