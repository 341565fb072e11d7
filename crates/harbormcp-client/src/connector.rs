//! The connector: one client-side JSON-RPC endpoint bound to one server.
//!
//! Owns the connection lifecycle (`disconnected` → `connecting` →
//! `connected` → `disconnecting`), request/response correlation, and the
//! dispatch of server-initiated requests and notifications. I/O is
//! delegated to a [`Transport`]; inbound traffic arrives on the transport's
//! event channel and is consumed by a single pump task, so inbound
//! messages are observed in arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex as StdMutex;
use parking_lot::RwLock as StdRwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex as TokioMutex, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use harbormcp_protocol::types::{
    ClientCapabilities, EmptyResult, Implementation, InitializeRequestParams, InitializeResult,
    RootsCapability,
};
use harbormcp_protocol::{
    ErrorCode, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    LATEST_PROTOCOL_VERSION, ProtocolError, RequestId, version,
};
use harbormcp_transport::{Transport, TransportEvent};

use crate::error::{ClientError, ClientResult};
use crate::handlers::HandlerRegistry;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorStatus {
    /// Initial and terminal state
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Waiting on an OAuth challenge (HTTP transports)
    PendingAuth,
    /// Handshake complete, requests allowed
    Connected,
    /// Teardown in progress
    Disconnecting,
}

impl ConnectorStatus {
    /// Wire-format name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::PendingAuth => "pending-auth",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl std::fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type PendingMap = HashMap<i64, oneshot::Sender<Result<Value, ClientError>>>;
type ConnectOutcome = Result<InitializeResult, ClientError>;

pub(crate) struct ConnectorInner {
    name: String,
    client_info: Implementation,
    capabilities: ClientCapabilities,
    transport: TokioMutex<Box<dyn Transport>>,
    state: StdMutex<ConnectorStatus>,
    negotiated: StdMutex<Option<InitializeResult>>,
    pending: StdMutex<PendingMap>,
    next_id: AtomicI64,
    /// Serializes (allocate id, record pending, hand to transport) so a
    /// response can never arrive before its pending entry exists.
    send_lock: TokioMutex<()>,
    handlers: StdRwLock<HandlerRegistry>,
    pump: TokioMutex<Option<tokio::task::JoinHandle<()>>>,
    connect_flight: TokioMutex<Option<watch::Receiver<Option<ConnectOutcome>>>>,
}

/// A client-side JSON-RPC endpoint bound to one server via one transport.
///
/// Cheaply cloneable; all clones share the same connection.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("name", &self.inner.name)
            .field("status", &self.status().as_str())
            .finish()
    }
}

impl Connector {
    /// Create a connector over `transport` with default client identity.
    pub fn new(name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self::with_identity(
            name,
            transport,
            Implementation::new("harbormcp-client", env!("CARGO_PKG_VERSION")),
            ClientCapabilities {
                roots: Some(RootsCapability {
                    list_changed: Some(true),
                }),
                ..Default::default()
            },
        )
    }

    /// Create a connector with explicit client info and capabilities.
    pub fn with_identity(
        name: impl Into<String>,
        transport: Box<dyn Transport>,
        client_info: Implementation,
        capabilities: ClientCapabilities,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                name: name.into(),
                client_info,
                capabilities,
                transport: TokioMutex::new(transport),
                state: StdMutex::new(ConnectorStatus::Disconnected),
                negotiated: StdMutex::new(None),
                pending: StdMutex::new(HashMap::new()),
                next_id: AtomicI64::new(0),
                send_lock: TokioMutex::new(()),
                handlers: StdRwLock::new(HandlerRegistry::default()),
                pump: TokioMutex::new(None),
                connect_flight: TokioMutex::new(None),
            }),
        }
    }

    /// Connector name (unique within an aggregator).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ConnectorStatus {
        *self.inner.state.lock()
    }

    /// Negotiated initialize result; `None` until connected.
    pub fn negotiated(&self) -> Option<InitializeResult> {
        self.inner.negotiated.lock().clone()
    }

    /// Replace the handler registry. Takes effect for subsequent inbound
    /// traffic.
    pub fn set_handlers(&self, handlers: HandlerRegistry) {
        *self.inner.handlers.write() = handlers;
    }

    /// Mutate the handler registry in place.
    pub fn update_handlers(&self, f: impl FnOnce(&mut HandlerRegistry)) {
        f(&mut self.inner.handlers.write());
    }

    /// Connect: attach the transport, run the initialize handshake, send
    /// `notifications/initialized`, and transition to `connected`.
    ///
    /// One-flight: a second `connect()` while the handshake is running
    /// awaits the same handshake instead of starting another.
    pub async fn connect(&self) -> ClientResult<InitializeResult> {
        let mut rx = {
            let mut flight = self.inner.connect_flight.lock().await;

            if self.status() == ConnectorStatus::Connected {
                if let Some(result) = self.negotiated() {
                    return Ok(result);
                }
            }

            let existing = flight.clone();
            match existing {
                Some(rx) => {
                    warn!(connector = %self.inner.name, "connect already in progress, awaiting the existing handshake");
                    rx
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    *flight = Some(rx.clone());
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        let outcome = ConnectorInner::run_handshake(&inner).await;
                        if outcome.is_err() {
                            ConnectorInner::cleanup_failed_connect(&inner).await;
                        }
                        *inner.connect_flight.lock().await = None;
                        let _ = tx.send(Some(outcome));
                    });
                    rx
                }
            }
        };

        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            rx.changed()
                .await
                .map_err(|_| ClientError::Handshake("connect task dropped".to_string()))?;
        }
    }

    /// Disconnect: cancel all pending requests with a terminal error, stop
    /// the pump, and run the transport's shutdown. Idempotent.
    pub async fn disconnect(&self) -> ClientResult<()> {
        let previous = {
            let mut state = self.inner.state.lock();
            match *state {
                ConnectorStatus::Disconnected | ConnectorStatus::Disconnecting => return Ok(()),
                other => {
                    *state = ConnectorStatus::Disconnecting;
                    other
                }
            }
        };

        let terminal = if previous == ConnectorStatus::Connecting {
            ClientError::ConnectAborted
        } else {
            ClientError::Disconnected
        };
        self.inner.drain_pending(terminal);

        if let Some(pump) = self.inner.pump.lock().await.take() {
            pump.abort();
        }

        let result = self.inner.transport.lock().await.shutdown().await;

        *self.inner.negotiated.lock() = None;
        // Ids restart per connection so initialize is always id 0.
        self.inner.next_id.store(0, Ordering::SeqCst);
        *self.inner.state.lock() = ConnectorStatus::Disconnected;
        debug!(connector = %self.inner.name, "connector disconnected");

        result.map_err(Into::into)
    }

    /// Send a request and await its correlated response.
    ///
    /// Rejects immediately when the connector is not `connected`. No
    /// timeout is imposed; cancellation and deadlines are the caller's
    /// responsibility.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> ClientResult<Value> {
        if self.status() != ConnectorStatus::Connected {
            return Err(ClientError::NotConnected);
        }
        self.inner.request_raw(method, params).await
    }

    /// Send a request with serialized params.
    pub async fn send_request_typed<P: Serialize>(
        &self,
        method: &str,
        params: &P,
    ) -> ClientResult<Value> {
        let params = serde_json::to_value(params)
            .map_err(|e| ProtocolError::internal(format!("failed to encode params: {e}")))?;
        self.send_request(method, Some(params)).await
    }

    /// Fire-and-forget notification; errors only on transport failure.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> ClientResult<()> {
        if self.status() != ConnectorStatus::Connected {
            return Err(ClientError::NotConnected);
        }
        self.inner.notify_raw(method, params).await
    }

    /// Cancel a pending request: reject it locally and tell the server via
    /// `notifications/cancelled`.
    pub async fn cancel_request(&self, id: i64, reason: Option<String>) -> ClientResult<()> {
        let entry = self.inner.pending.lock().remove(&id);
        if let Some(sender) = entry {
            let _ = sender.send(Err(ClientError::Protocol(ProtocolError::new(
                ErrorCode::RequestCancelled.code(),
                "request cancelled by caller",
                None,
            ))));
        }
        let params = serde_json::json!({ "requestId": id, "reason": reason });
        self.send_notification("notifications/cancelled", Some(params))
            .await
    }
}

impl ConnectorInner {
    fn set_state(&self, state: ConnectorStatus) {
        let mut guard = self.state.lock();
        if *guard != state {
            debug!(connector = %self.name, from = %guard.as_str(), to = %state.as_str(), "connector state change");
            *guard = state;
        }
    }

    fn drain_pending(&self, error: ClientError) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        for (id, sender) in drained {
            debug!(connector = %self.name, id, "rejecting pending request");
            let _ = sender.send(Err(error.clone()));
        }
    }

    async fn run_handshake(inner: &Arc<Self>) -> ConnectOutcome {
        inner.set_state(ConnectorStatus::Connecting);

        let events = inner.transport.lock().await.start().await?;

        let pump_inner = Arc::downgrade(inner);
        let pump = tokio::spawn(async move {
            Self::pump_loop(pump_inner, events).await;
        });
        *inner.pump.lock().await = Some(pump);

        let params = InitializeRequestParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: inner.capabilities.clone(),
            client_info: inner.client_info.clone(),
        };
        let params = serde_json::to_value(&params)
            .map_err(|e| ClientError::Handshake(format!("failed to encode initialize: {e}")))?;

        let value = inner.request_raw("initialize", Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| ClientError::Handshake(format!("malformed initialize result: {e}")))?;

        if !version::is_supported(&result.protocol_version) {
            return Err(ClientError::Handshake(format!(
                "server selected unsupported protocol version '{}'",
                result.protocol_version
            )));
        }

        *inner.negotiated.lock() = Some(result.clone());
        inner.notify_raw("notifications/initialized", None).await?;
        inner.set_state(ConnectorStatus::Connected);
        info!(
            connector = %inner.name,
            server = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "connector connected"
        );
        Ok(result)
    }

    async fn cleanup_failed_connect(inner: &Arc<Self>) {
        // Disconnect may already be tearing things down; everything here is
        // idempotent against that.
        inner.drain_pending(ClientError::Disconnected);
        if let Some(pump) = inner.pump.lock().await.take() {
            pump.abort();
        }
        if let Err(e) = inner.transport.lock().await.shutdown().await {
            warn!(connector = %inner.name, error = %e, "transport shutdown after failed connect");
        }
        *inner.negotiated.lock() = None;
        inner.next_id.store(0, Ordering::SeqCst);
        inner.set_state(ConnectorStatus::Disconnected);
    }

    /// Correlated request without a state gate (the handshake uses this
    /// before the connector is `connected`).
    async fn request_raw(&self, method: &str, params: Option<Value>) -> ClientResult<Value> {
        let (tx, rx) = oneshot::channel();
        {
            let _guard = self.send_lock.lock().await;
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.pending.lock().insert(id, tx);

            let request = JsonRpcRequest::new(id, method, params);
            let send_result = self
                .transport
                .lock()
                .await
                .send(JsonRpcMessage::Request(request))
                .await;

            if let Err(e) = send_result {
                self.pending.lock().remove(&id);
                return Err(e.into());
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Disconnected),
        }
    }

    async fn notify_raw(&self, method: &str, params: Option<Value>) -> ClientResult<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.transport
            .lock()
            .await
            .send(JsonRpcMessage::Notification(notification))
            .await
            .map_err(Into::into)
    }

    async fn pump_loop(
        weak: std::sync::Weak<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        loop {
            let event = events.recv().await;
            let Some(inner) = weak.upgrade() else { return };
            match event {
                Some(TransportEvent::Message(message)) => inner.dispatch(message).await,
                Some(TransportEvent::Closed { reason }) => {
                    inner.on_transport_closed(reason);
                    return;
                }
                None => {
                    inner.on_transport_closed(Some("event channel closed".to_string()));
                    return;
                }
            }
        }
    }

    fn on_transport_closed(&self, reason: Option<String>) {
        let state = *self.state.lock();
        if matches!(
            state,
            ConnectorStatus::Disconnecting | ConnectorStatus::Disconnected
        ) {
            return;
        }
        warn!(
            connector = %self.name,
            reason = reason.as_deref().unwrap_or("unknown"),
            "transport closed"
        );
        self.drain_pending(ClientError::Disconnected);
        *self.negotiated.lock() = None;
        self.next_id.store(0, Ordering::SeqCst);
        self.set_state(ConnectorStatus::Disconnected);
    }

    async fn dispatch(self: &Arc<Self>, message: JsonRpcMessage) {
        match message {
            JsonRpcMessage::Response(response) => self.dispatch_response(response),
            JsonRpcMessage::Request(request) => self.dispatch_server_request(request).await,
            JsonRpcMessage::Notification(notification) => {
                self.dispatch_notification(notification).await;
            }
        }
    }

    fn dispatch_response(&self, response: JsonRpcResponse) {
        let (id, result) = response.into_result();
        let RequestId::Number(id) = id else {
            warn!(connector = %self.name, id = %id, "received response with non-numeric id, dropping");
            return;
        };
        let entry = self.pending.lock().remove(&id);
        match entry {
            Some(sender) => {
                if let Err(e) = &result {
                    error!(connector = %self.name, id, error = %e, "request failed");
                }
                let _ = sender.send(result.map_err(ClientError::Protocol));
            }
            None => {
                warn!(connector = %self.name, id, "received response for unknown request id, dropping");
            }
        }
    }

    async fn dispatch_server_request(self: &Arc<Self>, request: JsonRpcRequest) {
        let outcome = self
            .handle_server_request(&request.method, request.params.clone())
            .await;
        let response = match outcome {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(e) => JsonRpcResponse::error(request.id, JsonRpcError::from(&e)),
        };
        if let Err(e) = self
            .transport
            .lock()
            .await
            .send(JsonRpcMessage::Response(response))
            .await
        {
            warn!(connector = %self.name, error = %e, "failed to reply to server-initiated request");
        }
    }

    async fn handle_server_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ProtocolError> {
        let handlers = self.handlers.read().clone();
        match method {
            "ping" => Ok(serde_json::to_value(EmptyResult {}).unwrap_or(Value::Null)),
            "sampling/createMessage" => match handlers.sampling {
                Some(handler) => {
                    let params = serde_json::from_value(params.unwrap_or(Value::Null))
                        .map_err(|e| {
                            ProtocolError::invalid_params(format!("invalid sampling params: {e}"))
                        })?;
                    let result = handler.create_message(params).await?;
                    serde_json::to_value(result)
                        .map_err(|e| ProtocolError::internal(e.to_string()))
                }
                None => Err(ProtocolError::internal(
                    "Sampling callback not configured on this client",
                )),
            },
            "elicitation/create" => match handlers.elicitation {
                Some(handler) => {
                    let params = serde_json::from_value(params.unwrap_or(Value::Null))
                        .map_err(|e| {
                            ProtocolError::invalid_params(format!(
                                "invalid elicitation params: {e}"
                            ))
                        })?;
                    let result = handler.elicit(params).await?;
                    serde_json::to_value(result)
                        .map_err(|e| ProtocolError::internal(e.to_string()))
                }
                None => Err(ProtocolError::internal(
                    "Elicitation callback not configured on this client",
                )),
            },
            "roots/list" => match handlers.roots {
                Some(provider) => {
                    let roots = provider.list_roots().await;
                    serde_json::to_value(roots).map_err(|e| ProtocolError::internal(e.to_string()))
                }
                None => Err(ProtocolError::internal(
                    "Roots callback not configured on this client",
                )),
            },
            other => match handlers.request {
                Some(handler) => handler.on_request(other, params).await,
                None => Err(ProtocolError::new(
                    ErrorCode::MethodNotFound.code(),
                    format!("server-initiated request '{other}' is not enabled"),
                    None,
                )),
            },
        }
    }

    async fn dispatch_notification(&self, notification: JsonRpcNotification) {
        let handler = self.handlers.read().notification.clone();
        match handler {
            Some(handler) => {
                if let Err(e) = handler
                    .on_notification(&notification.method, notification.params)
                    .await
                {
                    error!(
                        connector = %self.name,
                        method = %notification.method,
                        error = %e,
                        "notification handler failed"
                    );
                }
            }
            None => {
                info!(
                    connector = %self.name,
                    method = %notification.method,
                    "no notification handler registered, dropping notification"
                );
            }
        }
    }
}
