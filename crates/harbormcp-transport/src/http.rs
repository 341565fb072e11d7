//! Streamable HTTP client transport.
//!
//! Every outbound message is a `POST {base}/mcp` with
//! `Accept: application/json, text/event-stream`. The response is either a
//! single JSON envelope or an SSE stream whose events carry envelopes; both
//! feed the inbound event channel. The first response to an initialize POST
//! carries `Mcp-Session-Id`, which is captured and echoed on every later
//! request; capturing it also opens the GET side channel for
//! server-initiated traffic. `DELETE /mcp` terminates the session on
//! shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use tokio::sync::{Mutex as TokioMutex, RwLock, mpsc};
use tracing::{debug, warn};

use harbormcp_protocol::{JsonRpcMessage, LATEST_PROTOCOL_VERSION, validate_message};

use crate::error::{TransportError, TransportResult};
use crate::oauth::OAuthSession;
use crate::sse::SseDecoder;
use crate::traits::{EVENT_CHANNEL_CAPACITY, Transport, TransportEvent};

/// Session id header name.
pub const SESSION_ID_HEADER: &str = "Mcp-Session-Id";
/// Protocol version header name.
pub const PROTOCOL_VERSION_HEADER: &str = "Mcp-Protocol-Version";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// HTTP client transport configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Server base URL (e.g. `http://localhost:3200`)
    pub base_url: String,
    /// Protocol endpoint path
    pub endpoint_path: String,
    /// Protocol version announced in `Mcp-Protocol-Version`
    pub protocol_version: String,
    /// Connection timeout. No overall request deadline is imposed: SSE
    /// streams are long-lived, and request deadlines belong to the caller.
    pub connect_timeout: Duration,
    /// Extra headers attached to every request
    pub headers: HashMap<String, String>,
}

impl HttpConfig {
    /// Configuration targeting `base_url` with defaults.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            endpoint_path: "/mcp".to_string(),
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            connect_timeout: Duration::from_secs(30),
            headers: HashMap::new(),
        }
    }
}

/// Streamable HTTP client transport.
pub struct StreamableHttpTransport {
    config: HttpConfig,
    http: reqwest::Client,
    oauth: Option<Arc<OAuthSession>>,
    session_id: Arc<RwLock<Option<String>>>,
    last_event_id: Arc<RwLock<Option<String>>>,
    events: Arc<RwLock<Option<mpsc::Sender<TransportEvent>>>>,
    side_channel: Arc<TokioMutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl std::fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("base_url", &self.config.base_url)
            .field("endpoint_path", &self.config.endpoint_path)
            .finish()
    }
}

impl StreamableHttpTransport {
    /// Create a transport without client-side OAuth (anonymous mode).
    pub fn new(config: HttpConfig) -> Self {
        Self::with_oauth(config, None)
    }

    /// Create a transport, optionally protected by an OAuth session.
    pub fn with_oauth(config: HttpConfig, oauth: Option<Arc<OAuthSession>>) -> Self {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(config.connect_timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            config,
            http,
            oauth,
            session_id: Arc::new(RwLock::new(None)),
            last_event_id: Arc::new(RwLock::new(None)),
            events: Arc::new(RwLock::new(None)),
            side_channel: Arc::new(TokioMutex::new(None)),
        }
    }

    fn url(&self) -> String {
        format!("{}{}", self.config.base_url, self.config.endpoint_path)
    }

    /// The captured session id, if the server issued one.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    async fn base_headers(&self, accept: &str) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        if let Ok(value) = header::HeaderValue::from_str(accept) {
            headers.insert(header::ACCEPT, value);
        }
        if let Ok(value) = header::HeaderValue::from_str(&self.config.protocol_version) {
            headers.insert(PROTOCOL_VERSION_HEADER, value);
        }
        if let Some(session_id) = self.session_id.read().await.as_ref()
            && let Ok(value) = header::HeaderValue::from_str(session_id)
        {
            headers.insert(SESSION_ID_HEADER, value);
        }
        for (key, value) in &self.config.headers {
            if let (Ok(k), Ok(v)) = (
                header::HeaderName::from_bytes(key.as_bytes()),
                header::HeaderValue::from_str(value),
            ) {
                headers.insert(k, v);
            }
        }
        headers
    }

    /// Feed one SSE response body into the inbound channel.
    fn drain_sse(
        response: reqwest::Response,
        events: mpsc::Sender<TransportEvent>,
        last_event_id: Arc<RwLock<Option<String>>>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        debug!(error = %e, "SSE stream ended with error");
                        break;
                    }
                };
                for event in decoder.feed(&chunk) {
                    if let Some(id) = &event.id {
                        *last_event_id.write().await = Some(id.clone());
                    }
                    if event.data.is_empty() {
                        continue;
                    }
                    match validate_message(&event.data) {
                        Ok(message) => {
                            if events.send(TransportEvent::Message(message)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "dropping malformed SSE event payload");
                        }
                    }
                }
            }
        })
    }

    /// Open the GET side channel for server-initiated messages.
    async fn open_side_channel(&self) {
        let mut guard = self.side_channel.lock().await;
        if guard.is_some() {
            return;
        }

        let url = self.url();
        let http = self.http.clone();
        let headers = self.base_headers("text/event-stream").await;
        let bearer = match &self.oauth {
            Some(oauth) => oauth.bearer().await,
            None => None,
        };
        let events = self.events.read().await.clone();
        let last_event_id = Arc::clone(&self.last_event_id);

        let Some(events) = events else { return };

        *guard = Some(tokio::spawn(async move {
            let mut request = http.get(&url).headers(headers);
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    Self::drain_sse(response, events, last_event_id)
                        .await
                        .ok();
                    debug!("server-initiated stream closed");
                }
                Ok(response) => {
                    debug!(status = %response.status(), "server declined side-channel stream");
                }
                Err(e) => {
                    warn!(error = %e, "failed to open server-initiated stream");
                }
            }
        }));
    }
}

fn is_initialize(message: &JsonRpcMessage) -> bool {
    matches!(message, JsonRpcMessage::Request(r) if r.method == "initialize")
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn start(&mut self) -> TransportResult<mpsc::Receiver<TransportEvent>> {
        if self.events.read().await.is_some() {
            return Err(TransportError::Configuration(
                "HTTP transport already started".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *self.events.write().await = Some(tx);
        Ok(rx)
    }

    async fn send(&self, message: JsonRpcMessage) -> TransportResult<()> {
        let events = self
            .events
            .read()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)?;

        let body = message
            .to_json()
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        let initialize = is_initialize(&message);

        let mut attempted_auth = false;
        loop {
            let headers = self.base_headers(ACCEPT_BOTH).await;
            let mut request = self
                .http
                .post(self.url())
                .headers(headers)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.clone());
            if let Some(oauth) = &self.oauth
                && let Some(token) = oauth.bearer().await
            {
                request = request.bearer_auth(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| TransportError::Send(e.to_string()))?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                match &self.oauth {
                    Some(oauth) if !attempted_auth => {
                        attempted_auth = true;
                        oauth.reauthorize(&self.http).await?;
                        continue;
                    }
                    _ => {
                        return Err(TransportError::Auth(
                            "server returned 401 Unauthorized".to_string(),
                        ));
                    }
                }
            }

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let message = response.text().await.unwrap_or_default();
                // Servers map protocol errors onto 4xx statuses with a
                // JSON-RPC body; surface those as envelopes so they
                // correlate back to the pending request.
                if let Ok(envelope) = validate_message(message.trim()) {
                    events
                        .send(TransportEvent::Message(envelope))
                        .await
                        .map_err(|_| {
                            TransportError::Closed("event channel closed".to_string())
                        })?;
                    return Ok(());
                }
                return Err(TransportError::Http { status, message });
            }

            if initialize
                && let Some(session_id) = response
                    .headers()
                    .get(SESSION_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
            {
                *self.session_id.write().await = Some(session_id.to_string());
                debug!(session_id, "captured session id from initialize response");
                self.open_side_channel().await;
            }

            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();

            if content_type.contains("text/event-stream") {
                // Drain in the background so the caller's request path can
                // proceed to await its correlated response.
                Self::drain_sse(response, events, Arc::clone(&self.last_event_id));
            } else if content_type.contains("application/json") {
                let text = response
                    .text()
                    .await
                    .map_err(|e| TransportError::Receive(e.to_string()))?;
                let trimmed = text.trim();
                if !trimmed.is_empty() && trimmed != "null" {
                    match validate_message(trimmed) {
                        Ok(message) => {
                            events
                                .send(TransportEvent::Message(message))
                                .await
                                .map_err(|_| {
                                    TransportError::Closed("event channel closed".to_string())
                                })?;
                        }
                        Err(e) => warn!(error = %e, "dropping malformed JSON response body"),
                    }
                }
            }

            return Ok(());
        }
    }

    async fn shutdown(&mut self) -> TransportResult<()> {
        if let Some(task) = self.side_channel.lock().await.take() {
            task.abort();
        }

        let session_id = self.session_id.write().await.take();
        if let Some(session_id) = session_id {
            let mut request = self
                .http
                .delete(self.url())
                .header(SESSION_ID_HEADER, &session_id)
                .header(PROTOCOL_VERSION_HEADER, &self.config.protocol_version);
            if let Some(oauth) = &self.oauth
                && let Some(token) = oauth.bearer().await
            {
                request = request.bearer_auth(token);
            }
            match request.send().await {
                Ok(response) => {
                    debug!(status = %response.status(), session_id, "terminated HTTP session")
                }
                Err(e) => debug!(error = %e, "session termination request failed"),
            }
        }

        *self.events.write().await = None;
        Ok(())
    }

    fn endpoint(&self) -> String {
        self.url()
    }
}
