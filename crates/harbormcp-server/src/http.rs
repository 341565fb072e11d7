//! Streamable HTTP server transport.
//!
//! Routes: `POST/GET/DELETE /mcp`, `GET /health`, and
//! `POST /management/cleanup`, with CORS on everything and the OAuth proxy
//! router merged in when configured.
//!
//! The POST gate order is fixed: context extraction (session, protocol
//! version, auth) → `Accept` (406) → `Content-Type` (415) → protocol
//! version (400) → body parse. Only after every gate passes does the
//! handler switch the reply to an SSE stream; gate failures answer with a
//! conventional JSON body and the status from the error table.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, warn};

use harbormcp_auth::clock::Clock;
use harbormcp_auth::proxy::OAuthProxy;
use harbormcp_auth::resource::ResourceServer;
use harbormcp_protocol::types::ProgressParams;
use harbormcp_protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ProtocolError,
    RequestId, validate_message, version,
};

use crate::error::{ServerResult, protocol_error_status};
use crate::service::McpService;
use crate::session::{Session, StoredEvent};

/// Session id header name.
pub const SESSION_ID_HEADER: &str = "Mcp-Session-Id";
/// Protocol version header name.
pub const PROTOCOL_VERSION_HEADER: &str = "Mcp-Protocol-Version";
/// Environment variable consulted when no management token is configured.
pub const MANAGEMENT_TOKEN_ENV: &str = "HARBORMCP_MANAGEMENT_TOKEN";

/// HTTP server configuration.
#[derive(Default)]
pub struct HttpServerConfig {
    /// Bearer token protecting `/management/cleanup`; falls back to
    /// `HARBORMCP_MANAGEMENT_TOKEN` when unset
    pub management_token: Option<String>,
    /// Default idle threshold for the management sweep
    pub sweep_idle: Option<Duration>,
    /// Bearer-token gate for the `/mcp` routes
    pub auth: Option<Arc<ResourceServer>>,
    /// OAuth proxy endpoints, mounted alongside the protocol routes
    pub oauth_proxy: Option<OAuthProxy>,
}

#[derive(Clone)]
struct AppState {
    service: McpService,
    auth: Option<Arc<ResourceServer>>,
    management_token: Option<String>,
    sweep_idle: Duration,
}

/// Build the server's router.
pub fn router(service: McpService, config: HttpServerConfig) -> Router {
    let management_token = config
        .management_token
        .or_else(|| std::env::var(MANAGEMENT_TOKEN_ENV).ok());
    let state = AppState {
        service,
        auth: config.auth,
        management_token,
        sweep_idle: config.sweep_idle.unwrap_or(Duration::from_secs(30 * 60)),
    };

    let mut router = Router::new()
        .route(
            "/mcp",
            post(post_mcp).get(get_mcp).delete(delete_mcp),
        )
        .route("/health", get(health))
        .route("/management/cleanup", post(management_cleanup))
        .with_state(state);

    if let Some(proxy) = config.oauth_proxy {
        router = router.merge(proxy.router());
    }

    router.layer(CorsLayer::permissive())
}

fn plain_error(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": error, "message": message })),
    )
        .into_response()
}

/// JSON-RPC-shaped error body with a null id (the request never reached
/// dispatch).
fn rpc_error_body(status: StatusCode, error: &ProtocolError) -> Response {
    (
        status,
        Json(json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": { "code": error.code, "message": error.message, "data": error.data },
        })),
    )
        .into_response()
}

async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<String>, Response> {
    let Some(auth) = &state.auth else {
        return Ok(None);
    };
    match auth.authenticate(headers).await {
        Ok(context) => Ok(context.subject),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.status()).unwrap_or(StatusCode::UNAUTHORIZED);
            let mut response = plain_error(status, e.oauth_code(), &e.to_string());
            if let Ok(challenge) = HeaderValue::from_str(&auth.challenge(&e)) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, challenge);
            }
            Err(response)
        }
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn accept_gate(headers: &HeaderMap) -> Result<(), Response> {
    let accept = header_str(headers, "accept").unwrap_or_default();
    if accept.contains("application/json") && accept.contains("text/event-stream") {
        Ok(())
    } else {
        Err(plain_error(
            StatusCode::NOT_ACCEPTABLE,
            "not_acceptable",
            "Accept must include both application/json and text/event-stream",
        ))
    }
}

fn content_type_gate(headers: &HeaderMap) -> Result<(), Response> {
    let content_type = header_str(headers, "content-type").unwrap_or_default();
    if content_type.contains("application/json") {
        Ok(())
    } else {
        Err(plain_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_media_type",
            "Content-Type must be application/json",
        ))
    }
}

/// SSE frame stream for a POST reply: the envelopes, then end-of-stream.
fn sse_reply(session: &Arc<Session>, envelopes: Vec<String>) -> Response {
    let events: Vec<Result<Event, Infallible>> = envelopes
        .into_iter()
        .map(|data| {
            Ok(Event::default()
                .id(session.next_event_id().to_string())
                .event("message")
                .data(data))
        })
        .collect();
    Sse::new(futures::stream::iter(events)).into_response()
}

async fn post_mcp(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    // (1) Context: auth, session id, protocol version header.
    let user_id = match authenticate(&state, &headers).await {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };
    let session_header = header_str(&headers, SESSION_ID_HEADER).map(str::to_string);
    let version_header = header_str(&headers, PROTOCOL_VERSION_HEADER).map(str::to_string);

    // (2) Accept and (3) Content-Type.
    if let Err(response) = accept_gate(&headers) {
        return response;
    }
    if let Err(response) = content_type_gate(&headers) {
        return response;
    }

    // (4) Protocol version header, when present, must be supported. The
    // initial initialize POST carries the version in the body instead.
    if let Some(offered) = &version_header
        && !version::is_supported(offered)
    {
        let error = ProtocolError::invalid_params_with(
            format!("unsupported protocol version '{offered}'"),
            json!({ "supported": version::SUPPORTED_PROTOCOL_VERSIONS }),
        );
        return rpc_error_body(StatusCode::BAD_REQUEST, &error);
    }

    // (5) Parse.
    let message = match validate_message(&body) {
        Ok(message) => message,
        Err(e) => return rpc_error_body(StatusCode::BAD_REQUEST, &e),
    };

    match message {
        JsonRpcMessage::Request(request) if request.method == "initialize" => {
            if session_header.is_some() {
                return plain_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    "initialize must not carry Mcp-Session-Id",
                );
            }
            let session = state.service.sessions().allocate(user_id);
            let response = state.service.handle_request(request, &session).await;

            if let Some(error) = response.error_object() {
                // Failed handshake: the session never existed.
                let status = protocol_error_status(&ProtocolError::new(
                    error.code,
                    error.message.clone(),
                    error.data.clone(),
                ));
                state.service.sessions().terminate(&session.id);
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
                return (status, Json(response)).into_response();
            }

            let envelope = match serde_json::to_string(&response) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!(error = %e, "failed to serialize initialize response");
                    return plain_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        "failed to serialize response",
                    );
                }
            };
            let mut reply = sse_reply(&session, vec![envelope]);
            if let Ok(value) = HeaderValue::from_str(&session.id) {
                reply.headers_mut().insert(SESSION_ID_HEADER, value);
            }
            reply
        }
        other => {
            let Some(session_id) = session_header else {
                return plain_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    "Mcp-Session-Id is required",
                );
            };
            let Some(session) = state.service.sessions().lookup(&session_id) else {
                return plain_error(
                    StatusCode::NOT_FOUND,
                    "session_not_found",
                    "no session with this id",
                );
            };
            if version_header.is_none() {
                let error =
                    ProtocolError::invalid_params("Mcp-Protocol-Version header is required");
                return rpc_error_body(StatusCode::BAD_REQUEST, &error);
            }

            // Activity is recorded before dispatch, atomically per entry.
            session.touch(state.service.sessions().clock().unix_millis());

            match other {
                JsonRpcMessage::Request(request) => {
                    handle_session_request(&state, request, &session).await
                }
                JsonRpcMessage::Notification(notification) => {
                    state.service.handle_notification(notification, &session);
                    StatusCode::ACCEPTED.into_response()
                }
                JsonRpcMessage::Response(response) => {
                    debug!(id = %response.id, "dropping unexpected response on POST");
                    StatusCode::ACCEPTED.into_response()
                }
            }
        }
    }
}

async fn handle_session_request(
    state: &AppState,
    request: JsonRpcRequest,
    session: &Arc<Session>,
) -> Response {
    let request_id = request.id.clone();
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let service = state.service.clone();
    let task_session = Arc::clone(session);
    let handler = tokio::spawn(async move {
        service
            .handle_request_streaming(request, &task_session, progress_tx)
            .await
    });

    // The sink closes when the handler finishes, so the first recv either
    // yields a progress frame (hijack to a live stream) or tells us the
    // response is ready.
    if let Some(first) = progress_rx.recv().await {
        return streaming_reply(
            Arc::clone(session),
            request_id,
            first,
            progress_rx,
            handler,
        );
    }

    let response = match handler.await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "request task failed");
            return plain_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "request handler failed",
            );
        }
    };

    // A cancellation that raced the handler voids the result.
    if session.take_cancelled(&request_id) {
        debug!(id = %request_id, "dropping result of cancelled request");
        return StatusCode::ACCEPTED.into_response();
    }

    if let Some(error) = response.error_object() {
        let status = protocol_error_status(&ProtocolError::new(
            error.code,
            error.message.clone(),
            error.data.clone(),
        ));
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
        return (status, Json(response)).into_response();
    }

    match serde_json::to_string(&response) {
        Ok(envelope) => sse_reply(session, vec![envelope]),
        Err(e) => {
            error!(error = %e, "failed to serialize response");
            plain_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "failed to serialize response",
            )
        }
    }
}

fn progress_frame(session: &Session, params: ProgressParams) -> Option<Event> {
    let notification = JsonRpcNotification::new(
        "notifications/progress",
        serde_json::to_value(&params).ok(),
    );
    let data = serde_json::to_string(&notification).ok()?;
    Some(
        Event::default()
            .id(session.next_event_id().to_string())
            .event("message")
            .data(data),
    )
}

struct StreamingReply {
    session: Arc<Session>,
    request_id: RequestId,
    pending: Option<ProgressParams>,
    progress: mpsc::UnboundedReceiver<ProgressParams>,
    handler: Option<tokio::task::JoinHandle<JsonRpcResponse>>,
}

/// Hijacked reply: the stream carries every progress frame as it arrives,
/// then the final response (success or error) as the terminal frame.
fn streaming_reply(
    session: Arc<Session>,
    request_id: RequestId,
    first: ProgressParams,
    progress: mpsc::UnboundedReceiver<ProgressParams>,
    handler: tokio::task::JoinHandle<JsonRpcResponse>,
) -> Response {
    let state = StreamingReply {
        session,
        request_id,
        pending: Some(first),
        progress,
        handler: Some(handler),
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        if let Some(params) = state.pending.take()
            && let Some(event) = progress_frame(&state.session, params)
        {
            return Some((Ok::<_, Infallible>(event), state));
        }

        loop {
            // The terminal frame has already been emitted.
            if state.handler.is_none() {
                return None;
            }
            match state.progress.recv().await {
                Some(params) => {
                    if let Some(event) = progress_frame(&state.session, params) {
                        return Some((Ok(event), state));
                    }
                }
                None => {
                    // Sink closed: the handler has finished.
                    let handler = state.handler.take()?;
                    let response = match handler.await {
                        Ok(response) => response,
                        Err(e) => {
                            error!(error = %e, "request task failed mid-stream");
                            return None;
                        }
                    };
                    if state.session.take_cancelled(&state.request_id) {
                        debug!(id = %state.request_id, "dropping result of cancelled request");
                        return None;
                    }
                    match serde_json::to_string(&response) {
                        Ok(data) => {
                            let event = Event::default()
                                .id(state.session.next_event_id().to_string())
                                .event("message")
                                .data(data);
                            return Some((Ok(event), state));
                        }
                        Err(e) => {
                            error!(error = %e, "failed to serialize response");
                            return None;
                        }
                    }
                }
            }
        }
    });

    Sse::new(stream).into_response()
}

async fn get_mcp(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authenticate(&state, &headers).await {
        return response;
    }

    let accept = header_str(&headers, "accept").unwrap_or_default();
    if !accept.contains("text/event-stream") {
        return plain_error(
            StatusCode::NOT_ACCEPTABLE,
            "not_acceptable",
            "Accept must include text/event-stream",
        );
    }

    let Some(session_id) = header_str(&headers, SESSION_ID_HEADER) else {
        return plain_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Mcp-Session-Id is required",
        );
    };
    let Some(session) = state.service.sessions().lookup(session_id) else {
        return plain_error(
            StatusCode::NOT_FOUND,
            "session_not_found",
            "no session with this id",
        );
    };
    session.touch(state.service.sessions().clock().unix_millis());

    let last_event_id = header_str(&headers, "last-event-id")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let replay = session.replay_after(last_event_id);
    let live = live_stream(session.subscribe_live());
    let stream = futures::stream::iter(replay)
        .chain(live)
        .map(|event: StoredEvent| {
            Ok::<_, Infallible>(
                Event::default()
                    .id(event.id.to_string())
                    .event("message")
                    .data(event.data),
            )
        });

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn live_stream(
    receiver: broadcast::Receiver<StoredEvent>,
) -> impl futures::Stream<Item = StoredEvent> {
    futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((event, receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session stream lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

async fn delete_mcp(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authenticate(&state, &headers).await {
        return response;
    }
    let Some(session_id) = header_str(&headers, SESSION_ID_HEADER) else {
        return plain_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Mcp-Session-Id is required",
        );
    };

    // Termination is idempotent: deleting an already-gone session is a 200
    // no-op.
    let existed = state.service.sessions().terminate(session_id);
    debug!(session_id, existed, "session delete");
    Json(json!({ "ok": true })).into_response()
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn management_cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(expected) = &state.management_token else {
        return plain_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "management token is not configured",
        );
    };
    let presented = header_str(&headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();
    if presented != expected {
        return plain_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "invalid management token",
        );
    }

    let idle = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|body| body.get("inactivityTimeoutMs").and_then(Value::as_u64))
        .map(Duration::from_millis)
        .unwrap_or(state.sweep_idle);

    let removed = state.service.sessions().sweep_inactive(idle);
    Json(json!({
        "sessionsRemoved": removed,
        "activeSessions": state.service.sessions().count(),
    }))
    .into_response()
}

/// Serve the router on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    router: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> ServerResult<()> {
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(Into::into)
}
