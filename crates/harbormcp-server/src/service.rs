//! The JSON-RPC dispatcher over the registries.
//!
//! [`McpService`] is transport-agnostic: the HTTP layer and the stdio loop
//! both feed it parsed envelopes together with the session the message
//! belongs to, and write whatever envelope it returns back to the peer.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use harbormcp_protocol::types::{
    CallToolParams, CancelledParams, EmptyResult, GetPromptParams, Implementation,
    InitializeRequestParams, InitializeResult, ListPromptsParams, ListResourcesParams,
    ListToolsParams, LoggingCapability, LoggingLevel, LoggingMessageParams, ProgressParams,
    Prompt, PromptsCapability, Resource, ResourceContents, ResourceTemplate, ResourceUriParams,
    ResourcesCapability, ServerCapabilities, SetLevelParams, Tool, ToolsCapability,
};
use harbormcp_protocol::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ProtocolError, version,
};

use crate::registry::{
    PromptHandler, PromptRegistry, ResourceRegistry, ToolContext, ToolHandler, ToolRegistry,
};
use crate::session::{Session, SessionManager};

fn decode_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ProtocolError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| ProtocolError::invalid_params(format!("invalid params: {e}")))
}

struct ServiceInner {
    server_info: Implementation,
    instructions: Mutex<Option<String>>,
    tools: ToolRegistry,
    resources: ResourceRegistry,
    prompts: PromptRegistry,
    sessions: SessionManager,
}

/// The protocol service shared by every transport surface.
#[derive(Clone)]
pub struct McpService {
    inner: Arc<ServiceInner>,
}

impl std::fmt::Debug for McpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpService")
            .field("server", &self.inner.server_info.name)
            .field("sessions", &self.inner.sessions.count())
            .finish()
    }
}

impl McpService {
    /// Create a service with a fresh session manager.
    pub fn new(server_info: Implementation) -> Self {
        Self::with_sessions(server_info, SessionManager::new())
    }

    /// Create a service over an existing session manager.
    pub fn with_sessions(server_info: Implementation, sessions: SessionManager) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                server_info,
                instructions: Mutex::new(None),
                tools: ToolRegistry::default(),
                resources: ResourceRegistry::default(),
                prompts: PromptRegistry::default(),
                sessions,
            }),
        }
    }

    /// The session manager backing this service.
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// Set the instructions returned from initialize.
    pub fn set_instructions(&self, instructions: impl Into<String>) {
        *self.inner.instructions.lock() = Some(instructions.into());
    }

    /// Cut list pages at `size` items across all registries.
    pub fn set_page_size(&self, size: Option<usize>) {
        self.inner.tools.set_page_size(size);
        self.inner.resources.set_page_size(size);
        self.inner.prompts.set_page_size(size);
    }

    /// Register a tool, announcing the change to every session.
    pub fn add_tool(&self, tool: Tool, handler: Arc<dyn ToolHandler>) {
        if self.inner.tools.register(tool, handler) {
            self.notify_all("notifications/tools/list_changed");
        }
    }

    /// Remove a tool, announcing the change to every session.
    pub fn remove_tool(&self, name: &str) {
        if self.inner.tools.remove(name) {
            self.notify_all("notifications/tools/list_changed");
        }
    }

    /// Register a resource, announcing the change to every session.
    pub fn add_resource(&self, resource: Resource, contents: ResourceContents) {
        if self.inner.resources.register(resource, contents) {
            self.notify_all("notifications/resources/list_changed");
        }
    }

    /// Register a resource template, announcing the change.
    pub fn add_resource_template(&self, template: ResourceTemplate) {
        self.inner.resources.register_template(template);
        self.notify_all("notifications/resources/list_changed");
    }

    /// Register a prompt, announcing the change to every session.
    pub fn add_prompt(&self, prompt: Prompt, handler: Arc<dyn PromptHandler>) {
        if self.inner.prompts.register(prompt, handler) {
            self.notify_all("notifications/prompts/list_changed");
        }
    }

    /// Push a `notifications/message` log line to every session whose
    /// level admits it.
    pub fn emit_log(&self, level: LoggingLevel, logger: Option<&str>, data: Value) {
        let params = LoggingMessageParams {
            level,
            logger: logger.map(str::to_string),
            data,
        };
        let Ok(params) = serde_json::to_value(&params) else {
            return;
        };
        let notification = JsonRpcNotification::new("notifications/message", Some(params));
        for session in self.all_sessions() {
            if session.log_level() <= level {
                session.push_notification(&notification);
            }
        }
    }

    fn all_sessions(&self) -> Vec<Arc<Session>> {
        // The manager owns the map; go through broadcast for fanout when
        // level filtering is not needed.
        let mut sessions = Vec::new();
        self.inner.sessions.for_each(|session| sessions.push(session));
        sessions
    }

    fn notify_all(&self, method: &str) {
        self.inner
            .sessions
            .broadcast(&JsonRpcNotification::new(method, None));
    }

    /// Capabilities this server advertises during initialize.
    pub fn capabilities(&self) -> ServerCapabilities {
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
            logging: Some(LoggingCapability {}),
        }
    }

    /// Handle one request, always producing a response envelope. Progress
    /// reported by the handler is discarded.
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        session: &Arc<Session>,
    ) -> JsonRpcResponse {
        let (progress, _) = mpsc::unbounded_channel();
        self.handle_request_streaming(request, session, progress).await
    }

    /// Handle one request, streaming interim progress frames into
    /// `progress`.
    ///
    /// The sender is dropped when the handler finishes, so the transport
    /// layer can drain the channel to exhaustion and then emit the final
    /// response after every progress frame.
    pub async fn handle_request_streaming(
        &self,
        request: JsonRpcRequest,
        session: &Arc<Session>,
        progress: mpsc::UnboundedSender<ProgressParams>,
    ) -> JsonRpcResponse {
        let id = request.id.clone();
        match self.dispatch(request, session, progress).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => {
                warn!(id = %id, code = error.code, message = %error.message, "request failed");
                JsonRpcResponse::error(id, JsonRpcError::from(&error))
            }
        }
    }

    async fn dispatch(
        &self,
        request: JsonRpcRequest,
        session: &Arc<Session>,
        progress: mpsc::UnboundedSender<ProgressParams>,
    ) -> Result<Value, ProtocolError> {
        let inner = &self.inner;
        match request.method.as_str() {
            "initialize" => {
                let params: InitializeRequestParams = decode_params(request.params)?;
                let negotiated = version::negotiate(&params.protocol_version)?;
                session.set_protocol_version(negotiated);
                debug!(
                    client = %params.client_info.name,
                    protocol_version = negotiated,
                    session_id = %session.id,
                    "initialize handshake"
                );
                let result = InitializeResult {
                    protocol_version: negotiated.to_string(),
                    server_info: inner.server_info.clone(),
                    capabilities: self.capabilities(),
                    instructions: inner.instructions.lock().clone(),
                };
                serde_json::to_value(result).map_err(|e| ProtocolError::internal(e.to_string()))
            }
            "ping" => {
                serde_json::to_value(EmptyResult {}).map_err(|e| ProtocolError::internal(e.to_string()))
            }
            "tools/list" => {
                let params: ListToolsParams = decode_params(request.params)?;
                let page = inner.tools.list(params.cursor.as_deref())?;
                serde_json::to_value(page).map_err(|e| ProtocolError::internal(e.to_string()))
            }
            "tools/call" => {
                let params: CallToolParams = decode_params(request.params)?;
                let handler = inner.tools.handler(&params.name).ok_or_else(|| {
                    ProtocolError::invalid_params(format!("unknown tool '{}'", params.name))
                })?;
                let ctx = ToolContext::new(
                    params.meta.and_then(|meta| meta.progress_token),
                    progress,
                );
                let result = handler.call(params.arguments, &ctx).await?;
                serde_json::to_value(result).map_err(|e| ProtocolError::internal(e.to_string()))
            }
            "resources/list" => {
                let params: ListResourcesParams = decode_params(request.params)?;
                let page = inner.resources.list(params.cursor.as_deref())?;
                serde_json::to_value(page).map_err(|e| ProtocolError::internal(e.to_string()))
            }
            "resources/templates/list" => {
                let params: ListResourcesParams = decode_params(request.params)?;
                let page = inner.resources.list_templates(params.cursor.as_deref())?;
                serde_json::to_value(page).map_err(|e| ProtocolError::internal(e.to_string()))
            }
            "resources/read" => {
                let params: ResourceUriParams = decode_params(request.params)?;
                let result = inner.resources.read(&params.uri)?;
                serde_json::to_value(result).map_err(|e| ProtocolError::internal(e.to_string()))
            }
            "resources/subscribe" => {
                let params: ResourceUriParams = decode_params(request.params)?;
                if !inner.resources.contains(&params.uri) {
                    return Err(ProtocolError::resource_not_found(&params.uri));
                }
                session.subscribe(&params.uri);
                serde_json::to_value(EmptyResult {})
                    .map_err(|e| ProtocolError::internal(e.to_string()))
            }
            "resources/unsubscribe" => {
                let params: ResourceUriParams = decode_params(request.params)?;
                session.unsubscribe(&params.uri);
                serde_json::to_value(EmptyResult {})
                    .map_err(|e| ProtocolError::internal(e.to_string()))
            }
            "prompts/list" => {
                let params: ListPromptsParams = decode_params(request.params)?;
                let page = inner.prompts.list(params.cursor.as_deref())?;
                serde_json::to_value(page).map_err(|e| ProtocolError::internal(e.to_string()))
            }
            "prompts/get" => {
                let params: GetPromptParams = decode_params(request.params)?;
                let result = inner.prompts.get(&params.name, params.arguments).await?;
                serde_json::to_value(result).map_err(|e| ProtocolError::internal(e.to_string()))
            }
            "logging/setLevel" => {
                let params: SetLevelParams = decode_params(request.params)?;
                session.set_log_level(params.level);
                serde_json::to_value(EmptyResult {})
                    .map_err(|e| ProtocolError::internal(e.to_string()))
            }
            other => Err(ProtocolError::method_not_found(other)),
        }
    }

    /// Handle one notification from the peer.
    pub fn handle_notification(&self, notification: JsonRpcNotification, session: &Arc<Session>) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                session.mark_initialized();
                debug!(session_id = %session.id, "client confirmed initialization");
            }
            "notifications/cancelled" => {
                match decode_params::<CancelledParams>(notification.params) {
                    Ok(params) => {
                        debug!(
                            session_id = %session.id,
                            request_id = %params.request_id,
                            reason = params.reason.as_deref().unwrap_or(""),
                            "request cancelled by client"
                        );
                        session.cancel(&params.request_id);
                    }
                    Err(e) => warn!(error = %e, "malformed cancellation notification"),
                }
            }
            other => {
                debug!(session_id = %session.id, method = other, "ignoring notification");
            }
        }
    }
}
