//! Handler registry for server-initiated traffic.
//!
//! Servers may call back into the client (sampling, elicitation, roots) and
//! push notifications. Users register trait-object handlers here; the
//! connector's inbound pump routes each server request or notification to
//! the matching handler. Requests with no registered handler are answered
//! with a protocol error; notifications with no handler are logged at
//! `info` and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use harbormcp_protocol::ProtocolError;
use harbormcp_protocol::types::{
    CreateMessageParams, CreateMessageResult, ElicitParams, ElicitResult, ListRootsResult,
};

/// Handles `sampling/createMessage` requests from servers.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    /// Invoke a language model on behalf of the server.
    async fn create_message(
        &self,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult, ProtocolError>;
}

/// Handles `elicitation/create` requests from servers.
#[async_trait]
pub trait ElicitationHandler: Send + Sync {
    /// Gather the requested input from the user.
    async fn elicit(&self, params: ElicitParams) -> Result<ElicitResult, ProtocolError>;
}

/// Answers server-initiated `roots/list` requests.
///
/// The aggregator installs its shared roots set here.
#[async_trait]
pub trait RootsProvider: Send + Sync {
    /// Current roots, in insertion order.
    async fn list_roots(&self) -> ListRootsResult;
}

/// Catch-all handler for server requests outside the built-in set.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Produce the result for a server-initiated request.
    async fn on_request(&self, method: &str, params: Option<Value>)
    -> Result<Value, ProtocolError>;
}

/// Observes notifications pushed by the server.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Handle one notification. Errors are logged and do not affect the
    /// connection.
    async fn on_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ProtocolError>;
}

/// The set of handlers installed on one connector.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    /// Sampling handler
    pub sampling: Option<Arc<dyn SamplingHandler>>,
    /// Elicitation handler
    pub elicitation: Option<Arc<dyn ElicitationHandler>>,
    /// Roots provider
    pub roots: Option<Arc<dyn RootsProvider>>,
    /// Fallback request handler
    pub request: Option<Arc<dyn RequestHandler>>,
    /// Notification observer
    pub notification: Option<Arc<dyn NotificationHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("sampling", &self.sampling.is_some())
            .field("elicitation", &self.elicitation.is_some())
            .field("roots", &self.roots.is_some())
            .field("request", &self.request.is_some())
            .field("notification", &self.notification.is_some())
            .finish()
    }
}
