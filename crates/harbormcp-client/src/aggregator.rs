//! Multi-server client aggregator.
//!
//! Presents many connected servers behind one facade: list operations fan
//! out to every connected connector in parallel, tag each result with the
//! originating server name, and concatenate in the connector map's
//! insertion order. A failing server is logged and elided; the operation
//! only fails when every server failed. The aggregator also owns the
//! shared roots set and the per-server list caches, refreshing them when a
//! server announces `list_changed`.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex as StdMutex, RwLock as StdRwLock};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use harbormcp_protocol::ProtocolError;
use harbormcp_protocol::types::{
    CallToolResult, ClientCapabilities, EmptyResult, GetPromptResult, Implementation,
    InitializeResult, ListRootsResult, Prompt, ReadResourceResult, Resource, ResourceTemplate,
    Root, RootsCapability, Tool,
};
use harbormcp_transport::Transport;

use crate::cache::CacheManager;
use crate::connector::{Connector, ConnectorStatus};
use crate::error::{ClientError, ClientResult};
use crate::handlers::{
    ElicitationHandler, NotificationHandler, RootsProvider, SamplingHandler,
};

/// A fan-out result item tagged with its originating server.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<T> {
    /// Name of the connector that produced the item
    pub server: String,
    /// The item itself
    pub item: T,
}

struct AggregatorInner {
    client_info: Implementation,
    capabilities: ClientCapabilities,
    /// Insertion-ordered; names unique. Never held across an await.
    connectors: StdRwLock<Vec<Connector>>,
    cache: CacheManager,
    roots: StdMutex<Vec<Root>>,
    sampling: StdMutex<Option<Arc<dyn SamplingHandler>>>,
    elicitation: StdMutex<Option<Arc<dyn ElicitationHandler>>>,
}

impl AggregatorInner {
    fn snapshot(&self) -> Vec<Connector> {
        self.connectors.read().clone()
    }

    fn connector(&self, name: &str) -> Option<Connector> {
        self.connectors
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }
}

/// Facade over a set of named connectors.
#[derive(Clone)]
pub struct ClientAggregator {
    inner: Arc<AggregatorInner>,
}

impl Default for ClientAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClientAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAggregator")
            .field("servers", &self.list_servers())
            .finish()
    }
}

impl ClientAggregator {
    /// Create an aggregator with the default client identity.
    pub fn new() -> Self {
        Self::with_identity(
            Implementation::new("harbormcp-client", env!("CARGO_PKG_VERSION")),
            ClientCapabilities {
                roots: Some(RootsCapability {
                    list_changed: Some(true),
                }),
                ..Default::default()
            },
        )
    }

    /// Create an aggregator with explicit identity and capabilities.
    pub fn with_identity(client_info: Implementation, capabilities: ClientCapabilities) -> Self {
        Self {
            inner: Arc::new(AggregatorInner {
                client_info,
                capabilities,
                connectors: StdRwLock::new(Vec::new()),
                cache: CacheManager::new(),
                roots: StdMutex::new(Vec::new()),
                sampling: StdMutex::new(None),
                elicitation: StdMutex::new(None),
            }),
        }
    }

    /// Install the sampling handler applied to every subsequently added
    /// server.
    pub fn set_sampling_handler(&self, handler: Arc<dyn SamplingHandler>) {
        *self.inner.sampling.lock() = Some(handler);
    }

    /// Install the elicitation handler applied to every subsequently added
    /// server.
    pub fn set_elicitation_handler(&self, handler: Arc<dyn ElicitationHandler>) {
        *self.inner.elicitation.lock() = Some(handler);
    }

    /// Connect a new named server.
    ///
    /// The name must be unique within this aggregator. The connector is
    /// registered only once its handshake completes.
    pub async fn add_server(
        &self,
        name: impl Into<String>,
        transport: Box<dyn Transport>,
    ) -> ClientResult<InitializeResult> {
        let name = name.into();
        if self.inner.connector(&name).is_some() {
            return Err(ClientError::DuplicateName(name));
        }

        let connector = Connector::with_identity(
            name.clone(),
            transport,
            self.inner.client_info.clone(),
            self.inner.capabilities.clone(),
        );

        let weak = Arc::downgrade(&self.inner);
        let sampling = self.inner.sampling.lock().clone();
        let elicitation = self.inner.elicitation.lock().clone();
        connector.update_handlers(|handlers| {
            handlers.sampling = sampling;
            handlers.elicitation = elicitation;
            handlers.roots = Some(Arc::new(AggregatorRootsProvider { inner: weak.clone() }));
            handlers.notification = Some(Arc::new(ListChangedHook {
                inner: weak,
                server: name.clone(),
            }));
        });

        let result = connector.connect().await?;

        {
            let mut connectors = self.inner.connectors.write();
            if connectors.iter().any(|c| c.name() == name) {
                // Raced with another add; yield to the winner.
                drop(connectors);
                let _ = connector.disconnect().await;
                return Err(ClientError::DuplicateName(name));
            }
            connectors.push(connector);
        }

        Ok(result)
    }

    /// Disconnect and deregister a server.
    pub async fn remove_server(&self, name: &str) -> ClientResult<()> {
        let connector = {
            let mut connectors = self.inner.connectors.write();
            let position = connectors.iter().position(|c| c.name() == name);
            position.map(|i| connectors.remove(i))
        };
        let connector = connector.ok_or_else(|| ClientError::UnknownServer(name.to_string()))?;
        self.inner.cache.invalidate(name);
        connector.disconnect().await
    }

    /// Names of the currently connected servers, in registration order.
    pub fn list_servers(&self) -> Vec<String> {
        self.inner
            .connectors
            .read()
            .iter()
            .filter(|c| c.status() == ConnectorStatus::Connected)
            .map(|c| c.name().to_string())
            .collect()
    }

    /// The connector registered under `name`, if any.
    pub fn connector(&self, name: &str) -> Option<Connector> {
        self.inner.connector(name)
    }

    /// Disconnect every server.
    pub async fn disconnect_all(&self) {
        let connectors: Vec<Connector> = {
            let mut guard = self.inner.connectors.write();
            guard.drain(..).collect()
        };
        for connector in connectors {
            if let Err(e) = connector.disconnect().await {
                warn!(server = %connector.name(), error = %e, "error disconnecting server");
            }
            self.inner.cache.invalidate(connector.name());
        }
    }

    /// List tools from every connected server in parallel.
    pub async fn list_all_tools(&self) -> ClientResult<Vec<Tagged<Tool>>> {
        let connectors = self.connected();
        let results = join_all(connectors.iter().map(|c| {
            let c = c.clone();
            async move { (c.name().to_string(), c.list_tools().await) }
        }))
        .await;
        self.merge(results, |server, tools: &Vec<Tool>| {
            self.inner.cache.set_tools(server, tools.clone());
        })
    }

    /// List resources from every connected server in parallel.
    pub async fn list_all_resources(&self) -> ClientResult<Vec<Tagged<Resource>>> {
        let connectors = self.connected();
        let results = join_all(connectors.iter().map(|c| {
            let c = c.clone();
            async move { (c.name().to_string(), c.list_resources().await) }
        }))
        .await;
        self.merge(results, |server, resources: &Vec<Resource>| {
            self.inner.cache.set_resources(server, resources.clone());
        })
    }

    /// List resource templates from every connected server in parallel.
    pub async fn list_all_resource_templates(
        &self,
    ) -> ClientResult<Vec<Tagged<ResourceTemplate>>> {
        let connectors = self.connected();
        let results = join_all(connectors.iter().map(|c| {
            let c = c.clone();
            async move { (c.name().to_string(), c.list_resource_templates().await) }
        }))
        .await;
        self.merge(results, |server, templates: &Vec<ResourceTemplate>| {
            self.inner
                .cache
                .set_resource_templates(server, templates.clone());
        })
    }

    /// List prompts from every connected server in parallel.
    pub async fn list_all_prompts(&self) -> ClientResult<Vec<Tagged<Prompt>>> {
        let connectors = self.connected();
        let results = join_all(connectors.iter().map(|c| {
            let c = c.clone();
            async move { (c.name().to_string(), c.list_prompts().await) }
        }))
        .await;
        self.merge(results, |server, prompts: &Vec<Prompt>| {
            self.inner.cache.set_prompts(server, prompts.clone());
        })
    }

    /// Call a tool on a specific server.
    pub async fn call_tool(
        &self,
        server: &str,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> ClientResult<CallToolResult> {
        self.route(server)?.call_tool(name, arguments).await
    }

    /// Read a resource from a specific server.
    pub async fn read_resource(&self, server: &str, uri: &str) -> ClientResult<ReadResourceResult> {
        self.route(server)?.read_resource(uri).await
    }

    /// Render a prompt from a specific server.
    pub async fn get_prompt(
        &self,
        server: &str,
        name: &str,
        arguments: Option<std::collections::HashMap<String, String>>,
    ) -> ClientResult<GetPromptResult> {
        self.route(server)?.get_prompt(name, arguments).await
    }

    /// Subscribe to a resource on a specific server.
    pub async fn subscribe_resource(&self, server: &str, uri: &str) -> ClientResult<EmptyResult> {
        self.route(server)?.subscribe_resource(uri).await
    }

    /// Unsubscribe from a resource on a specific server.
    pub async fn unsubscribe_resource(&self, server: &str, uri: &str) -> ClientResult<EmptyResult> {
        self.route(server)?.unsubscribe_resource(uri).await
    }

    /// Cached tools for a server, if a list has been fetched.
    pub fn cached_tools(&self, server: &str) -> Option<Vec<Tool>> {
        self.inner.cache.tools(server)
    }

    /// Cached resources for a server.
    pub fn cached_resources(&self, server: &str) -> Option<Vec<Resource>> {
        self.inner.cache.resources(server)
    }

    /// Cached resource templates for a server.
    pub fn cached_resource_templates(&self, server: &str) -> Option<Vec<ResourceTemplate>> {
        self.inner.cache.resource_templates(server)
    }

    /// Cached prompts for a server.
    pub fn cached_prompts(&self, server: &str) -> Option<Vec<Prompt>> {
        self.inner.cache.prompts(server)
    }

    /// Current roots, in insertion order.
    pub fn roots(&self) -> Vec<Root> {
        self.inner.roots.lock().clone()
    }

    /// Add a root.
    ///
    /// Returns `false` without notifying anyone when a root with the same
    /// URI already exists; otherwise broadcasts
    /// `notifications/roots/list_changed` to every connected server.
    pub async fn add_root(&self, root: Root) -> bool {
        {
            let mut roots = self.inner.roots.lock();
            if roots.iter().any(|r| r.uri == root.uri) {
                return false;
            }
            roots.push(root);
        }
        self.broadcast_roots_changed().await;
        true
    }

    /// Remove a root by URI.
    ///
    /// Returns `false` without notifying anyone when no such root exists.
    pub async fn remove_root(&self, uri: &str) -> bool {
        let removed = {
            let mut roots = self.inner.roots.lock();
            let before = roots.len();
            roots.retain(|r| r.uri != uri);
            roots.len() != before
        };
        if removed {
            self.broadcast_roots_changed().await;
        }
        removed
    }

    fn connected(&self) -> Vec<Connector> {
        self.inner
            .snapshot()
            .into_iter()
            .filter(|c| c.status() == ConnectorStatus::Connected)
            .collect()
    }

    fn route(&self, server: &str) -> ClientResult<Connector> {
        self.inner
            .connector(server)
            .ok_or_else(|| ClientError::UnknownServer(server.to_string()))
    }

    /// Merge fan-out results: tag and concatenate successes in connector
    /// order, log and elide failures, fail only when nothing succeeded.
    fn merge<T: Clone>(
        &self,
        results: Vec<(String, ClientResult<Vec<T>>)>,
        on_success: impl Fn(&str, &Vec<T>),
    ) -> ClientResult<Vec<Tagged<T>>> {
        let total = results.len();
        let mut items = Vec::new();
        let mut failures = Vec::new();

        for (server, result) in results {
            match result {
                Ok(list) => {
                    on_success(&server, &list);
                    items.extend(list.into_iter().map(|item| Tagged {
                        server: server.clone(),
                        item,
                    }));
                }
                Err(e) => {
                    error!(server = %server, error = %e, "fan-out list failed for server");
                    failures.push(format!("{server}: {e}"));
                }
            }
        }

        if total > 0 && failures.len() == total {
            return Err(ClientError::AllServersFailed(failures.join("; ")));
        }
        Ok(items)
    }

    async fn broadcast_roots_changed(&self) {
        let connectors = self.connected();
        join_all(connectors.into_iter().map(|c| async move {
            if let Err(e) = c
                .send_notification("notifications/roots/list_changed", None)
                .await
            {
                warn!(server = %c.name(), error = %e, "failed to broadcast roots change");
            }
        }))
        .await;
    }
}

struct AggregatorRootsProvider {
    inner: Weak<AggregatorInner>,
}

#[async_trait]
impl RootsProvider for AggregatorRootsProvider {
    async fn list_roots(&self) -> ListRootsResult {
        match self.inner.upgrade() {
            Some(inner) => ListRootsResult {
                roots: inner.roots.lock().clone(),
            },
            None => ListRootsResult::default(),
        }
    }
}

/// Connector notification hook: refreshes the caches when a server with
/// the matching `listChanged` capability announces a change.
struct ListChangedHook {
    inner: Weak<AggregatorInner>,
    server: String,
}

#[derive(Clone, Copy, Debug)]
enum RefreshKind {
    Tools,
    Resources,
    Prompts,
}

#[async_trait]
impl NotificationHandler for ListChangedHook {
    async fn on_notification(
        &self,
        method: &str,
        _params: Option<Value>,
    ) -> Result<(), ProtocolError> {
        let kind = match method {
            "notifications/tools/list_changed" => RefreshKind::Tools,
            "notifications/resources/list_changed" => RefreshKind::Resources,
            "notifications/prompts/list_changed" => RefreshKind::Prompts,
            other => {
                debug!(server = %self.server, method = other, "ignoring notification");
                return Ok(());
            }
        };

        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };
        let server = self.server.clone();
        // The hook runs on the connector's pump task; refreshing in place
        // would deadlock against the response dispatch, so spawn.
        tokio::spawn(async move {
            refresh_cache(inner, server, kind).await;
        });
        Ok(())
    }
}

async fn refresh_cache(inner: Arc<AggregatorInner>, server: String, kind: RefreshKind) {
    let Some(connector) = inner.connector(&server) else {
        return;
    };
    let capabilities = connector
        .negotiated()
        .map(|n| n.capabilities)
        .unwrap_or_default();

    match kind {
        RefreshKind::Tools => {
            if capabilities.tools.and_then(|t| t.list_changed) != Some(true) {
                debug!(server = %server, "tools list_changed not advertised, skipping refresh");
                return;
            }
            match connector.list_tools().await {
                Ok(tools) => inner.cache.set_tools(&server, tools),
                Err(e) => error!(server = %server, error = %e, "failed to refresh tool cache"),
            }
        }
        RefreshKind::Resources => {
            let advertised = capabilities
                .resources
                .as_ref()
                .and_then(|r| r.list_changed);
            if advertised != Some(true) {
                debug!(server = %server, "resources list_changed not advertised, skipping refresh");
                return;
            }
            match connector.list_resources().await {
                Ok(resources) => inner.cache.set_resources(&server, resources),
                Err(e) => error!(server = %server, error = %e, "failed to refresh resource cache"),
            }
            // A resource change also invalidates the template view.
            match connector.list_resource_templates().await {
                Ok(templates) => inner.cache.set_resource_templates(&server, templates),
                Err(e) => {
                    error!(server = %server, error = %e, "failed to refresh resource template cache");
                }
            }
        }
        RefreshKind::Prompts => {
            if capabilities.prompts.and_then(|p| p.list_changed) != Some(true) {
                debug!(server = %server, "prompts list_changed not advertised, skipping refresh");
                return;
            }
            match connector.list_prompts().await {
                Ok(prompts) => inner.cache.set_prompts(&server, prompts),
                Err(e) => error!(server = %server, error = %e, "failed to refresh prompt cache"),
            }
        }
    }
}
