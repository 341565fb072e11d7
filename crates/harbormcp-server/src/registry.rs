//! In-memory tool / resource / prompt registries.
//!
//! Registries keep server order (registration order) and serve the
//! paginated list operations; an optional page size drives `nextCursor`
//! emission. Handlers are trait objects so bins and tests can register
//! whatever surface they need.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use harbormcp_protocol::ProtocolError;
use harbormcp_protocol::types::{
    CallToolResult, GetPromptResult, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, ListToolsResult, ProgressParams, ProgressToken, Prompt,
    ReadResourceResult, Resource, ResourceContents, ResourceTemplate, Tool,
};

/// Invocation context handed to a tool: the caller's progress token and the
/// sink interim progress frames flow through.
///
/// Frames reported here are delivered to the caller as
/// `notifications/progress` ahead of the final response. Reports are
/// dropped when the request carried no progress token.
pub struct ToolContext {
    progress_token: Option<ProgressToken>,
    progress: mpsc::UnboundedSender<ProgressParams>,
}

impl ToolContext {
    /// Context for a call whose request carried `progress_token`.
    pub fn new(
        progress_token: Option<ProgressToken>,
        progress: mpsc::UnboundedSender<ProgressParams>,
    ) -> Self {
        Self {
            progress_token,
            progress,
        }
    }

    /// Context that discards all progress (tests, detached callers).
    pub fn detached() -> Self {
        let (progress, _) = mpsc::unbounded_channel();
        Self {
            progress_token: None,
            progress,
        }
    }

    /// Whether the caller asked for progress.
    pub fn wants_progress(&self) -> bool {
        self.progress_token.is_some()
    }

    /// Report interim progress towards an optional total.
    pub fn report_progress(&self, progress: f64, total: Option<f64>, message: Option<&str>) {
        let Some(token) = &self.progress_token else {
            return;
        };
        let _ = self.progress.send(ProgressParams {
            progress_token: token.clone(),
            progress,
            total,
            message: message.map(str::to_string),
        });
    }
}

/// Executes one tool call.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool against its arguments, reporting progress through
    /// `ctx`.
    async fn call(
        &self,
        arguments: Option<Map<String, Value>>,
        ctx: &ToolContext,
    ) -> Result<CallToolResult, ProtocolError>;
}

/// Renders one prompt.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// Render the prompt with the supplied argument values.
    async fn render(
        &self,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult, ProtocolError>;
}

/// Slice `items` according to an offset cursor.
fn paginate<T: Clone>(
    items: &[T],
    cursor: Option<&str>,
    page_size: Option<usize>,
) -> Result<(Vec<T>, Option<String>), ProtocolError> {
    let start = match cursor {
        None => 0,
        Some(cursor) => cursor
            .parse::<usize>()
            .map_err(|_| ProtocolError::invalid_params(format!("invalid cursor '{cursor}'")))?,
    };
    if start > items.len() {
        return Err(ProtocolError::invalid_params(format!(
            "cursor '{start}' is past the end of the list"
        )));
    }
    match page_size {
        None => Ok((items[start..].to_vec(), None)),
        Some(size) => {
            let end = (start + size).min(items.len());
            let next = (end < items.len()).then(|| end.to_string());
            Ok((items[start..end].to_vec(), next))
        }
    }
}

/// Ordered tool registry.
#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<Vec<(Tool, Arc<dyn ToolHandler>)>>,
    page_size: RwLock<Option<usize>>,
}

impl ToolRegistry {
    /// Register a tool; replaces an existing tool with the same name.
    /// Returns whether the registry changed shape (new name).
    pub fn register(&self, tool: Tool, handler: Arc<dyn ToolHandler>) -> bool {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|(t, _)| t.name == tool.name) {
            Some(entry) => {
                *entry = (tool, handler);
                false
            }
            None => {
                entries.push((tool, handler));
                true
            }
        }
    }

    /// Remove a tool by name.
    pub fn remove(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(t, _)| t.name != name);
        entries.len() != before
    }

    /// Pages are cut at `size` items when set.
    pub fn set_page_size(&self, size: Option<usize>) {
        *self.page_size.write() = size;
    }

    /// One page of the tool list.
    pub fn list(&self, cursor: Option<&str>) -> Result<ListToolsResult, ProtocolError> {
        let tools: Vec<Tool> = self.entries.read().iter().map(|(t, _)| t.clone()).collect();
        let (tools, next_cursor) = paginate(&tools, cursor, *self.page_size.read())?;
        Ok(ListToolsResult { tools, next_cursor })
    }

    /// Handler for a tool name.
    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.entries
            .read()
            .iter()
            .find(|(t, _)| t.name == name)
            .map(|(_, handler)| Arc::clone(handler))
    }
}

/// Ordered resource registry with static contents and templates.
#[derive(Default)]
pub struct ResourceRegistry {
    entries: RwLock<Vec<(Resource, ResourceContents)>>,
    templates: RwLock<Vec<ResourceTemplate>>,
    page_size: RwLock<Option<usize>>,
}

impl ResourceRegistry {
    /// Register a resource with its contents; replaces by URI.
    pub fn register(&self, resource: Resource, contents: ResourceContents) -> bool {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|(r, _)| r.uri == resource.uri) {
            Some(entry) => {
                *entry = (resource, contents);
                false
            }
            None => {
                entries.push((resource, contents));
                true
            }
        }
    }

    /// Remove a resource by URI.
    pub fn remove(&self, uri: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(r, _)| r.uri != uri);
        entries.len() != before
    }

    /// Register a resource template.
    pub fn register_template(&self, template: ResourceTemplate) {
        self.templates.write().push(template);
    }

    /// Pages are cut at `size` items when set.
    pub fn set_page_size(&self, size: Option<usize>) {
        *self.page_size.write() = size;
    }

    /// One page of the resource list.
    pub fn list(&self, cursor: Option<&str>) -> Result<ListResourcesResult, ProtocolError> {
        let resources: Vec<Resource> =
            self.entries.read().iter().map(|(r, _)| r.clone()).collect();
        let (resources, next_cursor) = paginate(&resources, cursor, *self.page_size.read())?;
        Ok(ListResourcesResult {
            resources,
            next_cursor,
        })
    }

    /// One page of the template list.
    pub fn list_templates(
        &self,
        cursor: Option<&str>,
    ) -> Result<ListResourceTemplatesResult, ProtocolError> {
        let templates = self.templates.read().clone();
        let (resource_templates, next_cursor) =
            paginate(&templates, cursor, *self.page_size.read())?;
        Ok(ListResourceTemplatesResult {
            resource_templates,
            next_cursor,
        })
    }

    /// Read a resource's contents by URI.
    pub fn read(&self, uri: &str) -> Result<ReadResourceResult, ProtocolError> {
        self.entries
            .read()
            .iter()
            .find(|(r, _)| r.uri == uri)
            .map(|(_, contents)| ReadResourceResult {
                contents: vec![contents.clone()],
            })
            .ok_or_else(|| ProtocolError::resource_not_found(uri))
    }

    /// Whether a resource with this URI exists.
    pub fn contains(&self, uri: &str) -> bool {
        self.entries.read().iter().any(|(r, _)| r.uri == uri)
    }
}

/// Ordered prompt registry.
#[derive(Default)]
pub struct PromptRegistry {
    entries: RwLock<Vec<(Prompt, Arc<dyn PromptHandler>)>>,
    page_size: RwLock<Option<usize>>,
}

impl PromptRegistry {
    /// Register a prompt; replaces by name.
    pub fn register(&self, prompt: Prompt, handler: Arc<dyn PromptHandler>) -> bool {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|(p, _)| p.name == prompt.name) {
            Some(entry) => {
                *entry = (prompt, handler);
                false
            }
            None => {
                entries.push((prompt, handler));
                true
            }
        }
    }

    /// Pages are cut at `size` items when set.
    pub fn set_page_size(&self, size: Option<usize>) {
        *self.page_size.write() = size;
    }

    /// One page of the prompt list.
    pub fn list(&self, cursor: Option<&str>) -> Result<ListPromptsResult, ProtocolError> {
        let prompts: Vec<Prompt> = self.entries.read().iter().map(|(p, _)| p.clone()).collect();
        let (prompts, next_cursor) = paginate(&prompts, cursor, *self.page_size.read())?;
        Ok(ListPromptsResult {
            prompts,
            next_cursor,
        })
    }

    /// Render a prompt by name.
    pub async fn get(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult, ProtocolError> {
        let handler = self
            .entries
            .read()
            .iter()
            .find(|(p, _)| p.name == name)
            .map(|(_, handler)| Arc::clone(handler));
        match handler {
            Some(handler) => handler.render(arguments).await,
            None => Err(ProtocolError::invalid_params(format!(
                "unknown prompt '{name}'"
            ))),
        }
    }
}
