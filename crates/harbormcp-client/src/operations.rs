//! Typed protocol operations on a connector.
//!
//! The `list_*` family drives pagination: each call repeats the underlying
//! method with the `cursor` carried forward from the previous page's
//! `nextCursor` until it is absent, preserving server order across pages
//! and never deduplicating. A cursor that repeats aborts the loop with
//! `INVALID_PARAMS("cursor loop")`.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use harbormcp_protocol::ProtocolError;
use harbormcp_protocol::types::{
    CallToolParams, CallToolResult, EmptyResult, GetPromptParams, GetPromptResult,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    LoggingLevel, ProgressToken, Prompt, ReadResourceResult, RequestMeta, Resource,
    ResourceTemplate, ResourceUriParams, SetLevelParams, Tool,
};

use crate::connector::Connector;
use crate::error::{ClientError, ClientResult};

impl Connector {
    /// Drive one paginated list method to exhaustion.
    async fn paginate<P, T>(
        &self,
        method: &str,
        extract: impl Fn(P) -> (Vec<T>, Option<String>),
    ) -> ClientResult<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors: HashSet<String> = HashSet::new();

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let value = self.send_request(method, params).await?;
            let page: P =
                serde_json::from_value(value).map_err(|e| ClientError::decode(method, e))?;
            let (page_items, next) = extract(page);
            items.extend(page_items);

            match next {
                None => return Ok(items),
                Some(next) => {
                    if !seen_cursors.insert(next.clone()) {
                        return Err(ProtocolError::invalid_params("cursor loop").into());
                    }
                    cursor = Some(next);
                }
            }
        }
    }

    /// List every tool the server exposes, across all pages.
    pub async fn list_tools(&self) -> ClientResult<Vec<Tool>> {
        self.paginate("tools/list", |page: ListToolsResult| {
            (page.tools, page.next_cursor)
        })
        .await
    }

    /// Invoke a tool.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> ClientResult<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
            meta: None,
        };
        let value = self.send_request_typed("tools/call", &params).await?;
        serde_json::from_value(value).map_err(|e| ClientError::decode("tools/call", e))
    }

    /// Invoke a tool, asking the server to stream `notifications/progress`
    /// frames correlated by `token` ahead of the result.
    ///
    /// The frames arrive through the connector's notification handler.
    pub async fn call_tool_with_progress(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
        token: ProgressToken,
    ) -> ClientResult<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
            meta: Some(RequestMeta {
                progress_token: Some(token),
            }),
        };
        let value = self.send_request_typed("tools/call", &params).await?;
        serde_json::from_value(value).map_err(|e| ClientError::decode("tools/call", e))
    }

    /// List every resource the server exposes, across all pages.
    pub async fn list_resources(&self) -> ClientResult<Vec<Resource>> {
        self.paginate("resources/list", |page: ListResourcesResult| {
            (page.resources, page.next_cursor)
        })
        .await
    }

    /// List every resource template, across all pages.
    pub async fn list_resource_templates(&self) -> ClientResult<Vec<ResourceTemplate>> {
        self.paginate(
            "resources/templates/list",
            |page: ListResourceTemplatesResult| (page.resource_templates, page.next_cursor),
        )
        .await
    }

    /// Read one resource by URI.
    pub async fn read_resource(&self, uri: &str) -> ClientResult<ReadResourceResult> {
        let params = ResourceUriParams {
            uri: uri.to_string(),
        };
        let value = self.send_request_typed("resources/read", &params).await?;
        serde_json::from_value(value).map_err(|e| ClientError::decode("resources/read", e))
    }

    /// Subscribe to change notifications for a resource URI.
    pub async fn subscribe_resource(&self, uri: &str) -> ClientResult<EmptyResult> {
        let params = ResourceUriParams {
            uri: uri.to_string(),
        };
        let value = self
            .send_request_typed("resources/subscribe", &params)
            .await?;
        serde_json::from_value(value).map_err(|e| ClientError::decode("resources/subscribe", e))
    }

    /// Cancel a resource subscription.
    pub async fn unsubscribe_resource(&self, uri: &str) -> ClientResult<EmptyResult> {
        let params = ResourceUriParams {
            uri: uri.to_string(),
        };
        let value = self
            .send_request_typed("resources/unsubscribe", &params)
            .await?;
        serde_json::from_value(value).map_err(|e| ClientError::decode("resources/unsubscribe", e))
    }

    /// List every prompt the server exposes, across all pages.
    pub async fn list_prompts(&self) -> ClientResult<Vec<Prompt>> {
        self.paginate("prompts/list", |page: ListPromptsResult| {
            (page.prompts, page.next_cursor)
        })
        .await
    }

    /// Render a prompt with the given arguments.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<std::collections::HashMap<String, String>>,
    ) -> ClientResult<GetPromptResult> {
        let params = GetPromptParams {
            name: name.to_string(),
            arguments,
        };
        let value = self.send_request_typed("prompts/get", &params).await?;
        serde_json::from_value(value).map_err(|e| ClientError::decode("prompts/get", e))
    }

    /// Liveness check.
    pub async fn ping(&self) -> ClientResult<EmptyResult> {
        let value = self.send_request("ping", None).await?;
        serde_json::from_value(value).map_err(|e| ClientError::decode("ping", e))
    }

    /// Ask the server to only send log notifications at `level` or above.
    pub async fn set_log_level(&self, level: LoggingLevel) -> ClientResult<EmptyResult> {
        let params = SetLevelParams { level };
        let value = self.send_request_typed("logging/setLevel", &params).await?;
        serde_json::from_value(value).map_err(|e| ClientError::decode("logging/setLevel", e))
    }
}
