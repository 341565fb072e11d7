//! Demo surface for the bundled bins and the end-to-end tests: an `echo`
//! tool, a greeting resource with a template, and a `summarize` prompt.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use harbormcp_protocol::ProtocolError;
use harbormcp_protocol::types::{
    CallToolResult, Content, GetPromptResult, Implementation, Prompt, PromptArgument,
    PromptMessage, Resource, ResourceContents, ResourceTemplate, Role, Tool,
};

use crate::registry::{PromptHandler, ToolContext, ToolHandler};
use crate::service::McpService;

struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(
        &self,
        arguments: Option<Map<String, Value>>,
        _ctx: &ToolContext,
    ) -> Result<CallToolResult, ProtocolError> {
        let text = arguments
            .as_ref()
            .and_then(|args| args.get("text"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::invalid_params("echo requires a 'text' argument"))?;
        Ok(CallToolResult::text(text))
    }
}

struct CountTool;

#[async_trait]
impl ToolHandler for CountTool {
    async fn call(
        &self,
        arguments: Option<Map<String, Value>>,
        ctx: &ToolContext,
    ) -> Result<CallToolResult, ProtocolError> {
        let to = arguments
            .as_ref()
            .and_then(|args| args.get("to"))
            .and_then(Value::as_u64)
            .unwrap_or(3)
            .min(100);
        for step in 1..=to {
            ctx.report_progress(
                step as f64,
                Some(to as f64),
                Some(&format!("counted {step}")),
            );
        }
        Ok(CallToolResult::text(format!("counted to {to}")))
    }
}

struct SummarizePrompt;

#[async_trait]
impl PromptHandler for SummarizePrompt {
    async fn render(
        &self,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult, ProtocolError> {
        let text = arguments
            .and_then(|mut args| args.remove("text"))
            .ok_or_else(|| ProtocolError::invalid_params("summarize requires a 'text' argument"))?;
        Ok(GetPromptResult {
            description: Some("Summarization request".to_string()),
            messages: vec![PromptMessage {
                role: Role::User,
                content: Content::text(format!("Summarize the following text:\n\n{text}")),
            }],
        })
    }
}

/// A service populated with the demo tools, resources, and prompts.
pub fn demo_service() -> McpService {
    let service = McpService::new(Implementation::new(
        "harbormcp-demo",
        env!("CARGO_PKG_VERSION"),
    ));
    service.set_instructions("Demo server exposing an echo tool, a greeting resource, and a summarize prompt.");

    service.add_tool(
        Tool {
            name: "echo".to_string(),
            title: Some("Echo".to_string()),
            description: Some("Echo the provided text back unchanged".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        },
        Arc::new(EchoTool),
    );
    service.add_tool(
        Tool {
            name: "count".to_string(),
            title: Some("Count".to_string()),
            description: Some("Count to a number, reporting each step as progress".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": { "to": { "type": "integer", "minimum": 1 } }
            }),
        },
        Arc::new(CountTool),
    );

    service.add_resource(
        Resource {
            uri: "memo://greeting".to_string(),
            name: "greeting".to_string(),
            title: None,
            description: Some("A friendly greeting".to_string()),
            mime_type: Some("text/plain".to_string()),
        },
        ResourceContents::Text {
            uri: "memo://greeting".to_string(),
            mime_type: Some("text/plain".to_string()),
            text: "Hello from HarborMCP!".to_string(),
        },
    );
    service.add_resource_template(ResourceTemplate {
        uri_template: "memo://{name}".to_string(),
        name: "memo".to_string(),
        description: Some("Memos by name".to_string()),
        mime_type: Some("text/plain".to_string()),
    });

    service.add_prompt(
        Prompt {
            name: "summarize".to_string(),
            title: None,
            description: Some("Build a summarization request".to_string()),
            arguments: Some(vec![PromptArgument {
                name: "text".to_string(),
                description: Some("The text to summarize".to_string()),
                required: Some(true),
            }]),
        },
        Arc::new(SummarizePrompt),
    );

    service
}
