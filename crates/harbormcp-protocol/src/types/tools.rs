//! Tool definitions and the `tools/*` operation payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Content;

/// A tool the server exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Unique tool name
    pub name: String,
    /// Optional display title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Optional description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the tool's arguments
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Parameters for `tools/list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolsParams {
    /// Opaque pagination cursor from a previous page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Result of `tools/list` (one page).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Tools in server order
    pub tools: Vec<Tool>,
    /// Cursor for the next page, absent on the last page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name
    pub name: String,
    /// Tool arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
    /// Request metadata (progress token)
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<super::RequestMeta>,
}

/// Result of `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Result content blocks
    pub content: Vec<Content>,
    /// Whether the tool itself failed (distinct from a protocol error)
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// A successful single-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    /// A tool-level failure carrying an explanatory message.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_schema_field_is_camel_case() {
        let tool = Tool {
            name: "echo".to_string(),
            title: None,
            description: Some("Echo the input".to_string()),
            input_schema: json!({"type": "object"}),
        };
        let value = serde_json::to_value(&tool).unwrap();
        assert!(value.get("inputSchema").is_some());
        assert!(value.get("title").is_none());
    }

    #[test]
    fn call_result_defaults_is_error_false() {
        let parsed: CallToolResult =
            serde_json::from_value(json!({"content": [{"type": "text", "text": "ok"}]})).unwrap();
        assert!(!parsed.is_error);
    }

    #[test]
    fn call_params_carry_the_progress_token_under_meta() {
        use super::super::{ProgressToken, RequestMeta};

        let params = CallToolParams {
            name: "count".to_string(),
            arguments: None,
            meta: Some(RequestMeta {
                progress_token: Some(ProgressToken::Number(7)),
            }),
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["_meta"]["progressToken"], json!(7));

        let bare = CallToolParams {
            name: "echo".to_string(),
            arguments: None,
            meta: None,
        };
        assert!(!serde_json::to_string(&bare).unwrap().contains("_meta"));
    }

    #[test]
    fn list_result_next_cursor_absent_on_last_page() {
        let page = ListToolsResult {
            tools: vec![],
            next_cursor: None,
        };
        assert!(!serde_json::to_string(&page).unwrap().contains("nextCursor"));
    }
}
