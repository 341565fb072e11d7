//! Elicitation: server-initiated `elicitation/create` requests asking the
//! client to gather structured user input.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters of `elicitation/create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElicitParams {
    /// Message shown to the user
    pub message: String,
    /// JSON schema describing the requested input
    pub requested_schema: Value,
}

/// How the user answered an elicitation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElicitAction {
    /// User supplied the requested input
    Accept,
    /// User explicitly declined
    Decline,
    /// User dismissed without answering
    Cancel,
}

/// Result of `elicitation/create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitResult {
    /// User action
    pub action: ElicitAction,
    /// Collected input when the action is `accept`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}
