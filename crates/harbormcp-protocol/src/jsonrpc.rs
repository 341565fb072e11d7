//! # JSON-RPC 2.0 Envelopes
//!
//! Request, notification and response envelopes plus [`validate_message`],
//! the single entry point that classifies raw wire text into one of the
//! protocol's message shapes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::error::{ErrorCode, ProtocolError};

/// JSON-RPC version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC version marker that serializes as the literal `"2.0"`
/// and refuses anything else on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "invalid JSON-RPC version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// Request identifier: a string or an integer.
///
/// Connectors allocate ids monotonically starting at 0, so the initialize
/// request is always id 0. Servers must echo the id unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id (the form connectors allocate)
    Number(i64),
    /// String id (accepted from peers)
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// JSON-RPC request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Request identifier
    pub id: RequestId,
    /// Slash-separated lowercase method path (e.g. `tools/list`)
    pub method: String,
    /// Request parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new request envelope.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC notification message (no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Notification method name
    pub method: String,
    /// Notification parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new notification envelope.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object carried inside an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Construct a JSON-RPC error object.
pub fn jsonrpc_error(code: i32, message: impl Into<String>, data: Option<Value>) -> JsonRpcError {
    JsonRpcError {
        code,
        message: message.into(),
        data,
    }
}

impl From<ErrorCode> for JsonRpcError {
    fn from(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
            data: None,
        }
    }
}

impl From<&ProtocolError> for JsonRpcError {
    fn from(err: &ProtocolError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            data: err.data.clone(),
        }
    }
}

/// Response payload - mutual exclusion of result and error by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponsePayload {
    /// Successful response
    Success {
        /// Response result
        result: Value,
    },
    /// Error response
    Error {
        /// Response error
        error: JsonRpcError,
    },
}

/// JSON-RPC response message (success or error)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Identifier of the request being answered
    pub id: RequestId,
    /// Result or error, never both
    #[serde(flatten)]
    pub payload: JsonRpcResponsePayload,
}

impl JsonRpcResponse {
    /// Create a successful response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            payload: JsonRpcResponsePayload::Success { result },
        }
    }

    /// Create an error response.
    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            payload: JsonRpcResponsePayload::Error { error },
        }
    }

    /// Whether this is a success response.
    pub fn is_success(&self) -> bool {
        matches!(self.payload, JsonRpcResponsePayload::Success { .. })
    }

    /// The result, if this is a success response.
    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            JsonRpcResponsePayload::Success { result } => Some(result),
            JsonRpcResponsePayload::Error { .. } => None,
        }
    }

    /// The error, if this is an error response.
    pub fn error_object(&self) -> Option<&JsonRpcError> {
        match &self.payload {
            JsonRpcResponsePayload::Success { .. } => None,
            JsonRpcResponsePayload::Error { error } => Some(error),
        }
    }

    /// Split into the correlation id and a typed result.
    pub fn into_result(self) -> (RequestId, Result<Value, ProtocolError>) {
        match self.payload {
            JsonRpcResponsePayload::Success { result } => (self.id, Ok(result)),
            JsonRpcResponsePayload::Error { error } => (
                self.id,
                Err(ProtocolError::new(error.code, error.message, error.data)),
            ),
        }
    }
}

/// Union of the protocol's message shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request (has `id` and `method`)
    Request(JsonRpcRequest),
    /// Notification (has `method`, no `id`)
    Notification(JsonRpcNotification),
    /// Response, success or error (has `id`, no `method`)
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// Serialize the envelope to a compact JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(r: JsonRpcRequest) -> Self {
        Self::Request(r)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(n: JsonRpcNotification) -> Self {
        Self::Notification(n)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(r: JsonRpcResponse) -> Self {
        Self::Response(r)
    }
}

fn valid_id(value: &Value) -> bool {
    match value {
        Value::String(_) => true,
        Value::Number(n) => n.is_i64() || n.is_u64(),
        _ => false,
    }
}

/// Validate and classify one raw wire message.
///
/// Fails with `PARSE_ERROR` (-32700) when the text is not syntactically
/// valid JSON, and with `INVALID_REQUEST` (-32600) when the JSON does not
/// form a recognizable JSON-RPC 2.0 envelope: missing or wrong `jsonrpc`
/// field, missing required fields for the detected shape, or an id that is
/// neither a string nor an integer.
pub fn validate_message(raw: &str) -> Result<JsonRpcMessage, ProtocolError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ProtocolError::parse_error(format!("invalid JSON: {e}")))?;

    let obj = value
        .as_object()
        .ok_or_else(|| ProtocolError::invalid_request("message must be a JSON object"))?;

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(ProtocolError::invalid_request(format!(
                "unsupported jsonrpc version '{other}'"
            )));
        }
        None => {
            return Err(ProtocolError::invalid_request(
                "missing required field 'jsonrpc'",
            ));
        }
    }

    let has_method = obj.get("method").is_some();
    let has_id = obj.get("id").is_some();

    if let Some(id) = obj.get("id")
        && !valid_id(id)
    {
        return Err(ProtocolError::invalid_request(
            "id must be a string or an integer",
        ));
    }

    match (has_method, has_id) {
        (true, _) => {
            if !obj.get("method").is_some_and(Value::is_string) {
                return Err(ProtocolError::invalid_request("method must be a string"));
            }
            if has_id {
                serde_json::from_value(value)
                    .map(JsonRpcMessage::Request)
                    .map_err(|e| ProtocolError::invalid_request(format!("malformed request: {e}")))
            } else {
                serde_json::from_value(value)
                    .map(JsonRpcMessage::Notification)
                    .map_err(|e| {
                        ProtocolError::invalid_request(format!("malformed notification: {e}"))
                    })
            }
        }
        (false, true) => {
            let has_result = obj.get("result").is_some();
            let has_error = obj.get("error").is_some();
            if has_result == has_error {
                return Err(ProtocolError::invalid_request(
                    "response must carry exactly one of 'result' or 'error'",
                ));
            }
            if has_error {
                let error = obj.get("error").and_then(Value::as_object);
                let well_formed = error.is_some_and(|e| {
                    e.get("code").is_some_and(|c| c.as_i64().is_some())
                        && e.get("message").is_some_and(Value::is_string)
                });
                if !well_formed {
                    return Err(ProtocolError::invalid_request(
                        "error object must carry an integer 'code' and a string 'message'",
                    ));
                }
            }
            serde_json::from_value(value)
                .map(JsonRpcMessage::Response)
                .map_err(|e| ProtocolError::invalid_request(format!("malformed response: {e}")))
        }
        (false, false) => Err(ProtocolError::invalid_request(
            "message is neither a request, a notification, nor a response",
        )),
    }
}
