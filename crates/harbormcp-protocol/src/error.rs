//! Protocol error type and error-code bands.

use serde_json::Value;
use thiserror::Error;

/// Standard JSON-RPC error codes plus the protocol-specific band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Parse error (-32700)
    ParseError,
    /// Invalid request (-32600)
    InvalidRequest,
    /// Method not found (-32601)
    MethodNotFound,
    /// Invalid params (-32602)
    InvalidParams,
    /// Internal error (-32603)
    InternalError,
    /// Tool execution failed (-32000)
    ToolError,
    /// Resource not found (-32002)
    ResourceNotFound,
    /// Request cancelled by the peer (-32800)
    RequestCancelled,
    /// Application-defined error
    ApplicationError(i32),
}

impl ErrorCode {
    /// Numeric error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ToolError => -32000,
            Self::ResourceNotFound => -32002,
            Self::RequestCancelled => -32800,
            Self::ApplicationError(code) => *code,
        }
    }

    /// Standard error message.
    pub fn message(&self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ToolError => "Tool execution failed",
            Self::ResourceNotFound => "Resource not found",
            Self::RequestCancelled => "Request cancelled",
            Self::ApplicationError(_) => "Application error",
        }
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32000 => Self::ToolError,
            -32002 => Self::ResourceNotFound,
            -32800 => Self::RequestCancelled,
            other => Self::ApplicationError(other),
        }
    }
}

/// Typed protocol error: a JSON-RPC error object surfaced to callers.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("JSON-RPC error {code}: {message}")]
pub struct ProtocolError {
    /// Error code
    pub code: i32,
    /// Human-readable message
    pub message: String,
    /// Additional error data
    pub data: Option<Value>,
}

impl ProtocolError {
    /// Create an error with an explicit code.
    pub fn new(code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    /// Parse error (-32700).
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError.code(), message, None)
    }

    /// Invalid request (-32600).
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest.code(), message, None)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound.code(),
            format!("Method not found: {method}"),
            None,
        )
    }

    /// Invalid params (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams.code(), message, None)
    }

    /// Invalid params with structured data.
    pub fn invalid_params_with(message: impl Into<String>, data: Value) -> Self {
        Self::new(ErrorCode::InvalidParams.code(), message, Some(data))
    }

    /// Internal error (-32603).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError.code(), message, None)
    }

    /// Resource not found (-32002).
    pub fn resource_not_found(uri: &str) -> Self {
        Self::new(
            ErrorCode::ResourceNotFound.code(),
            format!("Resource not found: {uri}"),
            None,
        )
    }

    /// The classified code band for this error.
    pub fn kind(&self) -> ErrorCode {
        ErrorCode::from(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for code in [-32700, -32600, -32601, -32602, -32603, -32000, -32002, -32800] {
            assert_eq!(ErrorCode::from(code).code(), code);
        }
        assert_eq!(ErrorCode::from(-31999).code(), -31999);
    }

    #[test]
    fn constructors_carry_codes() {
        assert_eq!(ProtocolError::parse_error("x").code, -32700);
        assert_eq!(ProtocolError::invalid_request("x").code, -32600);
        assert_eq!(ProtocolError::method_not_found("tools/list").code, -32601);
        assert_eq!(ProtocolError::invalid_params("x").code, -32602);
        assert_eq!(ProtocolError::internal("x").code, -32603);
        assert_eq!(
            ProtocolError::resource_not_found("file:///missing").code,
            -32002
        );
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = ProtocolError::invalid_params("cursor loop");
        assert_eq!(err.to_string(), "JSON-RPC error -32602: cursor loop");
    }
}
