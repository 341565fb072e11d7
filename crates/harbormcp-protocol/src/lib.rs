//! # harbormcp-protocol
//!
//! Protocol wire layer for HarborMCP: JSON-RPC 2.0 envelopes and
//! validation, the typed error band, protocol-version negotiation, and the
//! data model shared by clients and servers (initialize handshake,
//! capability tree, tools / resources / prompts / roots, notifications,
//! sampling and elicitation).
//!
//! This crate is the foundation of the workspace; it performs no I/O.

#![warn(missing_docs)]

pub mod error;
pub mod jsonrpc;
pub mod types;
pub mod version;

pub use error::{ErrorCode, ProtocolError};
pub use jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    JsonRpcVersion, RequestId, jsonrpc_error, validate_message,
};
pub use version::{LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS, negotiate};

/// Result alias for protocol-layer operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
