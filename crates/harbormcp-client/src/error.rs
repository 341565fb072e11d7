//! Client error type.

use harbormcp_protocol::ProtocolError;
use harbormcp_transport::TransportError;
use thiserror::Error;

/// Errors surfaced by connectors and the aggregator.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// A typed JSON-RPC error received from the peer
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Transport failure (spawn, socket, shutdown escalation)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Operation requires a connected connector
    #[error("connector is not connected")]
    NotConnected,

    /// The connector disconnected while the operation was pending
    #[error("connector disconnected")]
    Disconnected,

    /// `disconnect()` was called while the handshake was still running
    #[error("disconnection initiated while connection was in progress")]
    ConnectAborted,

    /// Initialize handshake failed
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A connector with this name already exists in the aggregator
    #[error("connector name already in use: {0}")]
    DuplicateName(String),

    /// No connector registered under this name
    #[error("unknown server: {0}")]
    UnknownServer(String),

    /// Every connected server failed the fanned-out operation
    #[error("all servers failed: {0}")]
    AllServersFailed(String),
}

/// Result alias for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Wrap a result-decoding failure as an internal protocol error.
    pub(crate) fn decode(method: &str, err: serde_json::Error) -> Self {
        Self::Protocol(ProtocolError::internal(format!(
            "failed to decode {method} result: {err}"
        )))
    }
}
