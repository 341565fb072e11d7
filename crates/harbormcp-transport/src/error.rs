//! Transport error type.

use thiserror::Error;

/// Errors surfaced by transports.
///
/// Transport errors are terminal for in-flight requests: the connector
/// rejects every pending request and transitions to `disconnected` when one
/// is reported on the event stream. The core never retries them.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Child process could not be spawned
    #[error("failed to spawn child process: {0}")]
    Spawn(String),

    /// Operation attempted on a transport that is not attached
    #[error("transport not connected")]
    NotConnected,

    /// Outbound write failed
    #[error("send failed: {0}")]
    Send(String),

    /// Inbound read failed
    #[error("receive failed: {0}")]
    Receive(String),

    /// The peer closed the connection
    #[error("connection closed: {0}")]
    Closed(String),

    /// Shutdown escalation failed (e.g. SIGKILL delivery)
    #[error("shutdown failed: {0}")]
    Shutdown(String),

    /// Non-success HTTP status outside the protocol error flow
    #[error("HTTP error {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or status text
        message: String,
    },

    /// Authentication required but not satisfiable
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Invalid transport configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Message could not be serialized for the wire
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Result alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
