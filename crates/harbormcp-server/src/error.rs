//! Server error type and the protocol-error to HTTP-status table.

use harbormcp_protocol::{ErrorCode, ProtocolError};
use thiserror::Error;

/// Errors surfaced by the server runtime.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Protocol-level failure answered as a JSON-RPC error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// I/O failure on a transport surface
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for server operations.
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// HTTP status for a protocol error, per the fixed mapping table:
/// parse/invalid-request/invalid-params are client errors, method-not-found
/// is a 404, internal is a 500, and anything else in the protocol band is
/// a 400.
pub fn protocol_error_status(error: &ProtocolError) -> u16 {
    match error.kind() {
        ErrorCode::ParseError | ErrorCode::InvalidRequest | ErrorCode::InvalidParams => 400,
        ErrorCode::MethodNotFound => 404,
        ErrorCode::InternalError => 500,
        _ => 400,
    }
}
