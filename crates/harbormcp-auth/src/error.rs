//! Auth error taxonomy.

use thiserror::Error;

/// Errors surfaced by the resource server and the OAuth proxy.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// No bearer token on the request
    #[error("missing bearer token")]
    MissingToken,

    /// Token present but inactive, expired, or unverifiable
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Token valid but lacking one or more required scopes
    #[error("insufficient scope: requires {required}")]
    InsufficientScope {
        /// Space-separated required scope list
        required: String,
    },

    /// Invalid configuration, raised at construction and never at request
    /// time
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The upstream authorization server failed or answered garbage
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Storage adapter failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// HTTP status this error maps to at the resource boundary.
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingToken | Self::InvalidToken(_) => 401,
            Self::InsufficientScope { .. } => 403,
            Self::Configuration(_) => 500,
            Self::Upstream(_) => 502,
            Self::Storage(_) => 500,
        }
    }

    /// OAuth error code used in `WWW-Authenticate` and error bodies.
    pub fn oauth_code(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken(_) => "invalid_token",
            Self::InsufficientScope { .. } => "insufficient_scope",
            Self::Upstream(_) => "server_error",
            Self::Configuration(_) | Self::Storage(_) => "server_error",
        }
    }
}

/// Result alias for auth operations.
pub type AuthResult<T> = std::result::Result<T, AuthError>;
