//! The proxy state JWT.
//!
//! During the upstream authorization redirect the proxy must carry the
//! original client's identity, redirect URI, state, PKCE challenge, and
//! scope through the upstream AS untouched. It does so by signing them
//! into a short-lived HS256 JWT used as the upstream `state` parameter;
//! the callback decodes and verifies it, making the forwarding
//! tamper-proof.

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Minimum length of the HS256 signing secret.
pub const MIN_STATE_SECRET_LEN: usize = 32;

/// Claims carried through the upstream redirect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateClaims {
    /// Local client id
    pub cid: String,
    /// Client's redirect URI
    pub ruri: String,
    /// Client's original `state` parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ost: Option<String>,
    /// PKCE code challenge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    /// PKCE challenge method (`S256` | `plain`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ccm: Option<String>,
    /// Requested scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scp: Option<String>,
    /// Creation timestamp (seconds since epoch)
    pub ts: u64,
    /// Issued-at (seconds since epoch)
    #[serde(default)]
    pub iat: u64,
    /// Expiry (seconds since epoch)
    #[serde(default)]
    pub exp: u64,
}

/// Encoder/decoder for proxy state JWTs.
pub struct StateCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCodec")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl StateCodec {
    /// Build a codec. The secret must be at least 32 characters; this is
    /// enforced here, at construction, so it can never fail per request.
    pub fn new(secret: &str, ttl: Duration) -> AuthResult<Self> {
        if secret.len() < MIN_STATE_SECRET_LEN {
            return Err(AuthError::Configuration(format!(
                "state secret must be at least {MIN_STATE_SECRET_LEN} characters"
            )));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        })
    }

    /// Sign claims, stamping `iat`/`exp` from `now_seconds`.
    pub fn encode(&self, mut claims: StateClaims, now_seconds: u64) -> AuthResult<String> {
        claims.iat = now_seconds;
        claims.exp = now_seconds + self.ttl.as_secs();
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Configuration(format!("failed to sign state: {e}")))
    }

    /// Verify and decode a state JWT. Signature, `exp`, and `iat` presence
    /// are all enforced; any failure is an invalid-request condition at the
    /// callback.
    pub fn decode(&self, token: &str) -> AuthResult<StateClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "iat"]);
        validation.leeway = 0;
        jsonwebtoken::decode::<StateClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(format!("invalid state parameter: {e}")))
    }
}
