//! The OAuth proxy: a resource-server-side authorization server that
//! fronts an upstream AS lacking dynamic client registration and/or PKCE.
//!
//! To clients it is a conformant AS: RFC 7591 registration, PKCE-verified
//! authorization-code flow, introspection, and revocation. Behind the
//! scenes every grant is forwarded to the upstream AS using the proxy's
//! own credentials; the original client's identity travels through the
//! upstream redirect inside a tamper-proof HS256 state JWT, and issued
//! tokens are mapped back to local clients by SHA-256 hash.

mod pkce;
mod routes;
mod secrets;
mod state;
mod storage;

pub use pkce::{s256_challenge, verify_challenge};
pub use secrets::{
    generate_client_id, generate_client_secret, generate_opaque_id, hash_client_secret,
    sha256_hex, verify_client_secret,
};
pub use state::{MIN_STATE_SECRET_LEN, StateClaims, StateCodec};
pub use storage::{
    ClientRecord, CodeRecord, MemoryProxyStore, ProxyStore, TokenKind, TokenRecord,
};

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::error::{AuthError, AuthResult};

/// Grant types the proxy supports locally.
pub const SUPPORTED_GRANT_TYPES: &[&str] = &["authorization_code", "refresh_token"];
/// Response types the proxy supports locally.
pub const SUPPORTED_RESPONSE_TYPES: &[&str] = &["code"];
/// Token endpoint auth methods the proxy supports locally.
pub const SUPPORTED_AUTH_METHODS: &[&str] =
    &["client_secret_basic", "client_secret_post", "none"];
/// PKCE challenge methods the proxy verifies.
pub const SUPPORTED_CHALLENGE_METHODS: &[&str] = &["S256", "plain"];

/// The upstream authorization server being fronted.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Upstream issuer identifier
    pub issuer: String,
    /// Upstream authorize endpoint
    pub authorization_endpoint: String,
    /// Upstream token endpoint
    pub token_endpoint: String,
    /// Upstream introspection endpoint
    pub introspection_endpoint: String,
    /// Upstream revocation endpoint, when it has one
    pub revocation_endpoint: Option<String>,
    /// Credentials the proxy itself holds at the upstream
    pub client_id: String,
    /// Upstream client secret
    pub client_secret: String,
}

/// Proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Public base URL of the proxy (no trailing slash)
    pub base_url: String,
    /// HS256 secret for the state JWT; at least 32 characters
    pub state_secret: String,
    /// State JWT lifetime
    pub state_ttl: Duration,
    /// Authorization-code mapping lifetime
    pub code_ttl: Duration,
    /// When set, registrations may only request these scopes
    pub allowed_scopes: Option<Vec<String>>,
    /// Scopes advertised in metadata
    pub scopes_supported: Vec<String>,
    /// The upstream AS
    pub upstream: UpstreamConfig,
}

impl ProxyConfig {
    /// Configuration with the reference lifetimes (state 600 s, codes
    /// 10 min).
    pub fn new(
        base_url: impl Into<String>,
        state_secret: impl Into<String>,
        upstream: UpstreamConfig,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            state_secret: state_secret.into(),
            state_ttl: Duration::from_secs(600),
            code_ttl: Duration::from_secs(600),
            allowed_scopes: None,
            scopes_supported: vec!["mcp:read".to_string(), "mcp:write".to_string()],
            upstream,
        }
    }
}

/// RFC 7591 registration request body (the subset the proxy honors).
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationRequest {
    /// Redirect URIs (required)
    pub redirect_uris: Option<Vec<String>>,
    /// Token endpoint auth method, default `client_secret_basic`
    pub token_endpoint_auth_method: Option<String>,
    /// Grant types, default `["authorization_code"]`
    pub grant_types: Option<Vec<String>>,
    /// Response types, default `["code"]`
    pub response_types: Option<Vec<String>>,
    /// Human-readable client name
    pub client_name: Option<String>,
    /// Space-separated requested scope
    pub scope: Option<String>,
}

#[derive(Debug)]
pub(crate) struct ValidatedRegistration {
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub scope: Option<String>,
    pub client_name: Option<String>,
}

#[derive(Debug)]
pub(crate) struct RegistrationError {
    pub code: &'static str,
    pub description: String,
}

fn redirect_uri_acceptable(uri: &str) -> Result<(), String> {
    let parsed = Url::parse(uri).map_err(|e| format!("'{uri}' does not parse: {e}"))?;
    if parsed.fragment().is_some() {
        return Err(format!("'{uri}' must not contain a fragment"));
    }
    let localhost = matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1"));
    if parsed.scheme() != "https" && !localhost {
        return Err(format!("'{uri}' must use https or point at localhost"));
    }
    Ok(())
}

pub(crate) fn validate_registration(
    config: &ProxyConfig,
    request: &RegistrationRequest,
) -> Result<ValidatedRegistration, RegistrationError> {
    let redirect_uris = request
        .redirect_uris
        .clone()
        .filter(|uris| !uris.is_empty())
        .ok_or(RegistrationError {
            code: "invalid_redirect_uri",
            description: "redirect_uris must be a non-empty array".to_string(),
        })?;
    for uri in &redirect_uris {
        redirect_uri_acceptable(uri).map_err(|description| RegistrationError {
            code: "invalid_redirect_uri",
            description,
        })?;
    }

    let grant_types = request
        .grant_types
        .clone()
        .unwrap_or_else(|| vec!["authorization_code".to_string()]);
    if let Some(bad) = grant_types
        .iter()
        .find(|g| !SUPPORTED_GRANT_TYPES.contains(&g.as_str()))
    {
        return Err(RegistrationError {
            code: "invalid_client_metadata",
            description: format!("unsupported grant_type '{bad}'"),
        });
    }

    let response_types = request
        .response_types
        .clone()
        .unwrap_or_else(|| vec!["code".to_string()]);
    if let Some(bad) = response_types
        .iter()
        .find(|r| !SUPPORTED_RESPONSE_TYPES.contains(&r.as_str()))
    {
        return Err(RegistrationError {
            code: "invalid_client_metadata",
            description: format!("unsupported response_type '{bad}'"),
        });
    }

    let token_endpoint_auth_method = request
        .token_endpoint_auth_method
        .clone()
        .unwrap_or_else(|| "client_secret_basic".to_string());
    if !SUPPORTED_AUTH_METHODS.contains(&token_endpoint_auth_method.as_str()) {
        return Err(RegistrationError {
            code: "invalid_client_metadata",
            description: format!(
                "unsupported token_endpoint_auth_method '{token_endpoint_auth_method}'"
            ),
        });
    }

    if let (Some(allowed), Some(requested)) = (&config.allowed_scopes, &request.scope) {
        for scope in requested.split_whitespace() {
            if !allowed.iter().any(|a| a == scope) {
                return Err(RegistrationError {
                    code: "invalid_client_metadata",
                    description: format!("scope '{scope}' is not permitted"),
                });
            }
        }
    }

    Ok(ValidatedRegistration {
        redirect_uris,
        grant_types,
        response_types,
        token_endpoint_auth_method,
        scope: request.scope.clone(),
        client_name: request.client_name.clone(),
    })
}

pub(crate) struct ProxyInner {
    pub config: ProxyConfig,
    pub store: Arc<dyn ProxyStore>,
    pub state_codec: StateCodec,
    pub http: reqwest::Client,
    pub clock: Arc<dyn Clock>,
}

/// The OAuth proxy. Cheap to clone; serves its endpoints via [`Self::router`].
#[derive(Clone)]
pub struct OAuthProxy {
    pub(crate) inner: Arc<ProxyInner>,
}

impl std::fmt::Debug for OAuthProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthProxy")
            .field("base_url", &self.inner.config.base_url)
            .field("upstream", &self.inner.config.upstream.issuer)
            .finish()
    }
}

impl OAuthProxy {
    /// Build a proxy over `store`. All configuration is validated here;
    /// request handling never revisits it.
    pub fn new(config: ProxyConfig, store: Arc<dyn ProxyStore>) -> AuthResult<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Build with an explicit clock (deterministic tests).
    pub fn with_clock(
        config: ProxyConfig,
        store: Arc<dyn ProxyStore>,
        clock: Arc<dyn Clock>,
    ) -> AuthResult<Self> {
        let state_codec = StateCodec::new(&config.state_secret, config.state_ttl)?;

        Url::parse(&config.base_url)
            .map_err(|e| AuthError::Configuration(format!("invalid base_url: {e}")))?;
        if config.upstream.client_id.is_empty() || config.upstream.client_secret.is_empty() {
            return Err(AuthError::Configuration(
                "upstream client credentials are required".to_string(),
            ));
        }
        for (name, endpoint) in [
            ("authorization_endpoint", &config.upstream.authorization_endpoint),
            ("token_endpoint", &config.upstream.token_endpoint),
            ("introspection_endpoint", &config.upstream.introspection_endpoint),
        ] {
            Url::parse(endpoint)
                .map_err(|e| AuthError::Configuration(format!("invalid upstream {name}: {e}")))?;
        }

        Ok(Self {
            inner: Arc::new(ProxyInner {
                config,
                store,
                state_codec,
                http: reqwest::Client::new(),
                clock,
            }),
        })
    }

    /// The proxy's callback URL at the upstream AS.
    pub fn callback_url(&self) -> String {
        format!("{}/oauth/callback", self.inner.config.base_url)
    }

    /// Axum router serving every proxy endpoint.
    pub fn router(&self) -> axum::Router {
        routes::router(self.clone())
    }
}
