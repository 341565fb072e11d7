//! OAuth resource server: bearer extraction, scope gating, and the
//! `WWW-Authenticate` challenge.
//!
//! A request is authenticated by extracting the bearer token from the last
//! `Authorization` header (the scheme is case-insensitive), introspecting
//! it (through the cache), and checking that every required scope appears
//! in the token's space-separated `scope` claim.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

use crate::clock::{Clock, SystemClock};
use crate::error::{AuthError, AuthResult};
use crate::introspection::{
    DiscoveryCache, IntrospectionCache, IntrospectionResponse, Introspector,
};

/// Resource server configuration.
#[derive(Debug, Clone)]
pub struct ResourceServerConfig {
    /// Issuer of acceptable tokens (used for endpoint discovery)
    pub issuer: String,
    /// Client id for authenticating to the introspection endpoint
    pub client_id: String,
    /// Client secret for the introspection endpoint
    pub client_secret: String,
    /// Explicit introspection endpoint, skipping discovery
    pub introspection_endpoint: Option<String>,
    /// Scopes every request must carry
    pub required_scopes: Vec<String>,
    /// Realm advertised in `WWW-Authenticate`
    pub realm: String,
    /// Introspection cache TTL
    pub cache_ttl: Duration,
    /// Introspection cache capacity
    pub cache_max_entries: usize,
}

impl ResourceServerConfig {
    /// Configuration with the reference defaults (60 s TTL, 10 000
    /// entries, realm "MCP Server").
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            introspection_endpoint: None,
            required_scopes: Vec::new(),
            realm: "MCP Server".to_string(),
            cache_ttl: Duration::from_secs(60),
            cache_max_entries: 10_000,
        }
    }
}

/// The authenticated principal attached to a request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Subject claim, when present
    pub subject: Option<String>,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Client id claim, when present
    pub client_id: Option<String>,
    /// Full introspection claims
    pub claims: IntrospectionResponse,
}

/// Extract the bearer token from the **last** `Authorization` header.
pub fn extract_bearer(headers: &HeaderMap) -> AuthResult<String> {
    let header = headers
        .get_all(AUTHORIZATION)
        .iter()
        .last()
        .ok_or(AuthError::MissingToken)?;
    let value = header
        .to_str()
        .map_err(|_| AuthError::InvalidToken("authorization header is not valid UTF-8".into()))?;

    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
            Ok(token.to_string())
        }
        (Some(scheme), _, _) if !scheme.eq_ignore_ascii_case("bearer") => Err(
            AuthError::InvalidToken("only Bearer authentication is supported".into()),
        ),
        _ => Err(AuthError::InvalidToken(
            "authorization header must have the form 'Bearer <token>'".into(),
        )),
    }
}

fn quote_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Builder for the `WWW-Authenticate: Bearer ...` challenge header.
#[derive(Debug, Clone)]
pub struct WwwAuthenticate {
    realm: String,
    error: Option<String>,
    error_description: Option<String>,
    scope: Option<String>,
    authz_server: Option<String>,
}

impl WwwAuthenticate {
    /// Challenge for the given realm.
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            error: None,
            error_description: None,
            scope: None,
            authz_server: None,
        }
    }

    /// Set the OAuth error code.
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Set the error description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.error_description = Some(description.into());
        self
    }

    /// Set the space-separated scope list.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Advertise the authorization server (issuer).
    pub fn authz_server(mut self, issuer: impl Into<String>) -> Self {
        self.authz_server = Some(issuer.into());
        self
    }

    /// Render the header value.
    pub fn build(&self) -> String {
        let mut parts = vec![format!("Bearer realm=\"{}\"", quote_escape(&self.realm))];
        if let Some(error) = &self.error {
            parts.push(format!("error=\"{}\"", quote_escape(error)));
        }
        if let Some(description) = &self.error_description {
            parts.push(format!(
                "error_description=\"{}\"",
                quote_escape(description)
            ));
        }
        if let Some(scope) = &self.scope {
            parts.push(format!("scope=\"{}\"", quote_escape(scope)));
        }
        if let Some(authz_server) = &self.authz_server {
            parts.push(format!("authz_server=\"{}\"", quote_escape(authz_server)));
        }
        parts.join(", ")
    }
}

/// Bearer-token gate for protected HTTP surfaces.
pub struct ResourceServer {
    config: ResourceServerConfig,
    introspector: Introspector,
    cache: IntrospectionCache,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ResourceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceServer")
            .field("issuer", &self.config.issuer)
            .field("required_scopes", &self.config.required_scopes)
            .finish()
    }
}

impl ResourceServer {
    /// Build a resource server. Fails on invalid configuration so config
    /// errors never surface at request time.
    pub fn new(config: ResourceServerConfig) -> AuthResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build with an explicit clock (deterministic tests).
    pub fn with_clock(config: ResourceServerConfig, clock: Arc<dyn Clock>) -> AuthResult<Self> {
        if config.issuer.is_empty() && config.introspection_endpoint.is_none() {
            return Err(AuthError::Configuration(
                "either an issuer or an explicit introspection endpoint is required".into(),
            ));
        }
        if config.client_id.is_empty() {
            return Err(AuthError::Configuration(
                "introspection client_id must not be empty".into(),
            ));
        }

        let introspector = Introspector::new(
            config.issuer.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
            config.introspection_endpoint.clone(),
            Arc::new(DiscoveryCache::new()),
        );
        let cache = IntrospectionCache::new(
            config.cache_ttl,
            config.cache_max_entries,
            Arc::clone(&clock),
        );
        Ok(Self {
            config,
            introspector,
            cache,
            clock,
        })
    }

    /// Authenticate a request from its headers.
    pub async fn authenticate(&self, headers: &HeaderMap) -> AuthResult<AuthContext> {
        let token = extract_bearer(headers)?;

        let claims = match self.cache.get(&token) {
            Some(cached) => cached,
            None => {
                let claims = self.introspector.introspect(&token).await.map_err(|e| {
                    AuthError::InvalidToken(format!("introspection failed: {e}"))
                })?;
                if !claims.active {
                    return Err(AuthError::InvalidToken("token is not active".into()));
                }
                if let Some(exp) = claims.exp
                    && exp <= self.clock.unix_seconds()
                {
                    return Err(AuthError::InvalidToken("token is expired".into()));
                }
                self.cache.insert(&token, claims.clone());
                claims
            }
        };

        // A cached entry can outlive the token's own exp within the TTL
        // window; re-check.
        if let Some(exp) = claims.exp
            && exp <= self.clock.unix_seconds()
        {
            return Err(AuthError::InvalidToken("token is expired".into()));
        }

        let scopes = claims.scopes();
        let missing: Vec<&String> = self
            .config
            .required_scopes
            .iter()
            .filter(|required| !scopes.iter().any(|s| s == *required))
            .collect();
        if !missing.is_empty() {
            return Err(AuthError::InsufficientScope {
                required: self.config.required_scopes.join(" "),
            });
        }

        Ok(AuthContext {
            subject: claims.sub.clone(),
            scopes,
            client_id: claims.client_id.clone(),
            claims,
        })
    }

    /// Render the `WWW-Authenticate` header for an auth failure.
    pub fn challenge(&self, error: &AuthError) -> String {
        let mut challenge = WwwAuthenticate::new(&self.config.realm)
            .error(error.oauth_code())
            .description(error.to_string())
            .authz_server(&self.config.issuer);
        if !self.config.required_scopes.is_empty() {
            challenge = challenge.scope(self.config.required_scopes.join(" "));
        }
        challenge.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;

    #[test]
    fn bearer_extraction_uses_last_header_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.append(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));
        headers.append(AUTHORIZATION, HeaderValue::from_static("bearer current"));
        assert_eq!(extract_bearer(&headers).unwrap(), "current");
    }

    #[test]
    fn missing_header_is_missing_token() {
        let headers = HeaderMap::new();
        assert!(matches!(
            extract_bearer(&headers),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn non_bearer_scheme_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwdw=="));
        assert!(matches!(
            extract_bearer(&headers),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn www_authenticate_renders_all_fields() {
        let header = WwwAuthenticate::new("MCP Server")
            .error("insufficient_scope")
            .description("missing \"mcp:read\"")
            .scope("mcp:read mcp:write")
            .authz_server("https://as.example.com")
            .build();
        assert_eq!(
            header,
            "Bearer realm=\"MCP Server\", error=\"insufficient_scope\", \
             error_description=\"missing \\\"mcp:read\\\"\", scope=\"mcp:read mcp:write\", \
             authz_server=\"https://as.example.com\""
        );
    }

    #[test]
    fn construction_rejects_empty_configuration() {
        let config = ResourceServerConfig::new("", "", "");
        assert!(matches!(
            ResourceServer::new(config),
            Err(AuthError::Configuration(_))
        ));
    }
}
