//! Client-side OAuth integration for the HTTP transport.
//!
//! The transport owns an optional [`OAuthSession`]: a provider that can
//! drive the user through an authorization URL, a pluggable token store,
//! and the redirect URI. On a 401 the transport clears the cached token,
//! runs the provider, exchanges the returned code, and retries the original
//! request once. Anonymous operation uses [`NoopTokenStore`]; a 401 is then
//! a hard error.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::error::{TransportError, TransportResult};

/// Tokens returned by an authorization server.
#[derive(Debug, Clone)]
pub struct TokenSet {
    /// Bearer access token
    pub access_token: String,
    /// Optional refresh token
    pub refresh_token: Option<String>,
    /// Absolute expiry of the access token, when known
    pub expires_at: Option<SystemTime>,
}

/// Pluggable token persistence.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Current access token, if any.
    async fn access_token(&self) -> Option<String>;
    /// Current refresh token, if any.
    async fn refresh_token(&self) -> Option<String>;
    /// Replace the stored tokens.
    async fn set_tokens(&self, tokens: TokenSet);
    /// Expiry of the stored access token.
    async fn token_expiration(&self) -> Option<SystemTime>;
    /// Drop all stored tokens.
    async fn clear_tokens(&self);
}

/// In-memory token store.
#[derive(Default)]
pub struct MemoryTokenStore {
    inner: RwLock<Option<TokenSet>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn access_token(&self) -> Option<String> {
        self.inner.read().await.as_ref().map(|t| t.access_token.clone())
    }

    async fn refresh_token(&self) -> Option<String> {
        self.inner.read().await.as_ref().and_then(|t| t.refresh_token.clone())
    }

    async fn set_tokens(&self, tokens: TokenSet) {
        *self.inner.write().await = Some(tokens);
    }

    async fn token_expiration(&self) -> Option<SystemTime> {
        self.inner.read().await.as_ref().and_then(|t| t.expires_at)
    }

    async fn clear_tokens(&self) {
        *self.inner.write().await = None;
    }
}

/// Token store for anonymous operation: never holds a token.
pub struct NoopTokenStore;

#[async_trait]
impl TokenStore for NoopTokenStore {
    async fn access_token(&self) -> Option<String> {
        None
    }

    async fn refresh_token(&self) -> Option<String> {
        None
    }

    async fn set_tokens(&self, _tokens: TokenSet) {}

    async fn token_expiration(&self) -> Option<SystemTime> {
        None
    }

    async fn clear_tokens(&self) {}
}

/// Drives the user through an authorization flow.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Present `auth_url` to the user; resolves with the authorization code.
    async fn on_auth(&self, auth_url: &str) -> TransportResult<String>;
}

/// OAuth endpoints and client identity for the transport.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Authorization endpoint of the AS
    pub authorization_endpoint: String,
    /// Token endpoint of the AS
    pub token_endpoint: String,
    /// Client id registered with the AS
    pub client_id: String,
    /// Client secret, absent for public clients
    pub client_secret: Option<String>,
    /// Redirect URI registered for this client
    pub redirect_uri: String,
    /// Requested scope
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// An OAuth provider + token store pair bound to one transport.
pub struct OAuthSession {
    config: OAuthConfig,
    provider: Arc<dyn OAuthProvider>,
    tokens: Arc<dyn TokenStore>,
}

impl OAuthSession {
    /// Bind a provider and token store to the configured endpoints.
    pub fn new(
        config: OAuthConfig,
        provider: Arc<dyn OAuthProvider>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            config,
            provider,
            tokens,
        }
    }

    /// Current bearer token, if any.
    pub async fn bearer(&self) -> Option<String> {
        self.tokens.access_token().await
    }

    /// Clear cached tokens, run the provider, and exchange the code.
    ///
    /// Returns the fresh access token.
    pub async fn reauthorize(&self, http: &reqwest::Client) -> TransportResult<String> {
        self.tokens.clear_tokens().await;

        let mut auth_url = Url::parse(&self.config.authorization_endpoint)
            .map_err(|e| TransportError::Configuration(format!("authorization endpoint: {e}")))?;
        auth_url
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri);
        if let Some(scope) = &self.config.scope {
            auth_url.query_pairs_mut().append_pair("scope", scope);
        }

        let code = self.provider.on_auth(auth_url.as_str()).await?;
        debug!("authorization code obtained, exchanging at token endpoint");

        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.clone()),
            ("client_id", self.config.client_id.clone()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        let response = http
            .post(&self.config.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| TransportError::Auth(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Auth(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Auth(format!("malformed token response: {e}")))?;

        let access_token = tokens.access_token.clone();
        self.tokens
            .set_tokens(TokenSet {
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                expires_at: tokens
                    .expires_in
                    .map(|secs| SystemTime::now() + Duration::from_secs(secs)),
            })
            .await;

        Ok(access_token)
    }
}
