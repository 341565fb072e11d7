//! OAuth 2.0 Token Introspection (RFC 7662) with endpoint discovery and an
//! LRU result cache.
//!
//! Introspection is a two-step function: (a) discover the endpoint from the
//! issuer's `/.well-known/oauth-authorization-server` or
//! `/.well-known/openid-configuration` document (first success wins, the
//! discovered endpoint is memoized per issuer) unless an explicit override
//! is configured; (b) POST the token with HTTP Basic client credentials.
//!
//! Active results are cached for a TTL; inactive or expired results are
//! never cached, so revocation takes effect within one TTL at worst.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{AuthError, AuthResult};

/// Token introspection response per RFC 7662 Section 2.2.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IntrospectionResponse {
    /// Whether the token is currently active (REQUIRED)
    pub active: bool,

    /// Space-separated scopes granted to the token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Client identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Username, if applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Token type (Bearer, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Expiration (seconds since epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    /// Issued-at (seconds since epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// Subject
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,

    /// Issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Additional claims
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

impl IntrospectionResponse {
    /// Scopes as a list.
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

/// Per-issuer memo of discovered introspection endpoints.
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    endpoints: DashMap<String, String>,
}

impl DiscoveryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The memoized endpoint for an issuer.
    pub fn get(&self, issuer: &str) -> Option<String> {
        self.endpoints.get(issuer).map(|e| e.clone())
    }

    /// Memoize an endpoint for an issuer.
    pub fn insert(&self, issuer: &str, endpoint: String) {
        self.endpoints.insert(issuer.to_string(), endpoint);
    }
}

#[derive(Debug, Deserialize)]
struct AuthServerMetadata {
    introspection_endpoint: Option<String>,
}

/// RFC 7662 introspection client with per-issuer endpoint discovery.
pub struct Introspector {
    issuer: String,
    client_id: String,
    client_secret: String,
    endpoint_override: Option<String>,
    discovery: Arc<DiscoveryCache>,
    http: reqwest::Client,
}

impl std::fmt::Debug for Introspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Introspector")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("endpoint_override", &self.endpoint_override)
            .finish()
    }
}

impl Introspector {
    /// Create an introspection client authenticating as
    /// `client_id`/`client_secret`.
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        endpoint_override: Option<String>,
        discovery: Arc<DiscoveryCache>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            endpoint_override,
            discovery,
            http: reqwest::Client::new(),
        }
    }

    /// Resolve the introspection endpoint: override, memo, or well-known
    /// discovery.
    async fn endpoint(&self) -> AuthResult<String> {
        if let Some(endpoint) = &self.endpoint_override {
            return Ok(endpoint.clone());
        }
        if let Some(endpoint) = self.discovery.get(&self.issuer) {
            return Ok(endpoint);
        }

        let issuer = self.issuer.trim_end_matches('/');
        for well_known in [
            "/.well-known/oauth-authorization-server",
            "/.well-known/openid-configuration",
        ] {
            let url = format!("{issuer}{well_known}");
            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json::<AuthServerMetadata>().await {
                        Ok(metadata) => {
                            if let Some(endpoint) = metadata.introspection_endpoint {
                                debug!(issuer = %self.issuer, endpoint = %endpoint, "discovered introspection endpoint");
                                self.discovery.insert(&self.issuer, endpoint.clone());
                                return Ok(endpoint);
                            }
                        }
                        Err(e) => warn!(url = %url, error = %e, "malformed discovery document"),
                    }
                }
                Ok(response) => {
                    debug!(url = %url, status = %response.status(), "discovery document not available");
                }
                Err(e) => warn!(url = %url, error = %e, "discovery request failed"),
            }
        }

        Err(AuthError::Upstream(format!(
            "no introspection endpoint discoverable for issuer '{}'",
            self.issuer
        )))
    }

    /// Introspect a token per RFC 7662.
    pub async fn introspect(&self, token: &str) -> AuthResult<IntrospectionResponse> {
        let endpoint = self.endpoint().await?;

        let response = self
            .http
            .post(&endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("token", token), ("token_type_hint", "access_token")])
            .send()
            .await
            .map_err(|e| AuthError::Upstream(format!("introspection request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Upstream(format!(
                "introspection endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<IntrospectionResponse>()
            .await
            .map_err(|e| AuthError::Upstream(format!("malformed introspection response: {e}")))
    }
}

struct CacheEntry {
    response: IntrospectionResponse,
    cached_at: SystemTime,
    last_access: SystemTime,
}

/// LRU cache of active introspection results, keyed by the raw token.
///
/// Eviction drops the entry with the oldest `last_access` when the cache is
/// full. Results are valid for `ttl` after insertion regardless of access.
pub struct IntrospectionCache {
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl IntrospectionCache {
    /// Create a cache with the given TTL and capacity.
    pub fn new(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            max_entries,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// A fresh cached result for `token`, updating its access time.
    pub fn get(&self, token: &str) -> Option<IntrospectionResponse> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get_mut(token) {
            Some(entry) => {
                if entry.cached_at + self.ttl <= now {
                    entries.remove(token);
                    return None;
                }
                entry.last_access = now;
                Some(entry.response.clone())
            }
            None => None,
        }
    }

    /// Cache an active result. Inactive results must not be inserted.
    pub fn insert(&self, token: &str, response: IntrospectionResponse) {
        debug_assert!(response.active, "only active results are cacheable");
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        if entries.len() >= self.max_entries && !entries.contains_key(token) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(token, _)| token.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            token.to_string(),
            CacheEntry {
                response,
                cached_at: now,
                last_access: now,
            },
        );
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn active(scope: &str) -> IntrospectionResponse {
        IntrospectionResponse {
            active: true,
            scope: Some(scope.to_string()),
            client_id: None,
            username: None,
            token_type: None,
            exp: None,
            iat: None,
            sub: None,
            aud: None,
            iss: None,
            additional: HashMap::new(),
        }
    }

    #[test]
    fn entries_expire_after_ttl() {
        let clock = ManualClock::new();
        let cache = IntrospectionCache::new(
            Duration::from_secs(60),
            16,
            Arc::new(clock.clone()),
        );
        cache.insert("tok", active("mcp:read"));
        assert!(cache.get("tok").is_some());

        clock.advance(Duration::from_secs(61));
        assert!(cache.get("tok").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn full_cache_evicts_oldest_last_access() {
        let clock = ManualClock::new();
        let cache = IntrospectionCache::new(
            Duration::from_secs(600),
            2,
            Arc::new(clock.clone()),
        );
        cache.insert("a", active("s"));
        clock.advance(Duration::from_secs(1));
        cache.insert("b", active("s"));
        clock.advance(Duration::from_secs(1));

        // Touch "a" so "b" becomes the least recently used.
        assert!(cache.get("a").is_some());
        clock.advance(Duration::from_secs(1));

        cache.insert("c", active("s"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn scope_splitting() {
        let response = active("mcp:read mcp:write");
        assert_eq!(response.scopes(), vec!["mcp:read", "mcp:write"]);
    }

    #[test]
    fn discovery_cache_memoizes_per_issuer() {
        let cache = DiscoveryCache::new();
        assert!(cache.get("https://as.example.com").is_none());
        cache.insert(
            "https://as.example.com",
            "https://as.example.com/introspect".to_string(),
        );
        assert_eq!(
            cache.get("https://as.example.com").unwrap(),
            "https://as.example.com/introspect"
        );
    }
}
