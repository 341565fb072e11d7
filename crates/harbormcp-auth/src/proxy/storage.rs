//! Proxy storage adapter: client records, single-use authorization-code
//! mappings, and sha256-keyed token mappings.
//!
//! The trait permits replacement by an out-of-process store; the bundled
//! implementation is process-local in-memory maps.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::AuthResult;

/// A locally registered OAuth client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Local client id (`proxy_` + 32 hex chars)
    pub client_id: String,
    /// SHA-256 hex of the client secret; the plaintext is returned once at
    /// registration and never stored
    pub client_secret_hash: String,
    /// Registered redirect URIs
    pub redirect_uris: Vec<String>,
    /// Permitted grant types
    pub grant_types: Vec<String>,
    /// Permitted response types
    pub response_types: Vec<String>,
    /// Token endpoint authentication method
    pub token_endpoint_auth_method: String,
    /// Registered scope, when constrained
    pub scope: Option<String>,
    /// Human-readable client name
    pub client_name: Option<String>,
    /// Registration time (seconds since epoch)
    pub created_at: u64,
}

/// Short-lived mapping from an authorization code to the client that
/// initiated the flow. Consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRecord {
    /// Local client id
    pub client_id: String,
    /// Redirect URI the code was issued for
    pub redirect_uri: String,
    /// PKCE challenge, when the client sent one
    pub code_challenge: Option<String>,
    /// PKCE challenge method (`S256` or `plain`)
    pub code_challenge_method: Option<String>,
    /// Requested scope
    pub scope: Option<String>,
    /// Issue time (seconds since epoch)
    pub issued_at: u64,
    /// Expiry (seconds since epoch, 10 minutes after issue)
    pub expires_at: u64,
}

/// Kind of a mapped token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Access token
    Access,
    /// Refresh token
    Refresh,
}

/// Mapping from `sha256(token)` to the local client it was issued to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Local client id the token belongs to
    pub client_id_local: String,
    /// Access or refresh
    pub token_type: TokenKind,
    /// Issue time (seconds since epoch)
    pub issued_at: u64,
    /// Expiry, when the upstream reported one
    pub expires_at: Option<u64>,
}

/// Pluggable proxy storage.
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Persist a client record.
    async fn put_client(&self, record: ClientRecord) -> AuthResult<()>;

    /// Fetch a client record.
    async fn get_client(&self, client_id: &str) -> AuthResult<Option<ClientRecord>>;

    /// Persist an authorization-code mapping.
    async fn put_code(&self, code: &str, record: CodeRecord) -> AuthResult<()>;

    /// Consume an authorization-code mapping. A second take for the same
    /// code returns `None`.
    async fn take_code(&self, code: &str) -> AuthResult<Option<CodeRecord>>;

    /// Persist a token mapping keyed by `sha256(token)` hex.
    ///
    /// Implementations must keep the key unique: on collision, either
    /// overwrite the previous record or reject the write, never hold both.
    /// The in-memory store overwrites (last write wins).
    async fn put_token(&self, token_hash: &str, record: TokenRecord) -> AuthResult<()>;

    /// Fetch a token mapping by hash.
    async fn get_token(&self, token_hash: &str) -> AuthResult<Option<TokenRecord>>;

    /// Remove a token mapping by hash. Idempotent.
    async fn remove_token(&self, token_hash: &str) -> AuthResult<()>;
}

/// In-memory store backed by concurrent maps.
#[derive(Debug, Default)]
pub struct MemoryProxyStore {
    clients: DashMap<String, ClientRecord>,
    codes: DashMap<String, CodeRecord>,
    tokens: DashMap<String, TokenRecord>,
}

impl MemoryProxyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored token mappings (for tests and diagnostics).
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

#[async_trait]
impl ProxyStore for MemoryProxyStore {
    async fn put_client(&self, record: ClientRecord) -> AuthResult<()> {
        self.clients.insert(record.client_id.clone(), record);
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> AuthResult<Option<ClientRecord>> {
        Ok(self.clients.get(client_id).map(|r| r.clone()))
    }

    async fn put_code(&self, code: &str, record: CodeRecord) -> AuthResult<()> {
        self.codes.insert(code.to_string(), record);
        Ok(())
    }

    async fn take_code(&self, code: &str) -> AuthResult<Option<CodeRecord>> {
        Ok(self.codes.remove(code).map(|(_, record)| record))
    }

    async fn put_token(&self, token_hash: &str, record: TokenRecord) -> AuthResult<()> {
        self.tokens.insert(token_hash.to_string(), record);
        Ok(())
    }

    async fn get_token(&self, token_hash: &str) -> AuthResult<Option<TokenRecord>> {
        Ok(self.tokens.get(token_hash).map(|r| r.clone()))
    }

    async fn remove_token(&self, token_hash: &str) -> AuthResult<()> {
        self.tokens.remove(token_hash);
        Ok(())
    }
}
