//! # harbormcp-auth
//!
//! OAuth 2.1 for HarborMCP servers:
//!
//! - [`resource::ResourceServer`] - bearer extraction, cached RFC 7662
//!   introspection, scope gating, and `WWW-Authenticate` challenges
//! - [`proxy::OAuthProxy`] - a proxying authorization server that adds
//!   RFC 7591 dynamic client registration and PKCE in front of an upstream
//!   AS that lacks them, with tamper-proof state forwarding and local
//!   token-to-client mapping

#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod introspection;
pub mod proxy;
pub mod resource;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AuthError, AuthResult};
pub use introspection::{DiscoveryCache, IntrospectionCache, IntrospectionResponse, Introspector};
pub use proxy::{MemoryProxyStore, OAuthProxy, ProxyConfig, ProxyStore, UpstreamConfig};
pub use resource::{AuthContext, ResourceServer, ResourceServerConfig, WwwAuthenticate};
