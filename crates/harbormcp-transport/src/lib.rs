//! # harbormcp-transport
//!
//! Transport implementations for HarborMCP connectors:
//!
//! - [`stdio::StdioTransport`] - line-delimited JSON over a spawned child
//!   process's stdin/stdout with three-stage shutdown escalation
//! - [`http::StreamableHttpTransport`] - streamable HTTP with SSE response
//!   parsing, session-id plumbing, and optional client-side OAuth
//!
//! Both implement the [`Transport`] trait, which hands inbound traffic to
//! the connector over a channel so the transport never references the
//! connector.

#![warn(missing_docs)]

pub mod error;
pub mod http;
pub mod oauth;
pub mod sse;
pub mod stdio;
pub mod traits;

pub use error::{TransportError, TransportResult};
pub use http::{HttpConfig, StreamableHttpTransport};
pub use sse::{SseDecoder, SseEvent};
pub use stdio::{StdioConfig, StdioTransport};
pub use traits::{Transport, TransportEvent};
