//! # harbormcp-server
//!
//! Server runtime for HarborMCP: the transport-agnostic [`McpService`]
//! dispatcher over in-memory registries, the [`SessionManager`] backing
//! the streamable HTTP transport (session issuance, SSE resumption,
//! inactivity sweep), the axum [`http::router`], and the stdio server
//! loop. The two CLI bins (`harbormcp-stdio`, `harbormcp-http`) wrap these
//! around the demo surface.

#![warn(missing_docs)]

pub mod demo;
pub mod error;
pub mod http;
pub mod logging;
pub mod registry;
pub mod service;
pub mod session;
pub mod stdio_server;

pub use error::{ServerError, ServerResult};
pub use http::{HttpServerConfig, router};
pub use registry::{
    PromptHandler, PromptRegistry, ResourceRegistry, ToolContext, ToolHandler, ToolRegistry,
};
pub use service::McpService;
pub use session::{Session, SessionManager, StoredEvent};
