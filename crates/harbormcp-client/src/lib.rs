//! # harbormcp-client
//!
//! Client runtime for HarborMCP: the [`Connector`] (one JSON-RPC endpoint
//! bound to one server via one [`harbormcp_transport::Transport`]) and the
//! [`ClientAggregator`] (a facade presenting many connected servers to a
//! single consumer, with list caching, `list_changed` auto-refresh, and a
//! shared roots set).

#![warn(missing_docs)]

pub mod aggregator;
pub mod cache;
pub mod connector;
pub mod error;
pub mod handlers;
mod operations;

pub use aggregator::{ClientAggregator, Tagged};
pub use cache::CacheManager;
pub use connector::{Connector, ConnectorStatus};
pub use error::{ClientError, ClientResult};
pub use handlers::{
    ElicitationHandler, HandlerRegistry, NotificationHandler, RequestHandler, RootsProvider,
    SamplingHandler,
};
