//! The `Transport` trait: the seam between a connector and its wire.
//!
//! Transports never hold a reference to the connector. Inbound traffic is
//! emitted as [`TransportEvent`]s on an mpsc channel returned by
//! [`Transport::start`]; the connector's pump task is the sole consumer.
//! This keeps the connector/transport relationship acyclic and makes the
//! connector testable against an in-memory channel pair.

use async_trait::async_trait;
use tokio::sync::mpsc;

use harbormcp_protocol::JsonRpcMessage;

use crate::error::TransportResult;

/// Buffered capacity of the inbound event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One inbound occurrence on a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A parsed protocol message arrived
    Message(JsonRpcMessage),
    /// The transport closed; no further events will be delivered
    Closed {
        /// Why the transport closed, when known
        reason: Option<String>,
    },
}

/// A bidirectional message pipe to one peer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attach the transport and return the inbound event stream.
    ///
    /// Called once per connection attempt; calling it on an already
    /// attached transport is a configuration error.
    async fn start(&mut self) -> TransportResult<mpsc::Receiver<TransportEvent>>;

    /// Serialize and send one message to the peer.
    async fn send(&self, message: JsonRpcMessage) -> TransportResult<()>;

    /// Tear the transport down, releasing the peer connection.
    ///
    /// Idempotent. For process-backed transports this runs the shutdown
    /// escalation; for HTTP it terminates the session.
    async fn shutdown(&mut self) -> TransportResult<()>;

    /// Human-readable endpoint descriptor for logging.
    fn endpoint(&self) -> String;
}
