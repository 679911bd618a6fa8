//! Transport abstraction for p2psync sessions.
//!
//! This module provides the pluggable peer-to-peer layer a session runs
//! on: discovery and advertising, connection setup, a byte-payload channel
//! with transfer progress, and disconnects.
//!
//! # Design
//!
//! Commands are async methods on [`Transport`]. Everything the transport
//! observes (endpoints found, connections initiated and resolved, payloads,
//! transfer progress, disconnects) is reported back through the
//! [`SessionHandle`] passed to [`Transport::attach`].
//!
//! # Example
//!
//! ```ignore
//! let network = LoopbackNetwork::new();
//! let transport = network.transport();
//! transport.attach(controller.handle());
//! transport.start_advertising("p2psync", "Tablet").await?;
//! ```

mod loopback;
mod mock;

pub use loopback::{LoopbackNetwork, LoopbackTransport};
pub use mock::{MockTransport, TransportCall};

use async_trait::async_trait;
use p2psync_types::{EndpointId, TransferId};
use thiserror::Error;

use crate::handle::SessionHandle;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Discovery or advertising could not start.
    #[error("discovery failed: {0}")]
    DiscoveryFailed(String),

    /// Connection request or accept failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The endpoint is unknown or not connected.
    #[error("not connected to {0}")]
    NotConnected(EndpointId),

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// No session handle attached.
    #[error("transport not attached to a session")]
    Detached,
}

/// Peer-to-peer transport a session controller drives.
///
/// Implementations must deliver callbacks for one session to its handle in
/// the order they happen.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register the handle that receives this transport's callbacks.
    fn attach(&self, handle: SessionHandle);

    /// Start discovering advertisers of `service_id`.
    async fn start_discovery(&self, service_id: &str) -> Result<(), TransportError>;

    /// Stop discovering.
    async fn stop_discovery(&self);

    /// Start advertising `service_id` under `endpoint_name`.
    async fn start_advertising(
        &self,
        service_id: &str,
        endpoint_name: &str,
    ) -> Result<(), TransportError>;

    /// Stop advertising.
    async fn stop_advertising(&self);

    /// Request a connection to a discovered endpoint, presenting `local_name`.
    async fn request_connection(
        &self,
        local_name: &str,
        endpoint_id: &EndpointId,
    ) -> Result<(), TransportError>;

    /// Accept an initiated connection.
    async fn accept_connection(&self, endpoint_id: &EndpointId) -> Result<(), TransportError>;

    /// Reject an initiated connection.
    async fn reject_connection(&self, endpoint_id: &EndpointId) -> Result<(), TransportError>;

    /// Send a byte payload. Returns the transport's id for the payload.
    async fn send_bytes(
        &self,
        endpoint_id: &EndpointId,
        bytes: &[u8],
    ) -> Result<TransferId, TransportError>;

    /// Close the connection to one endpoint.
    async fn disconnect(&self, endpoint_id: &EndpointId);

    /// Close every connection.
    async fn disconnect_all(&self);
}
