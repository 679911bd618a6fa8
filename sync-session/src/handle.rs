//! Cloneable entry point into a running session controller.
//!
//! Transports deliver their callbacks here; the method names follow the
//! transport callback contract. Callbacks never run controller logic
//! directly: they are queued and processed serially by the controller.

use p2psync_core::Event;
use p2psync_types::{
    ConnectionInfo, ConnectionResolution, DiscoveredEndpoint, EndpointId, Payload, TransferUpdate,
};
use tokio::sync::mpsc;

/// Message delivered to the controller loop.
#[derive(Debug)]
pub(crate) enum Input {
    Event(Event),
    Shutdown,
}

/// Handle for feeding a session controller.
///
/// Sending to a controller that has stopped is a no-op.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Input>,
}

impl SessionHandle {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Input>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, input: Input) {
        if self.tx.send(input).is_err() {
            tracing::trace!("session controller stopped; dropping input");
        }
    }

    /// Queue a raw state-machine event.
    pub fn send_event(&self, event: Event) {
        self.push(Input::Event(event));
    }

    /// Start discovering (initiator) or advertising (responder).
    pub fn start(&self) {
        self.send_event(Event::StartRequested);
    }

    /// Cancel the session and return to idle.
    pub fn cancel(&self) {
        self.send_event(Event::CancelRequested);
    }

    /// Cancel the session and stop the controller loop.
    pub fn shutdown(&self) {
        self.push(Input::Shutdown);
    }

    /// Check whether the controller has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Discovery found an advertiser.
    pub fn on_endpoint_found(&self, endpoint_id: EndpointId, info: DiscoveredEndpoint) {
        self.send_event(Event::EndpointFound { endpoint_id, info });
    }

    /// A low-level connection was initiated.
    pub fn on_connection_initiated(&self, endpoint_id: EndpointId, info: ConnectionInfo) {
        self.send_event(Event::ConnectionInitiated { endpoint_id, info });
    }

    /// Both ends have answered the connection.
    pub fn on_connection_result(&self, endpoint_id: EndpointId, resolution: ConnectionResolution) {
        self.send_event(Event::ConnectionResult {
            endpoint_id,
            resolution,
        });
    }

    /// A payload arrived.
    pub fn on_payload_received(&self, endpoint_id: EndpointId, payload: Payload) {
        self.send_event(Event::PayloadReceived {
            endpoint_id,
            payload,
        });
    }

    /// Progress for a payload we sent.
    pub fn on_payload_transfer_update(&self, endpoint_id: EndpointId, update: TransferUpdate) {
        self.send_event(Event::TransferUpdated {
            endpoint_id,
            update,
        });
    }

    /// The connection was closed.
    pub fn on_disconnected(&self, endpoint_id: EndpointId) {
        self.send_event(Event::Disconnected { endpoint_id });
    }

    /// The connection dropped unexpectedly.
    pub fn on_connection_broken(&self, endpoint_id: EndpointId) {
        self.send_event(Event::ConnectionBroken { endpoint_id });
    }

    /// Discovery could not start.
    pub fn on_discovery_failed(&self, error: impl Into<String>) {
        self.send_event(Event::SearchFailed {
            error: error.into(),
        });
    }

    /// Advertising could not start.
    pub fn on_advertising_failed(&self, error: impl Into<String>) {
        self.send_event(Event::SearchFailed {
            error: error.into(),
        });
    }
}
