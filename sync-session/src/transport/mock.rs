//! Mock transport for testing.
//!
//! Records every command and allows forcing failures.

use super::{Transport, TransportError};
use crate::handle::SessionHandle;
use async_trait::async_trait;
use p2psync_types::{EndpointId, TransferId};
use std::sync::{Arc, Mutex};

/// A command issued to the mock transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `start_discovery`.
    StartDiscovery(String),
    /// `stop_discovery`.
    StopDiscovery,
    /// `start_advertising`.
    StartAdvertising(String, String),
    /// `stop_advertising`.
    StopAdvertising,
    /// `request_connection`.
    RequestConnection(EndpointId),
    /// `accept_connection`.
    AcceptConnection(EndpointId),
    /// `reject_connection`.
    RejectConnection(EndpointId),
    /// `send_bytes`.
    Send(EndpointId, Vec<u8>),
    /// `disconnect`.
    Disconnect(EndpointId),
    /// `disconnect_all`.
    DisconnectAll,
}

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one and hand the other to a
/// controller.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    handle: Option<SessionHandle>,
    calls: Vec<TransportCall>,
    next_transfer_id: i64,
    fail_next_discovery: Option<String>,
    fail_next_request: Option<String>,
    fail_next_accept: Option<String>,
    fail_next_send: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all commands issued so far.
    pub fn calls(&self) -> Vec<TransportCall> {
        let inner = self.inner.lock().unwrap();
        inner.calls.clone()
    }

    /// Get all payloads sent to `endpoint_id`.
    pub fn sent_to(&self, endpoint_id: &EndpointId) -> Vec<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner
            .calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Send(id, bytes) if id == endpoint_id => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Get the last payload that was sent.
    pub fn last_sent(&self) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.calls.iter().rev().find_map(|c| match c {
            TransportCall::Send(_, bytes) => Some(bytes.clone()),
            _ => None,
        })
    }

    /// Id that the most recent `send_bytes` returned.
    pub fn last_transfer_id(&self) -> Option<TransferId> {
        let inner = self.inner.lock().unwrap();
        (inner.next_transfer_id > 0).then(|| TransferId::new(inner.next_transfer_id))
    }

    /// The handle the controller attached.
    pub fn handle(&self) -> Option<SessionHandle> {
        let inner = self.inner.lock().unwrap();
        inner.handle.clone()
    }

    /// Cause the next start_discovery()/start_advertising() to fail.
    pub fn fail_next_discovery(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_discovery = Some(error.to_string());
    }

    /// Cause the next request_connection() to fail.
    pub fn fail_next_request(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_request = Some(error.to_string());
    }

    /// Cause the next accept_connection() to fail.
    pub fn fail_next_accept(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_accept = Some(error.to_string());
    }

    /// Cause the next send_bytes() to fail.
    pub fn fail_next_send(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error.to_string());
    }

    /// Clear recorded calls and forced failures. The attached handle is kept.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        let handle = inner.handle.take();
        *inner = MockTransportInner {
            handle,
            ..MockTransportInner::default()
        };
    }

    fn record(&self, call: TransportCall) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(call);
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn attach(&self, handle: SessionHandle) {
        let mut inner = self.inner.lock().unwrap();
        inner.handle = Some(handle);
    }

    async fn start_discovery(&self, service_id: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(TransportCall::StartDiscovery(service_id.to_string()));

        // Check for forced failure
        if let Some(error) = inner.fail_next_discovery.take() {
            return Err(TransportError::DiscoveryFailed(error));
        }
        Ok(())
    }

    async fn stop_discovery(&self) {
        self.record(TransportCall::StopDiscovery);
    }

    async fn start_advertising(
        &self,
        service_id: &str,
        endpoint_name: &str,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(TransportCall::StartAdvertising(
            service_id.to_string(),
            endpoint_name.to_string(),
        ));

        if let Some(error) = inner.fail_next_discovery.take() {
            return Err(TransportError::DiscoveryFailed(error));
        }
        Ok(())
    }

    async fn stop_advertising(&self) {
        self.record(TransportCall::StopAdvertising);
    }

    async fn request_connection(
        &self,
        _local_name: &str,
        endpoint_id: &EndpointId,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(TransportCall::RequestConnection(endpoint_id.clone()));

        if let Some(error) = inner.fail_next_request.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        Ok(())
    }

    async fn accept_connection(&self, endpoint_id: &EndpointId) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(TransportCall::AcceptConnection(endpoint_id.clone()));

        if let Some(error) = inner.fail_next_accept.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        Ok(())
    }

    async fn reject_connection(&self, endpoint_id: &EndpointId) -> Result<(), TransportError> {
        self.record(TransportCall::RejectConnection(endpoint_id.clone()));
        Ok(())
    }

    async fn send_bytes(
        &self,
        endpoint_id: &EndpointId,
        bytes: &[u8],
    ) -> Result<TransferId, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(TransportCall::Send(endpoint_id.clone(), bytes.to_vec()));

        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.next_transfer_id += 1;
        Ok(TransferId::new(inner.next_transfer_id))
    }

    async fn disconnect(&self, endpoint_id: &EndpointId) {
        self.record(TransportCall::Disconnect(endpoint_id.clone()));
    }

    async fn disconnect_all(&self) {
        self.record(TransportCall::DisconnectAll);
    }
}
