//! In-process transport joining any number of endpoints.
//!
//! Used by the CLI demo and end-to-end tests. Discovery finds advertisers of
//! the same service, a connection request raises `on_connection_initiated`
//! on both ends with one shared token, the connection is established once
//! both ends accept, and every payload is delivered immediately with a
//! `Success` transfer update to the sender. Disconnects are reported to
//! both ends.

use super::{Transport, TransportError};
use crate::handle::SessionHandle;
use async_trait::async_trait;
use p2psync_types::{
    ConnectionInfo, ConnectionResolution, DiscoveredEndpoint, EndpointId, Payload, TransferId,
    TransferStatus, TransferUpdate,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared medium that loopback transports attach to.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

#[derive(Debug, Default)]
struct NetworkInner {
    next_endpoint: u64,
    next_transfer: i64,
    nodes: HashMap<EndpointId, Node>,
    links: HashMap<LinkKey, Link>,
}

#[derive(Debug, Default)]
struct Node {
    name: String,
    handle: Option<SessionHandle>,
    advertising: Option<String>,
    discovering: Option<String>,
}

/// Unordered endpoint pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LinkKey(EndpointId, EndpointId);

impl LinkKey {
    fn new(a: &EndpointId, b: &EndpointId) -> Self {
        if a.as_str() <= b.as_str() {
            Self(a.clone(), b.clone())
        } else {
            Self(b.clone(), a.clone())
        }
    }

    fn involves(&self, id: &EndpointId) -> bool {
        &self.0 == id || &self.1 == id
    }

    fn other(&self, id: &EndpointId) -> EndpointId {
        if &self.0 == id {
            self.1.clone()
        } else {
            self.0.clone()
        }
    }
}

#[derive(Debug)]
struct Link {
    token: String,
    accepted: Vec<EndpointId>,
    established: bool,
}

impl NetworkInner {
    fn notify(&self, id: &EndpointId, f: impl FnOnce(&SessionHandle)) {
        if let Some(handle) = self.nodes.get(id).and_then(|n| n.handle.as_ref()) {
            f(handle);
        }
    }

    fn name_of(&self, id: &EndpointId) -> String {
        self.nodes
            .get(id)
            .map(|n| n.name.clone())
            .unwrap_or_default()
    }

    fn close_link(&mut self, key: &LinkKey) {
        if self.links.remove(key).is_some() {
            let (a, b) = (key.0.clone(), key.1.clone());
            self.notify(&a, |h| h.on_disconnected(b.clone()));
            self.notify(&b, |h| h.on_disconnected(a.clone()));
        }
    }
}

impl LoopbackNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the network with a fresh endpoint.
    pub fn transport(&self) -> LoopbackTransport {
        let mut inner = self.lock();
        inner.next_endpoint += 1;
        let id = EndpointId::new(format!("loop-{}", inner.next_endpoint));
        inner.nodes.insert(id.clone(), Node::default());
        LoopbackTransport {
            network: self.clone(),
            id,
        }
    }

    /// Drop the link between two endpoints as if the radio failed.
    pub fn break_link(&self, a: &EndpointId, b: &EndpointId) {
        let mut inner = self.lock();
        if inner.links.remove(&LinkKey::new(a, b)).is_some() {
            inner.notify(a, |h| h.on_connection_broken(b.clone()));
            inner.notify(b, |h| h.on_connection_broken(a.clone()));
        }
    }

    /// Token shared by the pending or established link between two endpoints.
    pub fn token(&self, a: &EndpointId, b: &EndpointId) -> Option<String> {
        let inner = self.lock();
        inner.links.get(&LinkKey::new(a, b)).map(|l| l.token.clone())
    }

    /// Check whether two endpoints have an established connection.
    pub fn is_connected(&self, a: &EndpointId, b: &EndpointId) -> bool {
        let inner = self.lock();
        inner
            .links
            .get(&LinkKey::new(a, b))
            .is_some_and(|l| l.established)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkInner> {
        // A panic while holding the lock only happens in a failing test.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One endpoint on a [`LoopbackNetwork`].
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    network: LoopbackNetwork,
    id: EndpointId,
}

impl LoopbackTransport {
    /// This endpoint's id as seen by others.
    pub fn endpoint_id(&self) -> &EndpointId {
        &self.id
    }
}

fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase()
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn attach(&self, handle: SessionHandle) {
        let mut inner = self.network.lock();
        if let Some(node) = inner.nodes.get_mut(&self.id) {
            node.handle = Some(handle);
        }
    }

    async fn start_discovery(&self, service_id: &str) -> Result<(), TransportError> {
        let mut inner = self.network.lock();
        let node = inner
            .nodes
            .get_mut(&self.id)
            .ok_or(TransportError::Detached)?;
        node.discovering = Some(service_id.to_string());

        let found: Vec<(EndpointId, String)> = inner
            .nodes
            .iter()
            .filter(|(id, n)| **id != self.id && n.advertising.as_deref() == Some(service_id))
            .map(|(id, n)| (id.clone(), n.name.clone()))
            .collect();
        for (id, name) in found {
            inner.notify(&self.id, |h| {
                h.on_endpoint_found(id, DiscoveredEndpoint::new(&name, service_id))
            });
        }
        Ok(())
    }

    async fn stop_discovery(&self) {
        let mut inner = self.network.lock();
        if let Some(node) = inner.nodes.get_mut(&self.id) {
            node.discovering = None;
        }
    }

    async fn start_advertising(
        &self,
        service_id: &str,
        endpoint_name: &str,
    ) -> Result<(), TransportError> {
        let mut inner = self.network.lock();
        let node = inner
            .nodes
            .get_mut(&self.id)
            .ok_or(TransportError::Detached)?;
        node.advertising = Some(service_id.to_string());
        node.name = endpoint_name.to_string();

        let seekers: Vec<EndpointId> = inner
            .nodes
            .iter()
            .filter(|(id, n)| **id != self.id && n.discovering.as_deref() == Some(service_id))
            .map(|(id, _)| id.clone())
            .collect();
        for seeker in seekers {
            inner.notify(&seeker, |h| {
                h.on_endpoint_found(
                    self.id.clone(),
                    DiscoveredEndpoint::new(endpoint_name, service_id),
                )
            });
        }
        Ok(())
    }

    async fn stop_advertising(&self) {
        let mut inner = self.network.lock();
        if let Some(node) = inner.nodes.get_mut(&self.id) {
            node.advertising = None;
        }
    }

    async fn request_connection(
        &self,
        local_name: &str,
        endpoint_id: &EndpointId,
    ) -> Result<(), TransportError> {
        let mut inner = self.network.lock();
        let advertising = inner
            .nodes
            .get(endpoint_id)
            .is_some_and(|n| n.advertising.is_some());
        if !advertising {
            return Err(TransportError::ConnectionFailed(format!(
                "{} is not advertising",
                endpoint_id
            )));
        }
        let key = LinkKey::new(&self.id, endpoint_id);
        if inner.links.contains_key(&key) {
            return Err(TransportError::ConnectionFailed(format!(
                "already connecting to {}",
                endpoint_id
            )));
        }
        if let Some(node) = inner.nodes.get_mut(&self.id) {
            node.name = local_name.to_string();
        }

        let token = new_token();
        inner.links.insert(
            key,
            Link {
                token: token.clone(),
                accepted: Vec::new(),
                established: false,
            },
        );

        let remote_name = inner.name_of(endpoint_id);
        inner.notify(&self.id, |h| {
            h.on_connection_initiated(
                endpoint_id.clone(),
                ConnectionInfo::outgoing(&remote_name, &token),
            )
        });
        inner.notify(endpoint_id, |h| {
            h.on_connection_initiated(
                self.id.clone(),
                ConnectionInfo::incoming(local_name, &token),
            )
        });
        Ok(())
    }

    async fn accept_connection(&self, endpoint_id: &EndpointId) -> Result<(), TransportError> {
        let mut inner = self.network.lock();
        let key = LinkKey::new(&self.id, endpoint_id);
        let link = inner
            .links
            .get_mut(&key)
            .ok_or_else(|| TransportError::NotConnected(endpoint_id.clone()))?;
        if !link.accepted.contains(&self.id) {
            link.accepted.push(self.id.clone());
        }
        if link.accepted.len() == 2 && !link.established {
            link.established = true;
            inner.notify(&self.id, |h| {
                h.on_connection_result(endpoint_id.clone(), ConnectionResolution::Accepted)
            });
            inner.notify(endpoint_id, |h| {
                h.on_connection_result(self.id.clone(), ConnectionResolution::Accepted)
            });
        }
        Ok(())
    }

    async fn reject_connection(&self, endpoint_id: &EndpointId) -> Result<(), TransportError> {
        let mut inner = self.network.lock();
        let key = LinkKey::new(&self.id, endpoint_id);
        if inner.links.remove(&key).is_none() {
            return Err(TransportError::NotConnected(endpoint_id.clone()));
        }
        inner.notify(&self.id, |h| {
            h.on_connection_result(endpoint_id.clone(), ConnectionResolution::Rejected)
        });
        inner.notify(endpoint_id, |h| {
            h.on_connection_result(self.id.clone(), ConnectionResolution::Rejected)
        });
        Ok(())
    }

    async fn send_bytes(
        &self,
        endpoint_id: &EndpointId,
        bytes: &[u8],
    ) -> Result<TransferId, TransportError> {
        let mut inner = self.network.lock();
        let established = inner
            .links
            .get(&LinkKey::new(&self.id, endpoint_id))
            .is_some_and(|l| l.established);
        if !established {
            return Err(TransportError::NotConnected(endpoint_id.clone()));
        }

        inner.next_transfer += 1;
        let transfer_id = TransferId::new(inner.next_transfer);
        let size = bytes.len() as u64;

        inner.notify(endpoint_id, |h| {
            h.on_payload_received(self.id.clone(), Payload::bytes(transfer_id, bytes.to_vec()))
        });
        inner.notify(&self.id, |h| {
            h.on_payload_transfer_update(
                endpoint_id.clone(),
                TransferUpdate::finished(transfer_id, TransferStatus::Success, size),
            )
        });
        Ok(transfer_id)
    }

    async fn disconnect(&self, endpoint_id: &EndpointId) {
        let mut inner = self.network.lock();
        inner.close_link(&LinkKey::new(&self.id, endpoint_id));
    }

    async fn disconnect_all(&self) {
        let mut inner = self.network.lock();
        let keys: Vec<LinkKey> = inner
            .links
            .keys()
            .filter(|k| k.involves(&self.id))
            .cloned()
            .collect();
        for key in keys {
            tracing::debug!(peer = %key.other(&self.id), "loopback disconnect");
            inner.close_link(&key);
        }
    }
}
