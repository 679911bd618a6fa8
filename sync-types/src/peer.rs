//! The remote endpoint a session is negotiating with.

use serde::{Deserialize, Serialize};

use crate::EndpointId;

/// Endpoint data reported when discovery finds an advertiser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredEndpoint {
    /// Human-readable name the advertiser publishes.
    pub endpoint_name: String,
    /// Service the advertiser is publishing under.
    pub service_id: String,
}

impl DiscoveredEndpoint {
    /// Create endpoint info for a discovered advertiser.
    pub fn new(endpoint_name: &str, service_id: &str) -> Self {
        Self {
            endpoint_name: endpoint_name.to_string(),
            service_id: service_id.to_string(),
        }
    }
}

/// Connection data reported when a low-level connection is initiated.
///
/// Both ends receive the same `auth_token`; it is what the humans compare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Name of the remote endpoint.
    pub endpoint_name: String,
    /// Token shared by both ends of this connection attempt.
    pub auth_token: String,
    /// True on the side that received the connection request.
    pub is_incoming: bool,
}

impl ConnectionInfo {
    /// Connection info as seen by the side that accepted an inbound request.
    pub fn incoming(endpoint_name: &str, auth_token: &str) -> Self {
        Self {
            endpoint_name: endpoint_name.to_string(),
            auth_token: auth_token.to_string(),
            is_incoming: true,
        }
    }

    /// Connection info as seen by the side that requested the connection.
    pub fn outgoing(endpoint_name: &str, auth_token: &str) -> Self {
        Self {
            endpoint_name: endpoint_name.to_string(),
            auth_token: auth_token.to_string(),
            is_incoming: false,
        }
    }
}

/// The remote endpoint currently being negotiated with.
///
/// Owned by exactly one session; created on discovery or connection
/// initiation and dropped when the session resets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDevice {
    /// Transport identifier of the endpoint.
    pub endpoint_id: EndpointId,
    /// Human-readable endpoint name.
    pub endpoint_name: String,
    /// Present once the transport has initiated a connection.
    pub connection_info: Option<ConnectionInfo>,
}

impl PeerDevice {
    /// A peer found through discovery (no connection yet).
    pub fn discovered(endpoint_id: EndpointId, endpoint_name: &str) -> Self {
        Self {
            endpoint_id,
            endpoint_name: endpoint_name.to_string(),
            connection_info: None,
        }
    }

    /// A peer whose connection has already been initiated.
    pub fn connecting(endpoint_id: EndpointId, info: ConnectionInfo) -> Self {
        Self {
            endpoint_id,
            endpoint_name: info.endpoint_name.clone(),
            connection_info: Some(info),
        }
    }

    /// Attach connection data to a discovered peer.
    pub fn attach_connection(&mut self, info: ConnectionInfo) {
        self.connection_info = Some(info);
    }

    /// The shared token, if a connection has been initiated.
    pub fn auth_token(&self) -> Option<&str> {
        self.connection_info.as_ref().map(|i| i.auth_token.as_str())
    }
}
