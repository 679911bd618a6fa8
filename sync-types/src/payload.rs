//! Byte payloads exchanged over the transport's raw-bytes channel.
//!
//! Every structured payload is JSON. Two ASCII sentinels share the same
//! channel as whole-payload control signals; [`InboundPayload::decode`]
//! separates them from data before any JSON parsing happens.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::{SessionError, TransferId};

/// Identity exchanged during the key-exchange step.
///
/// Wire form: `{"device_id": "...", "app_lifetime_key": "..."}`. Both keys
/// are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Stable identifier of the remote device.
    pub device_id: String,
    /// Key that stays constant for the lifetime of the remote app install.
    pub app_lifetime_key: String,
}

impl PeerIdentity {
    /// Create an identity.
    pub fn new(device_id: &str, app_lifetime_key: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            app_lifetime_key: app_lifetime_key.to_string(),
        }
    }

    /// Serialize to the JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SessionError> {
        serde_json::to_vec(self).map_err(|e| SessionError::MalformedPayload(e.to_string()))
    }

    /// Decode from the JSON wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        serde_json::from_slice(bytes)
            .map_err(|e| SessionError::MalformedPayload(format!("identity: {}", e)))
    }
}

/// The local device's identity constants, injected into each session.
///
/// Persisting the lifetime key between runs is the host's job.
#[derive(Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Stable identifier of this device.
    pub device_id: String,
    /// Key that stays constant for the lifetime of this app install.
    pub app_lifetime_key: String,
}

impl LocalIdentity {
    /// Create from known constants.
    pub fn new(device_id: &str, app_lifetime_key: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            app_lifetime_key: app_lifetime_key.to_string(),
        }
    }

    /// Create with a freshly generated lifetime key (UUID v4).
    pub fn generate(device_id: &str) -> Self {
        Self::new(device_id, &uuid::Uuid::new_v4().to_string())
    }

    /// The identity as sent to the remote peer.
    pub fn to_peer_identity(&self) -> PeerIdentity {
        PeerIdentity::new(&self.device_id, &self.app_lifetime_key)
    }
}

// Lifetime key stays out of logs
impl fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("device_id", &self.device_id)
            .field("app_lifetime_key", &"[REDACTED]")
            .finish()
    }
}

/// Business-defined authorization details (arbitrary JSON object).
///
/// The session layer only encodes, decodes and forwards these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorizationDetails(Map<String, Value>);

impl AuthorizationDetails {
    /// Create empty details.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key, builder style.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SessionError> {
        serde_json::to_vec(&self.0).map_err(|e| SessionError::MalformedPayload(e.to_string()))
    }

    /// Decode from JSON bytes; anything but a JSON object is malformed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        serde_json::from_slice::<Map<String, Value>>(bytes)
            .map(Self)
            .map_err(|e| SessionError::MalformedPayload(format!("authorization details: {}", e)))
    }
}

impl From<Map<String, Value>> for AuthorizationDetails {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Responder's manifest of already-synced records.
///
/// A JSON array of record descriptors. The descriptors belong to the data
/// layer; the session only moves them between devices and never looks inside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiveHistory(Vec<Value>);

impl ReceiveHistory {
    /// Create from descriptors, keeping their order.
    pub fn new(descriptors: Vec<Value>) -> Self {
        Self(descriptors)
    }

    /// The descriptors in order.
    pub fn descriptors(&self) -> &[Value] {
        &self.0
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the history is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize to a JSON array.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SessionError> {
        serde_json::to_vec(&self.0).map_err(|e| SessionError::MalformedPayload(e.to_string()))
    }

    /// Decode any JSON array; element shapes are not checked.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        serde_json::from_slice(bytes)
            .map(Self)
            .map_err(|e| SessionError::MalformedPayload(format!("receive history: {}", e)))
    }
}

impl From<Vec<Value>> for ReceiveHistory {
    fn from(descriptors: Vec<Value>) -> Self {
        Self(descriptors)
    }
}

/// Reserved whole-payload control signals sent on the data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlSignal {
    /// Peer asks to skip the token-confirmation step. Only ever received.
    SkipConfirmation,
    /// Peer confirms/accepts this connection.
    ConnectionAccept,
}

impl ControlSignal {
    const SKIP_CONFIRMATION: &'static [u8] = b"SKIP_QR_CODE_SCAN";
    const CONNECTION_ACCEPT: &'static [u8] = b"CONNECTION_ACCEPT";

    /// The exact bytes of this signal on the wire.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            ControlSignal::SkipConfirmation => Self::SKIP_CONFIRMATION,
            ControlSignal::ConnectionAccept => Self::CONNECTION_ACCEPT,
        }
    }

    /// Match a complete payload against the sentinels.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes == Self::SKIP_CONFIRMATION {
            Some(ControlSignal::SkipConfirmation)
        } else if bytes == Self::CONNECTION_ACCEPT {
            Some(ControlSignal::ConnectionAccept)
        } else {
            None
        }
    }
}

/// A raw inbound byte payload, split into in-band control vs. data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPayload {
    /// One of the reserved sentinels.
    Control(ControlSignal),
    /// Anything else; JSON or free text depending on phase.
    Data(Vec<u8>),
}

impl InboundPayload {
    /// Classify a payload. Sentinel equality is checked first.
    pub fn decode(bytes: &[u8]) -> Self {
        match ControlSignal::from_bytes(bytes) {
            Some(signal) => InboundPayload::Control(signal),
            None => InboundPayload::Data(bytes.to_vec()),
        }
    }
}

/// Kind of payload the transport delivered.
#[derive(Clone, PartialEq, Eq)]
pub enum PayloadKind {
    /// In-memory byte payload.
    Bytes(Vec<u8>),
    /// Streamed payload (never accepted by the session layer).
    Stream,
    /// File payload (never accepted by the session layer).
    File,
}

impl fmt::Debug for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Bytes(b) => write!(f, "Bytes([{} bytes])", b.len()),
            PayloadKind::Stream => f.write_str("Stream"),
            PayloadKind::File => f.write_str("File"),
        }
    }
}

/// A payload delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Transport id of the payload.
    pub id: TransferId,
    /// The payload contents.
    pub kind: PayloadKind,
}

impl Payload {
    /// A byte payload.
    pub fn bytes(id: TransferId, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            kind: PayloadKind::Bytes(data.into()),
        }
    }

    /// The bytes, if this is a byte payload.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.kind {
            PayloadKind::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Progress state of an outbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Still sending.
    InProgress,
    /// Fully delivered.
    Success,
    /// Delivery failed.
    Failure,
    /// Delivery was cancelled.
    Canceled,
}

/// A transfer progress notification for an outbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferUpdate {
    /// The payload this update concerns.
    pub transfer_id: TransferId,
    /// Current status.
    pub status: TransferStatus,
    /// Bytes delivered so far.
    pub bytes_transferred: u64,
    /// Total payload size.
    pub total_bytes: u64,
}

impl TransferUpdate {
    /// A terminal update with the given status.
    pub fn finished(transfer_id: TransferId, status: TransferStatus, total_bytes: u64) -> Self {
        let bytes_transferred = if status == TransferStatus::Success {
            total_bytes
        } else {
            0
        };
        Self {
            transfer_id,
            status,
            bytes_transferred,
            total_bytes,
        }
    }
}
