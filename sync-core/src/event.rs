//! Inputs to and outputs from the session state machines.
//!
//! Every transport callback, authenticator verdict, and service reply is an
//! [`Event`]. The machines answer with [`Action`]s for the driver to perform
//! and [`SessionEvent`]s for whoever is watching the session.

use std::time::Duration;

use p2psync_types::{
    AuthOutcome, AuthorizationDecision, AuthorizationDetails, ConnectionInfo,
    ConnectionResolution, DiscoveredEndpoint, EndpointId, Payload, PeerDevice, PeerIdentity,
    ReceiveHistory, SessionError, TransferId, TransferUpdate,
};

/// Which end of the handshake a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Discovers and requests connections.
    Initiator,
    /// Advertises and accepts connections.
    Responder,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Responder => f.write_str("responder"),
        }
    }
}

/// Why a payload is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendPurpose {
    /// Authorization details JSON.
    AuthorizationDetails,
    /// Our identity JSON.
    KeyExchange,
    /// Receive-history summary JSON.
    History,
    /// An in-band control sentinel.
    Control,
}

/// Input to a session state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// User asked to start discovering/advertising.
    StartRequested,
    /// User cancelled the session.
    CancelRequested,
    /// Discovery or advertising failed to start.
    SearchFailed {
        /// Transport error text.
        error: String,
    },
    /// Discovery found an advertiser.
    EndpointFound {
        /// Endpoint found.
        endpoint_id: EndpointId,
        /// What the advertiser published.
        info: DiscoveredEndpoint,
    },
    /// A connection request could not be issued.
    ConnectionRequestFailed {
        /// Endpoint the request was for.
        endpoint_id: EndpointId,
        /// Transport error text.
        error: String,
    },
    /// The transport initiated a low-level connection.
    ConnectionInitiated {
        /// Remote endpoint.
        endpoint_id: EndpointId,
        /// Connection data, including the shared token.
        info: ConnectionInfo,
    },
    /// Both sides have answered the connection.
    ConnectionResult {
        /// Remote endpoint.
        endpoint_id: EndpointId,
        /// Resolution reported by the transport.
        resolution: ConnectionResolution,
    },
    /// The connection dropped unexpectedly.
    ConnectionBroken {
        /// Remote endpoint.
        endpoint_id: EndpointId,
    },
    /// The connection was closed.
    Disconnected {
        /// Remote endpoint.
        endpoint_id: EndpointId,
    },
    /// A payload arrived.
    PayloadReceived {
        /// Sender.
        endpoint_id: EndpointId,
        /// The payload.
        payload: Payload,
    },
    /// Progress for a payload we sent.
    TransferUpdated {
        /// Receiver.
        endpoint_id: EndpointId,
        /// Progress update.
        update: TransferUpdate,
    },
    /// The authenticator finished.
    AuthenticationCompleted {
        /// Peer that was authenticated.
        endpoint_id: EndpointId,
        /// Verdict.
        outcome: AuthOutcome,
    },
    /// The operator answered the skip-confirmation prompt.
    SkipDecided {
        /// Peer that asked to skip.
        endpoint_id: EndpointId,
        /// True if the operator chose to skip the scan.
        skip: bool,
    },
    /// The authorization service produced our details.
    AuthorizationDetailsReady {
        /// Peer the details are for.
        endpoint_id: EndpointId,
        /// Details to send.
        details: AuthorizationDetails,
    },
    /// The authorization service decided on the peer's details.
    AuthorizationDecided {
        /// Peer that was checked.
        endpoint_id: EndpointId,
        /// Decision.
        decision: AuthorizationDecision,
    },
    /// The sync handler loaded what we already received from the peer.
    HistoryReady {
        /// Peer the history is about.
        endpoint_id: EndpointId,
        /// History summary to send.
        history: ReceiveHistory,
    },
    /// The transport accepted a payload for sending.
    PayloadQueued {
        /// Receiver.
        endpoint_id: EndpointId,
        /// Why it was sent.
        purpose: SendPurpose,
        /// Transport id of the queued payload.
        transfer_id: TransferId,
    },
    /// The transport refused a payload.
    PayloadSendFailed {
        /// Intended receiver.
        endpoint_id: EndpointId,
        /// Why it was sent.
        purpose: SendPurpose,
        /// Transport error text.
        error: String,
    },
    /// A scheduled identity retry is due.
    KeyExchangeRetryDue {
        /// Peer to resend to.
        endpoint_id: EndpointId,
    },
}

/// Side effect requested by a state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Start discovery.
    StartDiscovery,
    /// Stop discovery.
    StopDiscovery,
    /// Start advertising.
    StartAdvertising,
    /// Stop advertising.
    StopAdvertising,
    /// Request a connection to a discovered endpoint.
    RequestConnection {
        /// Target endpoint.
        endpoint_id: EndpointId,
    },
    /// Accept an initiated connection.
    AcceptConnection {
        /// Remote endpoint.
        endpoint_id: EndpointId,
    },
    /// Reject an initiated connection.
    RejectConnection {
        /// Remote endpoint.
        endpoint_id: EndpointId,
    },
    /// Close one endpoint.
    Disconnect {
        /// Remote endpoint.
        endpoint_id: EndpointId,
    },
    /// Close every endpoint.
    DisconnectAll,
    /// Run the role's authenticator against the peer.
    Authenticate {
        /// Peer, with connection info attached.
        peer: PeerDevice,
    },
    /// Ask the operator whether to continue without scanning.
    PromptSkip {
        /// Peer that asked.
        endpoint_id: EndpointId,
        /// Peer name to show.
        endpoint_name: String,
    },
    /// Ask the authorization service for our details.
    FetchAuthorizationDetails {
        /// Peer the details are for.
        endpoint_id: EndpointId,
    },
    /// Ask the authorization service to check the peer's details.
    Authorize {
        /// Peer being checked.
        endpoint_id: EndpointId,
        /// Details the peer sent.
        details: AuthorizationDetails,
    },
    /// Send bytes to the peer.
    SendPayload {
        /// Receiver.
        endpoint_id: EndpointId,
        /// Why it is being sent.
        purpose: SendPurpose,
        /// Encoded payload.
        bytes: Vec<u8>,
    },
    /// Load what we already received from the identified peer.
    LoadHistory {
        /// Peer endpoint.
        endpoint_id: EndpointId,
        /// Peer identity.
        identity: PeerIdentity,
    },
    /// Hand received sync records to the sync handler.
    ApplyRecords {
        /// Sender identity.
        identity: PeerIdentity,
        /// Raw record bytes.
        bytes: Vec<u8>,
    },
    /// Start streaming records the peer is missing.
    StartTransfer {
        /// Peer endpoint.
        endpoint_id: EndpointId,
        /// Peer identity.
        identity: PeerIdentity,
        /// What the peer already has.
        history: ReceiveHistory,
    },
    /// Resend our identity after a delay.
    ScheduleKeyExchangeRetry {
        /// Peer endpoint.
        endpoint_id: EndpointId,
        /// Delay before the retry.
        delay: Duration,
    },
    /// Cancel in-flight work for the previous peer.
    AbortPending,
    /// Report a session event.
    Emit(SessionEvent),
}

/// Observable session outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Discovery/advertising started.
    Searching {
        /// Role that started searching.
        role: Role,
    },
    /// The session was cancelled.
    Stopped,
    /// Discovery/advertising could not start.
    SearchFailed {
        /// Transport error text.
        error: String,
    },
    /// A peer was claimed.
    PeerFound {
        /// Peer endpoint.
        endpoint_id: EndpointId,
        /// Peer name.
        endpoint_name: String,
    },
    /// A connection request could not be issued.
    ConnectionRequestFailed {
        /// Peer endpoint.
        endpoint_id: EndpointId,
        /// Transport error text.
        error: String,
    },
    /// Local authentication succeeded.
    Authenticated {
        /// Peer name.
        endpoint_name: String,
    },
    /// Local authentication failed.
    AuthenticationFailed {
        /// Peer endpoint.
        endpoint_id: EndpointId,
        /// Failure reason.
        reason: String,
    },
    /// Local authentication was cancelled.
    AuthenticationCancelled {
        /// Peer endpoint.
        endpoint_id: EndpointId,
        /// Cancellation reason.
        reason: String,
    },
    /// The connection was accepted by both sides.
    ConnectionAccepted {
        /// Peer endpoint.
        endpoint_id: EndpointId,
    },
    /// The connection was rejected.
    ConnectionRejected {
        /// Peer endpoint.
        endpoint_id: EndpointId,
    },
    /// The connection failed.
    ConnectionError {
        /// Peer endpoint.
        endpoint_id: EndpointId,
        /// Transport error text.
        error: String,
    },
    /// The connection dropped.
    ConnectionLost {
        /// Peer endpoint.
        endpoint_id: EndpointId,
        /// True once the peer had been authorized.
        escalate: bool,
    },
    /// The connection dropped after the history summary was exchanged.
    SyncFailed {
        /// Peer endpoint.
        endpoint_id: EndpointId,
        /// Peer name.
        endpoint_name: String,
    },
    /// The connection was closed.
    Disconnected {
        /// Peer endpoint.
        endpoint_id: EndpointId,
        /// True once the peer had been authorized.
        escalate: bool,
    },
    /// The peer passed authorization.
    Authorized {
        /// Peer name.
        endpoint_name: String,
    },
    /// The peer failed authorization.
    AuthorizationRejected {
        /// Peer name.
        endpoint_name: String,
        /// Rejection reason.
        reason: String,
    },
    /// The peer's identity was registered.
    PeerIdentified {
        /// Registered identity.
        identity: PeerIdentity,
    },
    /// The peer sent free text.
    StatusMessage {
        /// Peer endpoint.
        endpoint_id: EndpointId,
        /// Text.
        message: String,
    },
    /// A payload could not be sent.
    PayloadSendFailed {
        /// Why it was being sent.
        purpose: SendPurpose,
        /// Transport error text.
        error: String,
    },
    /// The peer sent something the current phase cannot accept.
    ProtocolViolation {
        /// Peer endpoint.
        endpoint_id: EndpointId,
        /// What was wrong.
        reason: String,
    },
}

impl SessionEvent {
    /// The error this event represents, if it is a failure.
    pub fn error(&self) -> Option<SessionError> {
        match self {
            SessionEvent::SearchFailed { error }
            | SessionEvent::ConnectionRequestFailed { error, .. }
            | SessionEvent::ConnectionError { error, .. } => {
                Some(SessionError::ConnectionFailure(error.clone()))
            }
            SessionEvent::ConnectionRejected { .. } => {
                Some(SessionError::ConnectionFailure("rejected".to_string()))
            }
            SessionEvent::AuthenticationFailed { reason, .. } => {
                if reason == &SessionError::InvalidPeerInfo.to_string() {
                    Some(SessionError::InvalidPeerInfo)
                } else {
                    Some(SessionError::AuthenticationFailure(reason.clone()))
                }
            }
            SessionEvent::AuthenticationCancelled { reason, .. } => {
                Some(SessionError::AuthenticationCancelled(reason.clone()))
            }
            SessionEvent::AuthorizationRejected { reason, .. } => {
                Some(SessionError::AuthorizationRejected(reason.clone()))
            }
            SessionEvent::ConnectionLost { .. } | SessionEvent::SyncFailed { .. } => {
                Some(SessionError::ConnectionBroken)
            }
            SessionEvent::Disconnected { .. } => Some(SessionError::Disconnected),
            SessionEvent::ProtocolViolation { reason, .. } => {
                Some(SessionError::MalformedPayload(reason.clone()))
            }
            SessionEvent::PayloadSendFailed { error, .. } => {
                Some(SessionError::ConnectionFailure(error.clone()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_events_carry_no_error() {
        let event = SessionEvent::Authorized {
            endpoint_name: "Tablet".into(),
        };
        assert_eq!(event.error(), None);
        assert_eq!(SessionEvent::Stopped.error(), None);
    }

    #[test]
    fn failures_map_to_taxonomy() {
        let event = SessionEvent::AuthenticationFailed {
            endpoint_id: EndpointId::from("e1"),
            reason: "invalid device information".into(),
        };
        assert_eq!(event.error(), Some(SessionError::InvalidPeerInfo));

        let event = SessionEvent::AuthenticationFailed {
            endpoint_id: EndpointId::from("e1"),
            reason: "tokens do not match".into(),
        };
        assert_eq!(
            event.error(),
            Some(SessionError::AuthenticationFailure(
                "tokens do not match".into()
            ))
        );

        let event = SessionEvent::SyncFailed {
            endpoint_id: EndpointId::from("e1"),
            endpoint_name: "Tablet".into(),
        };
        assert_eq!(event.error(), Some(SessionError::ConnectionBroken));
    }
}
