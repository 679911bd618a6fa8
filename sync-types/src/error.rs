//! Error types for p2psync sessions.

use thiserror::Error;

/// Failure categories a session can hit.
///
/// None of these is fatal: every one ends with the current peer released
/// and the session back in its idle mode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Peer information missing or pointing the wrong direction
    #[error("invalid device information")]
    InvalidPeerInfo,

    /// Token mismatch or the user rejected the connection
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    /// The user aborted authentication mid-flow
    #[error("authentication cancelled: {0}")]
    AuthenticationCancelled(String),

    /// The business authorization check declined the peer
    #[error("authorization rejected: {0}")]
    AuthorizationRejected(String),

    /// Wrong payload type, undecodable bytes, or a missing required field
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Requesting or accepting the connection failed
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// The transport reported the connection as broken
    #[error("connection broken")]
    ConnectionBroken,

    /// The remote endpoint disconnected
    #[error("disconnected")]
    Disconnected,
}
