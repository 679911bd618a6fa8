//! Tagged results of the asynchronous steps a session waits on.

/// Result of running a connection authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The humans agreed the devices match.
    Success,
    /// Authentication failed (token mismatch, user rejected, bad peer info).
    Failure(String),
    /// The flow was aborted before reaching a decision.
    Cancelled(String),
}

impl AuthOutcome {
    /// Check for success.
    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Success)
    }
}

/// Decision of the business authorization service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationDecision {
    /// The peer may proceed to key exchange.
    Authorized,
    /// The peer was declined.
    Rejected(String),
}

/// Final result of a low-level connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionResolution {
    /// Both ends accepted; the byte channel is open.
    Accepted,
    /// The remote end rejected the connection.
    Rejected,
    /// The transport failed before either end decided.
    Error(String),
}
