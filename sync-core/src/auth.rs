//! Authentication rules shared by both ends.
//!
//! The interactive parts (scanning, displaying, confirming) live in the
//! session crate; the decisions they feed into live here.

use p2psync_types::{AuthOutcome, ConnectionInfo, PeerDevice, SessionError};

/// Reason reported when scanned tokens do not match.
pub const REASON_TOKEN_MISMATCH: &str = "tokens do not match";

/// Reason reported when the operator declines to continue without a scan.
pub const REASON_USER_CANCELLED: &str = "user cancelled";

/// Direction the connection must have on a given side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The peer requested the connection (responder side).
    Incoming,
    /// We requested the connection (initiator side).
    Outgoing,
}

impl Direction {
    fn matches(self, info: &ConnectionInfo) -> bool {
        match self {
            Direction::Incoming => info.is_incoming,
            Direction::Outgoing => !info.is_incoming,
        }
    }
}

/// Return the peer's connection info if it has the expected direction.
///
/// A peer without connection info, or with the wrong direction, is
/// [`SessionError::InvalidPeerInfo`].
pub fn expect_direction(
    peer: &PeerDevice,
    direction: Direction,
) -> Result<&ConnectionInfo, SessionError> {
    match &peer.connection_info {
        Some(info) if direction.matches(info) => Ok(info),
        _ => Err(SessionError::InvalidPeerInfo),
    }
}

/// Compare the expected token against scanned candidates.
///
/// Comparison is exact and case-sensitive; any candidate may match.
pub fn match_token(expected: &str, candidates: &[String]) -> AuthOutcome {
    if candidates.iter().any(|c| c == expected) {
        AuthOutcome::Success
    } else {
        AuthOutcome::Failure(REASON_TOKEN_MISMATCH.to_string())
    }
}

/// Outcome of the "continue without scanning?" confirmation.
pub fn confirmation_outcome(accepted: bool) -> AuthOutcome {
    if accepted {
        AuthOutcome::Success
    } else {
        AuthOutcome::Failure(REASON_USER_CANCELLED.to_string())
    }
}

/// Outcome for a peer that failed the direction check.
pub fn invalid_peer_outcome() -> AuthOutcome {
    AuthOutcome::Failure(SessionError::InvalidPeerInfo.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2psync_types::EndpointId;

    fn peer_with(info: Option<ConnectionInfo>) -> PeerDevice {
        let mut peer = PeerDevice::discovered(EndpointId::from("e1"), "Tablet");
        if let Some(info) = info {
            peer.attach_connection(info);
        }
        peer
    }

    #[test]
    fn incoming_peer_passes_incoming_check() {
        let peer = peer_with(Some(ConnectionInfo::incoming("Tablet", "T1")));
        let info = expect_direction(&peer, Direction::Incoming).unwrap();
        assert_eq!(info.auth_token, "T1");
    }

    #[test]
    fn direction_mismatch_is_invalid_peer() {
        let peer = peer_with(Some(ConnectionInfo::outgoing("Tablet", "T1")));
        assert_eq!(
            expect_direction(&peer, Direction::Incoming).unwrap_err(),
            SessionError::InvalidPeerInfo
        );

        let peer = peer_with(Some(ConnectionInfo::incoming("Tablet", "T1")));
        assert!(expect_direction(&peer, Direction::Outgoing).is_err());
    }

    #[test]
    fn missing_info_is_invalid_peer() {
        let peer = peer_with(None);
        assert!(expect_direction(&peer, Direction::Outgoing).is_err());
    }

    #[test]
    fn matching_token_succeeds() {
        let candidates = vec!["nope".to_string(), "ABC123".to_string()];
        assert_eq!(match_token("ABC123", &candidates), AuthOutcome::Success);
    }

    #[test]
    fn token_match_is_case_sensitive() {
        let candidates = vec!["abc123".to_string()];
        assert_eq!(
            match_token("ABC123", &candidates),
            AuthOutcome::Failure(REASON_TOKEN_MISMATCH.to_string())
        );
    }

    #[test]
    fn empty_scan_does_not_match() {
        assert!(!match_token("ABC123", &[]).is_success());
    }

    #[test]
    fn confirmation_maps_to_outcome() {
        assert!(confirmation_outcome(true).is_success());
        assert_eq!(
            confirmation_outcome(false),
            AuthOutcome::Failure(REASON_USER_CANCELLED.to_string())
        );
    }

    #[test]
    fn invalid_peer_reason_text() {
        assert_eq!(
            invalid_peer_outcome(),
            AuthOutcome::Failure("invalid device information".to_string())
        );
    }
}
