//! Connection authenticators.
//!
//! Both ends compare a token the transport hands them out-of-band. The
//! responder shows its token; the initiator scans the responder's screen
//! and compares. How tokens are shown and scanned is a UI concern behind
//! [`TokenDisplay`] and [`TokenScanner`].

use async_trait::async_trait;
use p2psync_core::{
    confirmation_outcome, expect_direction, invalid_peer_outcome, match_token, Direction,
};
use p2psync_types::{AuthOutcome, PeerDevice};

/// Establishes human trust in a peer.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate `peer`, which must carry connection info.
    async fn authenticate(&self, peer: &PeerDevice) -> AuthOutcome;
}

/// Result of a token scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Candidate tokens read from the peer's screen.
    Scanned(Vec<String>),
    /// The operator cancelled scanning.
    Cancelled,
    /// Scanning is not possible (no camera, permission denied).
    Unavailable(String),
}

/// Result of the "connect without scanning?" dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Operator accepted the connection.
    Accepted,
    /// Operator rejected the connection.
    Rejected,
    /// Dialog closed without an answer.
    Dismissed,
}

/// Result of showing the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayOutcome {
    /// The operator confirmed the peer scanned the token.
    Completed,
    /// The operator skipped the token step.
    Skipped,
    /// The display could not be shown or failed.
    Error(String),
}

/// UI port for scanning a peer's token.
#[async_trait]
pub trait TokenScanner: Send + Sync {
    /// Scan tokens shown by `endpoint_name`.
    async fn scan(&self, endpoint_name: &str) -> ScanOutcome;

    /// Ask whether to connect to `endpoint_name` without scanning.
    async fn confirm_connection(&self, endpoint_name: &str) -> ConfirmOutcome;
}

/// UI port for showing our token.
#[async_trait]
pub trait TokenDisplay: Send + Sync {
    /// Show `token` to the operator of `endpoint_name` and wait until done.
    async fn show_token(&self, endpoint_name: &str, token: &str) -> DisplayOutcome;
}

/// Authenticator for the discovering side: scans and compares.
#[derive(Debug, Clone)]
pub struct InitiatorAuthenticator<S> {
    scanner: S,
}

impl<S: TokenScanner> InitiatorAuthenticator<S> {
    /// Create an authenticator using `scanner`.
    pub fn new(scanner: S) -> Self {
        Self { scanner }
    }
}

#[async_trait]
impl<S: TokenScanner> Authenticator for InitiatorAuthenticator<S> {
    async fn authenticate(&self, peer: &PeerDevice) -> AuthOutcome {
        let Ok(info) = expect_direction(peer, Direction::Outgoing) else {
            return invalid_peer_outcome();
        };

        match self.scanner.scan(&info.endpoint_name).await {
            ScanOutcome::Scanned(candidates) => match_token(&info.auth_token, &candidates),
            ScanOutcome::Cancelled => {
                let answer = self.scanner.confirm_connection(&info.endpoint_name).await;
                confirmation_outcome(answer == ConfirmOutcome::Accepted)
            }
            ScanOutcome::Unavailable(reason) => AuthOutcome::Cancelled(reason),
        }
    }
}

/// Authenticator for the advertising side: shows the token.
#[derive(Debug, Clone)]
pub struct ResponderAuthenticator<D> {
    display: D,
}

impl<D: TokenDisplay> ResponderAuthenticator<D> {
    /// Create an authenticator using `display`.
    pub fn new(display: D) -> Self {
        Self { display }
    }
}

#[async_trait]
impl<D: TokenDisplay> Authenticator for ResponderAuthenticator<D> {
    async fn authenticate(&self, peer: &PeerDevice) -> AuthOutcome {
        let Ok(info) = expect_direction(peer, Direction::Incoming) else {
            return invalid_peer_outcome();
        };

        // Skipping is a product decision, not a security gate.
        match self
            .display
            .show_token(&info.endpoint_name, &info.auth_token)
            .await
        {
            DisplayOutcome::Completed | DisplayOutcome::Skipped => AuthOutcome::Success,
            DisplayOutcome::Error(e) => AuthOutcome::Failure(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2psync_types::{ConnectionInfo, EndpointId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct FakeScanner {
        scan: ScanOutcome,
        confirm: ConfirmOutcome,
        calls: Arc<AtomicUsize>,
    }

    impl FakeScanner {
        fn new(scan: ScanOutcome, confirm: ConfirmOutcome) -> Self {
            Self {
                scan,
                confirm,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl TokenScanner for FakeScanner {
        async fn scan(&self, _endpoint_name: &str) -> ScanOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.scan.clone()
        }

        async fn confirm_connection(&self, _endpoint_name: &str) -> ConfirmOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.confirm
        }
    }

    #[derive(Clone)]
    struct FakeDisplay {
        outcome: DisplayOutcome,
        shown: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl FakeDisplay {
        fn new(outcome: DisplayOutcome) -> Self {
            Self {
                outcome,
                shown: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl TokenDisplay for FakeDisplay {
        async fn show_token(&self, _endpoint_name: &str, token: &str) -> DisplayOutcome {
            self.shown.lock().unwrap().push(token.to_string());
            self.outcome.clone()
        }
    }

    fn outgoing_peer() -> PeerDevice {
        PeerDevice::connecting(
            EndpointId::from("e1"),
            ConnectionInfo::outgoing("Tablet", "ABC123"),
        )
    }

    fn incoming_peer() -> PeerDevice {
        PeerDevice::connecting(
            EndpointId::from("e1"),
            ConnectionInfo::incoming("Phone", "ABC123"),
        )
    }

    fn scanned(tokens: &[&str]) -> ScanOutcome {
        ScanOutcome::Scanned(tokens.iter().map(|t| t.to_string()).collect())
    }

    // ===========================================
    // Initiator
    // ===========================================

    #[tokio::test]
    async fn matching_scan_succeeds() {
        let auth = InitiatorAuthenticator::new(FakeScanner::new(
            scanned(&["XYZ", "ABC123"]),
            ConfirmOutcome::Rejected,
        ));
        assert_eq!(auth.authenticate(&outgoing_peer()).await, AuthOutcome::Success);
    }

    #[tokio::test]
    async fn non_matching_scan_fails() {
        let auth = InitiatorAuthenticator::new(FakeScanner::new(
            scanned(&["XYZ", "QRS"]),
            ConfirmOutcome::Accepted,
        ));
        assert_eq!(
            auth.authenticate(&outgoing_peer()).await,
            AuthOutcome::Failure("tokens do not match".into())
        );
    }

    #[tokio::test]
    async fn cancelled_scan_falls_back_to_confirmation() {
        let auth = InitiatorAuthenticator::new(FakeScanner::new(
            ScanOutcome::Cancelled,
            ConfirmOutcome::Accepted,
        ));
        assert_eq!(auth.authenticate(&outgoing_peer()).await, AuthOutcome::Success);

        for answer in [ConfirmOutcome::Rejected, ConfirmOutcome::Dismissed] {
            let auth =
                InitiatorAuthenticator::new(FakeScanner::new(ScanOutcome::Cancelled, answer));
            assert_eq!(
                auth.authenticate(&outgoing_peer()).await,
                AuthOutcome::Failure("user cancelled".into())
            );
        }
    }

    #[tokio::test]
    async fn unavailable_scanner_cancels() {
        let auth = InitiatorAuthenticator::new(FakeScanner::new(
            ScanOutcome::Unavailable("camera permission denied".into()),
            ConfirmOutcome::Accepted,
        ));
        assert_eq!(
            auth.authenticate(&outgoing_peer()).await,
            AuthOutcome::Cancelled("camera permission denied".into())
        );
    }

    #[tokio::test]
    async fn initiator_rejects_incoming_peer_without_ui() {
        let scanner = FakeScanner::new(scanned(&["ABC123"]), ConfirmOutcome::Accepted);
        let calls = scanner.calls.clone();
        let auth = InitiatorAuthenticator::new(scanner);

        assert_eq!(
            auth.authenticate(&incoming_peer()).await,
            AuthOutcome::Failure("invalid device information".into())
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    // ===========================================
    // Responder
    // ===========================================

    #[tokio::test]
    async fn responder_shows_token_and_succeeds() {
        let display = FakeDisplay::new(DisplayOutcome::Completed);
        let shown = display.shown.clone();
        let auth = ResponderAuthenticator::new(display);

        assert_eq!(auth.authenticate(&incoming_peer()).await, AuthOutcome::Success);
        assert_eq!(*shown.lock().unwrap(), vec!["ABC123".to_string()]);
    }

    #[tokio::test]
    async fn responder_skip_is_success() {
        let auth = ResponderAuthenticator::new(FakeDisplay::new(DisplayOutcome::Skipped));
        assert_eq!(auth.authenticate(&incoming_peer()).await, AuthOutcome::Success);
    }

    #[tokio::test]
    async fn responder_display_error_fails_with_reason() {
        let auth = ResponderAuthenticator::new(FakeDisplay::new(DisplayOutcome::Error(
            "screen locked".into(),
        )));
        assert_eq!(
            auth.authenticate(&incoming_peer()).await,
            AuthOutcome::Failure("screen locked".into())
        );
    }

    #[tokio::test]
    async fn responder_rejects_outgoing_peer_without_ui() {
        let display = FakeDisplay::new(DisplayOutcome::Completed);
        let shown = display.shown.clone();
        let auth = ResponderAuthenticator::new(display);

        assert!(!auth.authenticate(&outgoing_peer()).await.is_success());
        assert!(shown.lock().unwrap().is_empty());
    }
}
