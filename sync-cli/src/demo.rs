//! Stand-ins for the humans and apps on both devices.
//!
//! The responder "shows" its token by publishing it on a watch channel; the
//! initiator's "camera" reads it from there.

use async_trait::async_trait;
use p2psync_session::{
    AuthorizationService, ConfirmOutcome, DisplayOutcome, ScanOutcome, SyncDataHandler,
    TokenDisplay, TokenScanner,
};
use p2psync_types::{
    AuthorizationDecision, AuthorizationDetails, EndpointId, PeerDevice, PeerIdentity,
    ReceiveHistory,
};
use serde_json::json;
use tokio::sync::{mpsc, watch};

/// Organization both demo devices belong to.
pub const DEMO_ORG: &str = "demo-clinic";

/// Prints the token and publishes it for the scanner.
pub struct ScreenDisplay {
    shown: watch::Sender<Option<String>>,
}

impl ScreenDisplay {
    pub fn new(shown: watch::Sender<Option<String>>) -> Self {
        Self { shown }
    }
}

#[async_trait]
impl TokenDisplay for ScreenDisplay {
    async fn show_token(&self, endpoint_name: &str, token: &str) -> DisplayOutcome {
        println!("[responder] showing token {} to {}", token, endpoint_name);
        if self.shown.send(Some(token.to_string())).is_err() {
            return DisplayOutcome::Error("nobody is looking".into());
        }
        DisplayOutcome::Completed
    }
}

/// Reads the displayed token, optionally garbling it.
pub struct Camera {
    shown: watch::Receiver<Option<String>>,
    garble: bool,
}

impl Camera {
    pub fn new(shown: watch::Receiver<Option<String>>, garble: bool) -> Self {
        Self { shown, garble }
    }
}

#[async_trait]
impl TokenScanner for Camera {
    async fn scan(&self, endpoint_name: &str) -> ScanOutcome {
        let mut shown = self.shown.clone();
        let token = match shown.wait_for(|t| t.is_some()).await {
            Ok(token) => token.clone().unwrap_or_default(),
            Err(_) => return ScanOutcome::Unavailable("display closed".into()),
        };
        let scanned = if self.garble {
            token.chars().rev().collect()
        } else {
            token
        };
        println!("[initiator] scanned {} from {}", scanned, endpoint_name);
        ScanOutcome::Scanned(vec![scanned])
    }

    async fn confirm_connection(&self, _endpoint_name: &str) -> ConfirmOutcome {
        ConfirmOutcome::Dismissed
    }
}

/// Accepts peers from one organization.
pub struct OrgPolicy {
    own: &'static str,
    accepts: &'static str,
}

impl OrgPolicy {
    pub fn new(own: &'static str, accepts: &'static str) -> Self {
        Self { own, accepts }
    }
}

#[async_trait]
impl AuthorizationService for OrgPolicy {
    async fn authorization_details(&self) -> AuthorizationDetails {
        AuthorizationDetails::new()
            .with("org", self.own)
            .with("app_version", env!("CARGO_PKG_VERSION"))
    }

    async fn authorize(
        &self,
        peer: &PeerDevice,
        details: &AuthorizationDetails,
    ) -> AuthorizationDecision {
        match details.get("org").and_then(|v| v.as_str()) {
            Some(org) if org == self.accepts => AuthorizationDecision::Authorized,
            Some(org) => AuthorizationDecision::Rejected(format!(
                "{} belongs to {}",
                peer.endpoint_name, org
            )),
            None => AuthorizationDecision::Rejected("no organization".into()),
        }
    }
}

/// Record layer that only reports what it is asked to do.
pub struct Ledger {
    history: ReceiveHistory,
    transfers: mpsc::UnboundedSender<PeerIdentity>,
}

impl Ledger {
    pub fn new(history: ReceiveHistory, transfers: mpsc::UnboundedSender<PeerIdentity>) -> Self {
        Self { history, transfers }
    }

    /// History of a device that already received some records.
    pub fn sample_history() -> ReceiveHistory {
        ReceiveHistory::new(vec![
            json!({"entity": "patient", "lastRecordId": 120, "source": "phone-key"}),
            json!({"entity": "visit", "lastRecordId": 87, "source": "phone-key"}),
        ])
    }
}

#[async_trait]
impl SyncDataHandler for Ledger {
    async fn receive_history(&self, peer: &PeerIdentity) -> ReceiveHistory {
        println!("[responder] loading history for {}", peer.device_id);
        self.history.clone()
    }

    async fn apply_records(&self, peer: &PeerIdentity, bytes: Vec<u8>) {
        println!("[responder] {} bytes of records from {}", bytes.len(), peer.device_id);
    }

    async fn start_transfer(
        &self,
        endpoint_id: &EndpointId,
        peer: &PeerIdentity,
        history: &ReceiveHistory,
    ) {
        println!(
            "[initiator] sending records to {} ({}) after {} history entries",
            peer.device_id,
            endpoint_id,
            history.len()
        );
        let _ = self.transfers.send(peer.clone());
    }
}
