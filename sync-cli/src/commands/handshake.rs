//! Run an initiator and a responder against each other in-process.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use p2psync_core::SessionEvent;
use p2psync_session::{
    InitiatorAuthenticator, InitiatorController, LoopbackNetwork, NeverSkip,
    ResponderAuthenticator, ResponderController, SessionConfig, SessionServices,
};
use p2psync_types::{LocalIdentity, ReceiveHistory};

use crate::demo::{Camera, Ledger, OrgPolicy, ScreenDisplay, DEMO_ORG};

/// What should go wrong, if anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scenario {
    /// The initiator scans a different token.
    pub token_mismatch: bool,
    /// The responder declines the initiator's organization.
    pub reject_authorization: bool,
}

impl Scenario {
    fn outcome_reached(&self, side: Side, event: &SessionEvent) -> bool {
        match (side, event) {
            (Side::Initiator, SessionEvent::AuthenticationFailed { .. }) => self.token_mismatch,
            (Side::Responder, SessionEvent::AuthorizationRejected { .. }) => {
                self.reject_authorization
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Initiator,
    Responder,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Initiator => write!(f, "initiator"),
            Side::Responder => write!(f, "responder"),
        }
    }
}

/// Run the handshake command.
pub async fn run(config: SessionConfig, scenario: Scenario, limit: Duration) -> Result<()> {
    println!("=== p2psync handshake ===");
    println!();
    tracing::debug!(?scenario, service = %config.service.service_id, "starting handshake demo");

    let network = LoopbackNetwork::new();
    let (shown_tx, shown_rx) = watch::channel(None);
    let (transfers_tx, mut transfers) = mpsc::unbounded_channel();

    let responder_accepts = if scenario.reject_authorization {
        "other-clinic"
    } else {
        DEMO_ORG
    };
    let responder_services = SessionServices {
        authenticator: Arc::new(ResponderAuthenticator::new(ScreenDisplay::new(shown_tx))),
        authorization: Arc::new(OrgPolicy::new(DEMO_ORG, responder_accepts)),
        data: Arc::new(Ledger::new(Ledger::sample_history(), transfers_tx.clone())),
        skip_prompt: Arc::new(NeverSkip),
    };
    let initiator_services = SessionServices {
        authenticator: Arc::new(InitiatorAuthenticator::new(Camera::new(
            shown_rx,
            scenario.token_mismatch,
        ))),
        authorization: Arc::new(OrgPolicy::new(DEMO_ORG, DEMO_ORG)),
        data: Arc::new(Ledger::new(ReceiveHistory::default(), transfers_tx)),
        skip_prompt: Arc::new(NeverSkip),
    };

    let (responder, mut responder_events) = ResponderController::responder(
        network.transport(),
        responder_services,
        &LocalIdentity::new("tablet-01", "tablet-key"),
        config.clone().with_device_name("Tablet"),
    );
    let (initiator, mut initiator_events) = InitiatorController::initiator(
        network.transport(),
        initiator_services,
        &LocalIdentity::new("phone-01", "phone-key"),
        config.with_device_name("Phone"),
    );

    let responder_handle = responder.handle();
    let initiator_handle = initiator.handle();
    let responder_task = tokio::spawn(responder.run());
    let initiator_task = tokio::spawn(initiator.run());

    responder_handle.start();
    initiator_handle.start();

    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);

    let finished = loop {
        let (side, event) = tokio::select! {
            // Drain both event streams before noticing the hand-off.
            biased;
            Some(event) = initiator_events.recv() => (Side::Initiator, event),
            Some(event) = responder_events.recv() => (Side::Responder, event),
            Some(peer) = transfers.recv() => {
                println!();
                println!("Handshake complete: transferring to {}", peer.device_id);
                break true;
            }
            _ = &mut deadline => break false,
        };
        println!("[{}] {:?}", side, event);
        if scenario.outcome_reached(side, &event) {
            println!();
            println!("Handshake stopped as expected");
            break true;
        }
    };

    initiator_handle.shutdown();
    responder_handle.shutdown();
    let _ = tokio::join!(initiator_task, responder_task);

    if !finished {
        bail!("Handshake did not finish within {:?}", limit);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2psync_types::EndpointId;

    #[test]
    fn happy_path_never_stops_early() {
        let scenario = Scenario::default();
        let failure = SessionEvent::AuthenticationFailed {
            endpoint_id: EndpointId::from("e1"),
            reason: "tokens do not match".into(),
        };
        assert!(!scenario.outcome_reached(Side::Initiator, &failure));
    }

    #[test]
    fn mismatch_stops_on_initiator_failure() {
        let scenario = Scenario {
            token_mismatch: true,
            ..Scenario::default()
        };
        let failure = SessionEvent::AuthenticationFailed {
            endpoint_id: EndpointId::from("e1"),
            reason: "tokens do not match".into(),
        };
        assert!(scenario.outcome_reached(Side::Initiator, &failure));
        assert!(!scenario.outcome_reached(Side::Responder, &failure));
    }

    #[test]
    fn rejection_stops_on_responder_decision() {
        let scenario = Scenario {
            reject_authorization: true,
            ..Scenario::default()
        };
        let rejected = SessionEvent::AuthorizationRejected {
            endpoint_name: "Phone".into(),
            reason: "Phone belongs to demo-clinic".into(),
        };
        assert!(scenario.outcome_reached(Side::Responder, &rejected));
    }
}
