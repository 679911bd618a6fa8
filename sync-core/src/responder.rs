//! Responder (advertising) side of the handshake.
//!
//! Advertises, accepts the first inbound connection, shows the shared token,
//! checks the initiator's authorization details, exchanges identities and
//! answers with what it already received from that initiator.

use p2psync_types::{
    AuthOutcome, AuthorizationDecision, AuthorizationDetails, ConnectionInfo, ConnectionResolution,
    ControlSignal, EndpointId, LocalIdentity, Payload, PeerDevice, PeerIdentity, ReceiveHistory,
};

use crate::event::{Action, Event, Role, SendPurpose, SessionEvent};
use crate::ledger::{Phase, PhaseLedger};
use crate::machine::{MachineConfig, SessionCore, SessionMachine};
use crate::router::{route, Route};

/// Handshake state machine for the advertising side.
#[derive(Debug)]
pub struct ResponderSession {
    core: SessionCore,
}

impl ResponderSession {
    /// Create an idle responder that will present `local` as its identity.
    pub fn new(local: &LocalIdentity, config: MachineConfig) -> Self {
        Self {
            core: SessionCore::new(Role::Responder, local.to_peer_identity(), config),
        }
    }

    fn on_connection_initiated(
        &mut self,
        endpoint_id: EndpointId,
        info: ConnectionInfo,
        actions: &mut Vec<Action>,
    ) {
        let endpoint_name = info.endpoint_name.clone();
        let peer = PeerDevice::connecting(endpoint_id.clone(), info);
        if self.core.ledger.claim(peer.clone()).is_err() {
            return;
        }
        self.core.stop_searching(actions);
        actions.push(Action::AcceptConnection {
            endpoint_id: endpoint_id.clone(),
        });
        actions.push(Action::Emit(SessionEvent::PeerFound {
            endpoint_id,
            endpoint_name,
        }));
        actions.push(Action::Authenticate { peer });
    }

    /// Local authentication is done; wait for the initiator's details.
    fn authentication_succeeded(&mut self, actions: &mut Vec<Action>) {
        if self.core.phase() != Phase::Connecting {
            return;
        }
        self.core.authenticated = true;
        self.core.advance(Phase::Authenticated);
        actions.push(Action::Emit(SessionEvent::Authenticated {
            endpoint_name: self.core.current_name(),
        }));
    }

    fn on_authentication(
        &mut self,
        endpoint_id: EndpointId,
        outcome: AuthOutcome,
        actions: &mut Vec<Action>,
    ) {
        if self.core.phase() != Phase::Connecting {
            return;
        }
        let event = match outcome {
            AuthOutcome::Success => {
                self.authentication_succeeded(actions);
                return;
            }
            AuthOutcome::Failure(reason) => SessionEvent::AuthenticationFailed {
                endpoint_id: endpoint_id.clone(),
                reason,
            },
            AuthOutcome::Cancelled(reason) => SessionEvent::AuthenticationCancelled {
                endpoint_id: endpoint_id.clone(),
                reason,
            },
        };
        actions.push(Action::Disconnect { endpoint_id });
        self.core.recover(event, actions);
    }

    fn on_shortcut(&mut self, actions: &mut Vec<Action>) {
        if self.core.phase() != Phase::Connecting {
            return;
        }
        // The display prompt is no longer needed.
        actions.push(Action::AbortPending);
        self.authentication_succeeded(actions);
    }

    fn on_skip_decided(&mut self, endpoint_id: EndpointId, skip: bool, actions: &mut Vec<Action>) {
        if !skip || self.core.phase() != Phase::Connecting {
            return;
        }
        actions.push(Action::AbortPending);
        self.authentication_succeeded(actions);
        self.core
            .send_control(&endpoint_id, ControlSignal::ConnectionAccept, actions);
    }

    fn on_connection_result(
        &mut self,
        endpoint_id: EndpointId,
        resolution: ConnectionResolution,
        actions: &mut Vec<Action>,
    ) {
        match resolution {
            ConnectionResolution::Accepted => {
                self.core.connected = Some(endpoint_id.clone());
                actions.push(Action::Emit(SessionEvent::ConnectionAccepted { endpoint_id }));
            }
            ConnectionResolution::Rejected => {
                self.core
                    .recover(SessionEvent::ConnectionRejected { endpoint_id }, actions);
            }
            ConnectionResolution::Error(error) => {
                self.core
                    .recover(SessionEvent::ConnectionError { endpoint_id, error }, actions);
            }
        }
    }

    fn on_connection_broken(&mut self, endpoint_id: EndpointId, actions: &mut Vec<Action>) {
        let event = if self.core.phase() == Phase::HistorySent {
            SessionEvent::SyncFailed {
                endpoint_id: endpoint_id.clone(),
                endpoint_name: self.core.current_name(),
            }
        } else {
            SessionEvent::ConnectionLost {
                endpoint_id: endpoint_id.clone(),
                escalate: self.core.escalates(),
            }
        };
        actions.push(Action::Disconnect { endpoint_id });
        self.core.recover(event, actions);
    }

    fn on_authorization(
        &mut self,
        endpoint_id: EndpointId,
        decision: AuthorizationDecision,
        actions: &mut Vec<Action>,
    ) {
        if self.core.phase() != Phase::Authenticated {
            return;
        }
        match decision {
            AuthorizationDecision::Authorized => {
                self.core.advance(Phase::Authorized);
                actions.push(Action::Emit(SessionEvent::Authorized {
                    endpoint_name: self.core.current_name(),
                }));
                self.core.send_identity(&endpoint_id, actions);
                for payload in self.core.take_deferred() {
                    self.on_payload(endpoint_id.clone(), payload, actions);
                }
            }
            AuthorizationDecision::Rejected(reason) => {
                self.authorization_rejected(endpoint_id, reason, actions)
            }
        }
    }

    fn authorization_rejected(
        &mut self,
        endpoint_id: EndpointId,
        reason: String,
        actions: &mut Vec<Action>,
    ) {
        let endpoint_name = self.core.current_name();
        actions.push(Action::Disconnect { endpoint_id });
        self.core.recover(
            SessionEvent::AuthorizationRejected {
                endpoint_name,
                reason,
            },
            actions,
        );
    }

    fn on_identity(
        &mut self,
        endpoint_id: EndpointId,
        identity: PeerIdentity,
        actions: &mut Vec<Action>,
    ) {
        if self.core.register_identity(identity.clone(), actions) {
            actions.push(Action::LoadHistory {
                endpoint_id,
                identity,
            });
        }
    }

    fn on_history_ready(
        &mut self,
        endpoint_id: EndpointId,
        history: ReceiveHistory,
        actions: &mut Vec<Action>,
    ) {
        if self.core.phase() != Phase::KeyExchanged || self.core.ledger.identity().is_none() {
            return;
        }
        self.core
            .send_encoded(&endpoint_id, SendPurpose::History, history.to_bytes(), actions);
    }

    /// Answer the initiator's details with ours, then have theirs checked.
    fn on_details_received(
        &mut self,
        endpoint_id: EndpointId,
        details: AuthorizationDetails,
        actions: &mut Vec<Action>,
    ) {
        self.core.authorizing = true;
        self.core.peer_details = Some(details);
        actions.push(Action::FetchAuthorizationDetails { endpoint_id });
    }

    fn on_details_ready(
        &mut self,
        endpoint_id: EndpointId,
        details: AuthorizationDetails,
        actions: &mut Vec<Action>,
    ) {
        if self.core.phase() != Phase::Authenticated {
            return;
        }
        let Some(peer_details) = self.core.peer_details.take() else {
            return;
        };
        let sent = self.core.send_encoded(
            &endpoint_id,
            SendPurpose::AuthorizationDetails,
            details.to_bytes(),
            actions,
        );
        if !sent {
            return;
        }
        actions.push(Action::Authorize {
            endpoint_id,
            details: peer_details,
        });
    }

    fn on_payload(&mut self, endpoint_id: EndpointId, payload: Payload, actions: &mut Vec<Action>) {
        if self.core.defer_while_authorizing(&payload) {
            return;
        }
        let phase = self.core.phase();
        // Once the initiator's identity is in, only history and records matter.
        let identified = self.core.ledger.identity().is_some();

        match route(Role::Responder, phase, &payload) {
            Route::Ignore | Route::History(_) | Route::Status(_) => {}
            Route::PromptSkip => actions.push(Action::PromptSkip {
                endpoint_id,
                endpoint_name: self.core.current_name(),
            }),
            Route::AuthenticationShortcut => self.on_shortcut(actions),
            Route::Authorize(details) => self.on_details_received(endpoint_id, details, actions),
            Route::RejectAuthorization(reason) => {
                self.authorization_rejected(endpoint_id, reason, actions)
            }
            Route::RegisterIdentity(_) | Route::DisconnectMalformed(_)
                if phase == Phase::KeyExchanged && identified => {}
            Route::RegisterIdentity(identity) => self.on_identity(endpoint_id, identity, actions),
            Route::DisconnectMalformed(reason) => {
                self.core.reject_malformed(&endpoint_id, reason, actions)
            }
            Route::Records(bytes) => self.core.apply_records(bytes, actions),
        }
    }
}

impl SessionMachine for ResponderSession {
    fn role(&self) -> Role {
        Role::Responder
    }

    fn on_event(&mut self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();
        match event {
            Event::StartRequested => self.core.start_searching(&mut actions),
            Event::CancelRequested => self.core.cancel(&mut actions),
            Event::SearchFailed { error } => self.core.search_failed(error, &mut actions),
            // Responders never discover.
            Event::EndpointFound { .. } => {}
            Event::ConnectionInitiated { endpoint_id, info } if self.core.ledger.peer().is_none() => {
                self.on_connection_initiated(endpoint_id, info, &mut actions)
            }

            Event::ConnectionRequestFailed { endpoint_id, .. }
            | Event::ConnectionInitiated { endpoint_id, .. }
            | Event::ConnectionResult { endpoint_id, .. }
            | Event::ConnectionBroken { endpoint_id }
            | Event::Disconnected { endpoint_id }
            | Event::PayloadReceived { endpoint_id, .. }
            | Event::TransferUpdated { endpoint_id, .. }
            | Event::AuthenticationCompleted { endpoint_id, .. }
            | Event::SkipDecided { endpoint_id, .. }
            | Event::AuthorizationDetailsReady { endpoint_id, .. }
            | Event::AuthorizationDecided { endpoint_id, .. }
            | Event::HistoryReady { endpoint_id, .. }
            | Event::PayloadQueued { endpoint_id, .. }
            | Event::PayloadSendFailed { endpoint_id, .. }
            | Event::KeyExchangeRetryDue { endpoint_id }
                if !self.core.is_current(&endpoint_id) => {}

            // A second initiation from the current peer, or a request
            // failure the responder never issues.
            Event::ConnectionInitiated { .. } | Event::ConnectionRequestFailed { .. } => {}
            Event::ConnectionResult {
                endpoint_id,
                resolution,
            } => self.on_connection_result(endpoint_id, resolution, &mut actions),
            Event::ConnectionBroken { endpoint_id } => {
                self.on_connection_broken(endpoint_id, &mut actions)
            }
            Event::Disconnected { endpoint_id } => {
                let escalate = self.core.escalates();
                self.core.recover(
                    SessionEvent::Disconnected {
                        endpoint_id,
                        escalate,
                    },
                    &mut actions,
                );
            }
            Event::PayloadReceived {
                endpoint_id,
                payload,
            } => self.on_payload(endpoint_id, payload, &mut actions),
            Event::TransferUpdated {
                endpoint_id,
                update,
            } => self
                .core
                .on_transfer_update(&endpoint_id, update, &mut actions),
            Event::AuthenticationCompleted {
                endpoint_id,
                outcome,
            } => self.on_authentication(endpoint_id, outcome, &mut actions),
            Event::SkipDecided { endpoint_id, skip } => {
                self.on_skip_decided(endpoint_id, skip, &mut actions)
            }
            Event::AuthorizationDetailsReady {
                endpoint_id,
                details,
            } => self.on_details_ready(endpoint_id, details, &mut actions),
            Event::AuthorizationDecided {
                endpoint_id,
                decision,
            } => self.on_authorization(endpoint_id, decision, &mut actions),
            Event::HistoryReady {
                endpoint_id,
                history,
            } => self.on_history_ready(endpoint_id, history, &mut actions),
            Event::PayloadQueued {
                purpose,
                transfer_id,
                ..
            } => self
                .core
                .on_payload_queued(purpose, transfer_id, &mut actions),
            Event::PayloadSendFailed {
                endpoint_id,
                purpose,
                error,
            } => self
                .core
                .on_send_failed(&endpoint_id, purpose, error, &mut actions),
            Event::KeyExchangeRetryDue { endpoint_id } => {
                self.core.on_retry_due(&endpoint_id, &mut actions)
            }
        }
        actions
    }

    fn ledger(&self) -> &PhaseLedger {
        &self.core.ledger
    }

    fn is_searching(&self) -> bool {
        self.core.searching
    }

    fn connected_endpoint(&self) -> Option<&EndpointId> {
        self.core.connected.as_ref()
    }
}
