//! Initiator (discovering) side of the handshake.
//!
//! Discovers a responder, requests a connection, verifies the shared token,
//! sends its authorization details, then exchanges identities and receives
//! the responder's history summary.

use p2psync_types::{
    AuthOutcome, AuthorizationDecision, AuthorizationDetails, ConnectionInfo,
    ConnectionResolution, ControlSignal, DiscoveredEndpoint, EndpointId, LocalIdentity, Payload,
    PeerDevice, ReceiveHistory, TransferId,
};

use crate::event::{Action, Event, Role, SendPurpose, SessionEvent};
use crate::ledger::{Phase, PhaseLedger};
use crate::machine::{MachineConfig, SessionCore, SessionMachine};
use crate::router::{route, Route};

/// Handshake state machine for the discovering side.
#[derive(Debug)]
pub struct InitiatorSession {
    core: SessionCore,
}

impl InitiatorSession {
    /// Create an idle initiator that will present `local` as its identity.
    pub fn new(local: &LocalIdentity, config: MachineConfig) -> Self {
        Self {
            core: SessionCore::new(Role::Initiator, local.to_peer_identity(), config),
        }
    }

    /// Identity transfer awaiting delivery, if any.
    pub fn pending_key_exchange(&self) -> Option<TransferId> {
        self.core.key_exchange.pending()
    }

    fn on_endpoint_found(
        &mut self,
        endpoint_id: EndpointId,
        info: DiscoveredEndpoint,
        actions: &mut Vec<Action>,
    ) {
        let peer = PeerDevice::discovered(endpoint_id.clone(), &info.endpoint_name);
        if self.core.ledger.claim(peer).is_err() {
            return;
        }
        self.core.stop_searching(actions);
        actions.push(Action::Emit(SessionEvent::PeerFound {
            endpoint_id: endpoint_id.clone(),
            endpoint_name: info.endpoint_name,
        }));
        actions.push(Action::RequestConnection { endpoint_id });
    }

    fn on_connection_initiated(&mut self, info: ConnectionInfo, actions: &mut Vec<Action>) {
        if self.core.phase() != Phase::Connecting {
            return;
        }
        let Some(peer) = self.core.ledger.peer_mut() else {
            return;
        };
        if peer.connection_info.is_some() {
            return;
        }
        peer.attach_connection(info);
        actions.push(Action::Authenticate { peer: peer.clone() });
    }

    fn awaiting_authentication(&self) -> bool {
        self.core.phase() == Phase::Connecting && !self.core.authenticated
    }

    fn authentication_succeeded(&mut self, endpoint_id: &EndpointId, actions: &mut Vec<Action>) {
        if !self.awaiting_authentication() {
            return;
        }
        self.core.authenticated = true;
        actions.push(Action::AcceptConnection {
            endpoint_id: endpoint_id.clone(),
        });
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
        if !self.awaiting_authentication() {
            return;
        }
        match outcome {
            AuthOutcome::Success => self.authentication_succeeded(&endpoint_id, actions),
            AuthOutcome::Failure(reason) => {
                actions.push(Action::RejectConnection {
                    endpoint_id: endpoint_id.clone(),
                });
                self.core.recover(
                    SessionEvent::AuthenticationFailed {
                        endpoint_id,
                        reason,
                    },
                    actions,
                );
            }
            AuthOutcome::Cancelled(reason) => {
                actions.push(Action::RejectConnection {
                    endpoint_id: endpoint_id.clone(),
                });
                self.core.recover(
                    SessionEvent::AuthenticationCancelled {
                        endpoint_id,
                        reason,
                    },
                    actions,
                );
            }
        }
    }

    fn on_skip_decided(&mut self, endpoint_id: EndpointId, skip: bool, actions: &mut Vec<Action>) {
        if !skip || !self.awaiting_authentication() {
            return;
        }
        // The scanner is no longer needed.
        actions.push(Action::AbortPending);
        self.core
            .send_control(&endpoint_id, ControlSignal::ConnectionAccept, actions);
        self.authentication_succeeded(&endpoint_id, actions);
    }

    fn on_connection_result(
        &mut self,
        endpoint_id: EndpointId,
        resolution: ConnectionResolution,
        actions: &mut Vec<Action>,
    ) {
        match resolution {
            ConnectionResolution::Accepted => {
                if self.core.phase() != Phase::Connecting {
                    return;
                }
                self.core.advance(Phase::Authenticated);
                self.core.connected = Some(endpoint_id.clone());
                actions.push(Action::Emit(SessionEvent::ConnectionAccepted {
                    endpoint_id: endpoint_id.clone(),
                }));
                // Lets the responder finish authentication before our details arrive.
                self.core
                    .send_control(&endpoint_id, ControlSignal::ConnectionAccept, actions);
                actions.push(Action::FetchAuthorizationDetails { endpoint_id });
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

    fn on_details_ready(
        &mut self,
        endpoint_id: EndpointId,
        details: AuthorizationDetails,
        actions: &mut Vec<Action>,
    ) {
        if self.core.phase() != Phase::Authenticated {
            return;
        }
        self.core.send_encoded(
            &endpoint_id,
            SendPurpose::AuthorizationDetails,
            details.to_bytes(),
            actions,
        );
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
            AuthorizationDecision::Rejected(reason) => self.authorization_rejected(reason, actions),
        }
    }

    fn authorization_rejected(&mut self, reason: String, actions: &mut Vec<Action>) {
        let endpoint_name = self.core.current_name();
        actions.push(Action::DisconnectAll);
        self.core.recover(
            SessionEvent::AuthorizationRejected {
                endpoint_name,
                reason,
            },
            actions,
        );
    }

    fn on_history(
        &mut self,
        endpoint_id: EndpointId,
        history: ReceiveHistory,
        actions: &mut Vec<Action>,
    ) {
        let Some(identity) = self.core.ledger.identity().cloned() else {
            self.core.reject_malformed(
                &endpoint_id,
                "history received before identity".to_string(),
                actions,
            );
            return;
        };
        self.core.advance(Phase::HistorySent);
        self.core.advance(Phase::DataTransfer);
        actions.push(Action::StartTransfer {
            endpoint_id,
            identity,
            history,
        });
    }

    fn on_payload(&mut self, endpoint_id: EndpointId, payload: Payload, actions: &mut Vec<Action>) {
        if self.core.defer_while_authorizing(&payload) {
            return;
        }
        match route(Role::Initiator, self.core.phase(), &payload) {
            Route::Ignore => {}
            Route::PromptSkip => {
                if self.awaiting_authentication() {
                    actions.push(Action::PromptSkip {
                        endpoint_id,
                        endpoint_name: self.core.current_name(),
                    });
                }
            }
            Route::AuthenticationShortcut => self.authentication_succeeded(&endpoint_id, actions),
            Route::Authorize(details) => {
                self.core.authorizing = true;
                actions.push(Action::Authorize {
                    endpoint_id,
                    details,
                });
            }
            Route::RejectAuthorization(reason) => self.authorization_rejected(reason, actions),
            Route::RegisterIdentity(identity) => {
                self.core.register_identity(identity, actions);
            }
            Route::DisconnectMalformed(reason) => {
                self.core.reject_malformed(&endpoint_id, reason, actions)
            }
            Route::History(history) => self.on_history(endpoint_id, history, actions),
            Route::Status(message) => actions.push(Action::Emit(SessionEvent::StatusMessage {
                endpoint_id,
                message,
            })),
            Route::Records(bytes) => self.core.apply_records(bytes, actions),
        }
    }
}

impl SessionMachine for InitiatorSession {
    fn role(&self) -> Role {
        Role::Initiator
    }

    fn on_event(&mut self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();
        match event {
            Event::StartRequested => self.core.start_searching(&mut actions),
            Event::CancelRequested => self.core.cancel(&mut actions),
            Event::SearchFailed { error } => self.core.search_failed(error, &mut actions),
            Event::EndpointFound { endpoint_id, info } => {
                self.on_endpoint_found(endpoint_id, info, &mut actions)
            }

            // Everything below concerns an existing peer; anything about
            // another endpoint is stale.
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

            Event::ConnectionRequestFailed { endpoint_id, error } => self.core.recover(
                SessionEvent::ConnectionRequestFailed { endpoint_id, error },
                &mut actions,
            ),
            Event::ConnectionInitiated { info, .. } => {
                self.on_connection_initiated(info, &mut actions)
            }
            Event::ConnectionResult {
                endpoint_id,
                resolution,
            } => self.on_connection_result(endpoint_id, resolution, &mut actions),
            Event::ConnectionBroken { endpoint_id } => {
                let escalate = self.core.escalates();
                self.core.recover(
                    SessionEvent::ConnectionLost {
                        endpoint_id,
                        escalate,
                    },
                    &mut actions,
                );
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
            // The initiator never loads history.
            Event::HistoryReady { .. } => {}
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
