//! The session machine trait and bookkeeping shared by both roles.

use p2psync_types::{
    AuthorizationDetails, ControlSignal, EndpointId, Payload, PeerIdentity, SessionError,
    TransferId, TransferStatus, TransferUpdate,
};

use crate::event::{Action, Event, Role, SendPurpose, SessionEvent};
use crate::ledger::{Phase, PhaseLedger};
use crate::retry::{KeyExchangeAdvance, KeyExchangeTracker, RetryPolicy};

/// Tunables for a session machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    /// When our sent identity counts as exchanged.
    pub key_exchange: KeyExchangeAdvance,
    /// Retry policy for a failed identity transfer.
    pub retry: RetryPolicy,
}

impl MachineConfig {
    /// Initiator defaults: advance on delivery, no retries.
    pub fn initiator() -> Self {
        Self {
            key_exchange: KeyExchangeAdvance::OnDelivery,
            retry: RetryPolicy::disabled(),
        }
    }

    /// Responder defaults: advance on send, no retries.
    pub fn responder() -> Self {
        Self {
            key_exchange: KeyExchangeAdvance::OnSend,
            retry: RetryPolicy::disabled(),
        }
    }
}

/// A pure handshake state machine.
///
/// Feed it events, perform the actions it returns. It never does I/O.
pub trait SessionMachine: Send {
    /// Which end of the handshake this machine plays.
    fn role(&self) -> Role;

    /// Process one event.
    fn on_event(&mut self, event: Event) -> Vec<Action>;

    /// Phase, peer, and identity bookkeeping.
    fn ledger(&self) -> &PhaseLedger;

    /// Check whether discovery/advertising is active.
    fn is_searching(&self) -> bool;

    /// Endpoint whose connection both sides accepted.
    fn connected_endpoint(&self) -> Option<&EndpointId>;

    /// Current phase.
    fn phase(&self) -> Phase {
        self.ledger().phase()
    }
}

/// State and helpers common to both roles.
#[derive(Debug)]
pub(crate) struct SessionCore {
    pub(crate) role: Role,
    pub(crate) ledger: PhaseLedger,
    pub(crate) config: MachineConfig,
    pub(crate) local: PeerIdentity,
    pub(crate) searching: bool,
    pub(crate) connected: Option<EndpointId>,
    pub(crate) key_exchange: KeyExchangeTracker,
    /// Local authentication already succeeded for the current peer.
    pub(crate) authenticated: bool,
    /// The peer's authorization details are with the authorization service.
    pub(crate) authorizing: bool,
    /// Peer details held until our own details have been sent back.
    pub(crate) peer_details: Option<AuthorizationDetails>,
    /// Payloads that overtook the authorization decision.
    deferred: Vec<Payload>,
}

impl SessionCore {
    pub(crate) fn new(role: Role, local: PeerIdentity, config: MachineConfig) -> Self {
        Self {
            role,
            ledger: PhaseLedger::new(),
            config,
            local,
            searching: false,
            connected: None,
            key_exchange: KeyExchangeTracker::new(),
            authenticated: false,
            authorizing: false,
            peer_details: None,
            deferred: Vec::new(),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.ledger.phase()
    }

    pub(crate) fn is_current(&self, endpoint_id: &EndpointId) -> bool {
        self.ledger.is_current(endpoint_id)
    }

    pub(crate) fn current_name(&self) -> String {
        self.ledger
            .peer()
            .map(|p| p.endpoint_name.clone())
            .unwrap_or_default()
    }

    /// Step to `to` if it is the immediate successor; stale requests are dropped.
    pub(crate) fn advance(&mut self, to: Phase) -> bool {
        self.ledger.advance(to).is_ok()
    }

    pub(crate) fn start_searching(&mut self, actions: &mut Vec<Action>) {
        if self.searching {
            return;
        }
        self.searching = true;
        actions.push(match self.role {
            Role::Initiator => Action::StartDiscovery,
            Role::Responder => Action::StartAdvertising,
        });
        actions.push(Action::Emit(SessionEvent::Searching { role: self.role }));
    }

    pub(crate) fn stop_searching(&mut self, actions: &mut Vec<Action>) {
        self.searching = false;
        actions.push(match self.role {
            Role::Initiator => Action::StopDiscovery,
            Role::Responder => Action::StopAdvertising,
        });
    }

    pub(crate) fn search_failed(&mut self, error: String, actions: &mut Vec<Action>) {
        self.searching = false;
        actions.push(Action::Emit(SessionEvent::SearchFailed { error }));
    }

    pub(crate) fn reset(&mut self, actions: &mut Vec<Action>) {
        self.ledger.reset();
        self.connected = None;
        self.key_exchange.clear();
        self.authenticated = false;
        self.authorizing = false;
        self.peer_details = None;
        self.deferred.clear();
        actions.push(Action::AbortPending);
    }

    /// Report `event`, drop the peer, and go back to searching.
    pub(crate) fn recover(&mut self, event: SessionEvent, actions: &mut Vec<Action>) {
        self.reset(actions);
        actions.push(Action::Emit(event));
        self.start_searching(actions);
    }

    pub(crate) fn cancel(&mut self, actions: &mut Vec<Action>) {
        if self.searching {
            self.stop_searching(actions);
        }
        if let Some(peer) = self.ledger.peer() {
            actions.push(Action::Disconnect {
                endpoint_id: peer.endpoint_id.clone(),
            });
        }
        self.reset(actions);
        actions.push(Action::Emit(SessionEvent::Stopped));
    }

    pub(crate) fn escalates(&self) -> bool {
        self.phase() >= Phase::Authorized
    }

    pub(crate) fn send(
        &self,
        endpoint_id: &EndpointId,
        purpose: SendPurpose,
        bytes: Vec<u8>,
        actions: &mut Vec<Action>,
    ) {
        actions.push(Action::SendPayload {
            endpoint_id: endpoint_id.clone(),
            purpose,
            bytes,
        });
    }

    pub(crate) fn send_control(
        &self,
        endpoint_id: &EndpointId,
        signal: ControlSignal,
        actions: &mut Vec<Action>,
    ) {
        self.send(
            endpoint_id,
            SendPurpose::Control,
            signal.as_bytes().to_vec(),
            actions,
        );
    }

    pub(crate) fn send_identity(&mut self, endpoint_id: &EndpointId, actions: &mut Vec<Action>) {
        let encoded = self.local.to_bytes();
        self.send_encoded(endpoint_id, SendPurpose::KeyExchange, encoded, actions);
    }

    /// Send an encoded payload. A payload that failed to encode drops the
    /// peer; returns whether the send was issued.
    pub(crate) fn send_encoded(
        &mut self,
        endpoint_id: &EndpointId,
        purpose: SendPurpose,
        encoded: Result<Vec<u8>, SessionError>,
        actions: &mut Vec<Action>,
    ) -> bool {
        match encoded {
            Ok(bytes) => {
                self.send(endpoint_id, purpose, bytes, actions);
                true
            }
            Err(e) => {
                actions.push(Action::Emit(SessionEvent::PayloadSendFailed {
                    purpose,
                    error: e.to_string(),
                }));
                self.drop_peer(endpoint_id, actions);
                false
            }
        }
    }

    /// Hold `payload` if it arrived while the peer is being authorized.
    ///
    /// The peer may finish its side first and send its identity before our
    /// decision is in; those payloads are replayed once authorized.
    pub(crate) fn defer_while_authorizing(&mut self, payload: &Payload) -> bool {
        if self.authorizing && self.phase() == Phase::Authenticated {
            self.deferred.push(payload.clone());
            return true;
        }
        false
    }

    pub(crate) fn take_deferred(&mut self) -> Vec<Payload> {
        std::mem::take(&mut self.deferred)
    }

    /// Disconnect a peer that sent an unusable payload. Phase is untouched;
    /// the resulting `Disconnected` callback performs the reset.
    pub(crate) fn reject_malformed(
        &self,
        endpoint_id: &EndpointId,
        reason: String,
        actions: &mut Vec<Action>,
    ) {
        actions.push(Action::Disconnect {
            endpoint_id: endpoint_id.clone(),
        });
        actions.push(Action::Emit(SessionEvent::ProtocolViolation {
            endpoint_id: endpoint_id.clone(),
            reason,
        }));
    }

    pub(crate) fn on_payload_queued(
        &mut self,
        purpose: SendPurpose,
        transfer_id: TransferId,
        _actions: &mut Vec<Action>,
    ) {
        match purpose {
            SendPurpose::KeyExchange => {
                self.key_exchange.track(transfer_id);
                if self.config.key_exchange == KeyExchangeAdvance::OnSend
                    && self.phase() == Phase::Authorized
                {
                    self.advance(Phase::KeyExchanged);
                }
            }
            SendPurpose::History => {
                if self.phase() == Phase::KeyExchanged && self.ledger.identity().is_some() {
                    self.advance(Phase::HistorySent);
                }
            }
            SendPurpose::AuthorizationDetails | SendPurpose::Control => {}
        }
    }

    pub(crate) fn on_transfer_update(
        &mut self,
        endpoint_id: &EndpointId,
        update: TransferUpdate,
        actions: &mut Vec<Action>,
    ) {
        if !self.key_exchange.is_tracking(update.transfer_id) {
            return;
        }
        match update.status {
            TransferStatus::InProgress => {}
            TransferStatus::Success => {
                self.key_exchange.delivered();
                if self.phase() == Phase::Authorized {
                    self.advance(Phase::KeyExchanged);
                }
            }
            TransferStatus::Failure | TransferStatus::Canceled => {
                self.key_exchange_failed(endpoint_id, actions);
            }
        }
    }

    pub(crate) fn on_send_failed(
        &mut self,
        endpoint_id: &EndpointId,
        purpose: SendPurpose,
        error: String,
        actions: &mut Vec<Action>,
    ) {
        actions.push(Action::Emit(SessionEvent::PayloadSendFailed { purpose, error }));
        match purpose {
            SendPurpose::KeyExchange => self.key_exchange_failed(endpoint_id, actions),
            SendPurpose::Control | SendPurpose::AuthorizationDetails | SendPurpose::History => {
                self.drop_peer(endpoint_id, actions)
            }
        }
    }

    /// Disconnect the peer and go back to searching.
    fn drop_peer(&mut self, endpoint_id: &EndpointId, actions: &mut Vec<Action>) {
        actions.push(Action::Disconnect {
            endpoint_id: endpoint_id.clone(),
        });
        let escalate = self.escalates();
        self.recover(
            SessionEvent::ConnectionLost {
                endpoint_id: endpoint_id.clone(),
                escalate,
            },
            actions,
        );
    }

    /// Retry the identity if the policy allows; once retries are exhausted
    /// treat the connection as broken. Without a policy just wait.
    fn key_exchange_failed(&mut self, endpoint_id: &EndpointId, actions: &mut Vec<Action>) {
        let attempt = self.key_exchange.failed();
        let retry = &self.config.retry;
        if retry.allows(attempt) {
            actions.push(Action::ScheduleKeyExchangeRetry {
                endpoint_id: endpoint_id.clone(),
                delay: retry.delay_for(attempt),
            });
        } else if retry.is_enabled() {
            self.drop_peer(endpoint_id, actions);
        }
    }

    pub(crate) fn on_retry_due(&mut self, endpoint_id: &EndpointId, actions: &mut Vec<Action>) {
        if matches!(self.phase(), Phase::Authorized | Phase::KeyExchanged) {
            self.send_identity(endpoint_id, actions);
        }
    }

    /// Register the peer's identity once; returns false for duplicates.
    pub(crate) fn register_identity(
        &mut self,
        identity: PeerIdentity,
        actions: &mut Vec<Action>,
    ) -> bool {
        if self.ledger.identity().is_some() {
            return false;
        }
        if self.ledger.register_identity(identity.clone()).is_err() {
            return false;
        }
        if self.phase() == Phase::Authorized {
            self.advance(Phase::KeyExchanged);
        }
        actions.push(Action::Emit(SessionEvent::PeerIdentified { identity }));
        true
    }

    /// Hand record bytes to the sync handler; the first batch starts data transfer.
    pub(crate) fn apply_records(&mut self, bytes: Vec<u8>, actions: &mut Vec<Action>) {
        let Some(identity) = self.ledger.identity().cloned() else {
            return;
        };
        if self.phase() == Phase::HistorySent {
            self.advance(Phase::DataTransfer);
        }
        actions.push(Action::ApplyRecords { identity, bytes });
    }
}

/// Look up the emitted session events in an action list.
#[cfg(test)]
pub(crate) fn emitted(actions: &[Action]) -> Vec<&SessionEvent> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Emit(e) => Some(e),
            _ => None,
        })
        .collect()
}
