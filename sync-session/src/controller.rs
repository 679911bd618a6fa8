//! SessionController - drives one handshake state machine.
//!
//! # Architecture
//!
//! The controller owns a pure state machine from sync-core and interprets
//! its actions against the transport and the injected services.
//!
//! ```text
//! Transport callbacks ─┐
//! Service replies  ────┼→ SessionHandle → controller loop → state machine
//! start/cancel     ────┘                        ↓
//!                               Transport / services / SessionEvent stream
//! ```
//!
//! All inputs are processed one at a time. Work that waits on a human or an
//! external service runs as a task in a `JoinSet`; its result comes back as
//! an [`Event`]. Resetting a session aborts those tasks.
//!
//! # Example
//!
//! ```ignore
//! let (controller, mut events) =
//!     InitiatorController::initiator(transport, services, &identity, config);
//! let handle = controller.handle();
//! tokio::spawn(controller.run());
//! handle.start();
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

use std::collections::VecDeque;

use p2psync_core::{
    Action, Event, InitiatorSession, Phase, ResponderSession, SessionEvent, SessionMachine,
};
use p2psync_types::{ConnectionResolution, LocalIdentity, PeerDevice, PeerIdentity};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use crate::config::SessionConfig;
use crate::handle::{Input, SessionHandle};
use crate::services::SessionServices;
use crate::transport::Transport;

/// Controller for the discovering side.
pub type InitiatorController<T> = SessionController<InitiatorSession, T>;

/// Controller for the advertising side.
pub type ResponderController<T> = SessionController<ResponderSession, T>;

/// Drives a [`SessionMachine`] over a [`Transport`].
pub struct SessionController<M: SessionMachine, T: Transport> {
    machine: M,
    transport: T,
    services: SessionServices,
    config: SessionConfig,
    handle: SessionHandle,
    inputs: mpsc::UnboundedReceiver<Input>,
    tasks: JoinSet<Option<Event>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    // Events produced by our own transport calls; they run before new inputs.
    feedback: VecDeque<Event>,
    stopped: bool,
}

impl<M: SessionMachine, T: Transport> std::fmt::Debug for SessionController<M, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("role", &self.machine.role())
            .field("phase", &self.machine.phase())
            .field("peer", &self.machine.ledger().peer().map(|p| &p.endpoint_id))
            .field("pending_tasks", &self.tasks.len())
            .finish()
    }
}

impl<T: Transport> SessionController<InitiatorSession, T> {
    /// Create an initiator controller.
    pub fn initiator(
        transport: T,
        services: SessionServices,
        identity: &LocalIdentity,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let machine = InitiatorSession::new(
            identity,
            config.machine_config(p2psync_core::Role::Initiator),
        );
        Self::new(machine, transport, services, config)
    }
}

impl<T: Transport> SessionController<ResponderSession, T> {
    /// Create a responder controller.
    pub fn responder(
        transport: T,
        services: SessionServices,
        identity: &LocalIdentity,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let machine = ResponderSession::new(
            identity,
            config.machine_config(p2psync_core::Role::Responder),
        );
        Self::new(machine, transport, services, config)
    }
}

impl<M: SessionMachine, T: Transport> SessionController<M, T> {
    /// Create a controller around `machine` and attach it to `transport`.
    ///
    /// Returns the controller and the stream of session events.
    pub fn new(
        machine: M,
        transport: T,
        services: SessionServices,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (handle, inputs) = SessionHandle::channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        transport.attach(handle.clone());

        let controller = Self {
            machine,
            transport,
            services,
            config,
            handle,
            inputs,
            tasks: JoinSet::new(),
            events,
            feedback: VecDeque::new(),
            stopped: false,
        };
        (controller, events_rx)
    }

    /// A handle for feeding this controller.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Start discovering (initiator) or advertising (responder).
    pub async fn start(&mut self) {
        self.dispatch(Event::StartRequested).await;
    }

    /// Cancel the session and return to idle.
    pub async fn cancel(&mut self) {
        self.dispatch(Event::CancelRequested).await;
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    /// Peer currently being negotiated with.
    pub fn peer(&self) -> Option<&PeerDevice> {
        self.machine.ledger().peer()
    }

    /// Identity of the current peer, once exchanged.
    pub fn peer_identity(&self) -> Option<&PeerIdentity> {
        self.machine.ledger().identity()
    }

    /// Check whether discovery/advertising is active.
    pub fn is_searching(&self) -> bool {
        self.machine.is_searching()
    }

    /// The state machine being driven.
    pub fn machine(&self) -> &M {
        &self.machine
    }

    /// Check whether `shutdown` was requested.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Process one event and everything it triggers synchronously.
    pub async fn dispatch(&mut self, event: Event) {
        self.feedback.push_back(event);
        while let Some(event) = self.feedback.pop_front() {
            self.process(event).await;
        }
    }

    /// Process queued inputs and pending tasks until nothing is left.
    ///
    /// Waits for in-flight tasks, so it only returns once every service call
    /// and timer has completed.
    pub async fn settle(&mut self) {
        loop {
            while let Ok(input) = self.inputs.try_recv() {
                self.on_input(input).await;
            }
            if self.tasks.is_empty() {
                return;
            }
            tokio::select! {
                Some(result) = self.tasks.join_next() => self.on_task_done(result).await,
                Some(input) = self.inputs.recv() => self.on_input(input).await,
            }
        }
    }

    /// Run until [`SessionHandle::shutdown`] is called.
    pub async fn run(mut self) {
        tracing::info!(role = %self.machine.role(), "session controller started");
        while !self.stopped {
            tokio::select! {
                input = self.inputs.recv() => match input {
                    Some(input) => self.on_input(input).await,
                    None => break,
                },
                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.on_task_done(result).await
                }
            }
        }
        self.tasks.shutdown().await;
        tracing::info!(role = %self.machine.role(), "session controller stopped");
    }

    async fn on_input(&mut self, input: Input) {
        match input {
            Input::Event(event) => self.dispatch(event).await,
            Input::Shutdown => {
                if !self.stopped {
                    self.dispatch(Event::CancelRequested).await;
                    self.stopped = true;
                }
            }
        }
    }

    async fn on_task_done(&mut self, result: Result<Option<Event>, JoinError>) {
        match result {
            Ok(Some(event)) => self.dispatch(event).await,
            Ok(None) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => tracing::warn!("session task failed: {}", e),
        }
    }

    async fn process(&mut self, event: Event) {
        let role = self.machine.role();
        let before = self.machine.phase();
        tracing::debug!(%role, phase = %before, ?event, "event");

        let actions = self.machine.on_event(event);
        if actions.is_empty() {
            tracing::debug!(%role, phase = %before, "event ignored");
        }

        let after = self.machine.phase();
        if after != before {
            tracing::info!(%role, from = %before, to = %after, "phase changed");
        }

        for action in actions {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: Action) {
        tracing::debug!(role = %self.machine.role(), ?action, "action");
        match action {
            Action::StartDiscovery => {
                let service_id = &self.config.service.service_id;
                if let Err(e) = self.transport.start_discovery(service_id).await {
                    tracing::warn!("failed to start discovery: {}", e);
                    self.feedback.push_back(Event::SearchFailed {
                        error: e.to_string(),
                    });
                }
            }
            Action::StopDiscovery => self.transport.stop_discovery().await,
            Action::StartAdvertising => {
                let service = &self.config.service;
                if let Err(e) = self
                    .transport
                    .start_advertising(&service.service_id, &service.device_name)
                    .await
                {
                    tracing::warn!("failed to start advertising: {}", e);
                    self.feedback.push_back(Event::SearchFailed {
                        error: e.to_string(),
                    });
                }
            }
            Action::StopAdvertising => self.transport.stop_advertising().await,
            Action::RequestConnection { endpoint_id } => {
                let local_name = &self.config.service.device_name;
                if let Err(e) = self
                    .transport
                    .request_connection(local_name, &endpoint_id)
                    .await
                {
                    tracing::warn!("connection request to {} failed: {}", endpoint_id, e);
                    self.feedback.push_back(Event::ConnectionRequestFailed {
                        endpoint_id,
                        error: e.to_string(),
                    });
                }
            }
            Action::AcceptConnection { endpoint_id } => {
                if let Err(e) = self.transport.accept_connection(&endpoint_id).await {
                    tracing::warn!("accepting {} failed: {}", endpoint_id, e);
                    self.feedback.push_back(Event::ConnectionResult {
                        endpoint_id,
                        resolution: ConnectionResolution::Error(e.to_string()),
                    });
                }
            }
            Action::RejectConnection { endpoint_id } => {
                if let Err(e) = self.transport.reject_connection(&endpoint_id).await {
                    tracing::debug!("rejecting {} failed: {}", endpoint_id, e);
                }
            }
            Action::Disconnect { endpoint_id } => self.transport.disconnect(&endpoint_id).await,
            Action::DisconnectAll => self.transport.disconnect_all().await,
            Action::Authenticate { peer } => {
                tracing::info!("authenticating {} ({})", peer.endpoint_name, peer.endpoint_id);
                let authenticator = self.services.authenticator.clone();
                self.tasks.spawn(async move {
                    let outcome = authenticator.authenticate(&peer).await;
                    Some(Event::AuthenticationCompleted {
                        endpoint_id: peer.endpoint_id,
                        outcome,
                    })
                });
            }
            Action::PromptSkip {
                endpoint_id,
                endpoint_name,
            } => {
                let prompt = self.services.skip_prompt.clone();
                self.tasks.spawn(async move {
                    let skip = prompt.confirm_skip(&endpoint_name).await;
                    Some(Event::SkipDecided { endpoint_id, skip })
                });
            }
            Action::FetchAuthorizationDetails { endpoint_id } => {
                let authorization = self.services.authorization.clone();
                self.tasks.spawn(async move {
                    let details = authorization.authorization_details().await;
                    Some(Event::AuthorizationDetailsReady {
                        endpoint_id,
                        details,
                    })
                });
            }
            Action::Authorize {
                endpoint_id,
                details,
            } => {
                let Some(peer) = self.machine.ledger().peer().cloned() else {
                    return;
                };
                let authorization = self.services.authorization.clone();
                self.tasks.spawn(async move {
                    let decision = authorization.authorize(&peer, &details).await;
                    Some(Event::AuthorizationDecided {
                        endpoint_id,
                        decision,
                    })
                });
            }
            Action::SendPayload {
                endpoint_id,
                purpose,
                bytes,
            } => match self.transport.send_bytes(&endpoint_id, &bytes).await {
                Ok(transfer_id) => self.feedback.push_back(Event::PayloadQueued {
                    endpoint_id,
                    purpose,
                    transfer_id,
                }),
                Err(e) => {
                    tracing::warn!("sending {:?} to {} failed: {}", purpose, endpoint_id, e);
                    self.feedback.push_back(Event::PayloadSendFailed {
                        endpoint_id,
                        purpose,
                        error: e.to_string(),
                    });
                }
            },
            Action::LoadHistory {
                endpoint_id,
                identity,
            } => {
                let data = self.services.data.clone();
                self.tasks.spawn(async move {
                    let history = data.receive_history(&identity).await;
                    Some(Event::HistoryReady {
                        endpoint_id,
                        history,
                    })
                });
            }
            // Records are applied in arrival order.
            Action::ApplyRecords { identity, bytes } => {
                self.services.data.apply_records(&identity, bytes).await
            }
            Action::StartTransfer {
                endpoint_id,
                identity,
                history,
            } => {
                tracing::info!(
                    "starting transfer to {} ({} history entries)",
                    identity.device_id,
                    history.len()
                );
                let data = self.services.data.clone();
                self.tasks.spawn(async move {
                    data.start_transfer(&endpoint_id, &identity, &history).await;
                    None
                });
            }
            Action::ScheduleKeyExchangeRetry { endpoint_id, delay } => {
                tracing::info!("retrying key exchange with {} in {:?}", endpoint_id, delay);
                self.tasks.spawn(async move {
                    tokio::time::sleep(delay).await;
                    Some(Event::KeyExchangeRetryDue { endpoint_id })
                });
            }
            Action::AbortPending => self.tasks.abort_all(),
            Action::Emit(event) => self.emit(event),
        }
    }

    fn emit(&self, event: SessionEvent) {
        let role = self.machine.role();
        match event.error() {
            Some(error) => tracing::warn!(%role, "{}", error),
            None => tracing::info!(%role, ?event, "session event"),
        }
        if self.events.send(event).is_err() {
            tracing::trace!("session event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authenticator;
    use crate::services::{AuthorizationService, SkipPrompt, SyncDataHandler};
    use crate::transport::{MockTransport, TransportCall};
    use async_trait::async_trait;
    use p2psync_core::SendPurpose;
    use p2psync_types::{
        AuthOutcome, AuthorizationDecision, AuthorizationDetails, ConnectionInfo,
        ConnectionResolution, DiscoveredEndpoint, EndpointId, Payload, ReceiveHistory,
        TransferId, TransferStatus, TransferUpdate,
    };
    use std::sync::{Arc, Mutex};

    // ===========================================
    // Fakes
    // ===========================================

    struct FixedAuth(AuthOutcome);

    #[async_trait]
    impl Authenticator for FixedAuth {
        async fn authenticate(&self, _peer: &PeerDevice) -> AuthOutcome {
            self.0.clone()
        }
    }

    /// Authenticator that never finishes, like a human who walked away.
    struct PendingAuth;

    #[async_trait]
    impl Authenticator for PendingAuth {
        async fn authenticate(&self, _peer: &PeerDevice) -> AuthOutcome {
            std::future::pending().await
        }
    }

    struct FakeAuthorization {
        decision: AuthorizationDecision,
        seen: Mutex<Vec<AuthorizationDetails>>,
    }

    #[async_trait]
    impl AuthorizationService for FakeAuthorization {
        async fn authorization_details(&self) -> AuthorizationDetails {
            AuthorizationDetails::new().with("org", "acme")
        }

        async fn authorize(
            &self,
            _peer: &PeerDevice,
            details: &AuthorizationDetails,
        ) -> AuthorizationDecision {
            self.seen.lock().unwrap().push(details.clone());
            self.decision.clone()
        }
    }

    #[derive(Default)]
    struct FakeData {
        applied: Mutex<Vec<Vec<u8>>>,
        transfers: Mutex<Vec<ReceiveHistory>>,
    }

    #[async_trait]
    impl SyncDataHandler for FakeData {
        async fn receive_history(&self, _peer: &PeerIdentity) -> ReceiveHistory {
            ReceiveHistory::default()
        }

        async fn apply_records(&self, _peer: &PeerIdentity, bytes: Vec<u8>) {
            self.applied.lock().unwrap().push(bytes);
        }

        async fn start_transfer(
            &self,
            _endpoint_id: &EndpointId,
            _peer: &PeerIdentity,
            history: &ReceiveHistory,
        ) {
            self.transfers.lock().unwrap().push(history.clone());
        }
    }

    struct FixedSkip(bool);

    #[async_trait]
    impl SkipPrompt for FixedSkip {
        async fn confirm_skip(&self, _endpoint_name: &str) -> bool {
            self.0
        }
    }

    struct Harness {
        authorization: Arc<FakeAuthorization>,
        data: Arc<FakeData>,
    }

    fn services(
        authenticator: Arc<dyn Authenticator>,
        decision: AuthorizationDecision,
        skip: bool,
    ) -> (SessionServices, Harness) {
        let authorization = Arc::new(FakeAuthorization {
            decision,
            seen: Mutex::new(Vec::new()),
        });
        let data = Arc::new(FakeData::default());
        let services = SessionServices {
            authenticator,
            authorization: authorization.clone(),
            data: data.clone(),
            skip_prompt: Arc::new(FixedSkip(skip)),
        };
        (services, Harness { authorization, data })
    }

    fn ep(id: &str) -> EndpointId {
        EndpointId::from(id)
    }

    fn identity() -> LocalIdentity {
        LocalIdentity::new("me", "my-key")
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn initiator(
        authenticator: Arc<dyn Authenticator>,
        decision: AuthorizationDecision,
    ) -> (
        InitiatorController<MockTransport>,
        MockTransport,
        mpsc::UnboundedReceiver<SessionEvent>,
        Harness,
    ) {
        let transport = MockTransport::new();
        let (services, harness) = services(authenticator, decision, false);
        let (controller, events) = InitiatorController::initiator(
            transport.clone(),
            services,
            &identity(),
            SessionConfig::default(),
        );
        (controller, transport, events, harness)
    }

    fn responder(
        authenticator: Arc<dyn Authenticator>,
        skip: bool,
    ) -> (
        ResponderController<MockTransport>,
        MockTransport,
        mpsc::UnboundedReceiver<SessionEvent>,
        Harness,
    ) {
        let transport = MockTransport::new();
        let (services, harness) =
            services(authenticator, AuthorizationDecision::Authorized, skip);
        let (controller, events) = ResponderController::responder(
            transport.clone(),
            services,
            &identity(),
            SessionConfig::default(),
        );
        (controller, transport, events, harness)
    }

    async fn initiator_connected(
        controller: &mut InitiatorController<MockTransport>,
        transport: &MockTransport,
    ) {
        controller.start().await;
        let handle = controller.handle();
        handle.on_endpoint_found(ep("e1"), DiscoveredEndpoint::new("Tablet", "p2psync"));
        handle.on_connection_initiated(ep("e1"), ConnectionInfo::outgoing("Tablet", "ABC123"));
        controller.settle().await;
        handle.on_connection_result(ep("e1"), ConnectionResolution::Accepted);
        controller.settle().await;
        transport.reset();
    }

    // ===========================================
    // Initiator
    // ===========================================

    #[tokio::test]
    async fn controller_attaches_to_transport() {
        let (_controller, transport, _events, _h) = initiator(
            Arc::new(FixedAuth(AuthOutcome::Success)),
            AuthorizationDecision::Authorized,
        );
        assert!(transport.handle().is_some());
    }

    #[tokio::test]
    async fn start_discovers_with_configured_service() {
        let (mut controller, transport, mut events, _h) = initiator(
            Arc::new(FixedAuth(AuthOutcome::Success)),
            AuthorizationDecision::Authorized,
        );
        controller.start().await;

        assert_eq!(
            transport.calls(),
            vec![TransportCall::StartDiscovery("p2psync".into())]
        );
        assert!(controller.is_searching());
        assert!(matches!(
            drain(&mut events)[..],
            [SessionEvent::Searching { .. }]
        ));
    }

    #[tokio::test]
    async fn discovery_failure_is_reported() {
        let (mut controller, transport, mut events, _h) = initiator(
            Arc::new(FixedAuth(AuthOutcome::Success)),
            AuthorizationDecision::Authorized,
        );
        transport.fail_next_discovery("radio off");
        controller.start().await;

        assert!(!controller.is_searching());
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, SessionEvent::SearchFailed { .. })));
    }

    #[tokio::test]
    async fn successful_authentication_accepts_then_sends_details() {
        let (mut controller, transport, _events, _h) = initiator(
            Arc::new(FixedAuth(AuthOutcome::Success)),
            AuthorizationDecision::Authorized,
        );
        controller.start().await;
        let handle = controller.handle();
        handle.on_endpoint_found(ep("e1"), DiscoveredEndpoint::new("Tablet", "p2psync"));
        handle.on_connection_initiated(ep("e1"), ConnectionInfo::outgoing("Tablet", "ABC123"));
        controller.settle().await;

        assert!(transport
            .calls()
            .contains(&TransportCall::AcceptConnection(ep("e1"))));
        assert_eq!(controller.phase(), Phase::Connecting);

        handle.on_connection_result(ep("e1"), ConnectionResolution::Accepted);
        controller.settle().await;

        assert_eq!(controller.phase(), Phase::Authenticated);
        let sent = transport.sent_to(&ep("e1"));
        assert_eq!(sent[0], b"CONNECTION_ACCEPT".to_vec());
        assert_eq!(
            AuthorizationDetails::from_bytes(&sent[1]).unwrap(),
            AuthorizationDetails::new().with("org", "acme")
        );
    }

    #[tokio::test]
    async fn failed_authentication_rejects_and_rediscovers() {
        let (mut controller, transport, mut events, _h) = initiator(
            Arc::new(FixedAuth(AuthOutcome::Failure("tokens do not match".into()))),
            AuthorizationDecision::Authorized,
        );
        controller.start().await;
        let handle = controller.handle();
        handle.on_endpoint_found(ep("e1"), DiscoveredEndpoint::new("Tablet", "p2psync"));
        handle.on_connection_initiated(ep("e1"), ConnectionInfo::outgoing("Tablet", "ABC123"));
        controller.settle().await;

        let calls = transport.calls();
        assert!(calls.contains(&TransportCall::RejectConnection(ep("e1"))));
        assert_eq!(
            calls.last(),
            Some(&TransportCall::StartDiscovery("p2psync".into()))
        );
        assert_eq!(controller.phase(), Phase::Idle);
        assert!(controller.peer().is_none());
        assert!(drain(&mut events).iter().any(|e| matches!(
            e,
            SessionEvent::AuthenticationFailed { reason, .. } if reason == "tokens do not match"
        )));
    }

    #[tokio::test]
    async fn request_failure_rediscovers() {
        let (mut controller, transport, _events, _h) = initiator(
            Arc::new(FixedAuth(AuthOutcome::Success)),
            AuthorizationDecision::Authorized,
        );
        controller.start().await;
        transport.fail_next_request("busy");
        controller
            .dispatch(Event::EndpointFound {
                endpoint_id: ep("e1"),
                info: DiscoveredEndpoint::new("Tablet", "p2psync"),
            })
            .await;

        assert_eq!(controller.phase(), Phase::Idle);
        assert!(controller.is_searching());
    }

    #[tokio::test]
    async fn cancel_aborts_pending_authentication() {
        let (mut controller, transport, mut events, _h) =
            initiator(Arc::new(PendingAuth), AuthorizationDecision::Authorized);
        controller.start().await;
        let handle = controller.handle();
        handle.on_endpoint_found(ep("e1"), DiscoveredEndpoint::new("Tablet", "p2psync"));
        handle.on_connection_initiated(ep("e1"), ConnectionInfo::outgoing("Tablet", "ABC123"));
        handle.cancel();

        // Returns because the pending authenticator is aborted by the reset.
        controller.settle().await;

        assert_eq!(controller.phase(), Phase::Idle);
        assert!(transport
            .calls()
            .contains(&TransportCall::Disconnect(ep("e1"))));
        assert!(drain(&mut events).contains(&SessionEvent::Stopped));
    }

    #[tokio::test]
    async fn undecodable_details_reject_once() {
        let (mut controller, transport, mut events, harness) = initiator(
            Arc::new(FixedAuth(AuthOutcome::Success)),
            AuthorizationDecision::Authorized,
        );
        initiator_connected(&mut controller, &transport).await;
        drain(&mut events);

        controller
            .handle()
            .on_payload_received(ep("e1"), Payload::bytes(TransferId::new(9), b"dsk".to_vec()));
        controller.settle().await;

        let rejections = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::AuthorizationRejected { .. }))
            .count();
        assert_eq!(rejections, 1);
        assert!(harness.authorization.seen.lock().unwrap().is_empty());
        assert!(transport.calls().contains(&TransportCall::DisconnectAll));
        assert_eq!(controller.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn full_initiator_flow_reaches_data_transfer() {
        let (mut controller, transport, _events, harness) = initiator(
            Arc::new(FixedAuth(AuthOutcome::Success)),
            AuthorizationDecision::Authorized,
        );
        initiator_connected(&mut controller, &transport).await;
        let handle = controller.handle();

        handle.on_payload_received(
            ep("e1"),
            Payload::bytes(TransferId::new(1), br#"{"org":"acme"}"#.to_vec()),
        );
        controller.settle().await;
        assert_eq!(controller.phase(), Phase::Authorized);
        assert_eq!(harness.authorization.seen.lock().unwrap().len(), 1);

        // Our identity went out; confirm its delivery.
        let sent = transport.last_sent().unwrap();
        assert_eq!(
            PeerIdentity::from_bytes(&sent).unwrap(),
            PeerIdentity::new("me", "my-key")
        );
        let transfer_id = transport.last_transfer_id().unwrap();
        handle.on_payload_transfer_update(
            ep("e1"),
            TransferUpdate::finished(transfer_id, TransferStatus::Success, sent.len() as u64),
        );
        controller.settle().await;
        assert_eq!(controller.phase(), Phase::KeyExchanged);

        handle.on_payload_received(
            ep("e1"),
            Payload::bytes(
                TransferId::new(2),
                br#"{"device_id":"peer","app_lifetime_key":"peer-key"}"#.to_vec(),
            ),
        );
        handle.on_payload_received(ep("e1"), Payload::bytes(TransferId::new(3), b"[]".to_vec()));
        controller.settle().await;

        assert_eq!(controller.phase(), Phase::DataTransfer);
        assert_eq!(controller.peer_identity().unwrap().device_id, "peer");
        assert_eq!(harness.data.transfers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refused_send_is_reported() {
        let (mut controller, transport, mut events, _h) = initiator(
            Arc::new(FixedAuth(AuthOutcome::Success)),
            AuthorizationDecision::Authorized,
        );
        controller.start().await;
        let handle = controller.handle();
        handle.on_endpoint_found(ep("e1"), DiscoveredEndpoint::new("Tablet", "p2psync"));
        handle.on_connection_initiated(ep("e1"), ConnectionInfo::outgoing("Tablet", "ABC123"));
        controller.settle().await;
        transport.fail_next_send("link down");
        handle.on_connection_result(ep("e1"), ConnectionResolution::Accepted);
        controller.settle().await;

        let seen = drain(&mut events);
        assert!(seen.iter().any(|e| matches!(
            e,
            SessionEvent::PayloadSendFailed {
                purpose: SendPurpose::Control,
                ..
            }
        )));
        assert!(seen.contains(&SessionEvent::ConnectionLost {
            endpoint_id: ep("e1"),
            escalate: false
        }));
        assert!(transport
            .calls()
            .contains(&TransportCall::Disconnect(ep("e1"))));
        assert_eq!(controller.phase(), Phase::Idle);
        assert!(controller.is_searching());
        assert!(controller.peer().is_none());
    }

    // ===========================================
    // Responder
    // ===========================================

    #[tokio::test]
    async fn responder_accepts_and_authenticates() {
        let (mut controller, transport, _events, _h) =
            responder(Arc::new(FixedAuth(AuthOutcome::Success)), false);
        controller.start().await;
        controller
            .handle()
            .on_connection_initiated(ep("e1"), ConnectionInfo::incoming("Phone", "ABC123"));
        controller.settle().await;

        let calls = transport.calls();
        assert_eq!(
            calls,
            vec![
                TransportCall::StartAdvertising("p2psync".into(), "p2psync-device".into()),
                TransportCall::StopAdvertising,
                TransportCall::AcceptConnection(ep("e1")),
            ]
        );
        assert_eq!(controller.phase(), Phase::Authenticated);
    }

    #[tokio::test]
    async fn responder_accept_failure_resets() {
        let (mut controller, transport, _events, _h) =
            responder(Arc::new(PendingAuth), false);
        controller.start().await;
        transport.fail_next_accept("gone");
        controller
            .handle()
            .on_connection_initiated(ep("e1"), ConnectionInfo::incoming("Phone", "ABC123"));
        controller.settle().await;

        assert_eq!(controller.phase(), Phase::Idle);
        assert!(controller.is_searching());
    }

    #[tokio::test]
    async fn responder_skip_prompt_sends_accept_signal() {
        let (mut controller, transport, _events, _h) = responder(Arc::new(PendingAuth), true);
        controller.start().await;
        let handle = controller.handle();
        handle.on_connection_initiated(ep("e1"), ConnectionInfo::incoming("Phone", "ABC123"));
        handle.on_payload_received(
            ep("e1"),
            Payload::bytes(TransferId::new(1), b"SKIP_QR_CODE_SCAN".to_vec()),
        );
        // Returns because the skip aborts the pending display.
        controller.settle().await;

        assert_eq!(controller.phase(), Phase::Authenticated);
        assert_eq!(transport.last_sent(), Some(b"CONNECTION_ACCEPT".to_vec()));
    }

    #[tokio::test]
    async fn responder_applies_records_in_order() {
        let (mut controller, transport, _events, harness) =
            responder(Arc::new(FixedAuth(AuthOutcome::Success)), false);
        controller.start().await;
        let handle = controller.handle();
        handle.on_connection_initiated(ep("e1"), ConnectionInfo::incoming("Phone", "ABC123"));
        handle.on_connection_result(ep("e1"), ConnectionResolution::Accepted);
        controller.settle().await;

        handle.on_payload_received(
            ep("e1"),
            Payload::bytes(TransferId::new(1), br#"{"org":"acme"}"#.to_vec()),
        );
        controller.settle().await;
        assert_eq!(controller.phase(), Phase::KeyExchanged);

        handle.on_payload_received(
            ep("e1"),
            Payload::bytes(
                TransferId::new(2),
                br#"{"device_id":"init","app_lifetime_key":"init-key"}"#.to_vec(),
            ),
        );
        controller.settle().await;
        assert_eq!(controller.phase(), Phase::HistorySent);
        assert_eq!(transport.last_sent(), Some(b"[]".to_vec()));

        handle.on_payload_received(ep("e1"), Payload::bytes(TransferId::new(3), b"r1".to_vec()));
        handle.on_payload_received(ep("e1"), Payload::bytes(TransferId::new(4), b"r2".to_vec()));
        controller.settle().await;

        assert_eq!(controller.phase(), Phase::DataTransfer);
        assert_eq!(
            *harness.data.applied.lock().unwrap(),
            vec![b"r1".to_vec(), b"r2".to_vec()]
        );
    }

    #[tokio::test]
    async fn responder_break_after_history_is_sync_failure() {
        let (mut controller, _transport, mut events, _h) =
            responder(Arc::new(FixedAuth(AuthOutcome::Success)), false);
        controller.start().await;
        let handle = controller.handle();
        handle.on_connection_initiated(ep("e1"), ConnectionInfo::incoming("Phone", "ABC123"));
        handle.on_connection_result(ep("e1"), ConnectionResolution::Accepted);
        controller.settle().await;
        handle.on_payload_received(
            ep("e1"),
            Payload::bytes(TransferId::new(1), br#"{"org":"acme"}"#.to_vec()),
        );
        controller.settle().await;
        handle.on_payload_received(
            ep("e1"),
            Payload::bytes(
                TransferId::new(2),
                br#"{"device_id":"init","app_lifetime_key":"init-key"}"#.to_vec(),
            ),
        );
        controller.settle().await;
        drain(&mut events);

        handle.on_connection_broken(ep("e1"));
        controller.settle().await;

        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, SessionEvent::SyncFailed { .. })));
        assert!(controller.peer().is_none());
        assert_eq!(controller.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn shutdown_stops_run_loop() {
        let (controller, transport, mut events, _h) =
            responder(Arc::new(FixedAuth(AuthOutcome::Success)), false);
        let handle = controller.handle();
        let task = tokio::spawn(controller.run());

        handle.start();
        handle.shutdown();
        task.await.unwrap();

        assert!(transport
            .calls()
            .contains(&TransportCall::StopAdvertising));
        let events = drain(&mut events);
        assert!(events.contains(&SessionEvent::Stopped));
    }
}
