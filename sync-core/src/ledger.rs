//! Phase ledger: the ordered session phase and the single current peer.
//!
//! A session negotiates with at most one peer at a time. The peer lives in a
//! [`PeerSlot`] that can only be claimed while empty, and the [`Phase`] can
//! only step forward one phase at a time or reset fully to [`Phase::Idle`].

use p2psync_types::{EndpointId, PeerDevice, PeerIdentity};

/// Ordered session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Phase {
    /// No peer; discovering/advertising or stopped.
    #[default]
    Idle,
    /// A peer is claimed and the low-level connection is being negotiated.
    Connecting,
    /// Humans confirmed the peer; waiting on authorization.
    Authenticated,
    /// The business check accepted the peer.
    Authorized,
    /// Identities have been exchanged.
    KeyExchanged,
    /// The receive-history summary has been exchanged.
    HistorySent,
    /// Sync records are flowing.
    DataTransfer,
}

impl Phase {
    /// The phase that follows this one, if any.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Idle => Some(Phase::Connecting),
            Phase::Connecting => Some(Phase::Authenticated),
            Phase::Authenticated => Some(Phase::Authorized),
            Phase::Authorized => Some(Phase::KeyExchanged),
            Phase::KeyExchanged => Some(Phase::HistorySent),
            Phase::HistorySent => Some(Phase::DataTransfer),
            Phase::DataTransfer => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Authenticated => "authenticated",
            Phase::Authorized => "authorized",
            Phase::KeyExchanged => "key-exchanged",
            Phase::HistorySent => "history-sent",
            Phase::DataTransfer => "data-transfer",
        };
        f.write_str(name)
    }
}

/// Error type for ledger operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Another peer already occupies the slot.
    PeerBusy {
        /// The peer currently being negotiated with.
        current: EndpointId,
    },
    /// The operation needs a current peer.
    NoPeer,
    /// The requested phase is not the immediate successor.
    InvalidTransition {
        /// Phase before the attempted transition.
        from: Phase,
        /// Requested phase.
        to: Phase,
    },
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::PeerBusy { current } => {
                write!(f, "already negotiating with {}", current)
            }
            LedgerError::NoPeer => write!(f, "no current peer"),
            LedgerError::InvalidTransition { from, to } => {
                write!(f, "invalid phase transition {} -> {}", from, to)
            }
        }
    }
}

impl std::error::Error for LedgerError {}

/// Owned-or-empty slot for the peer being negotiated with.
#[derive(Debug, Default)]
pub struct PeerSlot(Option<PeerDevice>);

impl PeerSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self(None)
    }

    /// Occupy the slot. Fails without touching the slot if it is occupied.
    pub fn claim(&mut self, peer: PeerDevice) -> Result<&mut PeerDevice, LedgerError> {
        if let Some(current) = &self.0 {
            return Err(LedgerError::PeerBusy {
                current: current.endpoint_id.clone(),
            });
        }
        Ok(self.0.insert(peer))
    }

    /// Empty the slot, returning the previous occupant.
    pub fn release(&mut self) -> Option<PeerDevice> {
        self.0.take()
    }

    /// The current peer.
    pub fn get(&self) -> Option<&PeerDevice> {
        self.0.as_ref()
    }

    /// The current peer, mutably.
    pub fn get_mut(&mut self) -> Option<&mut PeerDevice> {
        self.0.as_mut()
    }

    /// Check whether the slot holds the given endpoint.
    pub fn holds(&self, endpoint_id: &EndpointId) -> bool {
        self.0
            .as_ref()
            .is_some_and(|peer| &peer.endpoint_id == endpoint_id)
    }

    /// Check if the slot is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

/// Phase, current peer, and the peer's identity once exchanged.
#[derive(Debug, Default)]
pub struct PhaseLedger {
    phase: Phase,
    peer: PeerSlot,
    identity: Option<PeerIdentity>,
}

impl PhaseLedger {
    /// Create an idle ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current peer.
    pub fn peer(&self) -> Option<&PeerDevice> {
        self.peer.get()
    }

    /// Current peer, mutably.
    pub fn peer_mut(&mut self) -> Option<&mut PeerDevice> {
        self.peer.get_mut()
    }

    /// Identity registered for the current peer.
    pub fn identity(&self) -> Option<&PeerIdentity> {
        self.identity.as_ref()
    }

    /// Check whether the given endpoint is the current peer.
    pub fn is_current(&self, endpoint_id: &EndpointId) -> bool {
        self.peer.holds(endpoint_id)
    }

    /// Claim a new peer and move `Idle -> Connecting`.
    pub fn claim(&mut self, peer: PeerDevice) -> Result<(), LedgerError> {
        if self.phase != Phase::Idle {
            if let Some(current) = self.peer.get() {
                return Err(LedgerError::PeerBusy {
                    current: current.endpoint_id.clone(),
                });
            }
            return Err(LedgerError::InvalidTransition {
                from: self.phase,
                to: Phase::Connecting,
            });
        }
        self.peer.claim(peer)?;
        self.phase = Phase::Connecting;
        Ok(())
    }

    /// Step forward to `to`, which must be the immediate successor.
    pub fn advance(&mut self, to: Phase) -> Result<(), LedgerError> {
        if self.peer.is_empty() {
            return Err(LedgerError::NoPeer);
        }
        if self.phase.next() != Some(to) {
            return Err(LedgerError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Record the current peer's identity. Only one identity per session.
    pub fn register_identity(&mut self, identity: PeerIdentity) -> Result<(), LedgerError> {
        if self.peer.is_empty() {
            return Err(LedgerError::NoPeer);
        }
        if self.identity.is_none() {
            self.identity = Some(identity);
        }
        Ok(())
    }

    /// Release the peer and return to `Idle`.
    pub fn reset(&mut self) -> Option<PeerDevice> {
        self.phase = Phase::Idle;
        self.identity = None;
        self.peer.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> PeerDevice {
        PeerDevice::discovered(EndpointId::from(id), "device")
    }

    #[test]
    fn phases_are_ordered() {
        assert!(Phase::Idle < Phase::Connecting);
        assert!(Phase::Authorized < Phase::KeyExchanged);
        assert!(Phase::HistorySent < Phase::DataTransfer);
        assert_eq!(Phase::DataTransfer.next(), None);
    }

    #[test]
    fn next_walks_every_phase_once() {
        let mut phase = Phase::Idle;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(next > phase);
            phase = next;
            seen.push(phase);
        }
        assert_eq!(seen.len(), 7);
    }

    #[test]
    fn slot_claim_fails_when_occupied() {
        let mut slot = PeerSlot::new();
        slot.claim(peer("a")).unwrap();
        let err = slot.claim(peer("b")).unwrap_err();
        assert_eq!(
            err,
            LedgerError::PeerBusy {
                current: EndpointId::from("a")
            }
        );
        assert!(slot.holds(&EndpointId::from("a")));
    }

    #[test]
    fn slot_release_allows_new_claim() {
        let mut slot = PeerSlot::new();
        slot.claim(peer("a")).unwrap();
        assert_eq!(slot.release().unwrap().endpoint_id, EndpointId::from("a"));
        assert!(slot.is_empty());
        slot.claim(peer("b")).unwrap();
    }

    #[test]
    fn claim_moves_to_connecting() {
        let mut ledger = PhaseLedger::new();
        ledger.claim(peer("a")).unwrap();
        assert_eq!(ledger.phase(), Phase::Connecting);
        assert!(ledger.is_current(&EndpointId::from("a")));
        assert!(!ledger.is_current(&EndpointId::from("b")));
    }

    #[test]
    fn second_claim_is_rejected_and_keeps_first_peer() {
        let mut ledger = PhaseLedger::new();
        ledger.claim(peer("a")).unwrap();
        assert!(ledger.claim(peer("b")).is_err());
        assert_eq!(ledger.peer().unwrap().endpoint_id, EndpointId::from("a"));
    }

    #[test]
    fn advance_only_to_successor() {
        let mut ledger = PhaseLedger::new();
        ledger.claim(peer("a")).unwrap();

        let err = ledger.advance(Phase::Authorized).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InvalidTransition {
                from: Phase::Connecting,
                to: Phase::Authorized
            }
        );
        assert_eq!(ledger.phase(), Phase::Connecting);

        ledger.advance(Phase::Authenticated).unwrap();
        ledger.advance(Phase::Authorized).unwrap();
        assert_eq!(ledger.phase(), Phase::Authorized);
    }

    #[test]
    fn advance_never_goes_backwards() {
        let mut ledger = PhaseLedger::new();
        ledger.claim(peer("a")).unwrap();
        ledger.advance(Phase::Authenticated).unwrap();
        assert!(ledger.advance(Phase::Connecting).is_err());
        assert!(ledger.advance(Phase::Authenticated).is_err());
    }

    #[test]
    fn advance_without_peer_fails() {
        let mut ledger = PhaseLedger::new();
        assert_eq!(
            ledger.advance(Phase::Connecting).unwrap_err(),
            LedgerError::NoPeer
        );
    }

    #[test]
    fn reset_clears_everything() {
        let mut ledger = PhaseLedger::new();
        ledger.claim(peer("a")).unwrap();
        ledger.advance(Phase::Authenticated).unwrap();
        ledger
            .register_identity(PeerIdentity::new("d1", "k1"))
            .unwrap();

        let released = ledger.reset();
        assert_eq!(released.unwrap().endpoint_id, EndpointId::from("a"));
        assert_eq!(ledger.phase(), Phase::Idle);
        assert!(ledger.peer().is_none());
        assert!(ledger.identity().is_none());
    }

    #[test]
    fn first_identity_wins() {
        let mut ledger = PhaseLedger::new();
        ledger.claim(peer("a")).unwrap();
        ledger
            .register_identity(PeerIdentity::new("d1", "k1"))
            .unwrap();
        ledger
            .register_identity(PeerIdentity::new("d2", "k2"))
            .unwrap();
        assert_eq!(ledger.identity().unwrap().device_id, "d1");
    }
}
