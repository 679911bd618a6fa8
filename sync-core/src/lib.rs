//! # sync-core
//!
//! Pure logic for the p2psync handshake (no I/O, instant tests).
//!
//! This crate implements the initiator and responder state machines that
//! take two devices from discovery to a trusted, identified, syncing
//! connection, without touching the network, the UI, or storage.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (transport, prompts, authorization, storage) is performed
//! by `sync-session`, which interprets the [`Action`]s produced here and
//! feeds results back as [`Event`]s.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod event;
pub mod initiator;
pub mod ledger;
pub mod machine;
pub mod responder;
pub mod retry;
pub mod router;

pub use auth::{
    confirmation_outcome, expect_direction, invalid_peer_outcome, match_token, Direction,
    REASON_TOKEN_MISMATCH, REASON_USER_CANCELLED,
};
pub use event::{Action, Event, Role, SendPurpose, SessionEvent};
pub use initiator::InitiatorSession;
pub use ledger::{LedgerError, PeerSlot, Phase, PhaseLedger};
pub use machine::{MachineConfig, SessionMachine};
pub use responder::ResponderSession;
pub use retry::{KeyExchangeAdvance, KeyExchangeTracker, RetryPolicy};
pub use router::{route, Route, REASON_AUTHORIZATION_DETAILS_INVALID};
