//! # sync-types
//!
//! Wire format and data-model types for the p2psync device handshake.
//!
//! This crate provides the foundational types used across all p2psync crates:
//! - [`EndpointId`], [`TransferId`] - Transport-assigned identifiers
//! - [`PeerDevice`], [`ConnectionInfo`] - The remote endpoint being negotiated with
//! - [`PeerIdentity`], [`AuthorizationDetails`], [`ReceiveHistory`] - JSON payloads
//! - [`ControlSignal`], [`InboundPayload`] - In-band control sentinels vs. data
//! - [`SessionError`] - Error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod outcome;
mod payload;
mod peer;

pub use error::SessionError;
pub use ids::{EndpointId, TransferId};
pub use outcome::{AuthOutcome, AuthorizationDecision, ConnectionResolution};
pub use payload::{
    AuthorizationDetails, ControlSignal, InboundPayload, LocalIdentity, Payload,
    PayloadKind, PeerIdentity, ReceiveHistory, TransferStatus, TransferUpdate,
};
pub use peer::{ConnectionInfo, DiscoveredEndpoint, PeerDevice};
