//! # sync-session
//!
//! Session controller for p2psync device handshakes.
//!
//! This is the library applications use to pair two devices: one discovers
//! (initiator), the other advertises (responder).
//!
//! ## Features
//!
//! - **Pure State Machine**: Uses sync-core for side-effect-free handshake logic
//! - **Transport Abstraction**: Pluggable peer-to-peer layer (loopback, mock)
//! - **Human Authentication**: Token scan/display flows behind traits
//! - **Injected Services**: Authorization and record sync supplied by the app
//!
//! ## Example
//!
//! ```ignore
//! use p2psync_session::{LoopbackNetwork, ResponderController, SessionConfig};
//!
//! let network = LoopbackNetwork::new();
//! let (controller, mut events) = ResponderController::responder(
//!     network.transport(),
//!     services,
//!     &identity,
//!     SessionConfig::default(),
//! );
//! let handle = controller.handle();
//! tokio::spawn(controller.run());
//!
//! handle.start();
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod controller;
pub mod handle;
pub mod services;
pub mod transport;

pub use auth::{
    Authenticator, ConfirmOutcome, DisplayOutcome, InitiatorAuthenticator,
    ResponderAuthenticator, ScanOutcome, TokenDisplay, TokenScanner,
};
pub use config::{ConfigError, KeyExchangeConfig, RetryConfig, ServiceConfig, SessionConfig};
pub use controller::{InitiatorController, ResponderController, SessionController};
pub use handle::SessionHandle;
pub use services::{AuthorizationService, NeverSkip, SessionServices, SkipPrompt, SyncDataHandler};
pub use transport::{
    LoopbackNetwork, LoopbackTransport, MockTransport, Transport, TransportCall, TransportError,
};
