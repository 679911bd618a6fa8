//! CLI command implementations.

pub mod handshake;
