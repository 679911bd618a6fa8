//! Session configuration.
//!
//! Configuration is loaded from a TOML file (default: `p2psync.toml`).
//! Every section and key is optional.

use p2psync_core::{KeyExchangeAdvance, MachineConfig, RetryPolicy, Role};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a session controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Service and device naming.
    #[serde(default)]
    pub service: ServiceConfig,
    /// When a sent identity counts as exchanged.
    #[serde(default)]
    pub key_exchange: KeyExchangeConfig,
    /// Identity transfer retries.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    /// Service id used for discovery and advertising (default: "p2psync").
    #[serde(default = "default_service_id")]
    pub service_id: String,
    /// Name this device advertises/requests under (default: "p2psync-device").
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

/// Key-exchange advance policy per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct KeyExchangeConfig {
    /// Initiator policy (default: on_delivery).
    #[serde(default = "default_initiator_advance")]
    pub initiator: KeyExchangeAdvance,
    /// Responder policy (default: on_send).
    #[serde(default = "default_responder_advance")]
    pub responder: KeyExchangeAdvance,
}

/// Identity transfer retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first failed send (default: 0, disabled).
    #[serde(default)]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds (default: 500).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the exponential delay in milliseconds (default: 10000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Cap on the random jitter in milliseconds (default: 250).
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

// Default value functions

fn default_service_id() -> String {
    "p2psync".to_string()
}

fn default_device_name() -> String {
    "p2psync-device".to_string()
}

fn default_initiator_advance() -> KeyExchangeAdvance {
    KeyExchangeAdvance::OnDelivery
}

fn default_responder_advance() -> KeyExchangeAdvance {
    KeyExchangeAdvance::OnSend
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_max_jitter_ms() -> u64 {
    250
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_id: default_service_id(),
            device_name: default_device_name(),
        }
    }
}

impl Default for KeyExchangeConfig {
    fn default() -> Self {
        Self {
            initiator: default_initiator_advance(),
            responder: default_responder_advance(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

impl RetryConfig {
    /// The retry policy these settings describe.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// State machine settings for `role`.
    pub fn machine_config(&self, role: Role) -> MachineConfig {
        let key_exchange = match role {
            Role::Initiator => self.key_exchange.initiator,
            Role::Responder => self.key_exchange.responder,
        };
        MachineConfig {
            key_exchange,
            retry: self.retry.policy(),
        }
    }

    /// Same configuration under a different device name.
    pub fn with_device_name(mut self, device_name: &str) -> Self {
        self.service.device_name = device_name.to_string();
        self
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
