//! Key-exchange retry policy and delivery tracking.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use p2psync_types::TransferId;

/// When a sent identity counts as exchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyExchangeAdvance {
    /// As soon as the transport accepts the payload for sending.
    OnSend,
    /// Once the transport reports the payload fully delivered.
    OnDelivery,
}

/// Bounded retry of a failed identity transfer.
///
/// `max_attempts == 0` disables retries: a failed transfer only clears the
/// tracked transfer id and the session waits for the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first send.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on the exponential part of the delay.
    pub max_delay: Duration,
    /// Upper bound on the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A policy allowing `max_attempts` retries with default timing.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Check if retries are enabled at all.
    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Check if retry number `attempt` (1-based) is allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// Formula: min(max_delay, base_delay * 2^(attempt-1)) + random(0..=max_jitter)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay);

        let jitter_ms = random_jitter_ms(self.max_jitter.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Random jitter in `0..=max_ms` milliseconds. Falls back to zero if the OS
/// RNG is unavailable.
fn random_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0;
    }
    u64::from_le_bytes(bytes) % (max_ms + 1)
}

/// Tracks the outbound identity transfer and how often it was retried.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyExchangeTracker {
    pending: Option<TransferId>,
    attempts: u32,
}

impl KeyExchangeTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the transfer carrying our identity.
    pub fn track(&mut self, transfer_id: TransferId) {
        self.pending = Some(transfer_id);
    }

    /// The transfer currently awaiting delivery.
    pub fn pending(&self) -> Option<TransferId> {
        self.pending
    }

    /// Check whether `transfer_id` is the tracked identity transfer.
    pub fn is_tracking(&self, transfer_id: TransferId) -> bool {
        self.pending == Some(transfer_id)
    }

    /// The tracked transfer was delivered.
    pub fn delivered(&mut self) {
        self.pending = None;
        self.attempts = 0;
    }

    /// The tracked transfer failed. Returns the retry number to attempt next.
    pub fn failed(&mut self) -> u32 {
        self.pending = None;
        self.attempts += 1;
        self.attempts
    }

    /// Retries performed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
