//! Transport-assigned identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier the transport assigns to a remote endpoint.
///
/// Opaque to the session layer; only compared for equality.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(String);

impl EndpointId {
    /// Create an EndpointId from the transport's string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string form of this EndpointId.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EndpointId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EndpointId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointId({})", self.0)
    }
}

/// Identifier of an outbound payload, returned by the transport's send call
/// and echoed back in transfer progress updates.
///
/// Transports never issue 0.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferId(i64);

impl TransferId {
    /// Create a TransferId from the transport's numeric id.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this TransferId.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferId({})", self.0)
    }
}
