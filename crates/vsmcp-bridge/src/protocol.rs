//! Wire frames for the duplex call channel.
//!
//! A single frame type flows in both directions; the `id` correlates a
//! `Request` with the `Response` or `Error` that eventually answers it.
//! Both sides may have requests in flight concurrently on one connection.

use serde::{Deserialize, Serialize};

/// Unique identifier correlating a call with its response.
///
/// UUID v4 rather than a counter so ids from the two directions of the
/// channel can never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(uuid::Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One frame on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Invoke a named operation on the remote side.
    Request {
        id: CallId,
        method: String,
        params: serde_json::Value,
    },

    /// Successful completion of a request.
    Response {
        id: CallId,
        result: serde_json::Value,
    },

    /// The remote handler failed; `message` carries the remote error text.
    Error { id: CallId, message: String },
}

/// Operation names the server exposes to the host.
///
/// The host-exposed set is open-ended (the IDE automation surface) and is
/// carried as opaque method strings; only the server-side set is fixed.
pub mod methods {
    pub const LIST_CAPABILITIES: &str = "list-capabilities";
    pub const REQUEST_SHUTDOWN: &str = "request-shutdown";
}
