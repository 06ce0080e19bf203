//! Core protocol types: identities and live-connection events.

use std::fmt;

use serde::{Deserialize, Serialize};
use waypoint_transport::Frame;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A user's numeric identity.
///
/// Assigned by the user directory and never changed. Every session
/// structure refers to users by this id; none of them own the user.
///
/// `#[serde(transparent)]` keeps it a bare number on the wire, so
/// `UserId(42)` is `42` in JSON, matching what clients send as `user_id`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// `tracing::info!(%user_id, ...)` prints `U-42`.
impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ServerEvent
// ---------------------------------------------------------------------------

/// Events the server pushes down a live connection.
///
/// Internally tagged, so a presence push looks like:
///
/// ```json
/// { "type": "presence", "user_id": 1, "name": "alice", "lat": 41.0, "lng": 29.0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Server → client after a successful handshake.
    Connected { user_id: UserId },

    /// A friend just logged in at the given position.
    Presence {
        user_id: UserId,
        name: String,
        lat: f64,
        lng: f64,
    },

    /// The handshake was rejected. The server closes right after sending
    /// this. `code` follows HTTP semantics (400, 401).
    Error { code: u16, message: String },
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// An item queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write this frame to the socket.
    Frame(Frame),
    /// Close the socket and stop writing.
    Close,
}
