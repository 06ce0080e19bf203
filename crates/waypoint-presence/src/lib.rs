//! Session and presence engine for Waypoint.
//!
//! [`PresenceEngine`] ties the pieces together: it checks credentials,
//! mints tokens, records refresh tokens and online markers in a
//! [`TokenStore`](waypoint_store::TokenStore), and pushes events to
//! friends over the [`ConnectionRegistry`](waypoint_session::ConnectionRegistry)
//! it owns.
//!
//! # How it fits in the stack
//!
//! ```text
//! HTTP API / WebSocket handler (above)  ← decode requests, map errors
//!     ↕
//! Presence Layer (this crate)  ← login, refresh, logout, fan-out
//!     ↕
//! Session + Store Layers (below)  ← tokens, registry, persistence
//! ```

mod config;
mod engine;
mod error;

pub use config::PresenceConfig;
pub use engine::{Attachment, PresenceEngine};
pub use error::PresenceError;
