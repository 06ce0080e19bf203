//! Wire protocol for Waypoint.
//!
//! This crate defines what clients and the server exchange:
//!
//! - **Types** ([`UserId`], [`ServerEvent`], [`Outbound`]): identities
//!   and the events pushed down live connections.
//! - **API payloads** ([`LoginRequest`], [`LoginResponse`], ...): the
//!   JSON bodies of the HTTP session endpoints.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how events become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (frames) → Protocol (events, payloads) → Session / Presence
//! ```
//!
//! The protocol layer knows nothing about tokens, stores, or registries.

mod api;
mod codec;
mod error;
mod types;

pub use api::{
    FriendRequest, FriendSummary, LocationKind, LocationRequest, LocationView,
    LoginRequest, LoginResponse, LogoutRequest, LogoutResponse, RefreshRequest,
    RefreshResponse, RegisterRequest, UpdateUserRequest, UserListQuery,
    UserProfile, UserSummary,
};
pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{Outbound, ServerEvent, UserId};
