//! Session primitives for Waypoint.
//!
//! This crate handles everything about *who* a request or connection
//! belongs to:
//!
//! 1. **Credentials**: hashing and checking user secrets ([`SecretHasher`])
//! 2. **Tokens**: minting and validating access/refresh JWTs ([`TokenIssuer`])
//! 3. **Gate**: rejecting requests without a valid bearer token
//!    ([`SessionGate`], [`Authenticator`] trait)
//! 4. **Registry**: mapping each user to their one live connection
//!    ([`ConnectionRegistry`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Presence Layer (above)  ← logs users in, fans events out over the registry
//!     ↕
//! Session Layer (this crate)  ← identity, tokens, live connection handles
//!     ↕
//! Protocol Layer (below)  ← provides UserId, Outbound
//! ```
//!
//! Nothing here talks to a store. Persisting refresh tokens and presence
//! is `waypoint-store`'s job.

#![allow(async_fn_in_trait)]

mod credentials;
mod error;
mod gate;
mod registry;
mod token;

pub use credentials::{CredentialConfig, SecretHasher};
pub use error::{AuthError, CredentialError, TokenError};
pub use gate::{Authenticator, SessionGate, bearer_token};
pub use registry::{ConnectionHandle, ConnectionRegistry, Registration};
pub use token::{Claims, TokenConfig, TokenIssuer, TokenKind, unix_now};
