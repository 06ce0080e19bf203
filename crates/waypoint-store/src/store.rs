//! The token/presence store contract.

use std::future::Future;
use std::time::Duration;

use sha2::{Digest, Sha256};
use waypoint_protocol::UserId;

use crate::StoreError;

/// Durable, shared, TTL-based storage for refresh-token records and
/// presence markers.
///
/// Treat every implementation as remote and fallible: every method can
/// return [`StoreError::Unavailable`], and nothing here retries.
///
/// # Refresh records
///
/// A record maps a refresh token to the user it was issued to. The key
/// is derived from the token alone (see [`refresh_token_digest`]), so a
/// lookup with the right token always finds the record and the caller
/// can compare the stored owner against whoever presented it.
///
/// # Presence
///
/// A user is online while their marker exists. Markers expire on their
/// own; nobody is told when that happens, the user just stops showing up
/// in [`list_online`](TokenStore::list_online).
pub trait TokenStore: Send + Sync + 'static {
    /// Records that `token` belongs to `user_id` for `ttl`.
    fn store_refresh_token(
        &self,
        user_id: UserId,
        token: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns the owner recorded for `token`.
    ///
    /// `user_id` is the identity the caller *claims*; the returned owner
    /// may differ, which means the token is being replayed by someone
    /// else.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] if there's no live record.
    fn fetch_refresh_token(
        &self,
        user_id: UserId,
        token: &str,
    ) -> impl Future<Output = Result<UserId, StoreError>> + Send;

    /// Removes the record for `token`. Removing a missing record is not
    /// an error.
    fn delete_refresh_token(
        &self,
        user_id: UserId,
        token: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Marks `user_id` online for `ttl`, replacing any earlier marker.
    fn mark_online(
        &self,
        user_id: UserId,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Clears the marker. Clearing an absent marker is not an error.
    fn mark_offline(&self, user_id: UserId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Every user with a live marker, in ascending id order.
    fn list_online(&self) -> impl Future<Output = Result<Vec<UserId>, StoreError>> + Send;
}

/// Lower-case hex SHA-256 of a refresh token.
///
/// Stores key records by this instead of the raw token, so reading the
/// store doesn't hand out usable credentials.
pub fn refresh_token_digest(token: &str) -> String {
    Sha256::digest(token.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
