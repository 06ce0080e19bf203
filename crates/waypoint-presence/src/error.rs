//! Error types for the presence layer.

use waypoint_protocol::UserId;
use waypoint_session::{CredentialError, TokenError};
use waypoint_store::{DirectoryError, StoreError};

/// Why a session operation failed.
///
/// Every variant is local to the one request that produced it. A friend
/// push that fails is never one of these; it's logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    /// The payload is the wrong shape or out of range. Nothing was
    /// attempted.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Bad credentials, or a token that is invalid, expired, unknown to
    /// the store, or presented by someone other than its owner.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// Authenticated, but acting on someone else's account.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Duplicate e-mail or friendship.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store, the directory, or token signing failed. The operation
    /// was aborted rather than half-applied.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
}

impl From<StoreError> for PresenceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::AuthenticationFailed("refresh token not recognised".into()),
            StoreError::Unavailable(_) | StoreError::Corrupt(_) => {
                Self::DependencyUnavailable(e.to_string())
            }
        }
    }
}

impl From<DirectoryError> for PresenceError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::NotFound(id) => Self::UserNotFound(id),
            DirectoryError::Conflict(msg) => Self::Conflict(msg),
            DirectoryError::Invalid(msg) => Self::MalformedInput(msg),
            DirectoryError::Unavailable(_) => Self::DependencyUnavailable(e.to_string()),
        }
    }
}

impl From<TokenError> for PresenceError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Signing(_) | TokenError::SecretTooShort(_) => {
                Self::DependencyUnavailable(e.to_string())
            }
            TokenError::Malformed
            | TokenError::InvalidSignature
            | TokenError::Expired
            | TokenError::Rejected(_) => Self::AuthenticationFailed(e.to_string()),
        }
    }
}

impl From<CredentialError> for PresenceError {
    fn from(e: CredentialError) -> Self {
        Self::DependencyUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_authentication_failed() {
        assert!(matches!(
            PresenceError::from(StoreError::NotFound),
            PresenceError::AuthenticationFailed(_)
        ));
    }

    #[test]
    fn test_store_unavailable_maps_to_dependency() {
        assert!(matches!(
            PresenceError::from(StoreError::Unavailable("down".into())),
            PresenceError::DependencyUnavailable(_)
        ));
    }

    #[test]
    fn test_expired_token_maps_to_authentication_failed() {
        assert!(matches!(
            PresenceError::from(TokenError::Expired),
            PresenceError::AuthenticationFailed(_)
        ));
    }

    #[test]
    fn test_directory_not_found_keeps_user_id() {
        assert_eq!(
            PresenceError::from(DirectoryError::NotFound(UserId(4))),
            PresenceError::UserNotFound(UserId(4))
        );
    }
}
