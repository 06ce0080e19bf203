//! Error types for the storage layer.

use waypoint_protocol::UserId;

/// Errors from a [`TokenStore`](crate::TokenStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No live record under that key. Expired records are not found.
    #[error("record not found")]
    NotFound,

    /// The backend failed or didn't answer within its timeout. Never
    /// retried here; callers surface it as an internal failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A record exists but its value can't be read back.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Errors from a [`UserDirectory`](crate::UserDirectory).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("user {0} not found")]
    NotFound(UserId),

    /// Duplicate e-mail, or a friendship that already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request can never succeed, e.g. befriending yourself.
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}
