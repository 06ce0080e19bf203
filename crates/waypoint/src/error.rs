//! Unified error type for the Waypoint service.

use waypoint_presence::PresenceError;
use waypoint_protocol::ProtocolError;
use waypoint_session::{AuthError, CredentialError, TokenError};
use waypoint_store::StoreError;
use waypoint_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum WaypointError {
    /// A transport-level error (bind, upgrade, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An event couldn't be encoded, or a handshake was malformed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A live connection presented no usable token.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The signing configuration was rejected.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The hashing configuration was rejected.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// The token store couldn't be reached at startup.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Presence(#[from] PresenceError),

    /// Binding or serving the HTTP listener failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file couldn't be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<toml::de::Error> for WaypointError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let waypoint_err: WaypointError = err.into();
        assert!(matches!(waypoint_err, WaypointError::Transport(_)));
        assert!(waypoint_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_auth_error() {
        let waypoint_err: WaypointError = AuthError::MissingCredentials.into();
        assert!(matches!(waypoint_err, WaypointError::Auth(_)));
    }

    #[test]
    fn test_from_token_error_keeps_message() {
        let waypoint_err: WaypointError = TokenError::SecretTooShort(4).into();
        assert!(waypoint_err.to_string().contains("at least 32 bytes"));
    }

    #[test]
    fn test_from_toml_error_is_config() {
        let err = toml::from_str::<toml::Table>("not = [valid").unwrap_err();
        let waypoint_err: WaypointError = err.into();
        assert!(matches!(waypoint_err, WaypointError::Config(_)));
    }
}
