//! Error types for the session layer.

/// Errors from hashing secrets.
///
/// Verification never produces one of these: a candidate that doesn't
/// match, or a stored hash that can't be parsed, is just `false`.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The configured Argon2 cost parameters are out of range.
    #[error("invalid hashing parameters: {0}")]
    InvalidParams(String),

    /// Producing the hash failed.
    #[error("hashing failed: {0}")]
    Hash(String),
}

/// Why a token could not be minted or was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Not three base64url segments, undecodable JSON, or an algorithm
    /// other than HS256.
    #[error("malformed token")]
    Malformed,

    /// The signature doesn't match the payload under our secret.
    #[error("invalid token signature")]
    InvalidSignature,

    /// The current time is at or past the token's `exp`.
    #[error("token expired")]
    Expired,

    /// Correctly signed and unexpired, but not acceptable here: wrong
    /// issuer, or a refresh token presented where an access token is
    /// required (and vice versa).
    #[error("token rejected: {0}")]
    Rejected(String),

    /// Minting failed. Callers treat this as an internal error.
    #[error("token signing failed: {0}")]
    Signing(String),

    /// HS256 keys shorter than 32 bytes are refused at construction.
    #[error("signing secret must be at least 32 bytes, got {0}")]
    SecretTooShort(usize),
}

/// Errors from the authentication gate.
///
/// Every variant means the request is rejected before it reaches
/// protected logic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization` header (or `token` parameter) at all.
    #[error("missing credentials")]
    MissingCredentials,

    /// Present, but not of the form `Bearer <token>`.
    #[error("malformed authorization header")]
    MalformedHeader,

    /// The bearer token failed validation.
    #[error(transparent)]
    Token(#[from] TokenError),
}
