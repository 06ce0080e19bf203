//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding protocol data.
///
/// When you see a `ProtocolError` the problem is in serialization, not in
/// networking, token handling, or storage.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, or wrong
    /// field types.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The data parsed but violates a protocol rule, e.g. a handshake
    /// without a `user_id` parameter.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
