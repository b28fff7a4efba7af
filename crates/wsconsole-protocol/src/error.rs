//! Error types for the protocol layer.
//!
//! Each crate in this workspace defines its own error enum. This keeps
//! errors specific and meaningful — when you see a `ProtocolError`, you
//! know the problem is in envelope encode/decode, not in crypto or
//! transport.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a [`crate::Frame`] into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a [`crate::Frame`]).
    ///
    /// Common causes: malformed JSON, missing required fields, or a
    /// truncated message — including a message that is still ciphertext
    /// because the caller hasn't run it through the crypto channel yet.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message is invalid at the protocol level: it parses as JSON
    /// but doesn't satisfy the envelope's structural rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
