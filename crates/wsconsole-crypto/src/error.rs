//! Error types for the cryptographic channel.

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The peer's public key did not decode as a valid SubjectPublicKeyInfo
    /// blob for the expected curve.
    #[error("malformed public key: {0}")]
    MalformedPublicKey(String),

    /// The `mode` field on a handshake request/advertisement named a cipher
    /// this implementation doesn't know.
    #[error("unknown cipher mode: {0}")]
    UnknownCipherMode(String),

    /// base64 decoding of a wire field (public key or salt) failed.
    #[error("invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// A second handshake was attempted on a session whose encryption is
    /// already negotiating or active. Monotonic per §3 invariants.
    #[error("encryption handshake already in progress or completed")]
    AlreadyNegotiating,
}
