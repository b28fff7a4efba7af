//! Error types for the session engine and roles.

/// Errors that can occur while dispatching frames or driving a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The underlying socket failed to send or receive.
    #[error("transport error: {0}")]
    Transport(#[from] wsconsole_transport::TransportError),

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] wsconsole_protocol::ProtocolError),

    /// The encryption handshake failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] wsconsole_crypto::CryptoError),

    /// A responder was registered for a `requestId` that already has one.
    /// Only one responder may be outstanding per id at a time (§3 invariants).
    #[error("a responder is already registered for request {0}")]
    ResponderAlreadyRegistered(wsconsole_protocol::RequestId),

    /// A handler was registered for a purpose that already has one.
    #[error("a handler is already registered for purpose {0}")]
    HandlerAlreadyRegistered(String),

    /// A handler or responder callback returned an application-level error.
    /// This does not unwind dispatch; it surfaces as `SessionEvent::Error`.
    #[error("handler error: {0}")]
    Handler(String),

    /// The peer reported a protocol-level error via the `error` purpose.
    #[error("peer reported error {status_code}: {status_message}")]
    ClientError {
        status_code: i64,
        status_message: String,
    },

    /// The command's high-bit status code (`0x80000000`) was set.
    #[error("command failed ({status_code}): {status_message}")]
    CommandFailed {
        status_code: i64,
        status_message: String,
    },

    /// An awaitable operation (facade) was cancelled before it resolved.
    #[error("operation cancelled")]
    Cancelled,

    /// An awaitable operation (facade) exceeded its deadline.
    #[error("operation timed out")]
    TimedOut,
}
