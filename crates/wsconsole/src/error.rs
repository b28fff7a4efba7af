//! Unified error type for the `wsconsole` facade.

use wsconsole_protocol::ProtocolError;
use wsconsole_session::SessionError;
use wsconsole_transport::TransportError;

/// Top-level error that wraps every sub-crate's error type.
///
/// When using the `wsconsole` meta-crate, callers deal with this single
/// error type instead of importing errors from each sub-crate. The
/// `#[from]` attribute on each variant auto-generates `From` impls, so the
/// `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum WsConsoleError {
    /// A transport-level error (connection, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (dispatch, handshake, facade).
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::AcceptFailed(std::io::Error::new(std::io::ErrorKind::Other, "gone"));
        let wrapped: WsConsoleError = err.into();
        assert!(matches!(wrapped, WsConsoleError::Transport(_)));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let wrapped: WsConsoleError = err.into();
        assert!(matches!(wrapped, WsConsoleError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::Cancelled;
        let wrapped: WsConsoleError = err.into();
        assert!(matches!(wrapped, WsConsoleError::Session(_)));
    }
}
