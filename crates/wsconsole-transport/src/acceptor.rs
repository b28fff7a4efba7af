//! The HTTP upgrade layer for the WebSocket listener.
//!
//! `tokio-tungstenite`'s `accept_async` doesn't expose subprotocol
//! negotiation or a way to relax the `Sec-WebSocket-Key` length check, so
//! this module drives the handshake by hand — parsing the request with
//! `httparse`, validating headers, negotiating the one subprotocol this
//! listener accepts, and computing `Sec-WebSocket-Accept` manually — then
//! hands the already-upgraded socket to `tokio-tungstenite` for framing.

use std::io;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_tungstenite::WebSocketStream;

use crate::error::TransportError;

/// The RFC 6455 handshake magic GUID.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// Accepts a WebSocket upgrade on `stream`, requiring the client to offer
/// `required_subprotocol`, and tolerating both the standard 24-character
/// `Sec-WebSocket-Key` and the game's non-standard 12-character short form.
pub async fn accept_with_subprotocol<S>(
    mut stream: S,
    required_subprotocol: &str,
) -> Result<WebSocketStream<S>, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let (ws_key, consumed_len) = loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(TransportError::AcceptFailed)?;
        if n == 0 {
            return Err(TransportError::AcceptFailed(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed before completing handshake",
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_REQUEST_BYTES {
            return reject(&mut stream, 431).await;
        }

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut request = httparse::Request::new(&mut headers);
        match request.parse(&buf) {
            Ok(httparse::Status::Complete(offset)) => {
                match validate_and_extract_key(&request, required_subprotocol) {
                    Ok(key) => break (key, offset),
                    Err(status) => return reject(&mut stream, status).await,
                }
            }
            Ok(httparse::Status::Partial) => continue,
            Err(_) => return reject(&mut stream, 400).await,
        }
    };
    // Any bytes after the request headers belong to the WebSocket framing
    // that follows the handshake; a plain GET upgrade never has a body, so
    // this should always be empty, but don't silently drop real data.
    debug_assert!(buf.len() == consumed_len, "unexpected trailing bytes after upgrade request");

    let accept_value = compute_accept_key(&ws_key);
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept_value}\r\n\
         Sec-WebSocket-Protocol: {required_subprotocol}\r\n\r\n"
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(TransportError::AcceptFailed)?;
    stream.flush().await.map_err(TransportError::AcceptFailed)?;

    let config = WebSocketConfig::default();
    Ok(WebSocketStream::from_raw_socket(stream, Role::Server, Some(config)).await)
}

async fn reject<S>(stream: &mut S, status: u16) -> Result<WebSocketStream<S>, TransportError>
where
    S: AsyncWrite + Unpin,
{
    let reason = match status {
        400 => "Bad Request",
        426 => "Upgrade Required",
        431 => "Request Header Fields Too Large",
        _ => "Bad Request",
    };
    let response = format!("HTTP/1.1 {status} {reason}\r\nConnection: close\r\n\r\n");
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
    Err(TransportError::AcceptFailed(io::Error::new(
        io::ErrorKind::ConnectionRefused,
        format!("handshake rejected: {status} {reason}"),
    )))
}

/// Validates the upgrade request's headers and returns the raw
/// `Sec-WebSocket-Key` value, or the HTTP status to reject with.
fn validate_and_extract_key(
    request: &httparse::Request<'_, '_>,
    required_subprotocol: &str,
) -> Result<String, u16> {
    if request.method != Some("GET") {
        return Err(400);
    }

    let header_eq = |name: &str, expected: &str| {
        request
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| std::str::from_utf8(h.value).ok())
            .is_some_and(|v| v.eq_ignore_ascii_case(expected))
    };

    if !header_eq("Upgrade", "websocket") || !header_eq("Connection", "upgrade") {
        return Err(426);
    }
    if !header_eq("Sec-WebSocket-Version", "13") {
        return Err(426);
    }

    let key = request
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("Sec-WebSocket-Key"))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .ok_or(400)?;

    if !is_acceptable_key(key) {
        return Err(400);
    }

    let offers_required_protocol = request
        .headers
        .iter()
        .filter(|h| h.name.eq_ignore_ascii_case("Sec-WebSocket-Protocol"))
        .filter_map(|h| std::str::from_utf8(h.value).ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim() == required_subprotocol);

    if !offers_required_protocol {
        return Err(400);
    }

    Ok(key.to_string())
}

/// Standard 16-byte (24-char base64) keys, or the game's legacy 11-char
/// base64 + trailing `=` short form (12 chars total).
fn is_acceptable_key(key: &str) -> bool {
    is_base64_key_of_len(key, 24) || is_short_legacy_key(key)
}

fn is_base64_key_of_len(key: &str, len: usize) -> bool {
    key.len() == len && BASE64.decode(key).is_ok()
}

fn is_short_legacy_key(key: &str) -> bool {
    if key.len() != 12 || !key.ends_with('=') {
        return false;
    }
    key[..11]
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

/// `base64(SHA1(key ++ magic GUID))`, using the client's original key bytes
/// verbatim regardless of its length.
fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}
