//! Bidirectional JSON-over-WebSocket bridge for the game's in-game
//! scripting console.
//!
//! This crate ties the lower layers together into something a caller can
//! actually run:
//!
//! - [`ConsoleServer`] (§4.6) — binds a port, negotiates the console's
//!   WebSocket subprotocol, and hands each connection a
//!   [`wsconsole_session::ServerSession`].
//! - [`ConsoleFacade`] (§4.7) — an async wrapper over a `ServerSession`
//!   that turns `sendCommand`/`sendCommandLegacy`/`waitForEvent`/
//!   `enableEncryption` into ordinary awaitables with timeout and
//!   cancellation.
//! - [`WsConsoleError`] — the unified error type spanning transport,
//!   protocol, and session errors.
//!
//! The wire protocol, dispatch, and encryption handshake themselves live
//! in [`wsconsole_protocol`], [`wsconsole_transport`], [`wsconsole_crypto`],
//! and [`wsconsole_session`] — this crate only assembles them.

mod error;
mod facade;
mod server;

pub use error::WsConsoleError;
pub use facade::ConsoleFacade;
pub use server::{ConsoleServer, ConsoleServerBuilder, LiveSessions, SharedSession};

pub mod prelude {
    pub use crate::{ConsoleFacade, ConsoleServer, ConsoleServerBuilder, WsConsoleError};
    pub use wsconsole_crypto::CipherMode;
    pub use wsconsole_protocol::{DataType, Frame, ProtocolVersion, Purpose};
    pub use wsconsole_session::{ClientSession, CommandLine, ServerSession, Session};
}
