//! Session engine for the game scripting console protocol.
//!
//! Sits between [`wsconsole_transport`]'s raw connections and the two
//! roles built on top of it:
//!
//! ```text
//! Transport (bytes)
//!     ↕
//! Session (this crate) — framing, dispatch, the encryption handshake
//!     ↕
//! server_role::ServerSession   client_role::ClientSession
//! (drives the game)           (simulates the game)
//! ```
//!
//! [`Session`] owns the connection, the codec, the optional cipher
//! channel, and the request/purpose dispatch tables (§4.3). The two role
//! modules register against it rather than duplicating any of that state.

#![allow(async_fn_in_trait)]

mod client_role;
mod dispatch;
mod error;
mod handshake;
mod server_role;
mod session;

pub use client_role::ClientSession;
pub use dispatch::{DispatchOutcome, Handler, Responder, SessionEvent};
pub use error::SessionError;
pub use handshake::{format_legacy_command, parse_legacy_command, LegacyHandshakeRequest};
pub use server_role::{CommandLine, ServerSession};
pub use session::{EncryptionState, Session};
