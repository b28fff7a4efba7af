//! Wire protocol for the game scripting console bridge.
//!
//! This crate defines the "language" that the driving tool and the game
//! speak:
//!
//! - **Frame** ([`Frame`], [`Header`], [`ExtraHeaders`]) — the envelope
//!   structure that travels on the wire.
//! - **Purpose** ([`Purpose`], [`DataType`]) — the closed set of
//!   `messagePurpose` values that select dispatch.
//! - **Version** ([`ProtocolVersion`], [`CommandVersion`]) — the wire
//!   version enumerators and the dialect switches that key off them.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how frames convert
//!   to/from bytes.
//! - **Errors** ([`ProtocolError`]) — what can go wrong during
//!   encoding/decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes, optionally
//! deciphered) and the session engine (dispatch, correlation). It doesn't
//! know about sockets or cipher state — it only knows how to shape and
//! serialize frames.
//!
//! ```text
//! Transport (bytes) -> Crypto (plaintext bytes) -> Protocol (Frame) -> Session (dispatch)
//! ```

mod codec;
mod error;
mod frame;
mod purpose;
mod version;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use frame::{ExtraHeaders, Frame, Header, RequestId};
pub use purpose::{DataType, Purpose};
pub use version::{CommandVersion, ProtocolVersion};
