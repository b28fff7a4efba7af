//! Cryptographic channel for the game scripting console protocol.
//!
//! Covers the ECDH key exchange (§4.2), the key derivation, and the AES-CFB
//! stream cipher that encrypts frame bytes once a handshake completes. This
//! crate knows nothing about frames, purposes, or dispatch — it operates on
//! plain byte buffers, the same way it sits between the transport and the
//! protocol codec on the wire:
//!
//! ```text
//! Transport (bytes) -> Crypto (plaintext bytes, this crate) -> Protocol (Frame)
//! ```

mod channel;
mod cipher;
mod ecdh;
mod error;
mod kdf;

pub use channel::CipherChannel;
pub use cipher::{CipherMode, StreamDecryptor, StreamEncryptor};
pub use ecdh::{decode_public_key, encode_public_key, EphemeralKeypair};
pub use error::CryptoError;
pub use kdf::DerivedKey;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;

/// Generates the 16 random salt bytes the server side picks for a
/// handshake.
pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Encodes salt bytes for the wire (plain base64, no SPKI wrapper).
pub fn encode_salt(salt: &[u8]) -> String {
    BASE64.encode(salt)
}

/// Decodes salt bytes from the wire.
pub fn decode_salt(wire: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(BASE64.decode(wire)?)
}
