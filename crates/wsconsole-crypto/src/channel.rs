//! The active, bidirectional cipher channel a session switches on after a
//! successful handshake.

use crate::cipher::{CipherMode, StreamDecryptor, StreamEncryptor};
use crate::kdf::DerivedKey;

/// Encryptor/decryptor pair for one direction-keyed session, plus the
/// ciphertext-start detection state described in the design notes: the
/// first inbound message after activation is inspected for a leading `{`
/// before being trusted as ciphertext, to absorb activation-timing races
/// between the two sides.
pub struct CipherChannel {
    encryptor: StreamEncryptor,
    decryptor: StreamDecryptor,
    inbound_confirmed_ciphertext: bool,
}

impl CipherChannel {
    pub fn new(mode: CipherMode, key: &DerivedKey) -> Self {
        Self {
            encryptor: StreamEncryptor::new(mode, key),
            decryptor: StreamDecryptor::new(mode, key),
            inbound_confirmed_ciphertext: false,
        }
    }

    /// Encrypts one outbound frame's JSON bytes. Always ciphertext from the
    /// moment this channel exists — there is no plaintext grace period on
    /// the outbound side.
    pub fn encrypt_outbound(&mut self, plaintext: &[u8]) -> Vec<u8> {
        self.encryptor.encrypt(plaintext)
    }

    /// Processes one inbound message. Until the first confirmed-ciphertext
    /// message, a message whose first non-whitespace byte is `{` is passed
    /// through untouched (still plaintext); any other leading byte latches
    /// this channel into ciphertext mode for the rest of the session.
    pub fn decrypt_inbound(&mut self, bytes: &[u8]) -> Vec<u8> {
        if !self.inbound_confirmed_ciphertext {
            if starts_with_open_brace(bytes) {
                return bytes.to_vec();
            }
            self.inbound_confirmed_ciphertext = true;
        }
        self.decryptor.decrypt(bytes)
    }

    /// Whether the inbound side has latched into ciphertext mode.
    pub fn inbound_confirmed(&self) -> bool {
        self.inbound_confirmed_ciphertext
    }
}

fn starts_with_open_brace(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
}
