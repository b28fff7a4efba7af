//! Shared pieces of the encryption handshake (§4.2), used by both the
//! server role (initiator) and the client role (responder).
//!
//! Deliberately free functions with no `Session` dependency: they only
//! format/parse wire shapes and turn key material into a [`DerivedKey`].
//! The roles own *when* these run and what state transition follows.

use wsconsole_crypto::{decode_public_key, CipherMode, CryptoError, DerivedKey, EphemeralKeypair};

/// A parsed legacy `enableencryption` command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyHandshakeRequest {
    pub public_key_b64: String,
    pub salt_b64: String,
    pub mode: CipherMode,
}

/// Builds the synthetic command line the legacy dialect piggybacks on a
/// normal `commandRequest`: `enableencryption "<pubkey>" "<salt>" [mode]`.
/// The mode token is omitted when it's the implementation default, matching
/// what older game clients themselves send.
pub fn format_legacy_command(public_key_b64: &str, salt_b64: &str, mode: CipherMode) -> String {
    let pubkey_json = serde_json::to_string(public_key_b64).expect("string always encodes");
    let salt_json = serde_json::to_string(salt_b64).expect("string always encodes");
    if mode == CipherMode::LEGACY_DEFAULT {
        format!("enableencryption {pubkey_json} {salt_json}")
    } else {
        format!("enableencryption {pubkey_json} {salt_json} {}", mode.wire_value())
    }
}

/// Detects and parses the legacy `enableencryption` prefix out of an
/// arbitrary command line. Returns `None` for any other command.
pub fn parse_legacy_command(command_line: &str) -> Option<LegacyHandshakeRequest> {
    let rest = command_line.strip_prefix("enableencryption ")?;
    let tokens = tokenize(rest);
    let public_key_b64 = tokens.first()?.clone();
    let salt_b64 = tokens.get(1)?.clone();
    let mode = match tokens.get(2) {
        Some(m) => CipherMode::parse(m).ok()?,
        None => CipherMode::LEGACY_DEFAULT,
    };
    Some(LegacyHandshakeRequest {
        public_key_b64,
        salt_b64,
        mode,
    })
}

/// Splits a command line into whitespace-separated tokens, treating a
/// `"..."` run (as produced by [`format_legacy_command`]) as one token with
/// its quotes stripped. Good enough for the base64 payloads this handshake
/// actually carries; not a general shell tokenizer.
fn tokenize(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
    while chars.peek().is_some() {
        let mut token = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                token.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
    }
    tokens
}

/// Derives the symmetric key from this side's ephemeral keypair, the
/// peer's public key, and the (server-chosen) salt — both wire fields
/// base64-encoded as they travel.
pub fn derive_shared_key(
    keypair: &EphemeralKeypair,
    peer_public_key_b64: &str,
    salt_b64: &str,
) -> Result<DerivedKey, CryptoError> {
    let peer_public = decode_public_key(peer_public_key_b64)?;
    let shared_secret = keypair.shared_secret_with(&peer_public);
    let salt = wsconsole_crypto::decode_salt(salt_b64)?;
    Ok(DerivedKey::derive(&salt, &shared_secret))
}
