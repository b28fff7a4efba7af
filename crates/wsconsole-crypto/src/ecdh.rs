//! secp384r1 ECDH keypairs and the SubjectPublicKeyInfo encoding used on
//! the wire.
//!
//! The wire carries public keys as base64 of a full SubjectPublicKeyInfo
//! (SPKI) DER structure, but a `secp384r1` public key's actual entropy is
//! just the 97-byte uncompressed SEC1 point (`0x04 || X || Y`). The DER
//! wrapper around that point is fixed for this curve/algorithm pair, so
//! rather than pull in a general-purpose ASN.1 encoder we prepend/strip the
//! fixed 23-byte header, exactly as implementations without full X.509
//! tooling are expected to.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use p384::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p384::{EncodedPoint, PublicKey, SecretKey};
use rand::rngs::OsRng;

use crate::error::CryptoError;

/// DER prefix for a secp384r1 SubjectPublicKeyInfo wrapping an uncompressed
/// SEC1 point: SEQUENCE { SEQUENCE { id-ecPublicKey, secp384r1 } BIT STRING }.
const SPKI_PREFIX: [u8; 23] = [
    0x30, 0x76, 0x30, 0x10, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x05,
    0x2b, 0x81, 0x04, 0x00, 0x22, 0x03, 0x62, 0x00,
];

/// An ephemeral secp384r1 keypair, generated fresh for one handshake and
/// never reused.
pub struct EphemeralKeypair {
    secret: SecretKey,
    public: PublicKey,
}

impl EphemeralKeypair {
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Encodes this keypair's public key as base64(SPKI DER), the form that
    /// travels in the `publicKey` wire field.
    pub fn public_key_base64(&self) -> String {
        encode_public_key(&self.public)
    }

    /// Computes the raw ECDH shared secret against a peer's public key.
    pub fn shared_secret_with(&self, peer: &PublicKey) -> [u8; 48] {
        let shared = p384::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());
        let bytes = shared.raw_secret_bytes();
        let mut out = [0u8; 48];
        out.copy_from_slice(bytes.as_slice());
        out
    }
}

/// Encodes a public key as base64(SPKI DER) for the wire.
pub fn encode_public_key(public: &PublicKey) -> String {
    let point = public.to_encoded_point(false);
    let mut der = Vec::with_capacity(SPKI_PREFIX.len() + point.as_bytes().len());
    der.extend_from_slice(&SPKI_PREFIX);
    der.extend_from_slice(point.as_bytes());
    BASE64.encode(der)
}

/// Decodes a base64(SPKI DER) public key from the wire, stripping the fixed
/// header and parsing the remaining bytes as a SEC1 uncompressed point.
pub fn decode_public_key(wire: &str) -> Result<PublicKey, CryptoError> {
    let der = BASE64.decode(wire)?;
    let point_bytes = der
        .strip_prefix(&SPKI_PREFIX[..])
        .ok_or_else(|| CryptoError::MalformedPublicKey("missing secp384r1 SPKI header".into()))?;
    let encoded = EncodedPoint::from_bytes(point_bytes)
        .map_err(|e| CryptoError::MalformedPublicKey(e.to_string()))?;
    Option::<PublicKey>::from(PublicKey::from_encoded_point(&encoded))
        .ok_or_else(|| CryptoError::MalformedPublicKey("point not on curve".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_public_key_roundtrip() {
        let keypair = EphemeralKeypair::generate();
        let wire = keypair.public_key_base64();
        let decoded = decode_public_key(&wire).unwrap();
        assert_eq!(decoded, keypair.public);
    }

    #[test]
    fn test_shared_secret_matches_on_both_sides() {
        let alice = EphemeralKeypair::generate();
        let bob = EphemeralKeypair::generate();

        let alice_shared = alice.shared_secret_with(&bob.public);
        let bob_shared = bob.shared_secret_with(&alice.public);

        assert_eq!(alice_shared, bob_shared);
    }

    #[test]
    fn test_decode_rejects_wrong_prefix() {
        let garbage = BASE64.encode([0u8; 97]);
        let result = decode_public_key(&garbage);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        let result = decode_public_key("not-base64!!!");
        assert!(matches!(result, Err(CryptoError::InvalidBase64(_))));
    }
}
