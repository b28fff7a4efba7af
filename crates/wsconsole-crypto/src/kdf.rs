//! Key derivation: `K = SHA-256(salt ‖ shared_secret)`.

use sha2::{Digest, Sha256};

/// The 32-byte derived key. Doubles as the AES-256 key; its first 16 bytes
/// also serve as the CFB IV (see [`DerivedKey::iv`]).
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedKey([u8; 32]);

impl DerivedKey {
    pub fn derive(salt: &[u8], shared_secret: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(shared_secret);
        let digest = hasher.finalize();
        Self(digest.into())
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn iv(&self) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&self.0[..16]);
        iv
    }
}
