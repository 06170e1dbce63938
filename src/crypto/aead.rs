//! Session keys and the pluggable AEAD/KDF suite.
//!
//! The default suite is ChaCha20-Poly1305 with a 12-byte nonce and
//! HKDF-SHA256 for key derivation. The associated data is the exact encoded
//! packet header, so any header bit flip fails authentication.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::core::{AEAD_NONCE_SIZE, AEAD_TAG_SIZE, CryptoError, SESSION_KEY_SIZE};

/// A symmetric session key.
///
/// Zeroized on drop.
#[derive(Clone)]
pub struct SessionKey {
    key: [u8; SESSION_KEY_SIZE],
}

impl SessionKey {
    pub fn from_bytes(key: [u8; SESSION_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Build a key from a slice of exactly [`SESSION_KEY_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; SESSION_KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { key })
    }

    /// Raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.key
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// AEAD and key-derivation primitives used by a crypto session.
///
/// Implementations must be deterministic for a given key and nonce and must
/// fail closed on any tag mismatch.
pub trait CipherSuite: Send + Sync {
    /// Suite name, for logs.
    fn name(&self) -> &'static str;

    /// Encrypt and append the authentication tag.
    fn seal(
        &self,
        key: &SessionKey,
        nonce: &[u8; AEAD_NONCE_SIZE],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Verify and decrypt. Returns no plaintext on failure.
    fn open(
        &self,
        key: &SessionKey,
        nonce: &[u8; AEAD_NONCE_SIZE],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Fill `out` with key material derived from `ikm`.
    fn derive(&self, ikm: &[u8], salt: &[u8], info: &[u8], out: &mut [u8])
    -> Result<(), CryptoError>;
}

/// ChaCha20-Poly1305 + HKDF-SHA256.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChaChaPolySuite;

impl CipherSuite for ChaChaPolySuite {
    fn name(&self) -> &'static str {
        "ChaCha20Poly1305-HKDF-SHA256"
    }

    fn seal(
        &self,
        key: &SessionKey,
        nonce: &[u8; AEAD_NONCE_SIZE],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        cipher
            .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    fn open(
        &self,
        key: &SessionKey,
        nonce: &[u8; AEAD_NONCE_SIZE],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < AEAD_TAG_SIZE {
            return Err(CryptoError::AuthenticationFailure);
        }
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| CryptoError::AuthenticationFailure)
    }

    fn derive(
        &self,
        ikm: &[u8],
        salt: &[u8],
        info: &[u8],
        out: &mut [u8],
    ) -> Result<(), CryptoError> {
        Hkdf::<Sha256>::new(Some(salt), ikm)
            .expand(info, out)
            .map_err(|_| CryptoError::KeyDerivationFailed)
    }
}
