//! Error types shared across layers.

use thiserror::Error;

/// Errors in the crypto layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// Authentication failed: bad tag, tampered header, or counter outside
    /// the acceptable replay window. Deliberately indistinguishable.
    #[error("authentication failure")]
    AuthenticationFailure,

    /// Message counter exhausted - session must be torn down.
    #[error("message counter overflow - session must terminate")]
    CounterOverflow,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// Key material of the wrong shape.
    #[error("invalid key material")]
    InvalidKey,
}

/// Error returned by an abstract [`Link`](super::Link) send.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("link send failed: {reason}")]
pub struct LinkError {
    /// Human-readable failure reason.
    pub reason: String,
}

impl LinkError {
    /// Create a link error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}
