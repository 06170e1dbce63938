//! Header codec errors.

use thiserror::Error;

/// Errors decoding packet or payload headers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// Buffer shorter than the fields the flags declare.
    #[error("header too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Reserved message-flag bits are set.
    #[error("reserved message flags set: 0x{0:02x}")]
    ReservedFlags(u8),

    /// Encryption flag disagrees with the session identifier.
    #[error("encryption flag inconsistent with session {0:04x}")]
    EncryptionMismatch(u16),

    /// Message type byte not recognised.
    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    /// Reserved exchange-flag bits are set.
    #[error("reserved exchange flags set: 0x{0:02x}")]
    ReservedExchangeFlags(u8),
}
