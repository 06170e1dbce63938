//! Session establishment.
//!
//! A four-message exchange over the unsecured session:
//!
//! 1. `HandshakeInit`: initiator's Noise_IK message, proposed session id
//! 2. `HandshakeResponse`: responder's Noise_IK message
//! 3. `HandshakeConfirm`: initiator key-confirmation MAC
//! 4. `HandshakeFinished`: responder key-confirmation MAC
//!
//! Each message is bound to every earlier one through a SHA-256 transcript.

mod messages;
mod noise;
mod state;
mod transcript;

use thiserror::Error;

use crate::core::CryptoError;
use crate::tlv::TlvError;

pub use messages::{HandshakeBody, HandshakeMessage, session_id_of};
pub use state::{Handshake, HandshakeOutput, HandshakeReply, HandshakeStage, SessionKeys};
pub use transcript::Transcript;

/// Handshake failure reasons.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Transcript mismatch, bad MAC, failed Noise decryption, or a message
    /// that does not belong in the current state.
    #[error("handshake verification failed")]
    VerificationFailed,

    /// Handshake body did not parse. The message is dropped.
    #[error("malformed handshake message: {0}")]
    Malformed(#[from] TlvError),

    /// Noise state could not be built or advanced.
    #[error("noise protocol error: {0}")]
    Noise(String),

    /// No progress before the stall timer fired.
    #[error("handshake timed out")]
    Timeout,

    /// Key derivation or MAC failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Abandoned locally (session closed or transport shut down).
    #[error("handshake aborted")]
    Aborted,
}
