//! Transport layer error types.
//!
//! Inbound failures are reported to the caller of
//! [`SecureTransport::on_receive`](super::SecureTransport::on_receive) as the
//! reason a datagram was dropped. None of them produce a reply on the wire, so
//! an unauthenticated sender learns nothing about which sessions exist.

use thiserror::Error;

use crate::core::{CryptoError, LinkError, MessageHandle, SessionHandle, SessionId};
use crate::handshake::HandshakeError;
use crate::message::HeaderError;
use crate::tlv::TlvError;

/// Transport layer errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Packet or payload header did not parse.
    #[error("malformed header: {0}")]
    MalformedHeader(#[from] HeaderError),

    /// Application payload was not valid TLV.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] TlvError),

    /// AEAD tag mismatch, tampered header, or counter outside the replay bound.
    #[error("authentication failed")]
    AuthenticationFailure,

    /// A handshake message failed verification.
    #[error("handshake verification failed")]
    HandshakeVerificationFailed,

    /// Header named a session we do not have.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// Caller passed a handle that was never issued or is already closed.
    #[error("unknown session handle {0}")]
    UnknownHandle(SessionHandle),

    /// Session exists but its handshake has not completed.
    #[error("{0} is not established")]
    SessionNotEstablished(SessionHandle),

    /// Outbound counter space exhausted. The session has been torn down.
    #[error("message counter overflow - session must terminate")]
    CounterOverflow,

    /// Retry budget for a reliable message ran out.
    #[error("delivery failed for {0}")]
    DeliveryFailed(MessageHandle),

    /// Sealed datagram would exceed the configured limit.
    #[error("message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge { size: usize, limit: usize },

    /// Responder handshake limit reached; the init was not answered.
    #[error("too many pending handshakes")]
    TooManyHandshakes,

    /// Every non-zero session identifier is in use.
    #[error("no session identifier available")]
    NoSessionIdAvailable,

    /// Underlying link refused the datagram.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Handshake could not be started or advanced.
    #[error("handshake error: {0}")]
    Handshake(HandshakeError),

    /// Sealing failed.
    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

impl From<HandshakeError> for TransportError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::VerificationFailed => TransportError::HandshakeVerificationFailed,
            HandshakeError::Malformed(tlv) => TransportError::MalformedPayload(tlv),
            other => TransportError::Handshake(other),
        }
    }
}

impl From<CryptoError> for TransportError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailure => TransportError::AuthenticationFailure,
            CryptoError::CounterOverflow => TransportError::CounterOverflow,
            other => TransportError::Crypto(other),
        }
    }
}

impl TransportError {
    /// Whether the datagram is discarded without any response.
    pub fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            TransportError::MalformedHeader(_)
                | TransportError::MalformedPayload(_)
                | TransportError::AuthenticationFailure
                | TransportError::HandshakeVerificationFailed
                | TransportError::UnknownSession(_)
                | TransportError::TooManyHandshakes
        )
    }

    /// Whether the session the error concerns can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::CounterOverflow
                | TransportError::DeliveryFailed(_)
                | TransportError::HandshakeVerificationFailed
                | TransportError::Handshake(_)
        )
    }

    /// Whether the error indicates tampering or key exhaustion.
    pub fn is_security_error(&self) -> bool {
        matches!(
            self,
            TransportError::AuthenticationFailure
                | TransportError::HandshakeVerificationFailed
                | TransportError::CounterOverflow
        )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
