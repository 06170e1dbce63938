//! Protocol constants and configuration defaults.
//!
//! Wire sizes are fixed by the protocol and MUST NOT be changed. Timing and
//! retry values are only defaults: every one of them can be overridden through
//! [`TransportConfig`](crate::transport::TransportConfig).

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// ChaCha20-Poly1305 (IETF) nonce size.
pub const AEAD_NONCE_SIZE: usize = 12;

/// Symmetric session key size.
pub const SESSION_KEY_SIZE: usize = 32;

/// X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 private key size.
pub const PRIVATE_KEY_SIZE: usize = 32;

/// SHA-256 / BLAKE2s output size.
pub const HASH_SIZE: usize = 32;

/// Noise pattern used by session establishment.
pub const NOISE_PATTERN: &str = "Noise_IK_25519_ChaChaPoly_BLAKE2s";

/// Nonce direction: Initiator -> Responder.
pub const NONCE_DIR_INITIATOR: u8 = 0x00;

/// Nonce direction: Responder -> Initiator.
pub const NONCE_DIR_RESPONDER: u8 = 0x01;

// =============================================================================
// PACKET HEADER
// =============================================================================

/// Fixed header size (counter + session id + flags).
pub const FIXED_HEADER_SIZE: usize = 4 + 2 + 1;

/// Node identifier size.
pub const NODE_ID_SIZE: usize = 8;

/// Piggybacked acknowledgment counter size.
pub const ACK_COUNTER_SIZE: usize = 4;

/// Largest possible packet header (all optional fields present).
pub const MAX_HEADER_SIZE: usize =
    FIXED_HEADER_SIZE + NODE_ID_SIZE + NODE_ID_SIZE + ACK_COUNTER_SIZE;

/// Payload header size (exchange flags + message type).
pub const PAYLOAD_HEADER_SIZE: usize = 2;

/// Session id reserved for unsecured (handshake) traffic.
pub const UNSECURED_SESSION_ID: u16 = 0;

/// Default upper bound for a whole datagram (IPv6 minimum MTU).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1280;

// =============================================================================
// TLV
// =============================================================================

/// Maximum container nesting accepted by the TLV reader and writer.
pub const MAX_CONTAINER_DEPTH: usize = 32;

// =============================================================================
// RELIABILITY DEFAULTS
// =============================================================================

/// First retransmission happens this long after the initial send.
pub const DEFAULT_BASE_RETRY_INTERVAL: Duration = Duration::from_millis(300);

/// Retransmission interval cap.
pub const DEFAULT_MAX_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Interval growth factor applied after every retransmission.
pub const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;

/// Retransmissions attempted before reporting a delivery failure.
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Number of recently seen counters remembered per peer session.
pub const DEFAULT_DUPLICATE_WINDOW_SIZE: usize = 32;

/// Maximum time a standalone acknowledgment waits for a piggyback ride.
pub const DEFAULT_ACK_DELAY: Duration = Duration::from_millis(50);

// =============================================================================
// SESSION DEFAULTS
// =============================================================================

/// A handshake that makes no progress for this long fails.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Responder handshakes held at once; further inits are dropped.
pub const DEFAULT_MAX_PENDING_HANDSHAKES: usize = 8;

/// Soft limit on messages sent before rekeying.
pub const DEFAULT_REKEY_AFTER_MESSAGES: u32 = 1 << 31;

/// Soft limit on session age before rekeying.
pub const DEFAULT_REKEY_AFTER_TIME: Duration = Duration::from_secs(3600);
