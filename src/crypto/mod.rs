//! Security layer.
//!
//! - [`CipherSuite`]: pluggable AEAD + KDF, ChaCha20-Poly1305/HKDF-SHA256 by default
//! - Deterministic 12-byte nonce construction
//! - [`StaticKeypair`]: X25519 node identity
//! - [`CryptoSession`]: per-session keys, counters, replay bound
//! - [`RekeyPolicy`]

mod aead;
mod keys;
mod nonce;
mod rekey;
mod session;

pub use aead::{ChaChaPolySuite, CipherSuite, SessionKey};
pub use keys::StaticKeypair;
pub use nonce::{Direction, construct_nonce, parse_nonce};
pub use rekey::RekeyPolicy;
pub use session::CryptoSession;

/// Which side of the handshake a session was created on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Opened the session.
    Initiator,
    /// Accepted the session.
    Responder,
}
