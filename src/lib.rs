//! # HomeLink Protocol
//!
//! Secure session transport for constrained smart-home devices.
//!
//! Devices exchange structured application data over authenticated,
//! encrypted sessions carried by any datagram link (short-range radio, local
//! IP). The crate provides:
//!
//! - **Encoding**: a compact TLV codec for every payload
//! - **Security**: Noise_IK session establishment with transcript-bound key
//!   confirmation, per-message AEAD, replay rejection
//! - **Reliability**: acknowledgments with retransmission and exponential
//!   backoff, duplicate suppression
//! - **Portability**: no sockets, threads or clocks of its own; the transport
//!   is driven through the [`core::Link`], [`core::Scheduler`] and
//!   [`core::SessionDelegate`] traits
//!
//! ## Feature Flags
//!
//! - `runtime` (default): tokio UDP link, timer queue and event loop
//!
//! ## Modules
//!
//! - [`core`]: identifiers, constants, shared errors, external interfaces
//! - [`tlv`]: TLV codec
//! - [`message`]: packet and payload headers
//! - [`crypto`]: cipher suite, nonces, static keys, crypto sessions
//! - [`handshake`]: session establishment state machine
//! - [`reliability`]: retransmission queue and duplicate windows
//! - [`transport`]: the [`SecureTransport`] façade
//! - [`runtime`]: tokio adapters (requires `runtime` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use homelink_protocol::prelude::*;
//!
//! let reading = Element::structure(vec![
//!     Element::context(1, "hello"),
//!     Element::context(2, 21u8),
//! ]);
//! let bytes = encode(&reading).unwrap();
//! let decoded = decode(&bytes).unwrap();
//! assert_eq!(decoded.field(1).and_then(Value::as_str), Some("hello"));
//! ```

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod core;
pub mod crypto;
pub mod handshake;
pub mod message;
pub mod reliability;
pub mod tlv;
pub mod transport;

// Tokio adapters (feature-gated)
#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub mod runtime;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{
        Link, LinkError, MessageHandle, NodeId, Scheduler, SessionDelegate, SessionHandle,
        SessionId, TimerEvent, TimerHandle,
    };
    pub use crate::crypto::{RekeyPolicy, StaticKeypair};
    pub use crate::handshake::HandshakeError;
    pub use crate::reliability::RetryPolicy;
    pub use crate::tlv::{ContainerKind, Element, Tag, TlvError, Value, decode, encode};
    pub use crate::transport::{
        Peer, SecureTransport, TransportConfig, TransportError, TransportResult,
    };

    #[cfg(feature = "runtime")]
    pub use crate::runtime::{EventLoop, TimerQueue, UdpLink, UdpTransport};
}

// Re-export commonly used items at crate root
pub use crate::core::{SessionHandle, SessionId};
pub use crate::transport::{SecureTransport, TransportConfig, TransportError};
