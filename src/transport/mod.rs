//! HomeLink Protocol - Secure Transport
//!
//! The façade that composes the lower layers into sessions an application
//! can send on:
//!
//! - **Configuration**: [`TransportConfig`] with a chained builder
//! - **Errors**: [`TransportError`] with drop/fatal/security classification
//! - **Peers**: [`Peer`] address, node id and static key
//! - **Façade**: [`SecureTransport`], driven by an external event loop
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Application (delegate)          │
//! ├─────────────────────────────────────────┤
//! │         Secure Transport                │  ← This module
//! │   session table, ack scheduling, rekey  │
//! ├──────────────┬──────────────────────────┤
//! │  Handshake   │  Reliability             │
//! ├──────────────┴──────────────────────────┤
//! │  Crypto Session │ Header codec │ TLV    │
//! ├─────────────────────────────────────────┤
//! │              Link                       │
//! └─────────────────────────────────────────┘
//! ```

mod config;
mod error;
mod peer;
mod secure;
mod session_table;

pub use config::{TransportConfig, TransportConfigBuilder};
pub use error::{TransportError, TransportResult};
pub use peer::Peer;
pub use secure::SecureTransport;
