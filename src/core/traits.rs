//! External interfaces consumed by the secure transport.
//!
//! The transport never owns a socket, a thread, or a clock of its own. It is
//! driven by an external event loop that implements these traits:
//!
//! - [`Link`]: fire-and-forget datagram send
//! - [`Scheduler`]: time source plus cancelable one-shot timers
//! - [`SessionDelegate`]: application callbacks
//!
//! Timers never call back into the transport directly. A fired timer is a
//! [`TimerEvent`] the loop hands to
//! [`SecureTransport::handle_timer`](crate::transport::SecureTransport::handle_timer)
//! on its next turn, which keeps every state transition on the single owner.

use std::fmt::Debug;
use std::hash::Hash;
use std::time::{Duration, Instant};

use crate::handshake::HandshakeError;
use crate::tlv::Element;

use super::{LinkError, MessageHandle, SessionHandle, SessionId, TimerHandle};

/// Abstract datagram link (short-range radio, local IP, ...).
///
/// Inbound datagrams are fed to
/// [`SecureTransport::on_receive`](crate::transport::SecureTransport::on_receive)
/// by whoever owns the receive side.
pub trait Link {
    /// Peer address type.
    type Address: Clone + Eq + Hash + Debug;

    /// Send a raw datagram. Must not block.
    fn send(&mut self, datagram: &[u8], destination: &Self::Address) -> Result<(), LinkError>;
}

/// Deferred work requested by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEvent {
    /// A Pending Exchange may be due for retransmission.
    Retransmit {
        /// Session the exchange belongs to.
        session_id: SessionId,
        /// Counter of the message awaiting acknowledgment.
        counter: u32,
    },
    /// A piggyback-able acknowledgment waited long enough; send it standalone.
    StandaloneAck {
        /// Session the acknowledgment belongs to.
        session_id: SessionId,
        /// Counter being acknowledged.
        counter: u32,
    },
    /// A handshake may have stalled.
    HandshakeStall {
        /// Session identifier being negotiated.
        session_id: SessionId,
    },
    /// A session replaced by a rekey has outlived any exchange the peer could
    /// still be running on it.
    RetiredLinger {
        /// Retired session identifier.
        session_id: SessionId,
    },
}

/// Time source and one-shot timer registration.
pub trait Scheduler {
    /// Current time.
    fn now(&self) -> Instant;

    /// Deliver `event` back to the transport after `delay`.
    fn schedule_after(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle;

    /// Cancel a timer. Cancelling a fired or unknown timer is a no-op.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Application callbacks.
///
/// Invoked synchronously from inside transport calls. The delegate is owned
/// by the transport, so it cannot call back into it; work that needs the
/// transport must be queued and performed after the current call returns.
pub trait SessionDelegate {
    /// An authenticated, deduplicated application message arrived.
    fn on_message(&mut self, session: SessionHandle, payload: Element);

    /// A session finished its handshake and is ready for traffic.
    fn on_session_established(&mut self, session: SessionHandle);

    /// A handshake failed. No automatic retry is attempted.
    fn on_session_failed(&mut self, session: SessionHandle, reason: HandshakeError);

    /// A message sent with `require_ack` exhausted its retry budget.
    fn on_delivery_failed(&mut self, message: MessageHandle);

    /// The peer closed the session.
    fn on_session_closed(&mut self, session: SessionHandle) {
        let _ = session;
    }

    /// A message referenced a session that is not present. It was dropped.
    fn on_unknown_session(&mut self, session_id: SessionId) {
        let _ = session_id;
    }
}
