//! Session table.
//!
//! Three maps, all owned by the transport:
//!
//! - live crypto sessions, keyed by session id (active and retiring)
//! - handshakes in progress, keyed by the session id they negotiate
//! - logical sessions, keyed by the handle the application holds
//!
//! A logical session points at its active crypto session, at most one
//! handshake, and any retiring sessions still draining acknowledgments.

use std::collections::HashMap;

use rand::Rng;

use crate::core::{NodeId, SessionHandle, SessionId, TimerHandle};
use crate::crypto::CryptoSession;
use crate::handshake::Handshake;

use super::Peer;

/// Random probes before falling back to a linear scan.
const RANDOM_ID_ATTEMPTS: usize = 16;

/// An acknowledgment waiting for an outbound message to ride on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingAck {
    pub counter: u32,
    pub timer: TimerHandle,
}

/// An established crypto session.
#[derive(Debug)]
pub(crate) struct SessionEntry<A> {
    pub handle: SessionHandle,
    pub address: A,
    pub destination_node: Option<NodeId>,
    pub crypto: CryptoSession,
    pub pending_ack: Option<PendingAck>,
    /// Set while a session replaced by a rekey must keep receiving.
    pub linger: Option<TimerHandle>,
}

/// A handshake in progress.
#[derive(Debug)]
pub(crate) struct HandshakeEntry<A> {
    /// `None` on the responder until the handshake completes.
    pub handle: Option<SessionHandle>,
    pub address: A,
    pub node_id: Option<NodeId>,
    pub handshake: Handshake,
    pub stall_timer: TimerHandle,
}

/// What an application [`SessionHandle`] refers to.
#[derive(Debug)]
pub(crate) struct LogicalSession<A> {
    pub peer: Peer<A>,
    pub active: Option<SessionId>,
    pub handshake: Option<SessionId>,
    pub retiring: Vec<SessionId>,
}

impl<A> LogicalSession<A> {
    pub fn new(peer: Peer<A>) -> Self {
        Self {
            peer,
            active: None,
            handshake: None,
            retiring: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct SessionTable<A> {
    sessions: HashMap<SessionId, SessionEntry<A>>,
    handshakes: HashMap<SessionId, HandshakeEntry<A>>,
    logical: HashMap<SessionHandle, LogicalSession<A>>,
    next_handle: u64,
}

impl<A> SessionTable<A> {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            handshakes: HashMap::new(),
            logical: HashMap::new(),
            next_handle: 1,
        }
    }

    pub fn allocate_handle(&mut self) -> SessionHandle {
        let handle = SessionHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    /// Whether `session_id` names a live session or a handshake in progress.
    pub fn is_in_use(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id) || self.handshakes.contains_key(&session_id)
    }

    /// Pick a random non-zero session id not currently in use.
    pub fn allocate_session_id(&self) -> Option<SessionId> {
        pick_session_id(&mut rand::thread_rng(), |id| self.is_in_use(id))
    }

    pub fn session(&self, session_id: SessionId) -> Option<&SessionEntry<A>> {
        self.sessions.get(&session_id)
    }

    pub fn session_mut(&mut self, session_id: SessionId) -> Option<&mut SessionEntry<A>> {
        self.sessions.get_mut(&session_id)
    }

    pub fn insert_session(&mut self, session_id: SessionId, entry: SessionEntry<A>) {
        self.sessions.insert(session_id, entry);
    }

    pub fn remove_session(&mut self, session_id: SessionId) -> Option<SessionEntry<A>> {
        self.sessions.remove(&session_id)
    }

    pub fn handshake(&self, session_id: SessionId) -> Option<&HandshakeEntry<A>> {
        self.handshakes.get(&session_id)
    }

    pub fn handshake_mut(&mut self, session_id: SessionId) -> Option<&mut HandshakeEntry<A>> {
        self.handshakes.get_mut(&session_id)
    }

    pub fn insert_handshake(&mut self, session_id: SessionId, entry: HandshakeEntry<A>) {
        self.handshakes.insert(session_id, entry);
    }

    pub fn remove_handshake(&mut self, session_id: SessionId) -> Option<HandshakeEntry<A>> {
        self.handshakes.remove(&session_id)
    }

    pub fn logical(&self, handle: SessionHandle) -> Option<&LogicalSession<A>> {
        self.logical.get(&handle)
    }

    pub fn logical_mut(&mut self, handle: SessionHandle) -> Option<&mut LogicalSession<A>> {
        self.logical.get_mut(&handle)
    }

    pub fn insert_logical(&mut self, handle: SessionHandle, session: LogicalSession<A>) {
        self.logical.insert(handle, session);
    }

    pub fn remove_logical(&mut self, handle: SessionHandle) -> Option<LogicalSession<A>> {
        self.logical.remove(&handle)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn handshake_count(&self) -> usize {
        self.handshakes.len()
    }

    /// Handshakes started by a peer, not yet bound to a handle.
    pub fn responder_handshake_count(&self) -> usize {
        self.handshakes
            .values()
            .filter(|entry| entry.handle.is_none())
            .count()
    }
}

/// Random non-zero id for which `in_use` is false, or `None` if the space is
/// exhausted.
fn pick_session_id<R: Rng>(rng: &mut R, in_use: impl Fn(SessionId) -> bool) -> Option<SessionId> {
    for _ in 0..RANDOM_ID_ATTEMPTS {
        let candidate = SessionId::new(rng.gen_range(1..=u16::MAX));
        if !in_use(candidate) {
            return Some(candidate);
        }
    }
    (1..=u16::MAX).map(SessionId::new).find(|id| !in_use(*id))
}
