//! Shared integration test harness: an in-memory network, a virtual clock
//! and a delegate that records every callback.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use homelink_protocol::core::{
    Link, LinkError, MessageHandle, Scheduler, SessionDelegate, SessionHandle, SessionId,
    TimerEvent, TimerHandle,
};
use homelink_protocol::crypto::StaticKeypair;
use homelink_protocol::handshake::HandshakeError;
use homelink_protocol::message::{PacketHeader, PayloadHeader};
use homelink_protocol::tlv::Element;
use homelink_protocol::transport::{
    Peer, SecureTransport, TransportConfig, TransportError, TransportResult,
};

pub type Addr = u32;

pub const ALICE: Addr = 1;
pub const BOB: Addr = 2;

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub from: Addr,
    pub to: Addr,
    pub data: Vec<u8>,
    /// Virtual time the packet was sent.
    pub at: Instant,
}

impl Packet {
    pub fn header(&self) -> PacketHeader {
        PacketHeader::decode(&self.data).unwrap().0
    }

    /// Payload header of a handshake packet (readable without keys).
    pub fn handshake_type(&self) -> Option<homelink_protocol::message::MessageType> {
        let (header, rest) = PacketHeader::decode(&self.data).ok()?;
        if !header.session_id.is_unsecured() {
            return None;
        }
        PayloadHeader::decode(rest).ok().map(|(p, _)| p.message_type)
    }
}

type DropFilter = Box<dyn FnMut(&Packet) -> bool>;

#[derive(Default)]
struct NetworkState {
    queue: VecDeque<Packet>,
    log: Vec<Packet>,
    filter: Option<DropFilter>,
}

/// Shared in-memory datagram network.
#[derive(Clone, Default)]
pub struct Network(Rc<RefCell<NetworkState>>);

impl Network {
    pub fn link(&self, local: Addr, clock: &Clock) -> MemoryLink {
        MemoryLink {
            local,
            network: self.clone(),
            clock: clock.clone(),
        }
    }

    /// Drop every packet for which `filter` returns true.
    pub fn set_filter(&self, filter: impl FnMut(&Packet) -> bool + 'static) {
        self.0.borrow_mut().filter = Some(Box::new(filter));
    }

    pub fn clear_filter(&self) {
        self.0.borrow_mut().filter = None;
    }

    pub fn pop(&self) -> Option<Packet> {
        self.0.borrow_mut().queue.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.0.borrow().queue.len()
    }

    /// Every packet ever sent, dropped ones included.
    pub fn log(&self) -> Vec<Packet> {
        self.0.borrow().log.clone()
    }

    pub fn sent_by(&self, from: Addr) -> Vec<Packet> {
        self.0
            .borrow()
            .log
            .iter()
            .filter(|p| p.from == from)
            .cloned()
            .collect()
    }
}

pub struct MemoryLink {
    local: Addr,
    network: Network,
    clock: Clock,
}

impl Link for MemoryLink {
    type Address = Addr;

    fn send(&mut self, datagram: &[u8], destination: &Addr) -> Result<(), LinkError> {
        let packet = Packet {
            from: self.local,
            to: *destination,
            data: datagram.to_vec(),
            at: self.clock.now(),
        };
        let mut state = self.network.0.borrow_mut();
        state.log.push(packet.clone());
        let dropped = state.filter.as_mut().is_some_and(|f| f(&packet));
        if !dropped {
            state.queue.push_back(packet);
        }
        Ok(())
    }
}

struct Armed {
    handle: TimerHandle,
    due: Instant,
    event: TimerEvent,
    owner: Addr,
}

struct ClockState {
    now: Instant,
    next_handle: u64,
    armed: Vec<Armed>,
}

/// Virtual clock shared by every node in a test.
#[derive(Clone)]
pub struct Clock(Rc<RefCell<ClockState>>);

impl Clock {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(ClockState {
            now: Instant::now(),
            next_handle: 1,
            armed: Vec::new(),
        })))
    }

    pub fn scheduler(&self, owner: Addr) -> ManualScheduler {
        ManualScheduler {
            owner,
            clock: self.clone(),
        }
    }

    pub fn now(&self) -> Instant {
        self.0.borrow().now
    }

    /// Earliest timer due at or before `limit`, removed from the clock.
    fn pop_due(&self, limit: Instant) -> Option<(Addr, TimerEvent)> {
        let mut state = self.0.borrow_mut();
        let index = state
            .armed
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= limit)
            .min_by_key(|(_, t)| (t.due, t.handle))
            .map(|(i, _)| i)?;
        let timer = state.armed.remove(index);
        state.now = state.now.max(timer.due);
        Some((timer.owner, timer.event))
    }

    fn set_now(&self, now: Instant) {
        let mut state = self.0.borrow_mut();
        state.now = state.now.max(now);
    }

    pub fn armed(&self) -> usize {
        self.0.borrow().armed.len()
    }
}

pub struct ManualScheduler {
    owner: Addr,
    clock: Clock,
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Instant {
        self.clock.now()
    }

    fn schedule_after(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        let mut state = self.clock.0.borrow_mut();
        let handle = TimerHandle(state.next_handle);
        state.next_handle += 1;
        let due = state.now + delay;
        state.armed.push(Armed {
            handle,
            due,
            event,
            owner: self.owner,
        });
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.clock
            .0
            .borrow_mut()
            .armed
            .retain(|t| t.handle != handle);
    }
}

#[derive(Debug, Default)]
pub struct RecordingDelegate {
    pub messages: Vec<(SessionHandle, Element)>,
    pub established: Vec<SessionHandle>,
    pub failed: Vec<(SessionHandle, HandshakeError)>,
    pub delivery_failed: Vec<MessageHandle>,
    pub closed: Vec<SessionHandle>,
    pub unknown: Vec<SessionId>,
}

impl SessionDelegate for RecordingDelegate {
    fn on_message(&mut self, session: SessionHandle, payload: Element) {
        self.messages.push((session, payload));
    }

    fn on_session_established(&mut self, session: SessionHandle) {
        self.established.push(session);
    }

    fn on_session_failed(&mut self, session: SessionHandle, reason: HandshakeError) {
        self.failed.push((session, reason));
    }

    fn on_delivery_failed(&mut self, message: MessageHandle) {
        self.delivery_failed.push(message);
    }

    fn on_session_closed(&mut self, session: SessionHandle) {
        self.closed.push(session);
    }

    fn on_unknown_session(&mut self, session_id: SessionId) {
        self.unknown.push(session_id);
    }
}

pub type Node = SecureTransport<MemoryLink, ManualScheduler, RecordingDelegate>;

/// Two nodes on one network and one clock.
pub struct Pair {
    pub alice: Node,
    pub bob: Node,
    pub network: Network,
    pub clock: Clock,
    /// Every datagram a node dropped, with the reason.
    pub drops: Vec<(Addr, TransportError)>,
}

impl Pair {
    pub fn new(config: TransportConfig) -> Self {
        Self::with_configs(config.clone(), config)
    }

    pub fn with_configs(alice: TransportConfig, bob: TransportConfig) -> Self {
        init_tracing();
        let network = Network::default();
        let clock = Clock::new();
        let node = |addr: Addr, config: TransportConfig| {
            SecureTransport::new(
                config,
                StaticKeypair::generate(),
                network.link(addr, &clock),
                clock.scheduler(addr),
                RecordingDelegate::default(),
            )
        };
        Self {
            alice: node(ALICE, alice),
            bob: node(BOB, bob),
            network: network.clone(),
            clock: clock.clone(),
            drops: Vec::new(),
        }
    }

    pub fn node_mut(&mut self, addr: Addr) -> &mut Node {
        match addr {
            ALICE => &mut self.alice,
            _ => &mut self.bob,
        }
    }

    /// Alice's view of Bob.
    pub fn bob_peer(&self) -> Peer<Addr> {
        Peer::new(BOB, *self.bob.public_key())
    }

    /// Feed one raw datagram to a node.
    pub fn inject(&mut self, to: Addr, from: Addr, data: &[u8]) -> TransportResult<()> {
        let result = self.node_mut(to).on_receive(data, from);
        if let Err(err) = &result {
            self.drops.push((to, err.clone()));
        }
        result
    }

    /// Deliver the next queued packet.
    pub fn step(&mut self) -> Option<(Packet, TransportResult<()>)> {
        let packet = self.network.pop()?;
        let result = self.inject(packet.to, packet.from, &packet.data);
        Some((packet, result))
    }

    /// Deliver until the network is quiet. Returns packets delivered.
    pub fn deliver_all(&mut self) -> usize {
        let mut delivered = 0;
        while self.step().is_some() {
            delivered += 1;
        }
        delivered
    }

    /// Move the clock forward, firing timers in order and delivering
    /// whatever they send.
    pub fn advance(&mut self, by: Duration) {
        let target = self.clock.now() + by;
        while let Some((owner, event)) = self.clock.pop_due(target) {
            self.node_mut(owner).handle_timer(event);
            self.deliver_all();
        }
        self.clock.set_now(target);
    }

    /// Alice opens a session to Bob and both sides establish it.
    ///
    /// Returns Alice's handle and Bob's handle.
    pub fn connect(&mut self) -> (SessionHandle, SessionHandle) {
        let peer = self.bob_peer();
        let alice = self.alice.open_session(peer).unwrap();
        self.deliver_all();
        assert!(self.alice.is_established(alice), "handshake did not complete");
        let bob = *self
            .bob
            .delegate()
            .established
            .last()
            .expect("bob reported no session");
        (alice, bob)
    }
}
