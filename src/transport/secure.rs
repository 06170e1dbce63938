//! Secure transport façade.
//!
//! Owns every crypto session, handshake, Pending Exchange and Duplicate
//! Window. All state changes happen inside the calls below, which the owning
//! event loop makes one at a time:
//!
//! - [`SecureTransport::open_session`], [`send`](SecureTransport::send),
//!   [`close_session`](SecureTransport::close_session) from the application
//! - [`on_receive`](SecureTransport::on_receive) for every inbound datagram
//! - [`handle_timer`](SecureTransport::handle_timer) for every fired timer
//!
//! # Receive pipeline
//!
//! ```text
//! datagram ─► PacketHeader::decode ─┬─ session 0 ─► handshake routing
//!                                   └─ session n ─► CryptoSession::open
//!                                                        │
//!           PayloadHeader::decode ◄──────────────────────┘
//!                    │
//!        piggybacked ack ─► RetransmitQueue
//!                    │
//!        TLV decode ─► DuplicateFilter ─► ack scheduling ─► delegate
//! ```

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::core::{
    AEAD_TAG_SIZE, Link, MessageHandle, NodeId, PUBLIC_KEY_SIZE, Scheduler, SessionDelegate,
    SessionHandle, SessionId, TimerEvent,
};
use crate::crypto::{ChaChaPolySuite, CipherSuite, Role, StaticKeypair};
use crate::handshake::{
    Handshake, HandshakeError, HandshakeOutput, HandshakeReply, HandshakeStage, SessionKeys,
    session_id_of,
};
use crate::message::{HeaderError, MessageType, PacketHeader, PayloadHeader};
use crate::reliability::{DuplicateFilter, RetransmitQueue, RetryAction};
use crate::tlv::{self, Element};

use super::session_table::{
    HandshakeEntry, LogicalSession, PendingAck, SessionEntry, SessionTable,
};
use super::{Peer, TransportConfig, TransportError, TransportResult};

/// Which acknowledgment an outbound secured message carries.
#[derive(Debug, Clone, Copy)]
enum AckMode {
    /// Whatever acknowledgment is pending on the session, if any.
    Piggyback,
    /// This specific counter.
    Explicit(u32),
}

/// A sealed datagram ready for the link.
struct Outbound<A> {
    counter: u32,
    datagram: Vec<u8>,
    address: A,
}

/// Secure session transport over an abstract datagram link.
pub struct SecureTransport<L: Link, S: Scheduler, D: SessionDelegate> {
    config: TransportConfig,
    keypair: StaticKeypair,
    suite: Arc<dyn CipherSuite>,
    link: L,
    scheduler: S,
    delegate: D,
    table: SessionTable<L::Address>,
    retransmit: RetransmitQueue,
    duplicates: DuplicateFilter,
    /// Counter for handshake traffic on the unsecured session.
    unsecured_counter: u32,
}

impl<L, S, D> SecureTransport<L, S, D>
where
    L: Link,
    S: Scheduler,
    D: SessionDelegate,
{
    /// Create a transport using the default ChaCha20-Poly1305 suite.
    pub fn new(
        config: TransportConfig,
        keypair: StaticKeypair,
        link: L,
        scheduler: S,
        delegate: D,
    ) -> Self {
        let retransmit = RetransmitQueue::new(config.retry);
        let duplicates = DuplicateFilter::new(config.duplicate_window_size);
        Self {
            config,
            keypair,
            suite: Arc::new(ChaChaPolySuite),
            link,
            scheduler,
            delegate,
            table: SessionTable::new(),
            retransmit,
            duplicates,
            unsecured_counter: rand::random(),
        }
    }

    /// Replace the cipher suite used for sessions established from now on.
    pub fn with_suite(mut self, suite: Arc<dyn CipherSuite>) -> Self {
        self.suite = suite;
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Our static public key, which peers need to open sessions to us.
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.keypair.public_key()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    pub fn delegate_mut(&mut self) -> &mut D {
        &mut self.delegate
    }

    /// Session id currently carrying traffic for `handle`.
    pub fn session_id(&self, handle: SessionHandle) -> Option<SessionId> {
        self.table.logical(handle).and_then(|l| l.active)
    }

    /// Whether `handle` has an established session to send on.
    pub fn is_established(&self, handle: SessionHandle) -> bool {
        self.session_id(handle).is_some()
    }

    /// Stage of the handshake running for `handle`, if one is.
    pub fn handshake_stage(&self, handle: SessionHandle) -> Option<HandshakeStage> {
        let session_id = self.table.logical(handle)?.handshake?;
        self.table
            .handshake(session_id)
            .map(|entry| entry.handshake.stage())
    }

    /// Established crypto sessions, retiring ones included.
    pub fn session_count(&self) -> usize {
        self.table.session_count()
    }

    /// Handshakes in progress, on either side.
    pub fn handshake_count(&self) -> usize {
        self.table.handshake_count()
    }

    /// Reliable messages still awaiting acknowledgment.
    pub fn pending_exchanges(&self) -> usize {
        self.retransmit.len()
    }

    /// Start a session towards `peer`.
    ///
    /// Returns immediately with a handle; the delegate hears
    /// `on_session_established` or `on_session_failed` later.
    pub fn open_session(&mut self, peer: Peer<L::Address>) -> TransportResult<SessionHandle> {
        let handle = self.table.allocate_handle();
        self.table.insert_logical(handle, LogicalSession::new(peer));
        if let Err(err) = self.start_handshake(handle, None) {
            self.table.remove_logical(handle);
            return Err(err);
        }
        Ok(handle)
    }

    /// Encode, seal and send an application payload.
    ///
    /// With `require_ack` the message is retransmitted until acknowledged or
    /// the retry budget runs out, in which case the delegate hears
    /// `on_delivery_failed` with the returned handle. A link failure on a
    /// reliable send is treated as loss and left to the retransmission timer.
    ///
    /// # Errors
    /// - `UnknownHandle` / `SessionNotEstablished` for a bad handle
    /// - `MalformedPayload` if `payload` cannot be encoded
    /// - `MessageTooLarge` if the sealed datagram exceeds the limit
    /// - `CounterOverflow` once the session's counter space is spent; the
    ///   session is torn down and, on the initiator, a replacement handshake
    ///   starts under the same handle
    /// - `Link` if an unreliable send is refused
    pub fn send(
        &mut self,
        handle: SessionHandle,
        payload: &Element,
        require_ack: bool,
    ) -> TransportResult<MessageHandle> {
        let (session_id, rekey_idle) = {
            let logical = self
                .table
                .logical(handle)
                .ok_or(TransportError::UnknownHandle(handle))?;
            let session_id = logical
                .active
                .ok_or(TransportError::SessionNotEstablished(handle))?;
            (session_id, logical.handshake.is_none())
        };

        let body = tlv::encode(payload)?;
        let plaintext = PayloadHeader::new(MessageType::ApplicationData, require_ack).frame(&body);
        let Outbound {
            counter,
            datagram,
            address,
        } = match self.seal(session_id, &plaintext, AckMode::Piggyback) {
            Ok(outbound) => outbound,
            Err(TransportError::CounterOverflow) => {
                self.on_counter_overflow(session_id);
                return Err(TransportError::CounterOverflow);
            }
            Err(err) => return Err(err),
        };

        let message = self.retransmit.allocate_handle();
        trace!(%handle, %session_id, counter, message_handle = %message, require_ack, "sending application message");
        if require_ack {
            let now = self.scheduler.now();
            let delay = self
                .retransmit
                .register(message, session_id, counter, datagram.clone(), now);
            let timer = self
                .scheduler
                .schedule_after(delay, TimerEvent::Retransmit { session_id, counter });
            self.retransmit.set_timer(session_id, counter, timer);
            if let Err(err) = self.link.send(&datagram, &address) {
                debug!(message_handle = %message, error = %err, "link send failed, left to retransmission");
            }
        } else {
            self.link.send(&datagram, &address)?;
        }

        if rekey_idle {
            self.maybe_rekey(handle, session_id);
        }
        Ok(message)
    }

    /// Close a session, notifying the peer best-effort.
    ///
    /// Pending Exchanges are discarded without `on_delivery_failed`, their
    /// timers canceled, and any handshake for the handle abandoned.
    pub fn close_session(&mut self, handle: SessionHandle) -> TransportResult<()> {
        let logical = self
            .table
            .remove_logical(handle)
            .ok_or(TransportError::UnknownHandle(handle))?;

        if let Some(session_id) = logical.active {
            let plaintext = PayloadHeader::new(MessageType::SessionClose, false).frame(&[]);
            match self.seal(session_id, &plaintext, AckMode::Piggyback) {
                Ok(outbound) => {
                    if let Err(err) = self.link.send(&outbound.datagram, &outbound.address) {
                        debug!(%handle, error = %err, "session close notification not sent");
                    }
                }
                Err(err) => debug!(%handle, error = %err, "session close notification not sealed"),
            }
        }
        self.release(logical);
        info!(%handle, "session closed");
        Ok(())
    }

    /// Process one inbound datagram.
    ///
    /// Every inbound failure is local: nothing is sent in response and the
    /// transport stays usable. The error, if any, says why the datagram was
    /// dropped. Duplicates are dropped with `Ok`.
    pub fn on_receive(&mut self, datagram: &[u8], source: L::Address) -> TransportResult<()> {
        let result = self.receive(datagram, source);
        if let Err(err) = &result {
            debug!(error = %err, len = datagram.len(), "inbound datagram dropped");
        }
        result
    }

    /// Process a timer the scheduler fired.
    pub fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Retransmit {
                session_id,
                counter,
            } => self.on_retransmit_timer(session_id, counter),
            TimerEvent::StandaloneAck {
                session_id,
                counter,
            } => self.on_ack_timer(session_id, counter),
            TimerEvent::HandshakeStall { session_id } => self.on_handshake_stall(session_id),
            TimerEvent::RetiredLinger { session_id } => self.on_linger_elapsed(session_id),
        }
    }

    fn receive(&mut self, datagram: &[u8], source: L::Address) -> TransportResult<()> {
        let (header, rest) = PacketHeader::decode(datagram)?;
        if header.session_id.is_unsecured() {
            return self.receive_handshake(&header, rest, source);
        }

        let session_id = header.session_id;
        let counter = header.message_counter;
        let header_bytes = &datagram[..datagram.len() - rest.len()];
        let (handle, plaintext) = {
            let Some(entry) = self.table.session_mut(session_id) else {
                self.delegate.on_unknown_session(session_id);
                return Err(TransportError::UnknownSession(session_id));
            };
            (entry.handle, entry.crypto.open(header_bytes, rest, counter)?)
        };

        let (payload_header, body) = PayloadHeader::decode(&plaintext)?;
        if let Some(acked) = header.ack_counter {
            self.process_ack(session_id, acked);
        }
        let ack_requested = payload_header.exchange_flags.ack_requested();

        let result = match payload_header.message_type {
            MessageType::ApplicationData => {
                self.receive_application(handle, session_id, counter, ack_requested, body)
            }
            MessageType::StandaloneAck => {
                trace!(%session_id, counter, "standalone ack received");
                Ok(())
            }
            MessageType::SessionClose => {
                self.on_peer_close(handle, session_id);
                return Ok(());
            }
            other => Err(HeaderError::UnknownMessageType(other.as_byte()).into()),
        };
        self.reap_retired(handle);
        result
    }

    fn receive_application(
        &mut self,
        handle: SessionHandle,
        session_id: SessionId,
        counter: u32,
        ack_requested: bool,
        body: &[u8],
    ) -> TransportResult<()> {
        // Undecodable payloads are neither recorded nor acknowledged.
        let element = tlv::decode(body)?;

        if self.duplicates.is_duplicate(session_id, counter) {
            debug!(%session_id, counter, "duplicate message dropped");
            if ack_requested {
                self.send_standalone_ack(session_id, counter);
            }
            return Ok(());
        }

        if ack_requested {
            self.queue_ack(session_id, counter);
        }
        trace!(%handle, %session_id, counter, "delivering application message");
        self.delegate.on_message(handle, element);
        Ok(())
    }

    fn receive_handshake(
        &mut self,
        header: &PacketHeader,
        payload: &[u8],
        source: L::Address,
    ) -> TransportResult<()> {
        let (payload_header, body) = PayloadHeader::decode(payload)?;
        let message_type = payload_header.message_type;
        if !message_type.is_handshake() {
            return Err(HeaderError::UnknownMessageType(message_type.as_byte()).into());
        }
        let session_id = session_id_of(body)?;
        if session_id.is_unsecured() {
            return Err(TransportError::HandshakeVerificationFailed);
        }

        let fresh = self.table.handshake(session_id).is_none();
        if fresh {
            if message_type != MessageType::HandshakeInit {
                return Err(TransportError::UnknownSession(session_id));
            }
            if self.table.is_in_use(session_id) {
                debug!(%session_id, "handshake init for a session id already in use");
                return Err(TransportError::HandshakeVerificationFailed);
            }
            let pending = self.table.responder_handshake_count();
            if pending >= self.config.max_pending_handshakes {
                debug!(%session_id, pending, "handshake init dropped, responder limit reached");
                return Err(TransportError::TooManyHandshakes);
            }
            let handshake =
                Handshake::responder(session_id, &self.keypair, Arc::clone(&self.suite))?;
            let stall_timer = self.scheduler.schedule_after(
                self.config.handshake_timeout,
                TimerEvent::HandshakeStall { session_id },
            );
            self.table.insert_handshake(
                session_id,
                HandshakeEntry {
                    handle: None,
                    address: source.clone(),
                    node_id: header.source_node,
                    handshake,
                    stall_timer,
                },
            );
        }

        let result = {
            let entry = self
                .table
                .handshake_mut(session_id)
                .ok_or(TransportError::UnknownSession(session_id))?;
            if entry.address != source {
                return Err(TransportError::HandshakeVerificationFailed);
            }
            entry.handshake.handle(message_type, body)
        };

        match result {
            Ok(output) => {
                self.advance_handshake(session_id, output);
                Ok(())
            }
            Err(HandshakeError::Malformed(err)) => {
                if fresh {
                    self.discard_handshake(session_id);
                }
                Err(TransportError::MalformedPayload(err))
            }
            Err(err) => {
                self.fail_handshake(session_id, err.clone());
                Err(err.into())
            }
        }
    }

    fn start_handshake(
        &mut self,
        handle: SessionHandle,
        replaces: Option<SessionId>,
    ) -> TransportResult<SessionId> {
        let peer = self
            .table
            .logical(handle)
            .map(|l| l.peer.clone())
            .ok_or(TransportError::UnknownHandle(handle))?;
        let session_id = self
            .table
            .allocate_session_id()
            .ok_or(TransportError::NoSessionIdAvailable)?;

        let mut handshake = Handshake::initiator(
            session_id,
            &self.keypair,
            &peer.static_public_key,
            Arc::clone(&self.suite),
        )?;
        if let Some(old) = replaces {
            handshake = handshake.with_replaces(old);
        }
        let init = handshake.start()?;
        self.send_unsecured(&peer.address, peer.node_id, &init)?;

        let stall_timer = self.scheduler.schedule_after(
            self.config.handshake_timeout,
            TimerEvent::HandshakeStall { session_id },
        );
        self.table.insert_handshake(
            session_id,
            HandshakeEntry {
                handle: Some(handle),
                address: peer.address,
                node_id: peer.node_id,
                handshake,
                stall_timer,
            },
        );
        if let Some(logical) = self.table.logical_mut(handle) {
            logical.handshake = Some(session_id);
        }
        debug!(%handle, %session_id, rekey = replaces.is_some(), "handshake started");
        Ok(session_id)
    }

    fn advance_handshake(&mut self, session_id: SessionId, output: HandshakeOutput) {
        let (reply, keys) = match output {
            HandshakeOutput::Reply(reply) => (Some(reply), None),
            HandshakeOutput::ReplyAndEstablished(reply, keys) => (Some(reply), Some(keys)),
            HandshakeOutput::Established(keys) => (None, Some(keys)),
        };

        if let Some(reply) = reply {
            let destination = self
                .table
                .handshake(session_id)
                .map(|entry| (entry.address.clone(), entry.node_id));
            if let Some((address, node_id)) = destination {
                if let Err(err) = self.send_unsecured(&address, node_id, &reply) {
                    debug!(%session_id, error = %err, "handshake reply not sent");
                }
            }
        }
        if let Some(keys) = keys {
            self.install_session(session_id, keys);
        }
    }

    fn install_session(&mut self, session_id: SessionId, keys: SessionKeys) {
        let Some(entry) = self.table.remove_handshake(session_id) else {
            return;
        };
        self.scheduler.cancel(entry.stall_timer);

        let role = keys.role;
        let handle = match entry.handle {
            Some(handle) => handle,
            None => self.responder_handle(
                keys.replaces,
                &keys.peer_static_key,
                &entry.address,
                entry.node_id,
            ),
        };
        let now = self.scheduler.now();
        let replay_bound = u32::try_from(self.config.duplicate_window_size).unwrap_or(u32::MAX);
        let crypto = keys
            .into_session(Arc::clone(&self.suite), now)
            .with_replay_bound(replay_bound);

        let Some(logical) = self.table.logical_mut(handle) else {
            debug!(%handle, %session_id, "session established after its handle was closed");
            return;
        };
        let previous = logical.active.replace(session_id);
        if logical.handshake == Some(session_id) {
            logical.handshake = None;
        }
        if let Some(old) = previous {
            logical.retiring.push(old);
        }

        self.table.insert_session(
            session_id,
            SessionEntry {
                handle,
                address: entry.address,
                destination_node: entry.node_id,
                crypto,
                pending_ack: None,
                linger: None,
            },
        );

        match previous {
            Some(old) => {
                let linger = self.scheduler.schedule_after(
                    self.config.retry.exchange_lifetime(),
                    TimerEvent::RetiredLinger { session_id: old },
                );
                if let Some(retired) = self.table.session_mut(old) {
                    retired.linger = Some(linger);
                }
                info!(%handle, %session_id, retired = %old, "session rekeyed");
                self.reap_retired(handle);
            }
            None => {
                info!(%handle, %session_id, ?role, "session established");
                self.delegate.on_session_established(handle);
            }
        }
    }

    /// Handle for a session our peer just established with us.
    ///
    /// A rekey keeps the existing handle, but only when the replaced session
    /// authenticated the same static key.
    fn responder_handle(
        &mut self,
        replaces: Option<SessionId>,
        peer_static: &[u8; PUBLIC_KEY_SIZE],
        address: &L::Address,
        node_id: Option<NodeId>,
    ) -> SessionHandle {
        if let Some(old) = replaces {
            let existing = self.table.session(old).map(|entry| entry.handle);
            if let Some(handle) = existing {
                let same_peer = self.table.logical(handle).is_some_and(|l| {
                    l.active == Some(old) && l.peer.static_public_key == *peer_static
                });
                if same_peer {
                    return handle;
                }
            }
            debug!(replaced = %old, "rekey target not found, treating as a new session");
        }

        let handle = self.table.allocate_handle();
        let mut peer = Peer::new(address.clone(), *peer_static);
        peer.node_id = node_id;
        self.table.insert_logical(handle, LogicalSession::new(peer));
        handle
    }

    fn fail_handshake(&mut self, session_id: SessionId, reason: HandshakeError) {
        let Some(entry) = self.table.remove_handshake(session_id) else {
            return;
        };
        self.scheduler.cancel(entry.stall_timer);
        let Some(handle) = entry.handle else {
            debug!(%session_id, error = %reason, "inbound handshake abandoned");
            return;
        };

        let current = match self.table.logical_mut(handle) {
            Some(logical) => {
                if logical.handshake == Some(session_id) {
                    logical.handshake = None;
                }
                logical.active
            }
            None => return,
        };
        match current {
            Some(active) => {
                warn!(%handle, session_id = %active, error = %reason, "rekey failed, keeping current session");
            }
            None => {
                if let Some(logical) = self.table.remove_logical(handle) {
                    self.release(logical);
                }
                self.delegate.on_session_failed(handle, reason);
            }
        }
    }

    /// Forget a responder handshake that never got off the ground.
    fn discard_handshake(&mut self, session_id: SessionId) {
        if let Some(entry) = self.table.remove_handshake(session_id) {
            self.scheduler.cancel(entry.stall_timer);
        }
    }

    fn send_unsecured(
        &mut self,
        address: &L::Address,
        destination: Option<NodeId>,
        reply: &HandshakeReply,
    ) -> TransportResult<()> {
        let counter = self.unsecured_counter;
        self.unsecured_counter = self.unsecured_counter.wrapping_add(1);

        let mut header = PacketHeader::unsecured(counter);
        header.source_node = self.config.local_node_id;
        header.destination_node = destination;
        let mut datagram = header.encode();
        datagram.extend_from_slice(&PayloadHeader::new(reply.message_type, false).frame(&reply.payload));

        trace!(message_type = ?reply.message_type, len = datagram.len(), "sending handshake message");
        self.link.send(&datagram, address)?;
        Ok(())
    }

    /// Build and seal a secured datagram without sending it.
    fn seal(
        &mut self,
        session_id: SessionId,
        plaintext: &[u8],
        ack: AckMode,
    ) -> TransportResult<Outbound<L::Address>> {
        let limit = self.config.max_message_size;
        let local_node = self.config.local_node_id;
        let entry = self
            .table
            .session_mut(session_id)
            .ok_or(TransportError::UnknownSession(session_id))?;

        let ack_counter = match ack {
            AckMode::Piggyback => entry.pending_ack.map(|pending| pending.counter),
            AckMode::Explicit(counter) => Some(counter),
        };
        let mut header = PacketHeader::secured(session_id, 0);
        header.source_node = local_node;
        header.destination_node = entry.destination_node;
        header.ack_counter = ack_counter;

        let size = header.encoded_len() + plaintext.len() + AEAD_TAG_SIZE;
        if size > limit {
            return Err(TransportError::MessageTooLarge { size, limit });
        }

        header.message_counter = entry.crypto.next_send_counter()?;
        if let Some(pending) = entry
            .pending_ack
            .take_if(|pending| Some(pending.counter) == ack_counter)
        {
            self.scheduler.cancel(pending.timer);
        }

        let mut datagram = header.encode();
        let sealed = entry
            .crypto
            .seal(&datagram, plaintext, header.message_counter)?;
        datagram.extend_from_slice(&sealed);
        Ok(Outbound {
            counter: header.message_counter,
            datagram,
            address: entry.address.clone(),
        })
    }

    fn process_ack(&mut self, session_id: SessionId, counter: u32) {
        match self.retransmit.on_ack(session_id, counter) {
            Some(exchange) => {
                if let Some(timer) = exchange.timer {
                    self.scheduler.cancel(timer);
                }
            }
            None => trace!(%session_id, counter, "ack for unknown exchange ignored"),
        }
    }

    /// Hold an acknowledgment for piggybacking, flushing any older one.
    fn queue_ack(&mut self, session_id: SessionId, counter: u32) {
        let previous = self
            .table
            .session_mut(session_id)
            .and_then(|entry| entry.pending_ack.take());
        if let Some(previous) = previous {
            self.scheduler.cancel(previous.timer);
            self.send_standalone_ack(session_id, previous.counter);
        }

        let timer = self.scheduler.schedule_after(
            self.config.ack_delay,
            TimerEvent::StandaloneAck {
                session_id,
                counter,
            },
        );
        if let Some(entry) = self.table.session_mut(session_id) {
            entry.pending_ack = Some(PendingAck { counter, timer });
        }
    }

    fn send_standalone_ack(&mut self, session_id: SessionId, counter: u32) {
        let plaintext = PayloadHeader::new(MessageType::StandaloneAck, false).frame(&[]);
        match self.seal(session_id, &plaintext, AckMode::Explicit(counter)) {
            Ok(outbound) => {
                trace!(%session_id, acked = counter, counter = outbound.counter, "sending standalone ack");
                if let Err(err) = self.link.send(&outbound.datagram, &outbound.address) {
                    debug!(%session_id, error = %err, "standalone ack not sent");
                }
            }
            Err(TransportError::CounterOverflow) => self.on_counter_overflow(session_id),
            Err(err) => debug!(%session_id, error = %err, "standalone ack not sealed"),
        }
    }

    fn maybe_rekey(&mut self, handle: SessionHandle, session_id: SessionId) {
        let now = self.scheduler.now();
        let due = self.table.session(session_id).is_some_and(|entry| {
            entry.crypto.role() == Role::Initiator
                && entry.crypto.should_rekey(&self.config.rekey, now)
        });
        if !due {
            return;
        }
        info!(%handle, %session_id, "rekey due");
        if let Err(err) = self.start_handshake(handle, Some(session_id)) {
            warn!(%handle, error = %err, "rekey handshake not started");
        }
    }

    fn on_counter_overflow(&mut self, session_id: SessionId) {
        warn!(%session_id, "message counter exhausted, tearing session down");
        let Some(entry) = self.teardown(session_id) else {
            return;
        };
        let handle = entry.handle;
        let handshake_running = self
            .table
            .logical(handle)
            .is_some_and(|l| l.handshake.is_some());
        if handshake_running {
            return;
        }

        let restarted = match entry.crypto.role() {
            Role::Initiator => match self.start_handshake(handle, None) {
                Ok(_) => true,
                Err(err) => {
                    warn!(%handle, error = %err, "replacement handshake not started");
                    false
                }
            },
            Role::Responder => false,
        };
        if !restarted {
            if let Some(logical) = self.table.remove_logical(handle) {
                self.release(logical);
                self.delegate.on_session_closed(handle);
            }
        }
    }

    fn on_peer_close(&mut self, handle: SessionHandle, session_id: SessionId) {
        let was_active = self
            .table
            .logical(handle)
            .is_some_and(|l| l.active == Some(session_id));
        self.teardown(session_id);
        if !was_active {
            return;
        }
        if let Some(logical) = self.table.remove_logical(handle) {
            self.release(logical);
        }
        info!(%handle, %session_id, "session closed by peer");
        self.delegate.on_session_closed(handle);
    }

    fn on_retransmit_timer(&mut self, session_id: SessionId, counter: u32) {
        let now = self.scheduler.now();
        let Some(action) = self.retransmit.on_timer(session_id, counter, now) else {
            return;
        };
        let event = TimerEvent::Retransmit {
            session_id,
            counter,
        };

        let delay = match action {
            RetryAction::Resend {
                datagram,
                next_delay,
            } => {
                if let Some(entry) = self.table.session(session_id) {
                    if let Err(err) = self.link.send(&datagram, &entry.address) {
                        debug!(%session_id, counter, error = %err, "retransmission not sent");
                    }
                }
                next_delay
            }
            RetryAction::NotYet { remaining } => remaining,
            RetryAction::Exhausted { handle } => {
                warn!(message_handle = %handle, %session_id, counter, "delivery failed, retries exhausted");
                self.delegate.on_delivery_failed(handle);
                if let Some(owner) = self.table.session(session_id).map(|entry| entry.handle) {
                    self.reap_retired(owner);
                }
                return;
            }
        };
        let timer = self.scheduler.schedule_after(delay, event);
        self.retransmit.set_timer(session_id, counter, timer);
    }

    fn on_ack_timer(&mut self, session_id: SessionId, counter: u32) {
        let due = self.table.session_mut(session_id).and_then(|entry| {
            entry
                .pending_ack
                .take_if(|pending| pending.counter == counter)
        });
        if due.is_none() {
            return;
        }
        self.send_standalone_ack(session_id, counter);
        if let Some(owner) = self.table.session(session_id).map(|entry| entry.handle) {
            self.reap_retired(owner);
        }
    }

    fn on_linger_elapsed(&mut self, session_id: SessionId) {
        let Some(entry) = self.table.session_mut(session_id) else {
            return;
        };
        if entry.linger.take().is_none() {
            return;
        }
        let owner = entry.handle;
        trace!(%session_id, handle = %owner, "retired session linger elapsed");
        self.reap_retired(owner);
    }

    fn on_handshake_stall(&mut self, session_id: SessionId) {
        let stalled = self
            .table
            .handshake_mut(session_id)
            .is_some_and(|entry| entry.handshake.fail_stalled());
        if stalled {
            self.fail_handshake(session_id, HandshakeError::Timeout);
        }
    }

    /// Destroy retired sessions of `handle` once nothing depends on them.
    ///
    /// A retired session goes once the peer is known to hold the new keys
    /// (always after our Finished arrived as initiator, after the first
    /// authenticated message as responder), its Pending Exchanges and held
    /// ack have drained, and its linger timer has fired. The linger covers the
    /// full retry span of any exchange the peer started on the old keys.
    fn reap_retired(&mut self, handle: SessionHandle) {
        let Some(logical) = self.table.logical(handle) else {
            return;
        };
        if logical.retiring.is_empty() {
            return;
        }
        let peer_switched = logical
            .active
            .and_then(|active| self.table.session(active))
            .is_some_and(|entry| {
                entry.crypto.role() == Role::Initiator || entry.crypto.highest_received().is_some()
            });
        if !peer_switched {
            return;
        }

        let drained: Vec<SessionId> = logical
            .retiring
            .iter()
            .copied()
            .filter(|id| {
                self.retransmit.pending_for(*id) == 0
                    && self
                        .table
                        .session(*id)
                        .is_some_and(|entry| entry.linger.is_none() && entry.pending_ack.is_none())
            })
            .collect();
        for session_id in drained {
            debug!(%handle, %session_id, "retired session drained");
            self.teardown(session_id);
        }
    }

    /// Remove a crypto session with its acks, exchanges, window and timers.
    fn teardown(&mut self, session_id: SessionId) -> Option<SessionEntry<L::Address>> {
        let entry = self.table.remove_session(session_id)?;
        if let Some(pending) = entry.pending_ack {
            self.scheduler.cancel(pending.timer);
        }
        if let Some(linger) = entry.linger {
            self.scheduler.cancel(linger);
        }
        for exchange in self.retransmit.cancel_session(session_id) {
            if let Some(timer) = exchange.timer {
                self.scheduler.cancel(timer);
            }
        }
        self.duplicates.remove_session(session_id);
        if let Some(logical) = self.table.logical_mut(entry.handle) {
            logical.retiring.retain(|id| *id != session_id);
            if logical.active == Some(session_id) {
                logical.active = None;
            }
        }
        debug!(%session_id, handle = %entry.handle, "session torn down");
        Some(entry)
    }

    /// Tear down everything a removed logical session still refers to.
    fn release(&mut self, logical: LogicalSession<L::Address>) {
        if let Some(session_id) = logical.handshake {
            self.discard_handshake(session_id);
        }
        if let Some(session_id) = logical.active {
            self.teardown(session_id);
        }
        for session_id in logical.retiring {
            self.teardown(session_id);
        }
    }
}

impl<L, S, D> std::fmt::Debug for SecureTransport<L, S, D>
where
    L: Link,
    S: Scheduler,
    D: SessionDelegate,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureTransport")
            .field("suite", &self.suite.name())
            .field("sessions", &self.table.session_count())
            .field("handshakes", &self.table.handshake_count())
            .field("pending_exchanges", &self.retransmit.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::core::{LinkError, TimerHandle};

    #[derive(Default)]
    struct VecLink {
        sent: Vec<(Vec<u8>, u8)>,
    }

    impl Link for VecLink {
        type Address = u8;

        fn send(&mut self, datagram: &[u8], destination: &u8) -> Result<(), LinkError> {
            self.sent.push((datagram.to_vec(), *destination));
            Ok(())
        }
    }

    struct FixedClock {
        now: Instant,
        scheduled: Vec<(Duration, TimerEvent)>,
        canceled: Vec<TimerHandle>,
    }

    impl Scheduler for FixedClock {
        fn now(&self) -> Instant {
            self.now
        }

        fn schedule_after(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
            self.scheduled.push((delay, event));
            TimerHandle(self.scheduled.len() as u64)
        }

        fn cancel(&mut self, handle: TimerHandle) {
            self.canceled.push(handle);
        }
    }

    #[derive(Default)]
    struct Events {
        unknown: Vec<SessionId>,
        failed: Vec<(SessionHandle, HandshakeError)>,
    }

    impl SessionDelegate for Events {
        fn on_message(&mut self, _: SessionHandle, _: Element) {}
        fn on_session_established(&mut self, _: SessionHandle) {}
        fn on_session_failed(&mut self, session: SessionHandle, reason: HandshakeError) {
            self.failed.push((session, reason));
        }
        fn on_delivery_failed(&mut self, _: MessageHandle) {}
        fn on_unknown_session(&mut self, session_id: SessionId) {
            self.unknown.push(session_id);
        }
    }

    fn transport() -> SecureTransport<VecLink, FixedClock, Events> {
        transport_with(TransportConfig::default())
    }

    fn transport_with(config: TransportConfig) -> SecureTransport<VecLink, FixedClock, Events> {
        let clock = FixedClock {
            now: Instant::now(),
            scheduled: Vec::new(),
            canceled: Vec::new(),
        };
        SecureTransport::new(
            config,
            StaticKeypair::generate(),
            VecLink::default(),
            clock,
            Events::default(),
        )
    }

    #[test]
    fn test_open_session_sends_init() {
        let mut t = transport();
        let peer = StaticKeypair::generate();
        let handle = t.open_session(Peer::new(9, *peer.public_key())).unwrap();

        assert!(!t.is_established(handle));
        assert_eq!(
            t.handshake_stage(handle),
            Some(HandshakeStage::WaitingForResponderMessage1Ack)
        );
        let (datagram, dest) = &t.link().sent[0];
        assert_eq!(*dest, 9);
        let (header, rest) = PacketHeader::decode(datagram).unwrap();
        assert!(header.session_id.is_unsecured());
        let (payload, _) = PayloadHeader::decode(rest).unwrap();
        assert_eq!(payload.message_type, MessageType::HandshakeInit);
        assert!(matches!(
            t.scheduler().scheduled[0].1,
            TimerEvent::HandshakeStall { .. }
        ));
    }

    #[test]
    fn test_send_requires_established_session() {
        let mut t = transport();
        let peer = StaticKeypair::generate();
        let handle = t.open_session(Peer::new(1, *peer.public_key())).unwrap();
        let payload = Element::anonymous(1u8);
        assert_eq!(
            t.send(handle, &payload, true),
            Err(TransportError::SessionNotEstablished(handle))
        );
        assert_eq!(
            t.send(SessionHandle(999), &payload, true),
            Err(TransportError::UnknownHandle(SessionHandle(999)))
        );
    }

    #[test]
    fn test_garbage_is_dropped() {
        let mut t = transport();
        assert!(matches!(
            t.on_receive(&[1, 2, 3], 1),
            Err(TransportError::MalformedHeader(_))
        ));
        assert!(t.link().sent.is_empty());
    }

    #[test]
    fn test_unknown_session_reported() {
        let mut t = transport();
        let mut datagram = PacketHeader::secured(SessionId::new(0x5151), 3).encode();
        datagram.extend_from_slice(&[0u8; 24]);

        assert_eq!(
            t.on_receive(&datagram, 4),
            Err(TransportError::UnknownSession(SessionId::new(0x5151)))
        );
        assert_eq!(t.delegate().unknown, vec![SessionId::new(0x5151)]);
        assert!(t.link().sent.is_empty());
    }

    #[test]
    fn test_stray_handshake_reply_dropped() {
        let mut t = transport();
        let mut datagram = PacketHeader::unsecured(0).encode();
        let body = crate::handshake::HandshakeMessage {
            session_id: SessionId::new(0x0A0A),
            transcript: [0u8; 32],
            body: crate::handshake::HandshakeBody::Mac([0u8; 32]),
            replaces: None,
        }
        .encode()
        .unwrap();
        datagram.extend_from_slice(&PayloadHeader::new(MessageType::HandshakeFinished, false).frame(&body));

        assert_eq!(
            t.on_receive(&datagram, 2),
            Err(TransportError::UnknownSession(SessionId::new(0x0A0A)))
        );
        assert_eq!(t.handshake_count(), 0);
    }

    #[test]
    fn test_handshake_stall_reports_failure() {
        let mut t = transport();
        let peer = StaticKeypair::generate();
        let handle = t.open_session(Peer::new(1, *peer.public_key())).unwrap();
        let event = t.scheduler().scheduled[0].1;

        t.handle_timer(event);
        assert_eq!(t.delegate().failed, vec![(handle, HandshakeError::Timeout)]);
        assert_eq!(t.handshake_count(), 0);
        assert_eq!(
            t.send(handle, &Element::anonymous(true), false),
            Err(TransportError::UnknownHandle(handle))
        );
    }

    #[test]
    fn test_responder_handshake_limit() {
        let config = TransportConfig::builder().max_pending_handshakes(1).build();
        let mut target = transport_with(config);
        let mut first = transport();
        let mut second = transport();
        first.open_session(Peer::new(7, *target.public_key())).unwrap();
        second.open_session(Peer::new(7, *target.public_key())).unwrap();

        // Our own outbound handshakes do not count against the limit.
        let other = StaticKeypair::generate();
        target.open_session(Peer::new(3, *other.public_key())).unwrap();
        let sent_before = target.link().sent.len();

        let init = first.link().sent[0].0.clone();
        target.on_receive(&init, 1).unwrap();
        assert_eq!(target.handshake_count(), 2);
        assert_eq!(target.link().sent.len(), sent_before + 1);

        let init = second.link().sent[0].0.clone();
        assert_eq!(
            target.on_receive(&init, 2),
            Err(TransportError::TooManyHandshakes)
        );
        assert_eq!(target.handshake_count(), 2);
        assert_eq!(target.link().sent.len(), sent_before + 1, "no reply to a dropped init");
    }

    #[test]
    fn test_close_abandons_handshake() {
        let mut t = transport();
        let peer = StaticKeypair::generate();
        let handle = t.open_session(Peer::new(1, *peer.public_key())).unwrap();
        t.close_session(handle).unwrap();
        assert_eq!(t.handshake_count(), 0);
        assert_eq!(t.scheduler().canceled.len(), 1);
        assert_eq!(
            t.close_session(handle),
            Err(TransportError::UnknownHandle(handle))
        );
    }
}
