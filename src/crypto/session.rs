//! Crypto session: per-direction keys, counters and replay bound.
//!
//! A `CryptoSession` is created by the handshake, owned by the transport and
//! destroyed on teardown or after being replaced by a rekey.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::{CryptoError, DEFAULT_DUPLICATE_WINDOW_SIZE, SessionId};

use super::{
    CipherSuite, RekeyPolicy, Role, SessionKey,
    nonce::{Direction, construct_nonce},
};

/// Established symmetric state for one session.
pub struct CryptoSession {
    session_id: SessionId,
    role: Role,
    send_key: SessionKey,
    recv_key: SessionKey,
    suite: Arc<dyn CipherSuite>,
    /// Next outbound counter; `None` once the counter space is spent.
    next_send: Option<u32>,
    messages_sent: u64,
    highest_received: Option<u32>,
    /// Counters this far below the highest authenticated one are rejected.
    replay_bound: u32,
    established_at: Instant,
}

impl CryptoSession {
    /// Build a session from the two directional keys.
    ///
    /// The initiator sends with `initiator_key`; the responder with
    /// `responder_key`.
    pub fn new(
        session_id: SessionId,
        role: Role,
        initiator_key: SessionKey,
        responder_key: SessionKey,
        suite: Arc<dyn CipherSuite>,
        established_at: Instant,
    ) -> Self {
        let (send_key, recv_key) = match role {
            Role::Initiator => (initiator_key, responder_key),
            Role::Responder => (responder_key, initiator_key),
        };
        Self {
            session_id,
            role,
            send_key,
            recv_key,
            suite,
            next_send: Some(0),
            messages_sent: 0,
            highest_received: None,
            replay_bound: DEFAULT_DUPLICATE_WINDOW_SIZE as u32,
            established_at,
        }
    }

    /// Set how far below the highest received counter messages are accepted.
    pub fn with_replay_bound(mut self, bound: u32) -> Self {
        self.replay_bound = bound.max(1);
        self
    }

    /// Start the outbound counter somewhere other than zero.
    pub fn with_initial_send_counter(mut self, counter: u32) -> Self {
        self.next_send = Some(counter);
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn suite_name(&self) -> &'static str {
        self.suite.name()
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.established_at)
    }

    pub fn highest_received(&self) -> Option<u32> {
        self.highest_received
    }

    /// Whether the rekey policy has fired for this session.
    pub fn should_rekey(&self, policy: &RekeyPolicy, now: Instant) -> bool {
        policy.is_due(self.messages_sent, self.age(now))
    }

    fn send_direction(&self) -> Direction {
        match self.role {
            Role::Initiator => Direction::InitiatorToResponder,
            Role::Responder => Direction::ResponderToInitiator,
        }
    }

    fn recv_direction(&self) -> Direction {
        self.send_direction().opposite()
    }

    /// Reserve the next outbound counter.
    ///
    /// # Errors
    /// `CounterOverflow` once every counter value has been used. The session
    /// must then be torn down; counters never wrap.
    pub fn next_send_counter(&mut self) -> Result<u32, CryptoError> {
        let counter = self.next_send.ok_or(CryptoError::CounterOverflow)?;
        self.next_send = counter.checked_add(1);
        self.messages_sent += 1;
        Ok(counter)
    }

    /// Nonce used for an outbound message with `counter`.
    pub fn send_nonce(&self, counter: u32) -> [u8; crate::core::AEAD_NONCE_SIZE] {
        construct_nonce(self.send_direction(), self.session_id, counter)
    }

    /// Seal `plaintext` with the encoded packet header as associated data.
    pub fn seal(
        &self,
        header_bytes: &[u8],
        plaintext: &[u8],
        counter: u32,
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.send_nonce(counter);
        self.suite
            .seal(&self.send_key, &nonce, header_bytes, plaintext)
    }

    /// Authenticate and decrypt an inbound message.
    ///
    /// Counters at or beyond the replay bound below the highest authenticated
    /// counter are rejected before any AEAD work, with the same error as a
    /// tag mismatch.
    pub fn open(
        &mut self,
        header_bytes: &[u8],
        ciphertext: &[u8],
        counter: u32,
    ) -> Result<Vec<u8>, CryptoError> {
        if let Some(highest) = self.highest_received {
            if counter < highest && highest - counter >= self.replay_bound {
                return Err(CryptoError::AuthenticationFailure);
            }
        }

        let nonce = construct_nonce(self.recv_direction(), self.session_id, counter);
        let plaintext = self
            .suite
            .open(&self.recv_key, &nonce, header_bytes, ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailure)?;

        self.highest_received = Some(self.highest_received.map_or(counter, |h| h.max(counter)));
        Ok(plaintext)
    }
}

impl std::fmt::Debug for CryptoSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoSession")
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("suite", &self.suite_name())
            .field("next_send", &self.next_send)
            .field("highest_received", &self.highest_received)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::crypto::ChaChaPolySuite;

    fn session_pair() -> (CryptoSession, CryptoSession) {
        let suite: Arc<dyn CipherSuite> = Arc::new(ChaChaPolySuite);
        let i_key = SessionKey::from_bytes([1u8; 32]);
        let r_key = SessionKey::from_bytes([2u8; 32]);
        let now = Instant::now();
        let sid = SessionId::new(0x0102);
        let initiator = CryptoSession::new(
            sid,
            Role::Initiator,
            i_key.clone(),
            r_key.clone(),
            suite.clone(),
            now,
        );
        let responder = CryptoSession::new(sid, Role::Responder, i_key, r_key, suite, now);
        (initiator, responder)
    }

    #[test]
    fn test_seal_open_both_directions() {
        let (mut initiator, mut responder) = session_pair();

        let c = initiator.next_send_counter().unwrap();
        let sealed = initiator.seal(b"hdr", b"ping", c).unwrap();
        assert_eq!(responder.open(b"hdr", &sealed, c).unwrap(), b"ping");

        let c = responder.next_send_counter().unwrap();
        let sealed = responder.seal(b"hdr", b"pong", c).unwrap();
        assert_eq!(initiator.open(b"hdr", &sealed, c).unwrap(), b"pong");
    }

    #[test]
    fn test_own_direction_rejected() {
        let (mut initiator, _) = session_pair();
        let c = initiator.next_send_counter().unwrap();
        let sealed = initiator.seal(b"hdr", b"loop", c).unwrap();
        assert_eq!(
            initiator.open(b"hdr", &sealed, c),
            Err(CryptoError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_wrong_counter_rejected() {
        let (mut initiator, mut responder) = session_pair();
        let c = initiator.next_send_counter().unwrap();
        let sealed = initiator.seal(b"hdr", b"x", c).unwrap();
        assert_eq!(
            responder.open(b"hdr", &sealed, c + 1),
            Err(CryptoError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_every_bit_flip_fails() {
        let (mut initiator, mut responder) = session_pair();
        let header = [0xAAu8; 7];
        let c = initiator.next_send_counter().unwrap();
        let sealed = initiator.seal(&header, b"sensitive", c).unwrap();

        for i in 0..sealed.len() * 8 {
            let mut tampered = sealed.clone();
            tampered[i / 8] ^= 1 << (i % 8);
            assert_eq!(
                responder.open(&header, &tampered, c),
                Err(CryptoError::AuthenticationFailure)
            );
        }
        for i in 0..header.len() * 8 {
            let mut tampered = header;
            tampered[i / 8] ^= 1 << (i % 8);
            assert_eq!(
                responder.open(&tampered, &sealed, c),
                Err(CryptoError::AuthenticationFailure)
            );
        }
        assert!(responder.open(&header, &sealed, c).is_ok());
    }

    #[test]
    fn test_nonce_unique_across_sends() {
        let (mut initiator, _) = session_pair();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let c = initiator.next_send_counter().unwrap();
            assert!(seen.insert(initiator.send_nonce(c)));
        }
        assert_eq!(initiator.messages_sent(), 10_000);
    }

    #[test]
    fn test_counter_overflow() {
        let (initiator, _) = session_pair();
        let mut initiator = initiator.with_initial_send_counter(u32::MAX - 1);
        assert_eq!(initiator.next_send_counter(), Ok(u32::MAX - 1));
        assert_eq!(initiator.next_send_counter(), Ok(u32::MAX));
        assert_eq!(
            initiator.next_send_counter(),
            Err(CryptoError::CounterOverflow)
        );
        assert_eq!(
            initiator.next_send_counter(),
            Err(CryptoError::CounterOverflow)
        );
    }

    #[test]
    fn test_replay_bound() {
        let (mut initiator, responder) = session_pair();
        let mut responder = responder.with_replay_bound(4);

        let mut sealed = Vec::new();
        for _ in 0..10 {
            let c = initiator.next_send_counter().unwrap();
            sealed.push((c, initiator.seal(b"h", b"m", c).unwrap()));
        }
        let (c9, m9) = &sealed[9];
        responder.open(b"h", m9, *c9).unwrap();
        assert_eq!(responder.highest_received(), Some(9));

        // 9 - 6 = 3 < 4: accepted
        let (c6, m6) = &sealed[6];
        assert!(responder.open(b"h", m6, *c6).is_ok());
        // 9 - 5 = 4: outside the bound
        let (c5, m5) = &sealed[5];
        assert_eq!(
            responder.open(b"h", m5, *c5),
            Err(CryptoError::AuthenticationFailure)
        );
        assert_eq!(responder.highest_received(), Some(9));
    }

    #[test]
    fn test_debug_names_suite_without_keys() {
        let (initiator, _) = session_pair();
        let shown = format!("{initiator:?}");
        assert!(shown.contains(initiator.suite_name()));
        assert!(!shown.contains("key"));
    }

    #[test]
    fn test_rekey_due_by_count() {
        let (mut initiator, _) = session_pair();
        let policy = RekeyPolicy::disabled().with_after_messages(3);
        let now = Instant::now();
        for _ in 0..2 {
            initiator.next_send_counter().unwrap();
        }
        assert!(!initiator.should_rekey(&policy, now));
        initiator.next_send_counter().unwrap();
        assert!(initiator.should_rekey(&policy, now));
    }
}
