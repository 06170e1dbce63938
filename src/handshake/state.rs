//! Session establishment state machine.
//!
//! ```text
//! Initiator                                          Responder
//!   Idle
//!    | start() ----------- HandshakeInit ----------->  AwaitingInitiatorMessage1
//!   WaitingForResponderMessage1Ack                       |
//!    | <------------- HandshakeResponse ------------   AwaitingInitiatorConfirmation
//!   WaitingForResponderFinished                          |
//!    | ------------- HandshakeConfirm -------------->  Established
//!    | <------------- HandshakeFinished ------------
//!   Established
//! ```
//!
//! Every message carries the hash of all earlier messages. A message of the
//! wrong type for the current state, a transcript mismatch, a bad MAC or a
//! Noise failure moves the machine to `Failed(VerificationFailed)`. A message
//! whose TLV body does not parse is rejected without changing state.

use std::mem;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{HASH_SIZE, PUBLIC_KEY_SIZE, SessionId};
use crate::crypto::{CipherSuite, CryptoSession, Role, SessionKey, StaticKeypair};
use crate::message::MessageType;

use super::HandshakeError;
use super::messages::{HandshakeBody, HandshakeMessage};
use super::noise::NoiseHandshake;
use super::transcript::{
    DerivedKeys, INITIATOR_CONFIRM_LABEL, RESPONDER_CONFIRM_LABEL, Transcript, confirmation_mac,
    derive_keys, verify_confirmation,
};

/// Observable handshake stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeStage {
    Idle,
    WaitingForResponderMessage1Ack,
    WaitingForResponderFinished,
    AwaitingInitiatorMessage1,
    AwaitingInitiatorConfirmation,
    Established,
    Failed,
}

enum State {
    Idle {
        noise: NoiseHandshake,
    },
    WaitingForResponderMessage1Ack {
        noise: NoiseHandshake,
        transcript: Transcript,
    },
    WaitingForResponderFinished {
        keys: DerivedKeys,
        peer_static: [u8; PUBLIC_KEY_SIZE],
        transcript: Transcript,
    },
    AwaitingInitiatorMessage1 {
        noise: NoiseHandshake,
    },
    AwaitingInitiatorConfirmation {
        keys: DerivedKeys,
        peer_static: [u8; PUBLIC_KEY_SIZE],
        transcript: Transcript,
    },
    Established,
    Failed(HandshakeError),
}

impl State {
    fn stage(&self) -> HandshakeStage {
        match self {
            State::Idle { .. } => HandshakeStage::Idle,
            State::WaitingForResponderMessage1Ack { .. } => {
                HandshakeStage::WaitingForResponderMessage1Ack
            }
            State::WaitingForResponderFinished { .. } => HandshakeStage::WaitingForResponderFinished,
            State::AwaitingInitiatorMessage1 { .. } => HandshakeStage::AwaitingInitiatorMessage1,
            State::AwaitingInitiatorConfirmation { .. } => {
                HandshakeStage::AwaitingInitiatorConfirmation
            }
            State::Established => HandshakeStage::Established,
            State::Failed(_) => HandshakeStage::Failed,
        }
    }
}

/// Keys and identity produced by a completed handshake.
pub struct SessionKeys {
    pub session_id: SessionId,
    pub role: Role,
    /// Peer's static public key, as authenticated by Noise.
    pub peer_static_key: [u8; PUBLIC_KEY_SIZE],
    /// Earlier session this one rekeys, as named by the initiator.
    pub replaces: Option<SessionId>,
    initiator_key: SessionKey,
    responder_key: SessionKey,
}

impl SessionKeys {
    /// Build the crypto session these keys describe.
    pub fn into_session(
        self,
        suite: Arc<dyn CipherSuite>,
        established_at: std::time::Instant,
    ) -> CryptoSession {
        CryptoSession::new(
            self.session_id,
            self.role,
            self.initiator_key,
            self.responder_key,
            suite,
            established_at,
        )
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("replaces", &self.replaces)
            .finish_non_exhaustive()
    }
}

/// A handshake message to send back on the unsecured session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReply {
    pub message_type: MessageType,
    pub payload: Vec<u8>,
}

/// Result of feeding one message to the state machine.
#[derive(Debug)]
pub enum HandshakeOutput {
    /// Send this and keep waiting.
    Reply(HandshakeReply),
    /// Send this; the session is established on our side.
    ReplyAndEstablished(HandshakeReply, SessionKeys),
    /// Established; nothing to send.
    Established(SessionKeys),
}

/// One side of a session establishment.
pub struct Handshake {
    session_id: SessionId,
    role: Role,
    replaces: Option<SessionId>,
    suite: Arc<dyn CipherSuite>,
    state: State,
}

impl Handshake {
    /// Prepare an initiator for `session_id` towards a peer with the given
    /// static key. Call [`start`](Self::start) to produce the first message.
    pub fn initiator(
        session_id: SessionId,
        local: &StaticKeypair,
        peer_static_key: &[u8; PUBLIC_KEY_SIZE],
        suite: Arc<dyn CipherSuite>,
    ) -> Result<Self, HandshakeError> {
        let noise = NoiseHandshake::initiator(local, peer_static_key, session_id)?;
        Ok(Self {
            session_id,
            role: Role::Initiator,
            replaces: None,
            suite,
            state: State::Idle { noise },
        })
    }

    /// Prepare a responder for the session proposed by an incoming Init.
    pub fn responder(
        session_id: SessionId,
        local: &StaticKeypair,
        suite: Arc<dyn CipherSuite>,
    ) -> Result<Self, HandshakeError> {
        let noise = NoiseHandshake::responder(local, session_id)?;
        Ok(Self {
            session_id,
            role: Role::Responder,
            replaces: None,
            suite,
            state: State::AwaitingInitiatorMessage1 { noise },
        })
    }

    /// Mark this handshake as a rekey of an established session.
    pub fn with_replaces(mut self, session_id: SessionId) -> Self {
        self.replaces = Some(session_id);
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn replaces(&self) -> Option<SessionId> {
        self.replaces
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn stage(&self) -> HandshakeStage {
        self.state.stage()
    }

    /// Failure reason, once failed.
    pub fn failure(&self) -> Option<&HandshakeError> {
        match &self.state {
            State::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Produce the Init message. Only valid in `Idle`.
    pub fn start(&mut self) -> Result<HandshakeReply, HandshakeError> {
        let state = mem::replace(&mut self.state, State::Failed(HandshakeError::Aborted));
        let State::Idle { mut noise } = state else {
            self.state = state;
            return Err(HandshakeError::VerificationFailed);
        };

        match init_message(self.session_id, self.replaces, &mut noise) {
            Ok((transcript, payload)) => {
                self.state = State::WaitingForResponderMessage1Ack { noise, transcript };
                Ok(HandshakeReply {
                    message_type: MessageType::HandshakeInit,
                    payload,
                })
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Feed one received handshake message.
    pub fn handle(
        &mut self,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<HandshakeOutput, HandshakeError> {
        if matches!(self.state, State::Established | State::Failed(_)) {
            return Err(HandshakeError::VerificationFailed);
        }

        // A body that does not parse is dropped; it cannot advance or fail us.
        let message = HandshakeMessage::decode(message_type, payload).map_err(|err| {
            debug!(session_id = %self.session_id, error = %err, "malformed handshake message");
            HandshakeError::Malformed(err)
        })?;

        let state = mem::replace(&mut self.state, State::Failed(HandshakeError::Aborted));
        match self.transition(state, message_type, &message, payload) {
            Ok((next, output)) => {
                self.state = next;
                Ok(output)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Stall timer fired. Moves any non-terminal state to `Failed(Timeout)`.
    ///
    /// Returns `true` if the handshake was still in progress.
    pub fn fail_stalled(&mut self) -> bool {
        if matches!(self.state, State::Established | State::Failed(_)) {
            return false;
        }
        self.fail(HandshakeError::Timeout);
        true
    }

    fn fail(&mut self, err: HandshakeError) -> HandshakeError {
        warn!(
            session_id = %self.session_id,
            role = ?self.role,
            error = %err,
            "handshake failed"
        );
        self.state = State::Failed(err.clone());
        err
    }

    fn transition(
        &mut self,
        state: State,
        message_type: MessageType,
        message: &HandshakeMessage,
        payload: &[u8],
    ) -> Result<(State, HandshakeOutput), HandshakeError> {
        if message.session_id != self.session_id {
            return Err(HandshakeError::VerificationFailed);
        }

        match (state, message_type, &message.body) {
            (
                State::AwaitingInitiatorMessage1 { mut noise },
                MessageType::HandshakeInit,
                HandshakeBody::Noise(noise_msg),
            ) => {
                let mut transcript = Transcript::new();
                expect_transcript(&transcript, message)?;
                transcript.absorb(message_type, payload);

                noise.read_message(noise_msg)?;
                let peer_static = noise
                    .remote_static()
                    .ok_or(HandshakeError::VerificationFailed)?;
                self.replaces = message.replaces;
                let reply = HandshakeMessage {
                    session_id: self.session_id,
                    transcript: transcript.hash(),
                    body: HandshakeBody::Noise(noise.write_message()?),
                    replaces: None,
                };
                let reply_payload = reply.encode()?;
                transcript.absorb(MessageType::HandshakeResponse, &reply_payload);

                let keys = self.derive(&noise, &transcript)?;
                Ok((
                    State::AwaitingInitiatorConfirmation {
                        keys,
                        peer_static,
                        transcript,
                    },
                    HandshakeOutput::Reply(HandshakeReply {
                        message_type: MessageType::HandshakeResponse,
                        payload: reply_payload,
                    }),
                ))
            }

            (
                State::WaitingForResponderMessage1Ack {
                    mut noise,
                    mut transcript,
                },
                MessageType::HandshakeResponse,
                HandshakeBody::Noise(noise_msg),
            ) => {
                expect_transcript(&transcript, message)?;
                transcript.absorb(message_type, payload);

                noise.read_message(noise_msg)?;
                let peer_static = noise
                    .remote_static()
                    .ok_or(HandshakeError::VerificationFailed)?;
                let keys = self.derive(&noise, &transcript)?;

                let confirm_input = transcript.hash();
                let confirm = HandshakeMessage {
                    session_id: self.session_id,
                    transcript: confirm_input,
                    body: HandshakeBody::Mac(confirmation_mac(
                        &keys.confirm,
                        INITIATOR_CONFIRM_LABEL,
                        &confirm_input,
                    )?),
                    replaces: None,
                };
                let confirm_payload = confirm.encode()?;
                transcript.absorb(MessageType::HandshakeConfirm, &confirm_payload);

                Ok((
                    State::WaitingForResponderFinished {
                        keys,
                        peer_static,
                        transcript,
                    },
                    HandshakeOutput::Reply(HandshakeReply {
                        message_type: MessageType::HandshakeConfirm,
                        payload: confirm_payload,
                    }),
                ))
            }

            (
                State::AwaitingInitiatorConfirmation {
                    keys,
                    peer_static,
                    mut transcript,
                },
                MessageType::HandshakeConfirm,
                HandshakeBody::Mac(mac),
            ) => {
                let expected = expect_transcript(&transcript, message)?;
                if !verify_confirmation(&keys.confirm, INITIATOR_CONFIRM_LABEL, &expected, mac) {
                    return Err(HandshakeError::VerificationFailed);
                }
                transcript.absorb(message_type, payload);

                let finished_input = transcript.hash();
                let finished = HandshakeMessage {
                    session_id: self.session_id,
                    transcript: finished_input,
                    body: HandshakeBody::Mac(confirmation_mac(
                        &keys.confirm,
                        RESPONDER_CONFIRM_LABEL,
                        &finished_input,
                    )?),
                    replaces: None,
                };
                let finished_payload = finished.encode()?;

                Ok((
                    State::Established,
                    HandshakeOutput::ReplyAndEstablished(
                        HandshakeReply {
                            message_type: MessageType::HandshakeFinished,
                            payload: finished_payload,
                        },
                        self.session_keys(keys, peer_static),
                    ),
                ))
            }

            (
                State::WaitingForResponderFinished {
                    keys,
                    peer_static,
                    transcript,
                },
                MessageType::HandshakeFinished,
                HandshakeBody::Mac(mac),
            ) => {
                let expected = expect_transcript(&transcript, message)?;
                if !verify_confirmation(&keys.confirm, RESPONDER_CONFIRM_LABEL, &expected, mac) {
                    return Err(HandshakeError::VerificationFailed);
                }
                Ok((
                    State::Established,
                    HandshakeOutput::Established(self.session_keys(keys, peer_static)),
                ))
            }

            // Out-of-order, replayed, or wrong-role message.
            _ => Err(HandshakeError::VerificationFailed),
        }
    }

    fn derive(
        &self,
        noise: &NoiseHandshake,
        transcript: &Transcript,
    ) -> Result<DerivedKeys, HandshakeError> {
        if !noise.is_finished() {
            return Err(HandshakeError::VerificationFailed);
        }
        Ok(derive_keys(
            &self.suite,
            self.session_id,
            &noise.handshake_hash(),
            &transcript.hash(),
        )?)
    }

    fn session_keys(&self, keys: DerivedKeys, peer_static: [u8; PUBLIC_KEY_SIZE]) -> SessionKeys {
        SessionKeys {
            session_id: self.session_id,
            role: self.role,
            peer_static_key: peer_static,
            replaces: self.replaces,
            initiator_key: keys.initiator,
            responder_key: keys.responder,
        }
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("stage", &self.stage())
            .finish()
    }
}

fn init_message(
    session_id: SessionId,
    replaces: Option<SessionId>,
    noise: &mut NoiseHandshake,
) -> Result<(Transcript, Vec<u8>), HandshakeError> {
    let mut transcript = Transcript::new();
    let msg = HandshakeMessage {
        session_id,
        transcript: transcript.hash(),
        body: HandshakeBody::Noise(noise.write_message()?),
        replaces,
    };
    let payload = msg.encode()?;
    transcript.absorb(MessageType::HandshakeInit, &payload);
    Ok((transcript, payload))
}

/// Check the message's transcript field against ours and return it.
fn expect_transcript(
    transcript: &Transcript,
    message: &HandshakeMessage,
) -> Result<[u8; HASH_SIZE], HandshakeError> {
    let expected = transcript.hash();
    if message.transcript != expected {
        return Err(HandshakeError::VerificationFailed);
    }
    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ChaChaPolySuite;

    fn suite() -> Arc<dyn CipherSuite> {
        Arc::new(ChaChaPolySuite)
    }

    struct Pair {
        initiator: Handshake,
        responder: Handshake,
        init: HandshakeReply,
    }

    fn pair(sid: u16) -> Pair {
        let i_keys = StaticKeypair::generate();
        let r_keys = StaticKeypair::generate();
        let sid = SessionId::new(sid);
        let mut initiator = Handshake::initiator(sid, &i_keys, r_keys.public_key(), suite()).unwrap();
        let responder = Handshake::responder(sid, &r_keys, suite()).unwrap();
        assert_eq!(initiator.stage(), HandshakeStage::Idle);
        let init = initiator.start().unwrap();
        Pair {
            initiator,
            responder,
            init,
        }
    }

    fn reply(output: HandshakeOutput) -> HandshakeReply {
        match output {
            HandshakeOutput::Reply(r) => r,
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn test_full_handshake() {
        let Pair {
            mut initiator,
            mut responder,
            init,
        } = pair(0x1001);
        assert_eq!(initiator.stage(), HandshakeStage::WaitingForResponderMessage1Ack);
        assert_eq!(responder.stage(), HandshakeStage::AwaitingInitiatorMessage1);

        let response = reply(responder.handle(init.message_type, &init.payload).unwrap());
        assert_eq!(response.message_type, MessageType::HandshakeResponse);
        assert_eq!(responder.stage(), HandshakeStage::AwaitingInitiatorConfirmation);

        let confirm = reply(
            initiator
                .handle(response.message_type, &response.payload)
                .unwrap(),
        );
        assert_eq!(confirm.message_type, MessageType::HandshakeConfirm);
        assert_eq!(initiator.stage(), HandshakeStage::WaitingForResponderFinished);

        let (finished, responder_keys) =
            match responder.handle(confirm.message_type, &confirm.payload).unwrap() {
                HandshakeOutput::ReplyAndEstablished(r, k) => (r, k),
                other => panic!("unexpected {other:?}"),
            };
        assert_eq!(responder.stage(), HandshakeStage::Established);

        let initiator_keys = match initiator
            .handle(finished.message_type, &finished.payload)
            .unwrap()
        {
            HandshakeOutput::Established(k) => k,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(initiator.stage(), HandshakeStage::Established);

        // Keys agree: the initiator's send key opens on the responder.
        let now = std::time::Instant::now();
        let mut i_session = initiator_keys.into_session(suite(), now);
        let mut r_session = responder_keys.into_session(suite(), now);
        let c = i_session.next_send_counter().unwrap();
        let sealed = i_session.seal(b"h", b"hi", c).unwrap();
        assert_eq!(r_session.open(b"h", &sealed, c).unwrap(), b"hi");
    }

    #[test]
    fn test_replayed_response_fails() {
        let Pair {
            mut initiator,
            mut responder,
            init,
        } = pair(0x1002);
        let response = reply(responder.handle(init.message_type, &init.payload).unwrap());
        initiator
            .handle(response.message_type, &response.payload)
            .unwrap();

        let err = initiator
            .handle(response.message_type, &response.payload)
            .unwrap_err();
        assert_eq!(err, HandshakeError::VerificationFailed);
        assert_eq!(initiator.stage(), HandshakeStage::Failed);
        assert_eq!(initiator.failure(), Some(&HandshakeError::VerificationFailed));
    }

    #[test]
    fn test_replayed_init_fails_responder() {
        let Pair {
            mut responder,
            init,
            ..
        } = pair(0x1003);
        responder.handle(init.message_type, &init.payload).unwrap();
        assert_eq!(
            responder.handle(init.message_type, &init.payload).unwrap_err(),
            HandshakeError::VerificationFailed
        );
        assert_eq!(responder.stage(), HandshakeStage::Failed);
    }

    #[test]
    fn test_tampered_transcript_fails() {
        let Pair {
            mut initiator,
            mut responder,
            init,
        } = pair(0x1004);
        let response = reply(responder.handle(init.message_type, &init.payload).unwrap());
        let mut msg = HandshakeMessage::decode(response.message_type, &response.payload).unwrap();
        msg.transcript[0] ^= 0xFF;
        let tampered = msg.encode().unwrap();
        assert_eq!(
            initiator.handle(response.message_type, &tampered).unwrap_err(),
            HandshakeError::VerificationFailed
        );
    }

    #[test]
    fn test_bad_confirmation_mac_fails() {
        let Pair {
            mut initiator,
            mut responder,
            init,
        } = pair(0x1005);
        let response = reply(responder.handle(init.message_type, &init.payload).unwrap());
        let confirm = reply(
            initiator
                .handle(response.message_type, &response.payload)
                .unwrap(),
        );
        let mut msg = HandshakeMessage::decode(confirm.message_type, &confirm.payload).unwrap();
        msg.body = HandshakeBody::Mac([0u8; HASH_SIZE]);
        let forged = msg.encode().unwrap();
        assert_eq!(
            responder.handle(confirm.message_type, &forged).unwrap_err(),
            HandshakeError::VerificationFailed
        );
        assert_eq!(responder.stage(), HandshakeStage::Failed);
    }

    #[test]
    fn test_malformed_keeps_state() {
        let Pair {
            mut responder,
            init,
            ..
        } = pair(0x1006);
        let err = responder
            .handle(MessageType::HandshakeInit, &init.payload[..init.payload.len() - 1])
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Malformed(_)));
        assert_eq!(responder.stage(), HandshakeStage::AwaitingInitiatorMessage1);

        // The genuine message still works.
        assert!(responder.handle(init.message_type, &init.payload).is_ok());
    }

    #[test]
    fn test_session_id_mismatch_fails() {
        let Pair { init, .. } = pair(0x1007);
        let r_keys = StaticKeypair::generate();
        let mut other = Handshake::responder(SessionId::new(0x2000), &r_keys, suite()).unwrap();
        assert_eq!(
            other.handle(init.message_type, &init.payload).unwrap_err(),
            HandshakeError::VerificationFailed
        );
    }

    #[test]
    fn test_stall_timeout() {
        let Pair { mut initiator, .. } = pair(0x1008);
        assert!(initiator.fail_stalled());
        assert_eq!(initiator.failure(), Some(&HandshakeError::Timeout));
        assert!(!initiator.fail_stalled());
    }

    #[test]
    fn test_rekey_target_reaches_responder() {
        let i_keys = StaticKeypair::generate();
        let r_keys = StaticKeypair::generate();
        let sid = SessionId::new(0x100A);
        let old = SessionId::new(0x0042);
        let mut initiator = Handshake::initiator(sid, &i_keys, r_keys.public_key(), suite())
            .unwrap()
            .with_replaces(old);
        let mut responder = Handshake::responder(sid, &r_keys, suite()).unwrap();
        let init = initiator.start().unwrap();
        responder.handle(init.message_type, &init.payload).unwrap();
        assert_eq!(responder.replaces(), Some(old));
    }

    #[test]
    fn test_start_twice_rejected() {
        let Pair { mut initiator, .. } = pair(0x1009);
        assert!(initiator.start().is_err());
        assert_eq!(initiator.stage(), HandshakeStage::WaitingForResponderMessage1Ack);
    }
}
