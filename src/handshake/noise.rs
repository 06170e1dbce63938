//! Noise_IK key agreement via `snow`.
//!
//! ```text
//! Noise_IK(s, rs):
//!   <- s                    # Responder's static key known to Initiator
//!   ...
//!   -> e, es, s, ss         # carried in HandshakeInit
//!   <- e, ee, se            # carried in HandshakeResponse
//! ```
//!
//! The prologue binds the proposed session identifier, so a message lifted
//! into a handshake for a different session fails to decrypt.

use snow::{Builder, HandshakeState, params::NoiseParams};

use crate::core::{HASH_SIZE, NOISE_PATTERN, PUBLIC_KEY_SIZE, SessionId};
use crate::crypto::StaticKeypair;

use super::HandshakeError;

const PROLOGUE_LABEL: &[u8] = b"homelink handshake v1";
const NOISE_BUFFER_SIZE: usize = 1024;

fn params() -> Result<NoiseParams, HandshakeError> {
    NOISE_PATTERN
        .parse()
        .map_err(|e: snow::Error| HandshakeError::Noise(e.to_string()))
}

fn prologue(session_id: SessionId) -> Vec<u8> {
    let mut prologue = PROLOGUE_LABEL.to_vec();
    prologue.extend_from_slice(&session_id.to_le_bytes());
    prologue
}

/// One side of an in-progress Noise handshake.
pub(crate) struct NoiseHandshake {
    state: HandshakeState,
}

impl NoiseHandshake {
    pub(crate) fn initiator(
        local: &StaticKeypair,
        remote_static: &[u8; PUBLIC_KEY_SIZE],
        session_id: SessionId,
    ) -> Result<Self, HandshakeError> {
        let prologue = prologue(session_id);
        let state = Builder::new(params()?)
            .local_private_key(local.private_key())
            .remote_public_key(remote_static)
            .prologue(&prologue)
            .build_initiator()
            .map_err(|e| HandshakeError::Noise(e.to_string()))?;
        Ok(Self { state })
    }

    pub(crate) fn responder(
        local: &StaticKeypair,
        session_id: SessionId,
    ) -> Result<Self, HandshakeError> {
        let prologue = prologue(session_id);
        let state = Builder::new(params()?)
            .local_private_key(local.private_key())
            .prologue(&prologue)
            .build_responder()
            .map_err(|e| HandshakeError::Noise(e.to_string()))?;
        Ok(Self { state })
    }

    /// Produce our next Noise message (empty payload).
    pub(crate) fn write_message(&mut self) -> Result<Vec<u8>, HandshakeError> {
        let mut buf = vec![0u8; NOISE_BUFFER_SIZE];
        let len = self
            .state
            .write_message(&[], &mut buf)
            .map_err(|e| HandshakeError::Noise(e.to_string()))?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Consume the peer's Noise message. Any failure is a verification failure.
    pub(crate) fn read_message(&mut self, message: &[u8]) -> Result<(), HandshakeError> {
        let mut payload = vec![0u8; NOISE_BUFFER_SIZE];
        self.state
            .read_message(message, &mut payload)
            .map_err(|_| HandshakeError::VerificationFailed)?;
        Ok(())
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state.is_handshake_finished()
    }

    pub(crate) fn handshake_hash(&self) -> [u8; HASH_SIZE] {
        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(self.state.get_handshake_hash());
        hash
    }

    pub(crate) fn remote_static(&self) -> Option<[u8; PUBLIC_KEY_SIZE]> {
        let remote = self.state.get_remote_static()?;
        let mut key = [0u8; PUBLIC_KEY_SIZE];
        key.copy_from_slice(remote);
        Some(key)
    }
}

impl std::fmt::Debug for NoiseHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseHandshake")
            .field("finished", &self.is_finished())
            .finish()
    }
}
