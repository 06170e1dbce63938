//! AEAD nonce construction.
//!
//! Nonces are 12 bytes and fully deterministic:
//! - Direction (1 byte): 0x00 = Initiator→Responder, 0x01 = Responder→Initiator
//! - Session ID (2 bytes, LE)
//! - Zeros (5 bytes)
//! - Message counter (4 bytes, LE)

use crate::core::{AEAD_NONCE_SIZE, NONCE_DIR_INITIATOR, NONCE_DIR_RESPONDER, SessionId};

/// Direction of communication for nonce construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Initiator → Responder (0x00)
    InitiatorToResponder,
    /// Responder → Initiator (0x01)
    ResponderToInitiator,
}

impl Direction {
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::InitiatorToResponder => NONCE_DIR_INITIATOR,
            Direction::ResponderToInitiator => NONCE_DIR_RESPONDER,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::InitiatorToResponder => Direction::ResponderToInitiator,
            Direction::ResponderToInitiator => Direction::InitiatorToResponder,
        }
    }
}

/// Build the nonce for one sealed message.
///
/// ```text
/// [ direction (1) | session_id (2) | zeros (5) | counter (4) ]
/// ```
pub fn construct_nonce(
    direction: Direction,
    session_id: SessionId,
    counter: u32,
) -> [u8; AEAD_NONCE_SIZE] {
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce[0] = direction.as_byte();
    nonce[1..3].copy_from_slice(&session_id.to_le_bytes());
    nonce[8..12].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Split a nonce back into its components.
pub fn parse_nonce(nonce: &[u8; AEAD_NONCE_SIZE]) -> (Direction, SessionId, u32) {
    let direction = if nonce[0] == NONCE_DIR_INITIATOR {
        Direction::InitiatorToResponder
    } else {
        Direction::ResponderToInitiator
    };
    let session_id = SessionId::new(u16::from_le_bytes([nonce[1], nonce[2]]));
    let counter = u32::from_le_bytes([nonce[8], nonce[9], nonce[10], nonce[11]]);
    (direction, session_id, counter)
}
