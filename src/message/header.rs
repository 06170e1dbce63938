//! Packet header codec.
//!
//! Wire format (little-endian):
//! ```text
//! +-----------------+------------+--------+--------------+--------------+-------------+
//! | Message Counter | Session ID | Flags  | [Source Node]| [Dest Node]  | [Ack Cntr]  |
//! | 4 bytes         | 2 bytes    | 1 byte | 8 bytes      | 8 bytes      | 4 bytes     |
//! +-----------------+------------+--------+--------------+--------------+-------------+
//! ```
//!
//! Optional fields are present exactly when their flag bit is set. The whole
//! encoded header is the AEAD associated data.

use crate::core::{ACK_COUNTER_SIZE, FIXED_HEADER_SIZE, NODE_ID_SIZE, NodeId, SessionId};

use super::HeaderError;

/// Message flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageFlags(u8);

impl MessageFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Payload is AEAD-sealed.
    pub const ENCRYPTED: u8 = 0x01;
    /// Source node identifier follows.
    pub const HAS_SOURCE: u8 = 0x02;
    /// Destination node identifier follows.
    pub const HAS_DESTINATION: u8 = 0x04;
    /// Piggybacked acknowledgment counter follows.
    pub const HAS_ACK: u8 = 0x08;
    /// Bits this implementation does not understand.
    pub const RESERVED_MASK: u8 = 0xF0;

    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }

    pub fn is_encrypted(self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }

    pub fn has_source(self) -> bool {
        self.0 & Self::HAS_SOURCE != 0
    }

    pub fn has_destination(self) -> bool {
        self.0 & Self::HAS_DESTINATION != 0
    }

    pub fn has_ack(self) -> bool {
        self.0 & Self::HAS_ACK != 0
    }

    /// Reserved bits must be zero.
    pub fn is_valid(self) -> bool {
        self.0 & Self::RESERVED_MASK == 0
    }

    fn with(self, bit: u8, on: bool) -> Self {
        if on { Self(self.0 | bit) } else { self }
    }
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Per-session, per-direction message counter.
    pub message_counter: u32,
    /// Session selecting the crypto context.
    pub session_id: SessionId,
    /// Whether the payload is sealed.
    pub encrypted: bool,
    /// Optional source node.
    pub source_node: Option<NodeId>,
    /// Optional destination node.
    pub destination_node: Option<NodeId>,
    /// Optional piggybacked acknowledgment.
    pub ack_counter: Option<u32>,
}

impl PacketHeader {
    /// Header for a sealed message on `session_id`.
    pub fn secured(session_id: SessionId, message_counter: u32) -> Self {
        Self {
            message_counter,
            session_id,
            encrypted: true,
            source_node: None,
            destination_node: None,
            ack_counter: None,
        }
    }

    /// Header for a plaintext message on the unsecured session.
    pub fn unsecured(message_counter: u32) -> Self {
        Self {
            encrypted: false,
            ..Self::secured(SessionId::UNSECURED, message_counter)
        }
    }

    /// Flags byte derived from the optional fields.
    pub fn flags(&self) -> MessageFlags {
        MessageFlags::NONE
            .with(MessageFlags::ENCRYPTED, self.encrypted)
            .with(MessageFlags::HAS_SOURCE, self.source_node.is_some())
            .with(MessageFlags::HAS_DESTINATION, self.destination_node.is_some())
            .with(MessageFlags::HAS_ACK, self.ack_counter.is_some())
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        let flags = self.flags();
        FIXED_HEADER_SIZE
            + if flags.has_source() { NODE_ID_SIZE } else { 0 }
            + if flags.has_destination() { NODE_ID_SIZE } else { 0 }
            + if flags.has_ack() { ACK_COUNTER_SIZE } else { 0 }
    }

    /// Serialize the header.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.message_counter.to_le_bytes());
        buf.extend_from_slice(&self.session_id.to_le_bytes());
        buf.push(self.flags().as_byte());
        if let Some(node) = self.source_node {
            buf.extend_from_slice(&node.0.to_le_bytes());
        }
        if let Some(node) = self.destination_node {
            buf.extend_from_slice(&node.0.to_le_bytes());
        }
        if let Some(ack) = self.ack_counter {
            buf.extend_from_slice(&ack.to_le_bytes());
        }
        buf
    }

    /// Parse a header, returning it and the bytes that follow.
    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), HeaderError> {
        if bytes.len() < FIXED_HEADER_SIZE {
            return Err(HeaderError::TooShort {
                expected: FIXED_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let message_counter = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let session_id = SessionId::new(u16::from_le_bytes([bytes[4], bytes[5]]));
        let flags = MessageFlags::from_byte(bytes[6]);
        if !flags.is_valid() {
            return Err(HeaderError::ReservedFlags(flags.as_byte()));
        }
        if flags.is_encrypted() == session_id.is_unsecured() {
            return Err(HeaderError::EncryptionMismatch(session_id.value()));
        }

        let header = Self {
            message_counter,
            session_id,
            encrypted: flags.is_encrypted(),
            source_node: flags.has_source().then_some(NodeId(0)),
            destination_node: flags.has_destination().then_some(NodeId(0)),
            ack_counter: flags.has_ack().then_some(0),
        };
        let expected = header.encoded_len();
        if bytes.len() < expected {
            return Err(HeaderError::TooShort {
                expected,
                actual: bytes.len(),
            });
        }

        let mut cursor = FIXED_HEADER_SIZE;
        let mut take = |n: usize| {
            let field = &bytes[cursor..cursor + n];
            cursor += n;
            field
        };
        let read_node = |field: &[u8]| {
            let mut raw = [0u8; NODE_ID_SIZE];
            raw.copy_from_slice(field);
            NodeId(u64::from_le_bytes(raw))
        };

        let source_node = header.source_node.map(|_| read_node(take(NODE_ID_SIZE)));
        let destination_node = header
            .destination_node
            .map(|_| read_node(take(NODE_ID_SIZE)));
        let ack_counter = header.ack_counter.map(|_| {
            let field = take(ACK_COUNTER_SIZE);
            u32::from_le_bytes([field[0], field[1], field[2], field[3]])
        });

        Ok((
            Self {
                source_node,
                destination_node,
                ack_counter,
                ..header
            },
            &bytes[expected..],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_minimal_header_layout() {
        let header = PacketHeader::secured(SessionId::new(0x1234), 0x0A0B0C0D);
        let bytes = header.encode();
        assert_eq!(hex::encode(&bytes), "0d0c0b0a341201");
        assert_eq!(bytes.len(), FIXED_HEADER_SIZE);
    }

    #[test]
    fn test_full_header_layout() {
        let header = PacketHeader {
            source_node: Some(NodeId(1)),
            destination_node: Some(NodeId(2)),
            ack_counter: Some(7),
            ..PacketHeader::secured(SessionId::new(1), 5)
        };
        let bytes = header.encode();
        assert_eq!(bytes.len(), 7 + 8 + 8 + 4);
        assert_eq!(bytes[6], 0x0F);
        assert_eq!(&bytes[23..27], &[7, 0, 0, 0]);
    }

    #[test]
    fn test_decode_returns_remaining() {
        let header = PacketHeader::secured(SessionId::new(9), 1);
        let mut bytes = header.encode();
        bytes.extend_from_slice(b"payload");
        let (decoded, rest) = PacketHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(rest, b"payload");
    }

    #[test]
    fn test_reserved_flags_rejected() {
        let mut bytes = PacketHeader::secured(SessionId::new(9), 1).encode();
        bytes[6] |= 0x10;
        assert_eq!(
            PacketHeader::decode(&bytes),
            Err(HeaderError::ReservedFlags(0x11))
        );
    }

    #[test]
    fn test_encryption_flag_must_match_session() {
        let mut bytes = PacketHeader::unsecured(1).encode();
        bytes[6] |= MessageFlags::ENCRYPTED;
        assert!(matches!(
            PacketHeader::decode(&bytes),
            Err(HeaderError::EncryptionMismatch(0))
        ));

        let mut bytes = PacketHeader::secured(SessionId::new(3), 1).encode();
        bytes[6] &= !MessageFlags::ENCRYPTED;
        assert!(matches!(
            PacketHeader::decode(&bytes),
            Err(HeaderError::EncryptionMismatch(3))
        ));
    }

    #[test]
    fn test_optional_field_past_end() {
        let header = PacketHeader {
            source_node: Some(NodeId(0xAABB)),
            ..PacketHeader::secured(SessionId::new(2), 1)
        };
        let bytes = header.encode();
        assert_eq!(
            PacketHeader::decode(&bytes[..10]),
            Err(HeaderError::TooShort {
                expected: 15,
                actual: 10
            })
        );
    }

    #[test]
    fn test_too_short_fixed() {
        assert_eq!(
            PacketHeader::decode(&[0u8; 3]),
            Err(HeaderError::TooShort {
                expected: FIXED_HEADER_SIZE,
                actual: 3
            })
        );
    }

    fn arb_header() -> impl Strategy<Value = PacketHeader> {
        (
            any::<u32>(),
            any::<u16>(),
            proptest::option::of(any::<u64>()),
            proptest::option::of(any::<u64>()),
            proptest::option::of(any::<u32>()),
        )
            .prop_map(|(counter, sid, src, dst, ack)| PacketHeader {
                message_counter: counter,
                session_id: SessionId::new(sid),
                encrypted: sid != 0,
                source_node: src.map(NodeId),
                destination_node: dst.map(NodeId),
                ack_counter: ack,
            })
    }

    proptest! {
        #[test]
        fn prop_header_roundtrip(header in arb_header()) {
            let bytes = header.encode();
            let (decoded, rest) = PacketHeader::decode(&bytes).unwrap();
            prop_assert_eq!(decoded, header);
            prop_assert!(rest.is_empty());
        }
    }
}
