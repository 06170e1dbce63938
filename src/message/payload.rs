//! In-payload header: exchange flags and message type.
//!
//! ```text
//! +----------------+--------------+------------------+
//! | Exchange Flags | Message Type | Body (TLV / raw) |
//! | 1 byte         | 1 byte       | variable         |
//! +----------------+--------------+------------------+
//! ```

use crate::core::PAYLOAD_HEADER_SIZE;

use super::HeaderError;

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// TLV-encoded application payload.
    ApplicationData = 0x01,
    /// Acknowledgment with no body; the counter rides in the packet header.
    StandaloneAck = 0x10,
    /// Peer is tearing the session down.
    SessionClose = 0x11,
    /// Handshake message 1 (initiator).
    HandshakeInit = 0x20,
    /// Handshake message 2 (responder).
    HandshakeResponse = 0x21,
    /// Handshake message 3 (initiator key confirmation).
    HandshakeConfirm = 0x22,
    /// Handshake message 4 (responder key confirmation).
    HandshakeFinished = 0x23,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::ApplicationData),
            0x10 => Some(Self::StandaloneAck),
            0x11 => Some(Self::SessionClose),
            0x20 => Some(Self::HandshakeInit),
            0x21 => Some(Self::HandshakeResponse),
            0x22 => Some(Self::HandshakeConfirm),
            0x23 => Some(Self::HandshakeFinished),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Handshake messages travel on the unsecured session only.
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            Self::HandshakeInit
                | Self::HandshakeResponse
                | Self::HandshakeConfirm
                | Self::HandshakeFinished
        )
    }
}

/// Exchange flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExchangeFlags(u8);

impl ExchangeFlags {
    pub const NONE: Self = Self(0);
    /// Sender wants this message acknowledged.
    pub const ACK_REQUESTED: Self = Self(0x01);

    const RESERVED_MASK: u8 = 0xFE;

    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }

    pub fn ack_requested(self) -> bool {
        self.0 & 0x01 != 0
    }

    pub fn with_ack_requested(self) -> Self {
        Self(self.0 | 0x01)
    }

    pub fn is_valid(self) -> bool {
        self.0 & Self::RESERVED_MASK == 0
    }
}

/// Decoded payload header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub exchange_flags: ExchangeFlags,
    pub message_type: MessageType,
}

impl PayloadHeader {
    pub fn new(message_type: MessageType, ack_requested: bool) -> Self {
        let exchange_flags = if ack_requested {
            ExchangeFlags::ACK_REQUESTED
        } else {
            ExchangeFlags::NONE
        };
        Self {
            exchange_flags,
            message_type,
        }
    }

    pub fn to_bytes(&self) -> [u8; PAYLOAD_HEADER_SIZE] {
        [self.exchange_flags.as_byte(), self.message_type.as_byte()]
    }

    /// Prepend the header to `body`.
    pub fn frame(&self, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAYLOAD_HEADER_SIZE + body.len());
        buf.extend_from_slice(&self.to_bytes());
        buf.extend_from_slice(body);
        buf
    }

    /// Parse the header, returning it and the body.
    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), HeaderError> {
        if bytes.len() < PAYLOAD_HEADER_SIZE {
            return Err(HeaderError::TooShort {
                expected: PAYLOAD_HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let exchange_flags = ExchangeFlags::from_byte(bytes[0]);
        if !exchange_flags.is_valid() {
            return Err(HeaderError::ReservedExchangeFlags(bytes[0]));
        }
        let message_type =
            MessageType::from_byte(bytes[1]).ok_or(HeaderError::UnknownMessageType(bytes[1]))?;
        Ok((
            Self {
                exchange_flags,
                message_type,
            },
            &bytes[PAYLOAD_HEADER_SIZE..],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_roundtrip() {
        for ty in [
            MessageType::ApplicationData,
            MessageType::StandaloneAck,
            MessageType::SessionClose,
            MessageType::HandshakeInit,
            MessageType::HandshakeResponse,
            MessageType::HandshakeConfirm,
            MessageType::HandshakeFinished,
        ] {
            assert_eq!(MessageType::from_byte(ty.as_byte()), Some(ty));
        }
        assert_eq!(MessageType::from_byte(0x02), None);
        assert!(MessageType::HandshakeConfirm.is_handshake());
        assert!(!MessageType::StandaloneAck.is_handshake());
    }

    #[test]
    fn test_payload_header_frame_and_decode() {
        let header = PayloadHeader::new(MessageType::ApplicationData, true);
        let framed = header.frame(&[0x15, 0x18]);
        assert_eq!(hex::encode(&framed), "01011518");
        let (decoded, body) = PayloadHeader::decode(&framed).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.exchange_flags.ack_requested());
        assert_eq!(body, &[0x15, 0x18]);
    }

    #[test]
    fn test_reserved_exchange_flags_rejected() {
        assert_eq!(
            PayloadHeader::decode(&[0x02, 0x01]),
            Err(HeaderError::ReservedExchangeFlags(0x02))
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert_eq!(
            PayloadHeader::decode(&[0x00, 0x7F]),
            Err(HeaderError::UnknownMessageType(0x7F))
        );
        assert!(matches!(
            PayloadHeader::decode(&[0x00]),
            Err(HeaderError::TooShort { .. })
        ));
    }
}
