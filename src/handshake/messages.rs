//! Handshake message bodies.
//!
//! Every handshake message is an anonymous TLV structure:
//!
//! | Tag | Field            | Type        | Present in            |
//! |-----|------------------|-------------|-----------------------|
//! | 1   | session id       | uint16      | all                   |
//! | 2   | transcript hash  | bytes (32)  | all                   |
//! | 3   | noise message    | bytes       | Init, Response        |
//! | 4   | confirmation MAC | bytes (32)  | Confirm, Finished     |
//! | 5   | replaced session | uint16      | Init, when rekeying   |
//!
//! Unknown members are skipped without being decoded.

use crate::core::{HASH_SIZE, SessionId};
use crate::message::MessageType;
use crate::tlv::{ContainerKind, Tag, TlvError, TlvReader, TlvWriter, Value, ValueRef};

const TAG_SESSION_ID: u8 = 1;
const TAG_TRANSCRIPT: u8 = 2;
const TAG_NOISE: u8 = 3;
const TAG_MAC: u8 = 4;
const TAG_REPLACES: u8 = 5;

/// Type-specific part of a handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeBody {
    /// Noise key-agreement message (Init, Response).
    Noise(Vec<u8>),
    /// Key-confirmation MAC (Confirm, Finished).
    Mac([u8; HASH_SIZE]),
}

/// A decoded handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub session_id: SessionId,
    /// Hash of every handshake message before this one.
    pub transcript: [u8; HASH_SIZE],
    pub body: HandshakeBody,
    /// Session this handshake rekeys, if any.
    pub replaces: Option<SessionId>,
}

impl HandshakeMessage {
    pub fn encode(&self) -> Result<Vec<u8>, TlvError> {
        let mut w = TlvWriter::new();
        w.start_container(Tag::Anonymous, ContainerKind::Structure)?;
        w.put(
            Tag::Context(TAG_SESSION_ID),
            &Value::UInt16(self.session_id.value()),
        )?;
        w.put(
            Tag::Context(TAG_TRANSCRIPT),
            &Value::Bytes(self.transcript.to_vec()),
        )?;
        match &self.body {
            HandshakeBody::Noise(noise) => {
                w.put(Tag::Context(TAG_NOISE), &Value::Bytes(noise.clone()))?
            }
            HandshakeBody::Mac(mac) => w.put(Tag::Context(TAG_MAC), &Value::Bytes(mac.to_vec()))?,
        }
        if let Some(replaces) = self.replaces {
            w.put(
                Tag::Context(TAG_REPLACES),
                &Value::UInt16(replaces.value()),
            )?;
        }
        w.end_container()?;
        w.finish()
    }

    /// Decode and check that the fields `message_type` requires are present.
    pub fn decode(message_type: MessageType, payload: &[u8]) -> Result<Self, TlvError> {
        let fields = Fields::read(payload)?;
        let session_id = fields.session_id.ok_or(TlvError::MissingField(TAG_SESSION_ID))?;
        let transcript = fields.transcript.ok_or(TlvError::MissingField(TAG_TRANSCRIPT))?;
        let body = match message_type {
            MessageType::HandshakeInit | MessageType::HandshakeResponse => {
                HandshakeBody::Noise(fields.noise.ok_or(TlvError::MissingField(TAG_NOISE))?)
            }
            MessageType::HandshakeConfirm | MessageType::HandshakeFinished => {
                HandshakeBody::Mac(fields.mac.ok_or(TlvError::MissingField(TAG_MAC))?)
            }
            _ => return Err(TlvError::UnexpectedType),
        };
        Ok(Self {
            session_id,
            transcript,
            body,
            replaces: fields.replaces,
        })
    }
}

/// Read only the session identifier, for routing before a handshake exists.
pub fn session_id_of(payload: &[u8]) -> Result<SessionId, TlvError> {
    Fields::read(payload)?
        .session_id
        .ok_or(TlvError::MissingField(TAG_SESSION_ID))
}

#[derive(Default)]
struct Fields {
    session_id: Option<SessionId>,
    transcript: Option<[u8; HASH_SIZE]>,
    noise: Option<Vec<u8>>,
    mac: Option<[u8; HASH_SIZE]>,
    replaces: Option<SessionId>,
}

impl Fields {
    fn read(payload: &[u8]) -> Result<Self, TlvError> {
        let mut r = TlvReader::new(payload);
        let top = r.next_element()?.ok_or(TlvError::Truncated)?;
        if top.value != ValueRef::Container(ContainerKind::Structure) {
            return Err(TlvError::UnexpectedType);
        }
        r.enter_container()?;

        let mut fields = Fields::default();
        while let Some(item) = r.next_element()? {
            match (item.tag, item.value) {
                (Tag::Context(TAG_SESSION_ID), ValueRef::UInt16(id)) => {
                    fields.session_id = Some(SessionId::new(id));
                }
                (Tag::Context(TAG_TRANSCRIPT), ValueRef::Bytes(b)) => {
                    fields.transcript = Some(fixed_hash(b)?);
                }
                (Tag::Context(TAG_NOISE), ValueRef::Bytes(b)) => {
                    fields.noise = Some(b.to_vec());
                }
                (Tag::Context(TAG_MAC), ValueRef::Bytes(b)) => {
                    fields.mac = Some(fixed_hash(b)?);
                }
                (Tag::Context(TAG_REPLACES), ValueRef::UInt16(id)) => {
                    fields.replaces = Some(SessionId::new(id));
                }
                (Tag::Context(TAG_SESSION_ID..=TAG_REPLACES), _) => {
                    return Err(TlvError::UnexpectedType);
                }
                _ => {}
            }
        }
        r.exit_container()?;
        if r.next_element()?.is_some() {
            return Err(TlvError::TrailingBytes);
        }
        Ok(fields)
    }
}

fn fixed_hash(bytes: &[u8]) -> Result<[u8; HASH_SIZE], TlvError> {
    bytes.try_into().map_err(|_| TlvError::UnexpectedType)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlv::{Element, encode};

    fn init_message() -> HandshakeMessage {
        HandshakeMessage {
            session_id: SessionId::new(0x4242),
            transcript: [7u8; HASH_SIZE],
            body: HandshakeBody::Noise(vec![1, 2, 3]),
            replaces: Some(SessionId::new(0x0101)),
        }
    }

    #[test]
    fn test_encode_decode() {
        let msg = init_message();
        let bytes = msg.encode().unwrap();
        assert_eq!(
            HandshakeMessage::decode(MessageType::HandshakeInit, &bytes).unwrap(),
            msg
        );
        assert_eq!(session_id_of(&bytes).unwrap(), SessionId::new(0x4242));
    }

    #[test]
    fn test_missing_body_for_type() {
        let bytes = init_message().encode().unwrap();
        assert_eq!(
            HandshakeMessage::decode(MessageType::HandshakeConfirm, &bytes),
            Err(TlvError::MissingField(TAG_MAC))
        );
    }

    #[test]
    fn test_unknown_members_skipped() {
        let e = Element::structure(vec![
            Element::context(9, Value::List(vec![Element::context(1, "ignored")])),
            Element::context(TAG_SESSION_ID, 3u16),
            Element::context(TAG_TRANSCRIPT, vec![0u8; HASH_SIZE]),
            Element::context(TAG_MAC, vec![1u8; HASH_SIZE]),
        ]);
        let bytes = encode(&e).unwrap();
        let msg = HandshakeMessage::decode(MessageType::HandshakeFinished, &bytes).unwrap();
        assert_eq!(msg.body, HandshakeBody::Mac([1u8; HASH_SIZE]));
    }

    #[test]
    fn test_wrong_field_type() {
        let e = Element::structure(vec![Element::context(TAG_SESSION_ID, "nope")]);
        let bytes = encode(&e).unwrap();
        assert_eq!(session_id_of(&bytes), Err(TlvError::UnexpectedType));
    }

    #[test]
    fn test_short_transcript_rejected() {
        let e = Element::structure(vec![
            Element::context(TAG_SESSION_ID, 3u16),
            Element::context(TAG_TRANSCRIPT, vec![0u8; 8]),
        ]);
        let bytes = encode(&e).unwrap();
        assert!(HandshakeMessage::decode(MessageType::HandshakeInit, &bytes).is_err());
    }
}
