//! Streaming TLV writer.

use crate::core::MAX_CONTAINER_DEPTH;

use super::element::{ContainerScope, END_OF_CONTAINER, ElementType};
use super::{ContainerKind, Element, Tag, TlvError, Value};

/// Append-only TLV encoder.
///
/// Container rules are enforced as elements are written, so a finished buffer
/// always decodes back to the same tree.
#[derive(Debug, Default)]
pub struct TlvWriter {
    buf: Vec<u8>,
    scopes: Vec<ContainerScope>,
}

impl TlvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a primitive or an entire container subtree.
    pub fn put(&mut self, tag: Tag, value: &Value) -> Result<(), TlvError> {
        if let Some(kind) = value.container_kind() {
            self.start_container(tag, kind)?;
            for member in value.members().unwrap_or_default() {
                self.put(member.tag, &member.value)?;
            }
            return self.end_container();
        }

        self.admit(tag)?;
        match value {
            Value::Int8(v) => self.primitive(tag, ElementType::Int8, &v.to_le_bytes()),
            Value::Int16(v) => self.primitive(tag, ElementType::Int16, &v.to_le_bytes()),
            Value::Int32(v) => self.primitive(tag, ElementType::Int32, &v.to_le_bytes()),
            Value::Int64(v) => self.primitive(tag, ElementType::Int64, &v.to_le_bytes()),
            Value::UInt8(v) => self.primitive(tag, ElementType::UInt8, &v.to_le_bytes()),
            Value::UInt16(v) => self.primitive(tag, ElementType::UInt16, &v.to_le_bytes()),
            Value::UInt32(v) => self.primitive(tag, ElementType::UInt32, &v.to_le_bytes()),
            Value::UInt64(v) => self.primitive(tag, ElementType::UInt64, &v.to_le_bytes()),
            Value::Bool(false) => self.primitive(tag, ElementType::False, &[]),
            Value::Bool(true) => self.primitive(tag, ElementType::True, &[]),
            Value::Float32(v) => self.primitive(tag, ElementType::Float32, &v.to_le_bytes()),
            Value::Float64(v) => self.primitive(tag, ElementType::Float64, &v.to_le_bytes()),
            Value::Utf8(s) => self.length_prefixed(tag, ElementType::Utf8L1, s.as_bytes()),
            Value::Bytes(b) => self.length_prefixed(tag, ElementType::BytesL1, b),
            Value::Null => self.primitive(tag, ElementType::Null, &[]),
            Value::Structure(_) | Value::Array(_) | Value::List(_) => {}
        }
        Ok(())
    }

    pub fn put_element(&mut self, element: &Element) -> Result<(), TlvError> {
        self.put(element.tag, &element.value)
    }

    /// Open a container. Members follow until [`end_container`](Self::end_container).
    pub fn start_container(&mut self, tag: Tag, kind: ContainerKind) -> Result<(), TlvError> {
        if self.scopes.len() >= MAX_CONTAINER_DEPTH {
            return Err(TlvError::DepthExceeded);
        }
        self.admit(tag)?;
        self.control(tag, kind.element_type());
        self.scopes.push(ContainerScope::new(kind));
        Ok(())
    }

    /// Close the innermost open container.
    pub fn end_container(&mut self) -> Result<(), TlvError> {
        self.scopes
            .pop()
            .ok_or(TlvError::UnmatchedEndOfContainer)?;
        self.buf.push(END_OF_CONTAINER);
        Ok(())
    }

    /// Innermost open container, if any.
    pub fn current_container(&self) -> Option<ContainerKind> {
        self.scopes.last().map(ContainerScope::kind)
    }

    /// Return the encoded bytes. Fails if a container is still open.
    pub fn finish(self) -> Result<Vec<u8>, TlvError> {
        if !self.scopes.is_empty() {
            return Err(TlvError::UnbalancedContainer);
        }
        Ok(self.buf)
    }

    fn admit(&mut self, tag: Tag) -> Result<(), TlvError> {
        match self.scopes.last_mut() {
            Some(scope) => scope.admit(tag),
            None => Ok(()),
        }
    }

    fn control(&mut self, tag: Tag, ty: ElementType) {
        self.buf.push((tag.control() << 5) | ty.as_byte());
        tag.write_to(&mut self.buf);
    }

    fn primitive(&mut self, tag: Tag, ty: ElementType, value: &[u8]) {
        self.control(tag, ty);
        self.buf.extend_from_slice(value);
    }

    /// `base` is the 1-byte-length variant; wider variants follow it.
    fn length_prefixed(&mut self, tag: Tag, base: ElementType, data: &[u8]) {
        let len = data.len() as u64;
        let (width, prefix): (u8, &[u8]) = if len <= u8::MAX as u64 {
            (0, &len.to_le_bytes()[..1])
        } else if len <= u16::MAX as u64 {
            (1, &len.to_le_bytes()[..2])
        } else if len <= u32::MAX as u64 {
            (2, &len.to_le_bytes()[..4])
        } else {
            (3, &len.to_le_bytes()[..])
        };
        self.buf.push((tag.control() << 5) | (base.as_byte() + width));
        tag.write_to(&mut self.buf);
        self.buf.extend_from_slice(prefix);
        self.buf.extend_from_slice(data);
    }
}
